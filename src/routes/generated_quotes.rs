//! Stored customer quotes: header, priced lines and their PDF.
//!
//! Totals are never taken from the client. Every change to a quote's lines or
//! tax rate recomputes subtotal, tax and total inside the same transaction.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::companies::{fetch_company, load_company_rates};
use super::matching::{load_catalog, match_takeoff};
use super::pdf_export::company_block;
use super::takeoff::{load_takeoffs, TakeoffRow};
use super::{require_project, trimmed, validated};
use crate::api::{Created, DataResponse, FileDownload, MessageResponse, Paginated, PaginationParams};
use crate::app::AppState;
use crate::auth::RequireTenant;
use crate::domain::generated_quotes::{
    validate_dates, CreateGeneratedQuoteRequest, CustomerDetails, GeneratedQuoteQuery,
    GeneratedQuoteResponse, GeneratedQuoteStatus, QuoteFromTakeoffsRequest, QuoteLineInput,
    QuoteLineResponse, UpdateGeneratedQuoteRequest, UpdateQuoteLineRequest,
};
use crate::domain::{decimal_to_f64, f64_to_decimal};
use crate::error::ApiError;
use crate::services::estimator::{money, DEFAULT_TAX_PERCENT};
use crate::services::matcher::{select_best, CatalogEntry, MaterialMatch, MaterialMatcher, DEFAULT_THRESHOLD};
use crate::services::quote_pdf::{
    self, quote_totals, CustomerBlock, QuoteDocument, QuoteLine, QUOTE_VALID_DAYS,
};

// ============================================================================
// Rows
// ============================================================================

#[derive(Debug, Clone, sqlx::FromRow)]
struct GeneratedQuoteRow {
    id: Uuid,
    project_id: Uuid,
    created_by: Option<Uuid>,
    quote_number: String,
    quote_date: NaiveDate,
    expiration_date: NaiveDate,
    customer_name: Option<String>,
    customer_company: Option<String>,
    customer_email: Option<String>,
    customer_phone: Option<String>,
    delivery_address: Option<String>,
    job_name: String,
    job_reference: Option<String>,
    subtotal: Decimal,
    tax_percentage: Decimal,
    tax_amount: Decimal,
    total: Decimal,
    status: String,
    special_instructions: Option<String>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl GeneratedQuoteRow {
    fn into_response(self, lines: Option<Vec<LineRow>>) -> GeneratedQuoteResponse {
        GeneratedQuoteResponse {
            id: self.id,
            project_id: self.project_id,
            created_by: self.created_by,
            quote_number: self.quote_number,
            quote_date: self.quote_date,
            expiration_date: self.expiration_date,
            customer_name: self.customer_name,
            customer_company: self.customer_company,
            customer_email: self.customer_email,
            customer_phone: self.customer_phone,
            delivery_address: self.delivery_address,
            job_name: self.job_name,
            job_reference: self.job_reference,
            subtotal: decimal_to_f64(self.subtotal),
            tax_percentage: decimal_to_f64(self.tax_percentage),
            tax_amount: decimal_to_f64(self.tax_amount),
            total: decimal_to_f64(self.total),
            status: GeneratedQuoteStatus::parse(&self.status),
            special_instructions: self.special_instructions,
            notes: self.notes,
            lines: lines.map(|rows| rows.into_iter().map(Into::into).collect()),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

const QUOTE_COLUMNS: &str = "id, project_id, created_by, quote_number, quote_date, expiration_date, \
     customer_name, customer_company, customer_email, customer_phone, delivery_address, job_name, \
     job_reference, subtotal, tax_percentage, tax_amount, total, status, special_instructions, \
     notes, created_at, updated_at";

#[derive(Debug, Clone, sqlx::FromRow)]
struct LineRow {
    id: Uuid,
    takeoff_item_id: Option<Uuid>,
    material_id: Option<Uuid>,
    line_number: i32,
    category: Option<String>,
    quantity: Decimal,
    unit: String,
    product_code: Option<String>,
    description: String,
    unit_price: Decimal,
    total_price: Decimal,
    notes: Option<String>,
}

impl From<LineRow> for QuoteLineResponse {
    fn from(row: LineRow) -> Self {
        Self {
            id: row.id,
            line_number: row.line_number,
            takeoff_item_id: row.takeoff_item_id,
            material_id: row.material_id,
            category: row.category,
            quantity: decimal_to_f64(row.quantity),
            unit: row.unit,
            product_code: row.product_code,
            description: row.description,
            unit_price: decimal_to_f64(row.unit_price),
            total_price: decimal_to_f64(row.total_price),
            notes: row.notes,
        }
    }
}

impl From<LineRow> for QuoteLine {
    fn from(row: LineRow) -> Self {
        Self {
            category: row.category.unwrap_or_default(),
            qty: row.quantity,
            product_code: row.product_code.unwrap_or_default(),
            description: row.description,
            unit_price: row.unit_price,
            unit: row.unit,
        }
    }
}

const LINE_COLUMNS: &str = "id, takeoff_item_id, material_id, line_number, category, quantity, \
     unit, product_code, description, unit_price, total_price, notes";

// ============================================================================
// Lines and totals
// ============================================================================

/// A line ready to be written
#[derive(Debug, Clone, PartialEq)]
struct NewLine {
    takeoff_item_id: Option<Uuid>,
    material_id: Option<Uuid>,
    line_number: Option<i32>,
    category: Option<String>,
    quantity: Decimal,
    unit: String,
    product_code: Option<String>,
    description: String,
    unit_price: Decimal,
    notes: Option<String>,
}

fn amount(value: f64, field: &str) -> Result<Decimal, ApiError> {
    f64_to_decimal(value).ok_or_else(|| ApiError::bad_request(format!("{} is not a valid number", field)))
}

impl NewLine {
    fn from_input(input: QuoteLineInput) -> Result<Self, ApiError> {
        Ok(Self {
            takeoff_item_id: input.takeoff_item_id,
            material_id: input.material_id,
            line_number: input.line_number,
            category: trimmed(input.category),
            quantity: amount(input.quantity, "quantity")?,
            unit: input.unit.trim().to_uppercase(),
            product_code: trimmed(input.product_code),
            description: input.description.trim().to_string(),
            unit_price: amount(input.unit_price, "unit_price")?,
            notes: trimmed(input.notes),
        })
    }

    fn from_row(row: LineRow) -> Self {
        Self {
            takeoff_item_id: row.takeoff_item_id,
            material_id: row.material_id,
            line_number: Some(row.line_number),
            category: row.category,
            quantity: row.quantity,
            unit: row.unit,
            product_code: row.product_code,
            description: row.description,
            unit_price: row.unit_price,
            notes: row.notes,
        }
    }

    /// Overlay the fields an update supplies
    fn apply(mut self, req: UpdateQuoteLineRequest) -> Result<Self, ApiError> {
        if let Some(n) = req.line_number {
            self.line_number = Some(n);
        }
        if let Some(category) = req.category {
            self.category = trimmed(Some(category));
        }
        if let Some(q) = req.quantity {
            self.quantity = amount(q, "quantity")?;
        }
        if let Some(unit) = trimmed(req.unit) {
            self.unit = unit.to_uppercase();
        }
        if let Some(code) = req.product_code {
            self.product_code = trimmed(Some(code));
        }
        if let Some(description) = trimmed(req.description) {
            self.description = description;
        }
        if let Some(p) = req.unit_price {
            self.unit_price = amount(p, "unit_price")?;
        }
        if let Some(notes) = req.notes {
            self.notes = trimmed(Some(notes));
        }
        Ok(self)
    }

    fn total(&self) -> Decimal {
        money(self.quantity * self.unit_price)
    }
}

/// Price one takeoff item: its stored catalog match first, then a fresh
/// match, then an unpriced line for manual entry.
fn price_takeoff(
    row: &TakeoffRow,
    stored: Option<&CatalogEntry>,
    fresh: Option<&MaterialMatch>,
) -> NewLine {
    let material = stored.or(fresh.map(|m| &m.material));
    match material {
        Some(material) => NewLine {
            takeoff_item_id: Some(row.id),
            material_id: Some(material.id),
            line_number: None,
            category: row.category.clone().or_else(|| Some(material.category.clone())),
            quantity: row.qty,
            unit: material.unit.clone(),
            product_code: Some(material.product_code.clone()),
            description: material.description.clone(),
            unit_price: match stored {
                Some(_) => row.unit_price.unwrap_or(material.unit_price),
                None => material.unit_price,
            },
            notes: row.notes.clone(),
        },
        None => NewLine {
            takeoff_item_id: Some(row.id),
            material_id: None,
            line_number: None,
            category: row.category.clone(),
            quantity: row.qty,
            unit: row.unit.clone(),
            product_code: None,
            description: row.label.clone(),
            unit_price: Decimal::ZERO,
            notes: Some("No catalog match; price manually".to_string()),
        },
    }
}

async fn insert_line(
    conn: &mut PgConnection,
    quote_id: Uuid,
    line: &NewLine,
) -> Result<LineRow, ApiError> {
    let row = sqlx::query_as(&format!(
        r#"
        INSERT INTO generated_quote_lines (generated_quote_id, takeoff_item_id, material_id,
                                           line_number, category, quantity, unit, product_code,
                                           description, unit_price, total_price, notes)
        VALUES ($1, $2, $3,
                COALESCE($4, (SELECT COALESCE(MAX(line_number), 0) + 1
                              FROM generated_quote_lines WHERE generated_quote_id = $1)),
                $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING {}
        "#,
        LINE_COLUMNS
    ))
    .bind(quote_id)
    .bind(line.takeoff_item_id)
    .bind(line.material_id)
    .bind(line.line_number)
    .bind(&line.category)
    .bind(line.quantity)
    .bind(&line.unit)
    .bind(&line.product_code)
    .bind(&line.description)
    .bind(line.unit_price)
    .bind(line.total())
    .bind(&line.notes)
    .fetch_one(conn)
    .await?;
    Ok(row)
}

async fn load_lines(conn: &mut PgConnection, quote_id: Uuid) -> Result<Vec<LineRow>, ApiError> {
    let rows = sqlx::query_as(&format!(
        "SELECT {} FROM generated_quote_lines WHERE generated_quote_id = $1 ORDER BY line_number, created_at",
        LINE_COLUMNS
    ))
    .bind(quote_id)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

/// Recompute subtotal, tax and total from the stored lines.
async fn refresh_totals(
    conn: &mut PgConnection,
    quote_id: Uuid,
) -> Result<GeneratedQuoteRow, ApiError> {
    let line_totals: Vec<Decimal> =
        sqlx::query_scalar("SELECT total_price FROM generated_quote_lines WHERE generated_quote_id = $1")
            .bind(quote_id)
            .fetch_all(&mut *conn)
            .await?;
    let tax_percentage: Decimal =
        sqlx::query_scalar("SELECT tax_percentage FROM generated_quotes WHERE id = $1")
            .bind(quote_id)
            .fetch_one(&mut *conn)
            .await?;

    let totals = quote_totals(line_totals, Some(tax_percentage));

    let row = sqlx::query_as(&format!(
        r#"
        UPDATE generated_quotes SET
            subtotal = $2,
            tax_amount = $3,
            total = $4,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        QUOTE_COLUMNS
    ))
    .bind(quote_id)
    .bind(totals.subtotal)
    .bind(totals.tax_amount)
    .bind(totals.grand_total)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row)
}

async fn fetch_quote(
    db: &PgPool,
    project_id: Uuid,
    quote_id: Uuid,
) -> Result<GeneratedQuoteRow, ApiError> {
    sqlx::query_as(&format!(
        "SELECT {} FROM generated_quotes WHERE id = $1 AND project_id = $2",
        QUOTE_COLUMNS
    ))
    .bind(quote_id)
    .bind(project_id)
    .fetch_optional(db)
    .await?
    .ok_or_else(|| ApiError::not_found("Generated quote not found"))
}

/// Requested rate, else the company's sales tax, else the default.
async fn resolve_tax(
    db: &PgPool,
    company_id: Uuid,
    requested: Option<f64>,
) -> Result<Decimal, ApiError> {
    let tax = match requested {
        Some(t) => amount(t, "tax_percentage")?,
        None => load_company_rates(db, company_id)
            .await?
            .and_then(|r| r.sales_tax_percent)
            .and_then(f64_to_decimal)
            .unwrap_or(DEFAULT_TAX_PERCENT),
    };
    Ok(tax.round_dp(3))
}

/// Quote header fields as they will be stored
struct NewQuote {
    quote_number: String,
    quote_date: NaiveDate,
    expiration_date: NaiveDate,
    customer: CustomerDetails,
    job_name: String,
    job_reference: Option<String>,
    tax_percentage: Decimal,
    special_instructions: Option<String>,
    notes: Option<String>,
}

async fn insert_quote(
    conn: &mut PgConnection,
    project_id: Uuid,
    created_by: Uuid,
    quote: NewQuote,
) -> Result<GeneratedQuoteRow, ApiError> {
    let customer = quote.customer;
    let row = sqlx::query_as(&format!(
        r#"
        INSERT INTO generated_quotes (project_id, created_by, quote_number, quote_date,
                                      expiration_date, customer_name, customer_company,
                                      customer_email, customer_phone, delivery_address,
                                      job_name, job_reference, tax_percentage,
                                      special_instructions, notes)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        RETURNING {}
        "#,
        QUOTE_COLUMNS
    ))
    .bind(project_id)
    .bind(created_by)
    .bind(&quote.quote_number)
    .bind(quote.quote_date)
    .bind(quote.expiration_date)
    .bind(trimmed(customer.customer_name))
    .bind(trimmed(customer.customer_company))
    .bind(trimmed(customer.customer_email).map(|e| e.to_lowercase()))
    .bind(trimmed(customer.customer_phone))
    .bind(trimmed(customer.delivery_address))
    .bind(&quote.job_name)
    .bind(quote.job_reference)
    .bind(quote.tax_percentage)
    .bind(quote.special_instructions)
    .bind(quote.notes)
    .fetch_one(conn)
    .await?;
    Ok(row)
}

fn default_expiration(quote_date: NaiveDate, days: Option<i64>) -> NaiveDate {
    quote_date + chrono::Duration::days(days.unwrap_or(QUOTE_VALID_DAYS))
}

/// Customer block for the PDF: the company leads when known, the person becomes the contact.
fn customer_block(quote: &GeneratedQuoteRow, job_number: String) -> CustomerBlock {
    let (customer_name, contact) = match (&quote.customer_company, &quote.customer_name) {
        (Some(company), person) => (Some(company.clone()), person.clone()),
        (None, person) => (
            person.clone(),
            quote.customer_phone.clone().or_else(|| quote.customer_email.clone()),
        ),
    };
    CustomerBlock {
        customer_name,
        contact,
        job_name: quote.job_name.clone(),
        job_number: Some(quote.job_reference.clone().unwrap_or(job_number)),
        location: None,
    }
}

// ============================================================================
// Quotes
// ============================================================================

/// POST /projects/:project_id/generated-quotes
pub async fn create_generated_quote(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path(project_id): Path<Uuid>,
    Json(req): Json<CreateGeneratedQuoteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validated(req.validate())?;
    let project = require_project(&state.db, tenant.company_id, project_id).await?;

    let quote_date = req.quote_date.unwrap_or_else(|| Utc::now().date_naive());
    let expiration_date = req
        .expiration_date
        .unwrap_or_else(|| default_expiration(quote_date, None));
    validated(validate_dates(quote_date, expiration_date))?;

    let lines = req
        .lines
        .into_iter()
        .enumerate()
        .map(|(i, input)| {
            let mut line = NewLine::from_input(input)?;
            line.line_number = line.line_number.or(Some(i as i32 + 1));
            Ok(line)
        })
        .collect::<Result<Vec<_>, ApiError>>()?;

    let header = NewQuote {
        quote_number: trimmed(req.quote_number)
            .unwrap_or_else(|| quote_pdf::quote_number(quote_date, Uuid::new_v4())),
        quote_date,
        expiration_date,
        customer: req.customer,
        job_name: trimmed(req.job_name).unwrap_or(project.name),
        job_reference: trimmed(req.job_reference).or(Some(project.job_number)),
        tax_percentage: resolve_tax(&state.db, tenant.company_id, req.tax_percentage).await?,
        special_instructions: trimmed(req.special_instructions),
        notes: trimmed(req.notes),
    };

    let mut tx = state.db.begin().await?;
    let quote = insert_quote(&mut tx, project_id, tenant.user_id, header).await?;
    for line in &lines {
        insert_line(&mut tx, quote.id, line).await?;
    }
    let quote = refresh_totals(&mut tx, quote.id).await?;
    let stored_lines = load_lines(&mut tx, quote.id).await?;
    tx.commit().await?;

    tracing::info!(
        user_id = %tenant.user_id,
        project_id = %project_id,
        quote_id = %quote.id,
        quote_number = %quote.quote_number,
        lines = stored_lines.len(),
        total = %quote.total,
        "Generated quote created"
    );

    Ok(Created(quote.into_response(Some(stored_lines))))
}

/// POST /projects/:project_id/generated-quotes/from-takeoffs
pub async fn create_quote_from_takeoffs(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path(project_id): Path<Uuid>,
    Json(req): Json<QuoteFromTakeoffsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validated(req.validate())?;
    let project = require_project(&state.db, tenant.company_id, project_id).await?;

    let mut takeoffs = load_takeoffs(&state.db, project_id).await?;
    if let Some(ids) = &req.takeoff_item_ids {
        takeoffs.retain(|t| ids.contains(&t.id));
        if takeoffs.len() != ids.len() {
            return Err(ApiError::not_found("One or more takeoff items were not found"));
        }
    }
    if takeoffs.is_empty() {
        return Err(ApiError::bad_request("Project has no takeoff items to quote"));
    }

    let catalog = load_catalog(&state.db, tenant.company_id).await?;
    let by_id: HashMap<Uuid, &CatalogEntry> = catalog.iter().map(|m| (m.id, m)).collect();
    let matcher = MaterialMatcher::new(catalog.clone());

    let mut unpriced = 0usize;
    let lines: Vec<NewLine> = takeoffs
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let stored = row.matched_material_id.and_then(|id| by_id.get(&id).copied());
            let fresh = match stored {
                Some(_) => Vec::new(),
                None => match_takeoff(&matcher, row, DEFAULT_THRESHOLD),
            };
            let mut line = price_takeoff(row, stored, select_best(&fresh, true));
            if line.material_id.is_none() {
                unpriced += 1;
            }
            line.line_number = Some(i as i32 + 1);
            line
        })
        .collect();

    let quote_date = Utc::now().date_naive();
    let header = NewQuote {
        quote_number: quote_pdf::quote_number(quote_date, Uuid::new_v4()),
        quote_date,
        expiration_date: default_expiration(quote_date, req.expiration_days),
        customer: req.customer,
        job_name: trimmed(req.job_name).unwrap_or(project.name),
        job_reference: trimmed(req.job_reference).or(Some(project.job_number)),
        tax_percentage: resolve_tax(&state.db, tenant.company_id, req.tax_percentage).await?,
        special_instructions: trimmed(req.special_instructions),
        notes: trimmed(req.notes),
    };

    let mut tx = state.db.begin().await?;
    let quote = insert_quote(&mut tx, project_id, tenant.user_id, header).await?;
    for line in &lines {
        insert_line(&mut tx, quote.id, line).await?;
    }
    let quote = refresh_totals(&mut tx, quote.id).await?;
    let stored_lines = load_lines(&mut tx, quote.id).await?;
    tx.commit().await?;

    tracing::info!(
        user_id = %tenant.user_id,
        project_id = %project_id,
        quote_id = %quote.id,
        quote_number = %quote.quote_number,
        lines = stored_lines.len(),
        unpriced = unpriced,
        total = %quote.total,
        "Generated quote built from takeoff"
    );

    Ok(Created(quote.into_response(Some(stored_lines))))
}

/// GET /projects/:project_id/generated-quotes
pub async fn list_generated_quotes(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path(project_id): Path<Uuid>,
    Query(params): Query<PaginationParams>,
    Query(query): Query<GeneratedQuoteQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_project(&state.db, tenant.company_id, project_id).await?;
    let status = query.status.map(|s| s.as_str());

    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM generated_quotes WHERE project_id = $1 AND ($2::text IS NULL OR status = $2)",
    )
    .bind(project_id)
    .bind(status)
    .fetch_one(&state.db)
    .await?;

    let rows: Vec<GeneratedQuoteRow> = sqlx::query_as(&format!(
        r#"
        SELECT {} FROM generated_quotes
        WHERE project_id = $1 AND ($2::text IS NULL OR status = $2)
        ORDER BY created_at DESC, id
        LIMIT $3 OFFSET $4
        "#,
        QUOTE_COLUMNS
    ))
    .bind(project_id)
    .bind(status)
    .bind(params.limit())
    .bind(params.offset())
    .fetch_all(&state.db)
    .await?;

    let data: Vec<GeneratedQuoteResponse> =
        rows.into_iter().map(|r| r.into_response(None)).collect();
    Ok(Paginated::new(data, &params, total))
}

/// GET /projects/:project_id/generated-quotes/:quote_id
pub async fn get_generated_quote(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path((project_id, quote_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    require_project(&state.db, tenant.company_id, project_id).await?;
    let quote = fetch_quote(&state.db, project_id, quote_id).await?;
    let mut conn = state.db.acquire().await?;
    let lines = load_lines(&mut conn, quote_id).await?;
    Ok(Json(DataResponse::new(quote.into_response(Some(lines)))))
}

/// PUT /projects/:project_id/generated-quotes/:quote_id
pub async fn update_generated_quote(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path((project_id, quote_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateGeneratedQuoteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validated(req.validate())?;
    require_project(&state.db, tenant.company_id, project_id).await?;
    let existing = fetch_quote(&state.db, project_id, quote_id).await?;

    validated(validate_dates(
        req.quote_date.unwrap_or(existing.quote_date),
        req.expiration_date.unwrap_or(existing.expiration_date),
    ))?;
    let tax_percentage = req
        .tax_percentage
        .map(|t| amount(t, "tax_percentage").map(|d| d.round_dp(3)))
        .transpose()?;
    let customer = req.customer;

    let mut tx = state.db.begin().await?;
    sqlx::query(
        r#"
        UPDATE generated_quotes SET
            quote_date = COALESCE($3, quote_date),
            expiration_date = COALESCE($4, expiration_date),
            customer_name = COALESCE($5, customer_name),
            customer_company = COALESCE($6, customer_company),
            customer_email = COALESCE($7, customer_email),
            customer_phone = COALESCE($8, customer_phone),
            delivery_address = COALESCE($9, delivery_address),
            job_name = COALESCE($10, job_name),
            job_reference = COALESCE($11, job_reference),
            tax_percentage = COALESCE($12, tax_percentage),
            status = COALESCE($13, status),
            special_instructions = COALESCE($14, special_instructions),
            notes = COALESCE($15, notes),
            updated_at = NOW()
        WHERE id = $1 AND project_id = $2
        "#,
    )
    .bind(quote_id)
    .bind(project_id)
    .bind(req.quote_date)
    .bind(req.expiration_date)
    .bind(trimmed(customer.customer_name))
    .bind(trimmed(customer.customer_company))
    .bind(trimmed(customer.customer_email).map(|e| e.to_lowercase()))
    .bind(trimmed(customer.customer_phone))
    .bind(trimmed(customer.delivery_address))
    .bind(trimmed(req.job_name))
    .bind(trimmed(req.job_reference))
    .bind(tax_percentage)
    .bind(req.status.map(|s| s.as_str()))
    .bind(trimmed(req.special_instructions))
    .bind(trimmed(req.notes))
    .execute(&mut *tx)
    .await?;

    let quote = refresh_totals(&mut tx, quote_id).await?;
    let lines = load_lines(&mut tx, quote_id).await?;
    tx.commit().await?;

    tracing::info!(
        user_id = %tenant.user_id,
        project_id = %project_id,
        quote_id = %quote_id,
        status = %quote.status,
        total = %quote.total,
        "Generated quote updated"
    );

    Ok(Json(DataResponse::new(quote.into_response(Some(lines)))))
}

/// DELETE /projects/:project_id/generated-quotes/:quote_id
pub async fn delete_generated_quote(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path((project_id, quote_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    require_project(&state.db, tenant.company_id, project_id).await?;

    let result = sqlx::query("DELETE FROM generated_quotes WHERE id = $1 AND project_id = $2")
        .bind(quote_id)
        .bind(project_id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Generated quote not found"));
    }

    tracing::info!(
        user_id = %tenant.user_id,
        project_id = %project_id,
        quote_id = %quote_id,
        "Generated quote deleted"
    );

    Ok(Json(MessageResponse::new("Generated quote deleted")))
}

/// GET /projects/:project_id/generated-quotes/:quote_id/pdf
pub async fn generated_quote_pdf(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path((project_id, quote_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let project = require_project(&state.db, tenant.company_id, project_id).await?;
    let quote = fetch_quote(&state.db, project_id, quote_id).await?;
    let lines = {
        let mut conn = state.db.acquire().await?;
        load_lines(&mut conn, quote_id).await?
    };
    let company = fetch_company(&state.db, tenant.company_id).await?;

    let customer = customer_block(&quote, project.job_number);
    let filename = quote_pdf::quote_filename(&quote.quote_number, customer.job_number.as_deref());
    let document = QuoteDocument {
        company: company_block(&company),
        customer,
        quote_number: quote.quote_number.clone(),
        quote_date: quote.quote_date,
        lines: lines.into_iter().map(QuoteLine::from).collect(),
        tax_percentage: Some(quote.tax_percentage),
        expires_on: Some(quote.expiration_date),
        delivery: quote.delivery_address.clone(),
        special_instructions: quote.special_instructions.clone(),
    };

    let line_count = document.lines.len();
    let bytes = tokio::task::spawn_blocking(move || quote_pdf::render_quote(&document))
        .await
        .map_err(|e| ApiError::internal(format!("PDF task failed: {}", e)))??;

    tracing::info!(
        user_id = %tenant.user_id,
        project_id = %project_id,
        quote_id = %quote_id,
        lines = line_count,
        bytes = bytes.len(),
        "Generated quote PDF rendered"
    );

    Ok(FileDownload::pdf(bytes, filename))
}

// ============================================================================
// Quote lines
// ============================================================================

/// POST /projects/:project_id/generated-quotes/:quote_id/lines
pub async fn add_quote_line(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path((project_id, quote_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<QuoteLineInput>,
) -> Result<impl IntoResponse, ApiError> {
    validated(req.validate())?;
    require_project(&state.db, tenant.company_id, project_id).await?;
    fetch_quote(&state.db, project_id, quote_id).await?;
    let line = NewLine::from_input(req)?;

    let mut tx = state.db.begin().await?;
    let row = insert_line(&mut tx, quote_id, &line).await?;
    let quote = refresh_totals(&mut tx, quote_id).await?;
    tx.commit().await?;

    tracing::info!(
        user_id = %tenant.user_id,
        quote_id = %quote_id,
        line_id = %row.id,
        total = %quote.total,
        "Generated quote line added"
    );

    Ok(Created(QuoteLineResponse::from(row)))
}

/// PUT /projects/:project_id/generated-quotes/:quote_id/lines/:line_id
pub async fn update_quote_line(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path((project_id, quote_id, line_id)): Path<(Uuid, Uuid, Uuid)>,
    Json(req): Json<UpdateQuoteLineRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validated(req.validate())?;
    require_project(&state.db, tenant.company_id, project_id).await?;
    fetch_quote(&state.db, project_id, quote_id).await?;

    let mut tx = state.db.begin().await?;
    let current: LineRow = sqlx::query_as(&format!(
        "SELECT {} FROM generated_quote_lines WHERE id = $1 AND generated_quote_id = $2 FOR UPDATE",
        LINE_COLUMNS
    ))
    .bind(line_id)
    .bind(quote_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ApiError::not_found("Quote line not found"))?;

    let line = NewLine::from_row(current).apply(req)?;
    let row: LineRow = sqlx::query_as(&format!(
        r#"
        UPDATE generated_quote_lines SET
            line_number = $2,
            category = $3,
            quantity = $4,
            unit = $5,
            product_code = $6,
            description = $7,
            unit_price = $8,
            total_price = $9,
            notes = $10
        WHERE id = $1
        RETURNING {}
        "#,
        LINE_COLUMNS
    ))
    .bind(line_id)
    .bind(line.line_number)
    .bind(&line.category)
    .bind(line.quantity)
    .bind(&line.unit)
    .bind(&line.product_code)
    .bind(&line.description)
    .bind(line.unit_price)
    .bind(line.total())
    .bind(&line.notes)
    .fetch_one(&mut *tx)
    .await?;

    let quote = refresh_totals(&mut tx, quote_id).await?;
    tx.commit().await?;

    tracing::info!(
        user_id = %tenant.user_id,
        quote_id = %quote_id,
        line_id = %line_id,
        total = %quote.total,
        "Generated quote line updated"
    );

    Ok(Json(DataResponse::new(QuoteLineResponse::from(row))))
}

/// DELETE /projects/:project_id/generated-quotes/:quote_id/lines/:line_id
pub async fn delete_quote_line(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path((project_id, quote_id, line_id)): Path<(Uuid, Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    require_project(&state.db, tenant.company_id, project_id).await?;
    fetch_quote(&state.db, project_id, quote_id).await?;

    let mut tx = state.db.begin().await?;
    let result =
        sqlx::query("DELETE FROM generated_quote_lines WHERE id = $1 AND generated_quote_id = $2")
            .bind(line_id)
            .bind(quote_id)
            .execute(&mut *tx)
            .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Quote line not found"));
    }
    let quote = refresh_totals(&mut tx, quote_id).await?;
    tx.commit().await?;

    tracing::info!(
        user_id = %tenant.user_id,
        quote_id = %quote_id,
        line_id = %line_id,
        total = %quote.total,
        "Generated quote line deleted"
    );

    Ok(Json(MessageResponse::new("Quote line deleted")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::matcher::MatchType;

    fn takeoff(unit_price: Option<Decimal>, matched: Option<Uuid>) -> TakeoffRow {
        TakeoffRow {
            id: Uuid::from_u128(1),
            project_id: Uuid::from_u128(2),
            document_id: None,
            label: "2x4 studs 8ft".into(),
            qty: Decimal::from(120),
            unit: "EA".into(),
            category: None,
            source_page: Some(3),
            notes: None,
            matched_material_id: matched,
            match_confidence: None,
            unit_price,
            total_price: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn material(price: Decimal) -> CatalogEntry {
        CatalogEntry {
            id: Uuid::from_u128(9),
            product_code: "2X4-8".into(),
            description: "2x4x8 SPF stud".into(),
            category: "Framing".into(),
            unit: "EA".into(),
            unit_price: price,
        }
    }

    #[test]
    fn stored_match_keeps_the_negotiated_price() {
        let entry = material(Decimal::new(450, 2));
        let row = takeoff(Some(Decimal::new(395, 2)), Some(entry.id));
        let line = price_takeoff(&row, Some(&entry), None);
        assert_eq!(line.material_id, Some(entry.id));
        assert_eq!(line.unit_price, Decimal::new(395, 2));
        assert_eq!(line.category.as_deref(), Some("Framing"));
        assert_eq!(line.total(), Decimal::new(47400, 2));
    }

    #[test]
    fn fresh_match_uses_catalog_price() {
        let entry = material(Decimal::new(450, 2));
        let fresh = MaterialMatch {
            material: entry.clone(),
            confidence: 0.92,
            match_type: MatchType::Fuzzy,
            reasoning: "close description".into(),
        };
        let row = takeoff(Some(Decimal::new(395, 2)), None);
        let line = price_takeoff(&row, None, Some(&fresh));
        assert_eq!(line.unit_price, Decimal::new(450, 2));
        assert_eq!(line.product_code.as_deref(), Some("2X4-8"));
    }

    #[test]
    fn unmatched_takeoff_is_left_for_manual_pricing() {
        let row = takeoff(None, None);
        let line = price_takeoff(&row, None, None);
        assert_eq!(line.material_id, None);
        assert_eq!(line.unit_price, Decimal::ZERO);
        assert_eq!(line.description, "2x4 studs 8ft");
        assert_eq!(line.total(), Decimal::ZERO);
    }

    #[test]
    fn line_update_recomputes_total() {
        let entry = material(Decimal::new(450, 2));
        let line = price_takeoff(&takeoff(None, None), Some(&entry), None);
        let updated = line
            .apply(UpdateQuoteLineRequest {
                quantity: Some(10.0),
                unit_price: Some(3.333),
                category: Some("  ".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(updated.quantity, Decimal::from(10));
        assert_eq!(updated.total(), Decimal::new(3333, 2));
        assert_eq!(updated.category, None);
        assert_eq!(updated.description, "2x4x8 SPF stud");
    }

    #[test]
    fn company_leads_the_customer_block() {
        let quote = GeneratedQuoteRow {
            id: Uuid::nil(),
            project_id: Uuid::nil(),
            created_by: None,
            quote_number: "Q2407010007".into(),
            quote_date: NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
            expiration_date: NaiveDate::from_ymd_opt(2024, 7, 8).unwrap(),
            customer_name: Some("Dana Ortiz".into()),
            customer_company: Some("Riverside Health".into()),
            customer_email: None,
            customer_phone: Some("225-555-0101".into()),
            delivery_address: None,
            job_name: "Riverside Clinic".into(),
            job_reference: None,
            subtotal: Decimal::ZERO,
            tax_percentage: DEFAULT_TAX_PERCENT,
            tax_amount: Decimal::ZERO,
            total: Decimal::ZERO,
            status: "draft".into(),
            special_instructions: None,
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let block = customer_block(&quote, "J-17".into());
        assert_eq!(block.customer_name.as_deref(), Some("Riverside Health"));
        assert_eq!(block.contact.as_deref(), Some("Dana Ortiz"));
        assert_eq!(block.job_number.as_deref(), Some("J-17"));

        let without_company = GeneratedQuoteRow {
            customer_company: None,
            ..quote
        };
        let block = customer_block(&without_company, "J-17".into());
        assert_eq!(block.customer_name.as_deref(), Some("Dana Ortiz"));
        assert_eq!(block.contact.as_deref(), Some("225-555-0101"));
    }

    #[test]
    fn default_expiry_is_one_week() {
        let date = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
        assert_eq!(default_expiration(date, None), NaiveDate::from_ymd_opt(2024, 7, 8).unwrap());
        assert_eq!(default_expiration(date, Some(30)), NaiveDate::from_ymd_opt(2024, 7, 31).unwrap());
    }
}
