//! Vendor directory: suppliers, rental houses and subcontractors.

use axum::{
    extract::{Multipart, Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use super::{like_pattern, read_file_field, trimmed, validated};
use crate::api::{Created, DataResponse, MessageResponse, Paginated, PaginationParams};
use crate::app::AppState;
use crate::auth::RequireTenant;
use crate::domain::imports::CatalogImportResult;
use crate::domain::vendors::{CreateVendorRequest, UpdateVendorRequest, VendorQuery, VendorResponse};
use crate::domain::{decimal_to_f64, f64_to_decimal};
use crate::error::ApiError;
use crate::services::csv_import;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct VendorRow {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub category: String,
    pub contact_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub license_number: Option<String>,
    pub insurance_expiry: Option<NaiveDate>,
    pub rating: Option<Decimal>,
    pub is_preferred: bool,
    pub is_active: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<VendorRow> for VendorResponse {
    fn from(row: VendorRow) -> Self {
        Self {
            id: row.id,
            company_id: row.company_id,
            name: row.name,
            category: row.category,
            contact_name: row.contact_name,
            email: row.email,
            phone: row.phone,
            address_line1: row.address_line1,
            address_line2: row.address_line2,
            city: row.city,
            state: row.state,
            zip_code: row.zip_code,
            license_number: row.license_number,
            insurance_expiry: row.insurance_expiry,
            rating: row.rating.map(decimal_to_f64),
            is_preferred: row.is_preferred,
            is_active: row.is_active,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

pub(crate) const VENDOR_COLUMNS: &str = "id, company_id, name, category, contact_name, email, phone, \
     address_line1, address_line2, city, state, zip_code, license_number, insurance_expiry, \
     rating, is_preferred, is_active, notes, created_at, updated_at";

/// Vendor owned by the company
pub(crate) async fn find_vendor(
    db: &sqlx::PgPool,
    company_id: Uuid,
    vendor_id: Uuid,
) -> Result<Option<VendorRow>, ApiError> {
    let row = sqlx::query_as(&format!(
        "SELECT {} FROM vendors WHERE id = $1 AND company_id = $2",
        VENDOR_COLUMNS
    ))
    .bind(vendor_id)
    .bind(company_id)
    .fetch_optional(db)
    .await?;
    Ok(row)
}

fn rating(value: Option<f64>) -> Option<Decimal> {
    value.and_then(f64_to_decimal)
}

/// GET /vendors
pub async fn list_vendors(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Query(params): Query<PaginationParams>,
    Query(query): Query<VendorQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let search = like_pattern(query.search.as_deref());
    let category = query.category.map(|c| c.as_str());

    let filter = r#"
        WHERE company_id = $1
        AND ($2::text IS NULL OR category = $2)
        AND ($3::boolean IS NULL OR is_active = $3)
        AND ($4::boolean IS NULL OR is_preferred = $4)
        AND ($5::text IS NULL OR name ILIKE $5 OR contact_name ILIKE $5 OR email ILIKE $5)
    "#;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM vendors {}", filter))
        .bind(tenant.company_id)
        .bind(category)
        .bind(query.is_active)
        .bind(query.is_preferred)
        .bind(&search)
        .fetch_one(&state.db)
        .await?;

    let rows: Vec<VendorRow> = sqlx::query_as(&format!(
        "SELECT {} FROM vendors {} ORDER BY is_preferred DESC, name LIMIT $6 OFFSET $7",
        VENDOR_COLUMNS, filter
    ))
    .bind(tenant.company_id)
    .bind(category)
    .bind(query.is_active)
    .bind(query.is_preferred)
    .bind(&search)
    .bind(params.limit())
    .bind(params.offset())
    .fetch_all(&state.db)
    .await?;

    let data: Vec<VendorResponse> = rows.into_iter().map(Into::into).collect();
    Ok(Paginated::new(data, &params, total))
}

/// POST /vendors
pub async fn create_vendor(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Json(req): Json<CreateVendorRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validated(req.validate())?;

    let row: VendorRow = sqlx::query_as(&format!(
        r#"
        INSERT INTO vendors (company_id, name, category, contact_name, email, phone,
                             address_line1, address_line2, city, state, zip_code,
                             license_number, insurance_expiry, rating, is_preferred,
                             is_active, notes)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        RETURNING {}
        "#,
        VENDOR_COLUMNS
    ))
    .bind(tenant.company_id)
    .bind(req.name.trim())
    .bind(req.category.as_str())
    .bind(trimmed(req.contact_name))
    .bind(trimmed(req.email))
    .bind(trimmed(req.phone))
    .bind(trimmed(req.address_line1))
    .bind(trimmed(req.address_line2))
    .bind(trimmed(req.city))
    .bind(trimmed(req.state))
    .bind(trimmed(req.zip_code))
    .bind(trimmed(req.license_number))
    .bind(req.insurance_expiry)
    .bind(rating(req.rating))
    .bind(req.is_preferred)
    .bind(req.is_active)
    .bind(trimmed(req.notes))
    .fetch_one(&state.db)
    .await?;

    tracing::info!(
        user_id = %tenant.user_id,
        company_id = %tenant.company_id,
        vendor_id = %row.id,
        category = %row.category,
        "Vendor created"
    );

    Ok(Created(VendorResponse::from(row)))
}

/// GET /vendors/:vendor_id
pub async fn get_vendor(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path(vendor_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let row = find_vendor(&state.db, tenant.company_id, vendor_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Vendor not found"))?;
    Ok(Json(DataResponse::new(VendorResponse::from(row))))
}

/// PUT /vendors/:vendor_id
pub async fn update_vendor(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path(vendor_id): Path<Uuid>,
    Json(req): Json<UpdateVendorRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validated(req.validate())?;

    let row: VendorRow = sqlx::query_as(&format!(
        r#"
        UPDATE vendors SET
            name = COALESCE($3, name),
            category = COALESCE($4, category),
            contact_name = COALESCE($5, contact_name),
            email = COALESCE($6, email),
            phone = COALESCE($7, phone),
            address_line1 = COALESCE($8, address_line1),
            address_line2 = COALESCE($9, address_line2),
            city = COALESCE($10, city),
            state = COALESCE($11, state),
            zip_code = COALESCE($12, zip_code),
            license_number = COALESCE($13, license_number),
            insurance_expiry = COALESCE($14, insurance_expiry),
            rating = COALESCE($15, rating),
            is_preferred = COALESCE($16, is_preferred),
            is_active = COALESCE($17, is_active),
            notes = COALESCE($18, notes),
            updated_at = NOW()
        WHERE id = $1 AND company_id = $2
        RETURNING {}
        "#,
        VENDOR_COLUMNS
    ))
    .bind(vendor_id)
    .bind(tenant.company_id)
    .bind(trimmed(req.name))
    .bind(req.category.map(|c| c.as_str()))
    .bind(trimmed(req.contact_name))
    .bind(trimmed(req.email))
    .bind(trimmed(req.phone))
    .bind(trimmed(req.address_line1))
    .bind(trimmed(req.address_line2))
    .bind(trimmed(req.city))
    .bind(trimmed(req.state))
    .bind(trimmed(req.zip_code))
    .bind(trimmed(req.license_number))
    .bind(req.insurance_expiry)
    .bind(rating(req.rating))
    .bind(req.is_preferred)
    .bind(req.is_active)
    .bind(trimmed(req.notes))
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Vendor not found"))?;

    tracing::info!(
        user_id = %tenant.user_id,
        company_id = %tenant.company_id,
        vendor_id = %vendor_id,
        "Vendor updated"
    );

    Ok(Json(DataResponse::new(VendorResponse::from(row))))
}

/// DELETE /vendors/:vendor_id
///
/// Quotes and quote requests keep the vendor name and email they copied.
pub async fn delete_vendor(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path(vendor_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let result = sqlx::query("DELETE FROM vendors WHERE id = $1 AND company_id = $2")
        .bind(vendor_id)
        .bind(tenant.company_id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Vendor not found"));
    }

    tracing::info!(
        user_id = %tenant.user_id,
        company_id = %tenant.company_id,
        vendor_id = %vendor_id,
        "Vendor deleted"
    );

    Ok(Json(MessageResponse::new("Vendor deleted")))
}

/// POST /vendors/import (multipart: `file`)
///
/// A row whose name matches an existing vendor (case-insensitive) updates it.
pub async fn import_vendors(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let bytes = read_file_field(multipart, state.settings.max_upload_bytes).await?;
    let (rows, errors) = csv_import::parse_vendors(&bytes)?;

    let mut result = CatalogImportResult {
        skipped: errors.len(),
        errors,
        ..Default::default()
    };

    let mut tx = state.db.begin().await?;
    for row in &rows {
        let existing: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM vendors WHERE company_id = $1 AND LOWER(name) = LOWER($2) LIMIT 1",
        )
        .bind(tenant.company_id)
        .bind(&row.name)
        .fetch_optional(&mut *tx)
        .await?;

        match existing {
            Some(vendor_id) => {
                sqlx::query(
                    r#"
                    UPDATE vendors SET
                        category = $2,
                        contact_name = COALESCE($3, contact_name),
                        email = COALESCE($4, email),
                        phone = COALESCE($5, phone),
                        city = COALESCE($6, city),
                        state = COALESCE($7, state),
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(vendor_id)
                .bind(row.category.as_str())
                .bind(&row.contact_name)
                .bind(&row.email)
                .bind(&row.phone)
                .bind(&row.city)
                .bind(&row.state)
                .execute(&mut *tx)
                .await?;
                result.updated += 1;
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO vendors (company_id, name, category, contact_name, email, phone,
                                         city, state)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    "#,
                )
                .bind(tenant.company_id)
                .bind(&row.name)
                .bind(row.category.as_str())
                .bind(&row.contact_name)
                .bind(&row.email)
                .bind(&row.phone)
                .bind(&row.city)
                .bind(&row.state)
                .execute(&mut *tx)
                .await?;
                result.created += 1;
            }
        }
    }
    tx.commit().await?;

    tracing::info!(
        user_id = %tenant.user_id,
        company_id = %tenant.company_id,
        created = result.created,
        updated = result.updated,
        skipped = result.skipped,
        "Vendors imported"
    );

    Ok(Json(DataResponse::new(result)))
}
