//! Customer quote PDF built from the matched takeoff.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use super::companies::{fetch_company, load_company_rates, CompanyRow};
use super::require_project;
use crate::api::FileDownload;
use crate::app::AppState;
use crate::auth::RequireTenant;
use crate::domain::f64_to_decimal;
use crate::error::ApiError;
use crate::services::quote_pdf::{self, CompanyBlock, CustomerBlock, QuoteDocument, QuoteLine};

pub(crate) fn company_block(company: &CompanyRow) -> CompanyBlock {
    CompanyBlock {
        name: company.name.clone(),
        address_lines: company.address_lines(),
        phone: company.phone.clone(),
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MatchedLine {
    qty: Decimal,
    takeoff_unit_price: Option<Decimal>,
    takeoff_category: Option<String>,
    product_code: String,
    description: String,
    category: String,
    unit: String,
    unit_price: Decimal,
}

impl From<MatchedLine> for QuoteLine {
    fn from(line: MatchedLine) -> Self {
        Self {
            category: line.takeoff_category.unwrap_or(line.category),
            qty: line.qty,
            product_code: line.product_code,
            description: line.description,
            unit_price: line.takeoff_unit_price.unwrap_or(line.unit_price),
            unit: line.unit,
        }
    }
}

/// POST /projects/:project_id/quote-pdf
pub async fn generate_quote_pdf(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path(project_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let project = require_project(&state.db, tenant.company_id, project_id).await?;

    let lines: Vec<MatchedLine> = sqlx::query_as(
        r#"
        SELECT t.qty, t.unit_price AS takeoff_unit_price, t.category AS takeoff_category,
               m.product_code, m.description, m.category, m.unit, m.unit_price
        FROM takeoff_items t
        JOIN materials m ON m.id = t.matched_material_id AND m.company_id = $2
        WHERE t.project_id = $1
        ORDER BY t.created_at, t.id
        "#,
    )
    .bind(project_id)
    .bind(tenant.company_id)
    .fetch_all(&state.db)
    .await?;

    if lines.is_empty() {
        return Err(ApiError::bad_request(
            "No takeoff items are matched to catalog materials",
        ));
    }

    let company = fetch_company(&state.db, tenant.company_id).await?;
    let tax_percentage = load_company_rates(&state.db, tenant.company_id)
        .await?
        .and_then(|r| r.sales_tax_percent)
        .and_then(f64_to_decimal);

    let today = Utc::now().date_naive();
    let quote_number = quote_pdf::quote_number(today, Uuid::new_v4());
    let filename = quote_pdf::quote_filename(&quote_number, Some(&project.job_number));

    let document = QuoteDocument {
        company: company_block(&company),
        customer: CustomerBlock {
            customer_name: project.customer_name,
            contact: project.customer_contact,
            job_name: project.name,
            job_number: Some(project.job_number),
            location: project.location,
        },
        quote_number,
        quote_date: today,
        lines: lines.into_iter().map(QuoteLine::from).collect(),
        tax_percentage,
        expires_on: None,
        delivery: None,
        special_instructions: None,
    };

    let line_count = document.lines.len();
    let totals = document.totals();
    let bytes = tokio::task::spawn_blocking(move || quote_pdf::render_quote(&document))
        .await
        .map_err(|e| ApiError::internal(format!("PDF task failed: {}", e)))??;

    tracing::info!(
        user_id = %tenant.user_id,
        project_id = %project_id,
        lines = line_count,
        grand_total = %totals.grand_total,
        bytes = bytes.len(),
        "Quote PDF generated"
    );

    Ok(FileDownload::pdf(bytes, filename))
}
