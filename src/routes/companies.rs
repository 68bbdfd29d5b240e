//! Company profile and rate card.

use axum::{extract::State, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{types::Json as SqlJson, PgPool};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use super::trimmed;
use crate::api::DataResponse;
use crate::app::AppState;
use crate::auth::RequireTenant;
use crate::domain::companies::{
    CompanyRates, CompanyRatesResponse, CompanyResponse, MarginConfig, OverheadConfig,
    UpdateCompanyRequest, UserRole,
};
use crate::domain::{decimal_to_f64, f64_to_decimal};
use crate::error::ApiError;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct CompanyRow {
    pub id: Uuid,
    pub name: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CompanyRow {
    /// Street address followed by "City, ST 00000", skipping blanks
    pub fn address_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(address) = self.address.as_deref().filter(|a| !a.trim().is_empty()) {
            lines.push(address.trim().to_string());
        }
        let city_state = [self.city.as_deref(), self.state.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", ");
        let last = match self.zip.as_deref().map(str::trim).filter(|z| !z.is_empty()) {
            Some(zip) if !city_state.is_empty() => format!("{} {}", city_state, zip),
            Some(zip) => zip.to_string(),
            None => city_state,
        };
        if !last.is_empty() {
            lines.push(last);
        }
        lines
    }
}

impl From<CompanyRow> for CompanyResponse {
    fn from(row: CompanyRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            address: row.address,
            city: row.city,
            state: row.state,
            zip: row.zip,
            phone: row.phone,
            email: row.email,
            website: row.website,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const COMPANY_COLUMNS: &str =
    "id, name, address, city, state, zip, phone, email, website, created_at, updated_at";

pub(crate) async fn fetch_company(db: &PgPool, company_id: Uuid) -> Result<CompanyRow, ApiError> {
    sqlx::query_as(&format!(
        "SELECT {} FROM companies WHERE id = $1",
        COMPANY_COLUMNS
    ))
    .bind(company_id)
    .fetch_optional(db)
    .await?
    .ok_or_else(|| ApiError::not_found("Company not found"))
}

#[derive(Debug, sqlx::FromRow)]
struct RatesRow {
    company_id: Uuid,
    labor_rate_json: SqlJson<BTreeMap<String, f64>>,
    equipment_rate_json: SqlJson<BTreeMap<String, f64>>,
    overhead_json: SqlJson<OverheadConfig>,
    margin_json: SqlJson<MarginConfig>,
    sales_tax_percent: Option<Decimal>,
    updated_at: DateTime<Utc>,
}

impl RatesRow {
    fn rates(self) -> CompanyRates {
        CompanyRates {
            labor_rates: self.labor_rate_json.0,
            equipment_rates: self.equipment_rate_json.0,
            overhead: self.overhead_json.0,
            margin: self.margin_json.0,
            sales_tax_percent: self.sales_tax_percent.map(decimal_to_f64),
        }
    }
}

const RATES_COLUMNS: &str = "company_id, labor_rate_json, equipment_rate_json, overhead_json, \
     margin_json, sales_tax_percent, updated_at";

/// The company's rate card, if one has been saved
pub(crate) async fn load_company_rates(
    db: &PgPool,
    company_id: Uuid,
) -> Result<Option<CompanyRates>, ApiError> {
    let row: Option<RatesRow> = sqlx::query_as(&format!(
        "SELECT {} FROM company_rates WHERE company_id = $1",
        RATES_COLUMNS
    ))
    .bind(company_id)
    .fetch_optional(db)
    .await?;

    Ok(row.map(RatesRow::rates))
}

fn require_admin(role: UserRole) -> Result<(), ApiError> {
    if role == UserRole::Admin {
        Ok(())
    } else {
        Err(ApiError::forbidden("Only company admins can change company settings"))
    }
}

/// GET /company
pub async fn get_company(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
) -> Result<impl IntoResponse, ApiError> {
    let row = fetch_company(&state.db, tenant.company_id).await?;
    Ok(Json(DataResponse::new(CompanyResponse::from(row))))
}

/// PUT /company
pub async fn update_company(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Json(req): Json<UpdateCompanyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(tenant.role)?;
    if matches!(req.name.as_deref(), Some(name) if name.trim().is_empty()) {
        return Err(ApiError::bad_request("Company name cannot be blank"));
    }

    let row: CompanyRow = sqlx::query_as(&format!(
        r#"
        UPDATE companies SET
            name = COALESCE($2, name),
            address = COALESCE($3, address),
            city = COALESCE($4, city),
            state = COALESCE($5, state),
            zip = COALESCE($6, zip),
            phone = COALESCE($7, phone),
            email = COALESCE($8, email),
            website = COALESCE($9, website),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        COMPANY_COLUMNS
    ))
    .bind(tenant.company_id)
    .bind(trimmed(req.name))
    .bind(trimmed(req.address))
    .bind(trimmed(req.city))
    .bind(trimmed(req.state))
    .bind(trimmed(req.zip))
    .bind(trimmed(req.phone))
    .bind(trimmed(req.email))
    .bind(trimmed(req.website))
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Company not found"))?;

    tracing::info!(
        user_id = %tenant.user_id,
        company_id = %tenant.company_id,
        "Company profile updated"
    );

    Ok(Json(DataResponse::new(CompanyResponse::from(row))))
}

/// GET /company/rates
pub async fn get_company_rates(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
) -> Result<impl IntoResponse, ApiError> {
    let row: RatesRow = sqlx::query_as(&format!(
        "SELECT {} FROM company_rates WHERE company_id = $1",
        RATES_COLUMNS
    ))
    .bind(tenant.company_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("No rates configured for this company"))?;

    let company_id = row.company_id;
    let updated_at = row.updated_at;
    Ok(Json(DataResponse::new(CompanyRatesResponse {
        company_id,
        rates: row.rates(),
        updated_at,
    })))
}

/// PUT /company/rates
///
/// Replaces the whole rate card.
pub async fn upsert_company_rates(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Json(rates): Json<CompanyRates>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(tenant.role)?;
    rates.validate().map_err(ApiError::bad_request)?;

    let sales_tax = match rates.sales_tax_percent {
        Some(v) => Some(
            f64_to_decimal(v).ok_or_else(|| ApiError::bad_request("sales_tax_percent is not a number"))?,
        ),
        None => None,
    };

    let row: RatesRow = sqlx::query_as(&format!(
        r#"
        INSERT INTO company_rates (company_id, labor_rate_json, equipment_rate_json,
                                   overhead_json, margin_json, sales_tax_percent)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (company_id) DO UPDATE SET
            labor_rate_json = EXCLUDED.labor_rate_json,
            equipment_rate_json = EXCLUDED.equipment_rate_json,
            overhead_json = EXCLUDED.overhead_json,
            margin_json = EXCLUDED.margin_json,
            sales_tax_percent = EXCLUDED.sales_tax_percent,
            updated_at = NOW()
        RETURNING {}
        "#,
        RATES_COLUMNS
    ))
    .bind(tenant.company_id)
    .bind(SqlJson(&rates.labor_rates))
    .bind(SqlJson(&rates.equipment_rates))
    .bind(SqlJson(&rates.overhead))
    .bind(SqlJson(&rates.margin))
    .bind(sales_tax)
    .fetch_one(&state.db)
    .await?;

    tracing::info!(
        user_id = %tenant.user_id,
        company_id = %tenant.company_id,
        labor_trades = rates.labor_rates.len(),
        equipment = rates.equipment_rates.len(),
        "Company rates saved"
    );

    let company_id = row.company_id;
    let updated_at = row.updated_at;
    Ok(Json(DataResponse::new(CompanyRatesResponse {
        company_id,
        rates: row.rates(),
        updated_at,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn company(address: Option<&str>, city: Option<&str>, state: Option<&str>, zip: Option<&str>) -> CompanyRow {
        CompanyRow {
            id: Uuid::new_v4(),
            name: "Acme Builders".to_string(),
            address: address.map(str::to_string),
            city: city.map(str::to_string),
            state: state.map(str::to_string),
            zip: zip.map(str::to_string),
            phone: None,
            email: None,
            website: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn address_lines_join_city_state_zip() {
        let row = company(Some("12 Main St"), Some("Fresno"), Some("CA"), Some("93721"));
        assert_eq!(row.address_lines(), vec!["12 Main St", "Fresno, CA 93721"]);
    }

    #[test]
    fn address_lines_skip_blanks() {
        let row = company(Some("  "), None, Some("CA"), None);
        assert_eq!(row.address_lines(), vec!["CA"]);
        assert!(company(None, None, None, None).address_lines().is_empty());
    }

    #[test]
    fn only_admins_change_settings() {
        assert!(require_admin(UserRole::Admin).is_ok());
        assert!(matches!(require_admin(UserRole::Estimator), Err(ApiError::Forbidden(_))));
    }
}
