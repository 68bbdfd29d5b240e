pub mod auth;
pub mod bid_items;
pub mod companies;
pub mod discrepancies;
pub mod documents;
pub mod estimates;
pub mod generated_quotes;
pub mod health;
pub mod imports;
pub mod matching;
pub mod materials;
pub mod me;
pub mod parsing;
pub mod pdf_export;
pub mod projects;
pub mod quote_requests;
pub mod quotes;
pub mod takeoff;
pub mod vendors;

use axum::{
    extract::Multipart,
    routing::{delete, get, patch, post, put},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::app::AppState;
use crate::error::ApiError;

// ============================================================================
// Shared handler helpers
// ============================================================================

/// The parts of a project most handlers need once ownership is confirmed
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct ProjectScope {
    pub name: String,
    pub job_number: String,
    pub location: Option<String>,
    pub customer_name: Option<String>,
    pub customer_contact: Option<String>,
}

/// Project owned by the company, or 404
pub(crate) async fn require_project(
    db: &PgPool,
    company_id: Uuid,
    project_id: Uuid,
) -> Result<ProjectScope, ApiError> {
    sqlx::query_as(
        r#"
        SELECT name, job_number, location, customer_name, customer_contact
        FROM projects
        WHERE id = $1 AND company_id = $2
        "#,
    )
    .bind(project_id)
    .bind(company_id)
    .fetch_optional(db)
    .await?
    .ok_or_else(|| ApiError::not_found("Project not found"))
}

/// Trim, treating blank as absent
pub(crate) fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn validated(result: Result<(), String>) -> Result<(), ApiError> {
    result.map_err(ApiError::bad_request)
}

/// `ILIKE` pattern for a free-text search term
pub(crate) fn like_pattern(search: Option<&str>) -> Option<String> {
    let term = search.map(str::trim).filter(|s| !s.is_empty())?;
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    Some(format!("%{}%", escaped))
}

/// Bytes of the multipart `file` field; other fields are ignored.
pub(crate) async fn read_file_field(
    mut multipart: Multipart,
    max_bytes: usize,
) -> Result<Vec<u8>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {}", e)))?;
        if bytes.is_empty() {
            return Err(ApiError::bad_request("Uploaded file is empty"));
        }
        if bytes.len() > max_bytes {
            return Err(ApiError::bad_request(format!(
                "File exceeds the {} byte upload limit",
                max_bytes
            )));
        }
        return Ok(bytes.to_vec());
    }
    Err(ApiError::bad_request("A 'file' field is required"))
}

// ============================================================================
// Router
// ============================================================================

/// Build the API router with all routes
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        // Public routes
        .route("/health", get(health::health_check))
        .route("/ai/status", get(parsing::ai_status))
        .route("/auth/register", post(auth::register))
        .route("/auth/signin", post(auth::sign_in))
        .route("/auth/refresh", post(auth::refresh_token))
        .route("/auth/signout", post(auth::sign_out))
        // Caller and company
        .route("/me", get(me::get_me))
        .route(
            "/company",
            get(companies::get_company).put(companies::update_company),
        )
        .route(
            "/company/rates",
            get(companies::get_company_rates).put(companies::upsert_company_rates),
        )
        // Projects
        .route(
            "/projects",
            post(projects::create_project).get(projects::list_projects),
        )
        .route(
            "/projects/:project_id",
            get(projects::get_project)
                .put(projects::update_project)
                .delete(projects::delete_project),
        )
        // Documents and parsing
        .route(
            "/projects/:project_id/documents",
            post(documents::upload_document).get(documents::list_documents),
        )
        .route(
            "/projects/:project_id/documents/:document_id",
            get(documents::get_document).delete(documents::delete_document),
        )
        .route(
            "/projects/:project_id/documents/:document_id/download",
            get(documents::download_document),
        )
        .route(
            "/projects/:project_id/documents/:document_id/parse",
            post(parsing::parse_plan),
        )
        .route(
            "/projects/:project_id/documents/:document_id/parse-and-save",
            post(parsing::parse_and_save),
        )
        .route(
            "/projects/:project_id/documents/:document_id/parse-cache",
            delete(parsing::clear_parse_cache),
        )
        // Takeoff
        .route(
            "/projects/:project_id/takeoffs",
            get(takeoff::list_takeoffs)
                .post(takeoff::create_takeoff)
                .delete(takeoff::delete_all_takeoffs),
        )
        .route(
            "/projects/:project_id/takeoffs/:takeoff_id",
            patch(takeoff::update_takeoff).delete(takeoff::delete_takeoff),
        )
        .route(
            "/projects/:project_id/takeoffs/:takeoff_id/match",
            put(takeoff::set_takeoff_match),
        )
        // Matching
        .route("/matching/match", post(matching::match_description))
        .route("/projects/:project_id/matching", post(matching::match_project))
        // Estimates
        .route(
            "/projects/:project_id/estimates",
            post(estimates::create_estimate).get(estimates::list_estimates),
        )
        .route(
            "/projects/:project_id/estimates/:estimate_id",
            get(estimates::get_estimate).delete(estimates::delete_estimate),
        )
        .route(
            "/projects/:project_id/estimates/:estimate_id/pdf",
            get(estimates::estimate_pdf),
        )
        .route(
            "/projects/:project_id/quote-pdf",
            post(pdf_export::generate_quote_pdf),
        )
        // Generated customer quotes
        .route(
            "/projects/:project_id/generated-quotes",
            post(generated_quotes::create_generated_quote)
                .get(generated_quotes::list_generated_quotes),
        )
        .route(
            "/projects/:project_id/generated-quotes/from-takeoffs",
            post(generated_quotes::create_quote_from_takeoffs),
        )
        .route(
            "/projects/:project_id/generated-quotes/:quote_id",
            get(generated_quotes::get_generated_quote)
                .put(generated_quotes::update_generated_quote)
                .delete(generated_quotes::delete_generated_quote),
        )
        .route(
            "/projects/:project_id/generated-quotes/:quote_id/pdf",
            get(generated_quotes::generated_quote_pdf),
        )
        .route(
            "/projects/:project_id/generated-quotes/:quote_id/lines",
            post(generated_quotes::add_quote_line),
        )
        .route(
            "/projects/:project_id/generated-quotes/:quote_id/lines/:line_id",
            put(generated_quotes::update_quote_line).delete(generated_quotes::delete_quote_line),
        )
        // Bid schedule and discrepancies
        .route(
            "/projects/:project_id/bid-items",
            get(bid_items::list_bid_items).post(bid_items::create_bid_item),
        )
        .route(
            "/projects/:project_id/bid-items/:bid_item_id",
            put(bid_items::update_bid_item).delete(bid_items::delete_bid_item),
        )
        .route(
            "/projects/:project_id/discrepancies",
            get(discrepancies::list_discrepancies).delete(discrepancies::clear_discrepancies),
        )
        .route(
            "/projects/:project_id/discrepancies/detect",
            post(discrepancies::detect_discrepancies),
        )
        .route(
            "/projects/:project_id/discrepancies/summary",
            get(discrepancies::discrepancy_summary),
        )
        .route(
            "/projects/:project_id/discrepancies/:discrepancy_id",
            get(discrepancies::get_discrepancy).delete(discrepancies::delete_discrepancy),
        )
        .route(
            "/projects/:project_id/discrepancies/:discrepancy_id/status",
            patch(discrepancies::update_discrepancy_status),
        )
        // Quote requests
        .route(
            "/projects/:project_id/quote-requests",
            post(quote_requests::send_quote_requests).get(quote_requests::list_quote_requests),
        )
        .route(
            "/projects/:project_id/quote-requests/summary",
            get(quote_requests::quote_request_summary),
        )
        .route(
            "/projects/:project_id/quote-requests/:request_id",
            get(quote_requests::get_quote_request),
        )
        .route(
            "/projects/:project_id/quote-requests/:request_id/status",
            patch(quote_requests::update_quote_request_status),
        )
        // Vendor quotes
        .route(
            "/projects/:project_id/quotes",
            post(quotes::create_quote).get(quotes::list_quotes),
        )
        .route("/projects/:project_id/quotes/compare", get(quotes::compare_quotes))
        .route("/projects/:project_id/quotes/rank", post(quotes::rank_project_quotes))
        .route("/projects/:project_id/quotes/summary", get(quotes::quote_summary))
        .route(
            "/projects/:project_id/quotes/:quote_id",
            get(quotes::get_quote)
                .put(quotes::update_quote)
                .delete(quotes::delete_quote),
        )
        .route(
            "/projects/:project_id/quotes/:quote_id/status",
            patch(quotes::update_quote_status),
        )
        // Catalog
        .route(
            "/materials",
            get(materials::list_materials).post(materials::create_material),
        )
        .route("/materials/categories", get(materials::list_categories))
        .route("/materials/import", post(materials::import_materials))
        .route(
            "/materials/by-code/:product_code",
            get(materials::get_material_by_code),
        )
        .route(
            "/materials/:material_id",
            get(materials::get_material)
                .put(materials::update_material)
                .delete(materials::delete_material),
        )
        // Vendors
        .route(
            "/vendors",
            get(vendors::list_vendors).post(vendors::create_vendor),
        )
        .route("/vendors/import", post(vendors::import_vendors))
        .route(
            "/vendors/:vendor_id",
            get(vendors::get_vendor)
                .put(vendors::update_vendor)
                .delete(vendors::delete_vendor),
        )
        // Historical project imports
        .route(
            "/imports/projects",
            post(imports::import_projects).get(imports::list_historical_projects),
        )
        .route("/imports/projects/template", get(imports::project_template))
        .route(
            "/imports/projects/validate",
            post(imports::validate_project_import),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trimmed_drops_blank_values() {
        assert_eq!(trimmed(Some("  Harbor Point ".into())), Some("Harbor Point".into()));
        assert_eq!(trimmed(Some("   ".into())), None);
        assert_eq!(trimmed(None), None);
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern(Some("rebar")), Some("%rebar%".into()));
        assert_eq!(like_pattern(Some("50%_off")), Some("%50\\%\\_off%".into()));
        assert_eq!(like_pattern(Some("  ")), None);
        assert_eq!(like_pattern(None), None);
    }

    #[test]
    fn validated_maps_to_bad_request() {
        assert!(validated(Ok(())).is_ok());
        assert!(matches!(
            validated(Err("bad".into())),
            Err(ApiError::BadRequest(msg)) if msg == "bad"
        ));
    }
}
