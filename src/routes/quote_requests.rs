//! Outbound quote requests emailed to vendors.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use futures::future::join_all;
use sqlx::types::Json as SqlJson;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use super::companies::fetch_company;
use super::takeoff::{TakeoffRow, TAKEOFF_COLUMNS};
use super::vendors::find_vendor;
use super::{require_project, validated};
use crate::api::{DataResponse, Paginated, PaginationParams};
use crate::app::AppState;
use crate::auth::RequireTenant;
use crate::domain::decimal_to_f64;
use crate::domain::quote_requests::{
    CreateQuoteRequestsRequest, QuoteRequestDetail, QuoteRequestResponse, QuoteRequestStatus,
    QuoteRequestSummary, RequestedItem, SendQuoteRequestsResult, UpdateQuoteRequestStatus,
    VendorSendError,
};
use crate::domain::takeoff::TakeoffItemResponse;
use crate::error::ApiError;
use crate::services::mailer::QuoteRequestEmail;

#[derive(Debug, sqlx::FromRow)]
struct QuoteRequestRow {
    id: Uuid,
    project_id: Uuid,
    vendor_id: Option<Uuid>,
    vendor_name: String,
    vendor_email: Option<String>,
    email_subject: String,
    email_body: String,
    status: String,
    failure_reason: Option<String>,
    expected_response_date: Option<NaiveDate>,
    requested_items: SqlJson<Vec<RequestedItem>>,
    sent_by: Option<Uuid>,
    sent_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl QuoteRequestRow {
    fn into_response(self) -> (QuoteRequestResponse, String) {
        let response = QuoteRequestResponse {
            id: self.id,
            project_id: self.project_id,
            vendor_id: self.vendor_id,
            vendor_name: self.vendor_name,
            vendor_email: self.vendor_email,
            email_subject: self.email_subject,
            status: QuoteRequestStatus::parse(&self.status),
            failure_reason: self.failure_reason,
            expected_response_date: self.expected_response_date,
            requested_items: self.requested_items.0,
            sent_by: self.sent_by,
            sent_at: self.sent_at,
            updated_at: self.updated_at,
        };
        (response, self.email_body)
    }
}

impl From<QuoteRequestRow> for QuoteRequestResponse {
    fn from(row: QuoteRequestRow) -> Self {
        row.into_response().0
    }
}

const QUOTE_REQUEST_COLUMNS: &str = "id, project_id, vendor_id, vendor_name, vendor_email, \
     email_subject, email_body, status, failure_reason, expected_response_date, requested_items, \
     sent_by, sent_at, updated_at";

/// Ids in first-seen order without repeats
fn unique_ids(ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

fn requested_item(row: &TakeoffRow) -> RequestedItem {
    RequestedItem {
        takeoff_item_id: row.id,
        label: row.label.clone(),
        qty: decimal_to_f64(row.qty),
        unit: row.unit.clone(),
    }
}

/// POST /projects/:project_id/quote-requests
///
/// Each vendor gets its own email and its own request row. Emails go out
/// concurrently; failed deliveries are recorded with status `failed` and
/// reported back.
pub async fn send_quote_requests(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path(project_id): Path<Uuid>,
    Json(req): Json<CreateQuoteRequestsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validated(req.validate())?;
    let project = require_project(&state.db, tenant.company_id, project_id).await?;

    let takeoff_ids = unique_ids(&req.takeoff_item_ids);
    let takeoffs: Vec<TakeoffRow> = sqlx::query_as(&format!(
        "SELECT {} FROM takeoff_items WHERE project_id = $1 AND id = ANY($2) ORDER BY created_at, id",
        TAKEOFF_COLUMNS
    ))
    .bind(project_id)
    .bind(&takeoff_ids)
    .fetch_all(&state.db)
    .await?;

    if takeoffs.len() != takeoff_ids.len() {
        return Err(ApiError::not_found(
            "One or more takeoff items were not found in this project",
        ));
    }

    let items: Vec<RequestedItem> = takeoffs.iter().map(requested_item).collect();
    let company = fetch_company(&state.db, tenant.company_id).await?;
    let mut result = SendQuoteRequestsResult::default();

    // Vendors that can be contacted, with their rendered messages
    let mut outgoing = Vec::new();
    for vendor_id in unique_ids(&req.vendor_ids) {
        let Some(vendor) = find_vendor(&state.db, tenant.company_id, vendor_id).await? else {
            result.errors.push(VendorSendError {
                vendor_id,
                vendor_name: None,
                error: "Vendor not found".to_string(),
            });
            continue;
        };

        let Some(address) = vendor.email.clone().filter(|e| !e.trim().is_empty()) else {
            result.errors.push(VendorSendError {
                vendor_id,
                vendor_name: Some(vendor.name.clone()),
                error: "Vendor has no email address".to_string(),
            });
            continue;
        };

        let email = QuoteRequestEmail {
            vendor_name: &vendor.name,
            project_name: &project.name,
            company_name: &company.name,
            items: &items,
            message: req.message.as_deref(),
            expected_response_date: req.expected_response_date,
        }
        .render(&address);
        outgoing.push((vendor, email));
    }

    let deliveries = join_all(outgoing.iter().map(|(_, email)| state.mailer.send(email))).await;

    for ((vendor, email), delivery) in outgoing.iter().zip(deliveries) {
        let (status, failure_reason) = match delivery {
            Ok(()) => (QuoteRequestStatus::Sent, None),
            Err(e) => {
                tracing::warn!(vendor_id = %vendor.id, error = %e, "Quote request email failed");
                (QuoteRequestStatus::Failed, Some(e.to_string()))
            }
        };

        let request_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO quote_requests (project_id, vendor_id, vendor_name, vendor_email,
                                        email_subject, email_body, status, failure_reason,
                                        expected_response_date, requested_items, sent_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(project_id)
        .bind(vendor.id)
        .bind(&vendor.name)
        .bind(&email.to_address)
        .bind(&email.subject)
        .bind(&email.text_body)
        .bind(status.as_str())
        .bind(&failure_reason)
        .bind(req.expected_response_date)
        .bind(SqlJson(&items))
        .bind(tenant.user_id)
        .fetch_one(&state.db)
        .await?;

        result.request_ids.push(request_id);
        match failure_reason {
            None => result.success_count += 1,
            Some(error) => result.errors.push(VendorSendError {
                vendor_id: vendor.id,
                vendor_name: Some(vendor.name.clone()),
                error,
            }),
        }
    }

    result.error_count = result.errors.len();

    tracing::info!(
        user_id = %tenant.user_id,
        project_id = %project_id,
        items = items.len(),
        sent = result.success_count,
        errors = result.error_count,
        transport = state.mailer.transport_name(),
        "Quote requests processed"
    );

    Ok(Json(DataResponse::new(result)))
}

/// GET /projects/:project_id/quote-requests
pub async fn list_quote_requests(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path(project_id): Path<Uuid>,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    require_project(&state.db, tenant.company_id, project_id).await?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM quote_requests WHERE project_id = $1")
        .bind(project_id)
        .fetch_one(&state.db)
        .await?;

    let rows: Vec<QuoteRequestRow> = sqlx::query_as(&format!(
        r#"
        SELECT {} FROM quote_requests
        WHERE project_id = $1
        ORDER BY sent_at DESC
        LIMIT $2 OFFSET $3
        "#,
        QUOTE_REQUEST_COLUMNS
    ))
    .bind(project_id)
    .bind(params.limit())
    .bind(params.offset())
    .fetch_all(&state.db)
    .await?;

    let data: Vec<QuoteRequestResponse> = rows.into_iter().map(Into::into).collect();
    Ok(Paginated::new(data, &params, total))
}

#[derive(Debug, sqlx::FromRow)]
struct SummaryRow {
    total: i64,
    sent: i64,
    failed: i64,
    opened: i64,
    responded: i64,
    expired: i64,
    vendors_contacted: i64,
    last_sent_at: Option<DateTime<Utc>>,
}

/// GET /projects/:project_id/quote-requests/summary
pub async fn quote_request_summary(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path(project_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    require_project(&state.db, tenant.company_id, project_id).await?;

    let row: SummaryRow = sqlx::query_as(
        r#"
        SELECT
            COUNT(*) AS total,
            COUNT(*) FILTER (WHERE status = 'sent') AS sent,
            COUNT(*) FILTER (WHERE status = 'failed') AS failed,
            COUNT(*) FILTER (WHERE status = 'opened') AS opened,
            COUNT(*) FILTER (WHERE status = 'responded') AS responded,
            COUNT(*) FILTER (WHERE status = 'expired') AS expired,
            COUNT(DISTINCT vendor_id) FILTER (WHERE status <> 'failed') AS vendors_contacted,
            MAX(sent_at) AS last_sent_at
        FROM quote_requests
        WHERE project_id = $1
        "#,
    )
    .bind(project_id)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(DataResponse::new(QuoteRequestSummary {
        total: row.total,
        sent: row.sent,
        failed: row.failed,
        opened: row.opened,
        responded: row.responded,
        expired: row.expired,
        vendors_contacted: row.vendors_contacted,
        last_sent_at: row.last_sent_at,
    })))
}

/// GET /projects/:project_id/quote-requests/:request_id
pub async fn get_quote_request(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path((project_id, request_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    require_project(&state.db, tenant.company_id, project_id).await?;

    let row: QuoteRequestRow = sqlx::query_as(&format!(
        "SELECT {} FROM quote_requests WHERE id = $1 AND project_id = $2",
        QUOTE_REQUEST_COLUMNS
    ))
    .bind(request_id)
    .bind(project_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Quote request not found"))?;

    let (request, email_body) = row.into_response();
    let ids: Vec<Uuid> = request.requested_items.iter().map(|i| i.takeoff_item_id).collect();

    let takeoffs: Vec<TakeoffRow> = sqlx::query_as(&format!(
        "SELECT {} FROM takeoff_items WHERE project_id = $1 AND id = ANY($2) ORDER BY created_at, id",
        TAKEOFF_COLUMNS
    ))
    .bind(project_id)
    .bind(&ids)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(DataResponse::new(QuoteRequestDetail {
        request,
        email_body,
        items: takeoffs.into_iter().map(TakeoffItemResponse::from).collect(),
    })))
}

/// PATCH /projects/:project_id/quote-requests/:request_id/status
pub async fn update_quote_request_status(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path((project_id, request_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateQuoteRequestStatus>,
) -> Result<impl IntoResponse, ApiError> {
    validated(req.validate())?;
    require_project(&state.db, tenant.company_id, project_id).await?;

    let row: QuoteRequestRow = sqlx::query_as(&format!(
        r#"
        UPDATE quote_requests SET status = $3, updated_at = NOW()
        WHERE id = $1 AND project_id = $2
        RETURNING {}
        "#,
        QUOTE_REQUEST_COLUMNS
    ))
    .bind(request_id)
    .bind(project_id)
    .bind(req.status.as_str())
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Quote request not found"))?;

    tracing::info!(
        user_id = %tenant.user_id,
        project_id = %project_id,
        request_id = %request_id,
        status = req.status.as_str(),
        "Quote request status updated"
    );

    Ok(Json(DataResponse::new(QuoteRequestResponse::from(row))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_ids_keep_first_occurrence_order() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(unique_ids(&[a, b, a, b, a]), vec![a, b]);
        assert!(unique_ids(&[]).is_empty());
    }
}
