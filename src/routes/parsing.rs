//! Plan parsing: vision model first, text extraction as the fallback.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::documents::{require_document, DocumentRow};
use crate::api::{DataResponse, MessageResponse};
use crate::app::AppState;
use crate::auth::RequireTenant;
use crate::domain::documents::{DocType, ParseStatus};
use crate::domain::parsing::{
    AiStatusResponse, ParseAndSaveResponse, ParseMethod, ParseQuery, PlanParseResult,
};
use crate::domain::f64_to_decimal;
use crate::error::ApiError;
use crate::services::cache::keys;

const AI_STATUS_TTL: Duration = Duration::from_secs(60);

/// GET /ai/status
pub async fn ai_status(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let key = keys::ai_status();
    if let Some(cached) = state.cache.get::<AiStatusResponse>(&key).await {
        return Ok(Json(DataResponse::new(cached)));
    }

    let ai = state.plan_parser.ai();
    let vision_configured = ai.is_configured();
    let pdf_renderer_available = state.plan_parser.rasterizer().is_available().await;

    let status = AiStatusResponse {
        vision_configured,
        model: vision_configured.then(|| ai.model().to_string()),
        pdf_renderer_available,
        text_fallback_available: true,
        preferred_method: if vision_configured && pdf_renderer_available {
            ParseMethod::Vision
        } else {
            ParseMethod::Text
        },
    };

    if let Err(e) = state.cache.set_with_ttl(&key, &status, AI_STATUS_TTL).await {
        tracing::warn!(error = %e, "Failed to cache AI status");
    }

    Ok(Json(DataResponse::new(status)))
}

/// A text result while the vision model is configured means vision failed,
/// possibly transiently, so it is not kept.
fn should_cache(result: &PlanParseResult, vision_configured: bool) -> bool {
    !(vision_configured && matches!(result.method, ParseMethod::Text))
}

/// Parse a plan document, serving and filling the cache, and record the outcome on the row.
async fn parse_document(
    state: &AppState,
    document: &DocumentRow,
    query: &ParseQuery,
) -> Result<PlanParseResult, ApiError> {
    if DocType::parse(&document.doc_type) != Some(DocType::Plan) {
        return Err(ApiError::bad_request("Only plan documents can be parsed"));
    }
    let max_pages = query.max_pages().map_err(ApiError::bad_request)?;
    let cache_key = keys::parse_result(document.id, max_pages);

    if !query.refresh {
        if let Some(mut cached) = state.cache.get::<PlanParseResult>(&cache_key).await {
            tracing::debug!(document_id = %document.id, max_pages, "Serving cached parse result");
            cached.cached = true;
            return Ok(cached);
        }
    }

    let bytes = state
        .storage
        .read(&document.file_path)
        .await?
        .ok_or_else(|| ApiError::not_found("Stored file is missing"))?;

    let result = match state.plan_parser.parse(document.id, bytes, max_pages).await {
        Ok(result) => result,
        Err(e) => {
            mark_failed(state, document.id).await;
            return Err(e);
        }
    };

    sqlx::query(
        r#"
        UPDATE project_documents SET
            parse_status = $2,
            parse_method = $3,
            parsed_at = $4,
            page_count = COALESCE($5, page_count)
        WHERE id = $1
        "#,
    )
    .bind(document.id)
    .bind(ParseStatus::Parsed.as_str())
    .bind(result.method.as_str())
    .bind(result.parsed_at)
    .bind(result.page_count.map(|n| n as i32))
    .execute(&state.db)
    .await?;

    if should_cache(&result, state.plan_parser.ai().is_configured()) {
        state.cache.put(&cache_key, &result).await;
    }
    Ok(result)
}

async fn mark_failed(state: &AppState, document_id: Uuid) {
    let updated = sqlx::query(
        "UPDATE project_documents SET parse_status = $2, parsed_at = $3 WHERE id = $1",
    )
    .bind(document_id)
    .bind(ParseStatus::Failed.as_str())
    .bind(Utc::now())
    .execute(&state.db)
    .await;

    if let Err(e) = updated {
        tracing::warn!(document_id = %document_id, error = %e, "Failed to record parse failure");
    }
}

/// POST /projects/:project_id/documents/:document_id/parse
pub async fn parse_plan(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path((project_id, document_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<ParseQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let document = require_document(&state, tenant.company_id, project_id, document_id).await?;
    let result = parse_document(&state, &document, &query).await?;

    tracing::info!(
        user_id = %tenant.user_id,
        project_id = %project_id,
        document_id = %document_id,
        method = result.method.as_str(),
        cached = result.cached,
        "Plan parsed"
    );

    Ok(Json(DataResponse::new(result)))
}

/// POST /projects/:project_id/documents/:document_id/parse-and-save
pub async fn parse_and_save(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path((project_id, document_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<ParseQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let document = require_document(&state, tenant.company_id, project_id, document_id).await?;
    let result = parse_document(&state, &document, &query).await?;
    let drafts = result.plan.takeoff_drafts();

    let mut tx = state.db.begin().await?;
    let mut takeoff_item_ids = Vec::with_capacity(drafts.len());

    for draft in &drafts {
        let qty = f64_to_decimal(draft.qty).unwrap_or_default();
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO takeoff_items (project_id, document_id, label, qty, unit, source_page, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(project_id)
        .bind(document_id)
        .bind(&draft.label)
        .bind(qty)
        .bind(&draft.unit)
        .bind(draft.source_page)
        .bind(&draft.notes)
        .fetch_one(&mut *tx)
        .await?;
        takeoff_item_ids.push(id);
    }

    tx.commit().await?;

    let mut warnings = result.warnings;
    if drafts.is_empty() {
        warnings.push("No bid items or materials were found to save".to_string());
    }

    tracing::info!(
        user_id = %tenant.user_id,
        project_id = %project_id,
        document_id = %document_id,
        saved = takeoff_item_ids.len(),
        "Parsed takeoff items saved"
    );

    Ok(Json(DataResponse::new(ParseAndSaveResponse {
        document_id,
        method: result.method,
        pages_analyzed: result.pages_analyzed,
        takeoff_items_created: takeoff_item_ids.len(),
        takeoff_item_ids,
        warnings,
    })))
}

/// DELETE /projects/:project_id/documents/:document_id/parse-cache
pub async fn clear_parse_cache(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path((project_id, document_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    require_document(&state, tenant.company_id, project_id, document_id).await?;

    let removed = state
        .cache
        .delete_pattern(&keys::parse_pattern(document_id))
        .await
        .map_err(|e| ApiError::unavailable(format!("Cache unavailable: {}", e)))?;

    tracing::info!(
        user_id = %tenant.user_id,
        project_id = %project_id,
        document_id = %document_id,
        removed,
        "Parse cache cleared"
    );

    Ok(Json(MessageResponse::new(format!(
        "Removed {} cached parse results",
        removed
    ))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::parsing::ParsedPlan;

    fn result(method: ParseMethod) -> PlanParseResult {
        PlanParseResult {
            document_id: Uuid::new_v4(),
            method,
            pages_analyzed: 1,
            page_count: Some(1),
            plan: ParsedPlan::default(),
            raw_text: Vec::new(),
            warnings: Vec::new(),
            parsed_at: Utc::now(),
            cached: false,
        }
    }

    #[test]
    fn text_fallback_after_vision_failure_is_not_cached() {
        assert!(!should_cache(&result(ParseMethod::Text), true));
        assert!(should_cache(&result(ParseMethod::Text), false));
        assert!(should_cache(&result(ParseMethod::Vision), true));
    }
}
