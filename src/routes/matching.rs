//! Catalog matching for ad-hoc descriptions and project takeoffs.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use super::require_project;
use super::takeoff::{load_takeoffs, store_match, AppliedMatch, TakeoffRow};
use crate::api::DataResponse;
use crate::app::AppState;
use crate::auth::RequireTenant;
use crate::domain::matching::{
    MatchCandidate, MatchRequest, MatchResponse, ProjectMatchRequest, ProjectMatchResponse,
    ProjectMatchSummary, TakeoffMatchResult,
};
use crate::domain::{decimal_to_f64, f64_to_decimal};
use crate::error::ApiError;
use crate::services::matcher::{
    infer_category, select_best, CatalogEntry, MatchQuery, MaterialMatch, MaterialMatcher,
    DEFAULT_THRESHOLD,
};

/// The company's active catalog
pub(crate) async fn load_catalog(db: &PgPool, company_id: Uuid) -> Result<Vec<CatalogEntry>, ApiError> {
    let catalog: Vec<CatalogEntry> = sqlx::query_as(
        r#"
        SELECT id, product_code, description, category, unit, unit_price
        FROM materials
        WHERE company_id = $1 AND is_active = TRUE
        "#,
    )
    .bind(company_id)
    .fetch_all(db)
    .await?;

    tracing::debug!(company_id = %company_id, materials = catalog.len(), "Catalog loaded");
    Ok(catalog)
}

/// Matcher over the company's active catalog
pub(crate) async fn load_matcher(db: &PgPool, company_id: Uuid) -> Result<MaterialMatcher, ApiError> {
    Ok(MaterialMatcher::new(load_catalog(db, company_id).await?))
}

fn threshold(value: Option<u32>) -> Result<u32, ApiError> {
    match value {
        Some(t) if t > 100 => Err(ApiError::bad_request("threshold must be between 0 and 100")),
        Some(t) => Ok(t),
        None => Ok(DEFAULT_THRESHOLD),
    }
}

/// Candidates for one takeoff row; an explicit category wins over the inferred one.
pub(crate) fn match_takeoff(
    matcher: &MaterialMatcher,
    row: &TakeoffRow,
    threshold: u32,
) -> Vec<MaterialMatch> {
    let category_hint = row
        .category
        .as_deref()
        .or_else(|| infer_category(&row.label, row.notes.as_deref()));

    matcher.match_item(&MatchQuery {
        description: &row.label,
        unit: Some(&row.unit),
        category_hint,
        threshold,
    })
}

/// POST /matching/match
pub async fn match_description(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Json(req): Json<MatchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.description.trim().is_empty() {
        return Err(ApiError::bad_request("Description is required"));
    }
    let threshold = threshold(req.threshold)?;

    let matcher = load_matcher(&state.db, tenant.company_id).await?;
    let inferred = infer_category(&req.description, None);
    let matches = matcher.match_item(&MatchQuery {
        description: &req.description,
        unit: req.unit.as_deref(),
        category_hint: req.category.as_deref().or(inferred),
        threshold,
    });

    let best_match = select_best(&matches, true).map(MatchCandidate::from);
    Ok(Json(DataResponse::new(MatchResponse {
        description: req.description,
        inferred_category: inferred.map(str::to_string),
        matches: matches.iter().map(MatchCandidate::from).collect(),
        best_match,
    })))
}

/// POST /projects/:project_id/matching
pub async fn match_project(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path(project_id): Path<Uuid>,
    Json(req): Json<ProjectMatchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_project(&state.db, tenant.company_id, project_id).await?;
    let threshold = threshold(req.threshold)?;

    let takeoffs = load_takeoffs(&state.db, project_id).await?;
    let matcher = load_matcher(&state.db, tenant.company_id).await?;

    let mut summary = ProjectMatchSummary::default();
    let mut results = Vec::with_capacity(takeoffs.len());
    let mut tx = state.db.begin().await?;

    for row in &takeoffs {
        let matches = match_takeoff(&matcher, row, threshold);
        let best = select_best(&matches, true);

        let mut applied = false;
        if let (true, Some(best)) = (req.apply, best) {
            let confidence = f64_to_decimal(best.confidence).unwrap_or_default().round_dp(4);
            let stored = store_match(
                &mut *tx,
                row.id,
                &AppliedMatch {
                    material_id: best.material.id,
                    unit_price: best.material.unit_price,
                    category: Some(best.material.category.clone()),
                    confidence,
                },
            )
            .await?;
            applied = stored.is_some();
        }

        let result = TakeoffMatchResult {
            takeoff_item_id: row.id,
            label: row.label.clone(),
            qty: decimal_to_f64(row.qty),
            unit: row.unit.clone(),
            best_match: best.map(MatchCandidate::from),
            suggestions: matches.iter().map(MatchCandidate::from).collect(),
            applied,
        };
        summary.record(&result);
        results.push(result);
    }

    tx.commit().await?;

    tracing::info!(
        user_id = %tenant.user_id,
        project_id = %project_id,
        total = summary.total_items,
        matched = summary.matched,
        applied = summary.applied,
        "Project takeoffs matched"
    );

    Ok(Json(DataResponse::new(ProjectMatchResponse { summary, results })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_defaults_and_bounds() {
        assert_eq!(threshold(None).unwrap(), DEFAULT_THRESHOLD);
        assert_eq!(threshold(Some(0)).unwrap(), 0);
        assert_eq!(threshold(Some(100)).unwrap(), 100);
        assert!(threshold(Some(101)).is_err());
    }
}
