//! Project CRUD, scoped to the caller's company.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use super::{like_pattern, require_project, trimmed, validated};
use crate::api::{Created, DataResponse, MessageResponse, Paginated, PaginationParams};
use crate::app::AppState;
use crate::auth::RequireTenant;
use crate::domain::projects::{
    CreateProjectRequest, ProjectDetailResponse, ProjectQuery, ProjectResponse, ProjectStats,
    UpdateProjectRequest,
};
use crate::error::ApiError;
use crate::services::cache::keys;

#[derive(Debug, sqlx::FromRow)]
struct ProjectRow {
    id: Uuid,
    company_id: Uuid,
    name: String,
    job_number: String,
    location: Option<String>,
    project_type: Option<String>,
    customer_name: Option<String>,
    customer_contact: Option<String>,
    notes: Option<String>,
    created_by: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProjectRow> for ProjectResponse {
    fn from(row: ProjectRow) -> Self {
        Self {
            id: row.id,
            company_id: row.company_id,
            name: row.name,
            job_number: row.job_number,
            location: row.location,
            project_type: row.project_type,
            customer_name: row.customer_name,
            customer_contact: row.customer_contact,
            notes: row.notes,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const PROJECT_COLUMNS: &str = "id, company_id, name, job_number, location, project_type, \
     customer_name, customer_contact, notes, created_by, created_at, updated_at";

/// POST /projects
pub async fn create_project(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Json(req): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validated(req.validate())?;

    let row: ProjectRow = sqlx::query_as(&format!(
        r#"
        INSERT INTO projects (company_id, name, job_number, location, project_type,
                              customer_name, customer_contact, notes, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING {}
        "#,
        PROJECT_COLUMNS
    ))
    .bind(tenant.company_id)
    .bind(req.name.trim())
    .bind(req.job_number.trim())
    .bind(trimmed(req.location))
    .bind(trimmed(req.project_type))
    .bind(trimmed(req.customer_name))
    .bind(trimmed(req.customer_contact))
    .bind(trimmed(req.notes))
    .bind(tenant.user_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| match ApiError::from(e) {
        ApiError::Conflict(_) => ApiError::conflict("A project with this job number already exists"),
        other => other,
    })?;

    tracing::info!(
        user_id = %tenant.user_id,
        company_id = %tenant.company_id,
        project_id = %row.id,
        job_number = %row.job_number,
        "Project created"
    );

    Ok(Created(ProjectResponse::from(row)))
}

/// GET /projects
pub async fn list_projects(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Query(params): Query<PaginationParams>,
    Query(query): Query<ProjectQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let search = like_pattern(query.search.as_deref());

    let total: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM projects
        WHERE company_id = $1
        AND ($2::text IS NULL OR name ILIKE $2 OR job_number ILIKE $2)
        "#,
    )
    .bind(tenant.company_id)
    .bind(&search)
    .fetch_one(&state.db)
    .await?;

    let rows: Vec<ProjectRow> = sqlx::query_as(&format!(
        r#"
        SELECT {} FROM projects
        WHERE company_id = $1
        AND ($2::text IS NULL OR name ILIKE $2 OR job_number ILIKE $2)
        ORDER BY created_at DESC
        LIMIT $3 OFFSET $4
        "#,
        PROJECT_COLUMNS
    ))
    .bind(tenant.company_id)
    .bind(&search)
    .bind(params.limit())
    .bind(params.offset())
    .fetch_all(&state.db)
    .await?;

    let data: Vec<ProjectResponse> = rows.into_iter().map(Into::into).collect();
    Ok(Paginated::new(data, &params, total))
}

/// GET /projects/:project_id
pub async fn get_project(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path(project_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let row: ProjectRow = sqlx::query_as(&format!(
        "SELECT {} FROM projects WHERE id = $1 AND company_id = $2",
        PROJECT_COLUMNS
    ))
    .bind(project_id)
    .bind(tenant.company_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Project not found"))?;

    let (document_count, takeoff_count, quote_count, estimate_count): (i64, i64, i64, i64) =
        sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM project_documents WHERE project_id = $1),
                (SELECT COUNT(*) FROM takeoff_items WHERE project_id = $1),
                (SELECT COUNT(*) FROM quotes WHERE project_id = $1),
                (SELECT COUNT(*) FROM estimates WHERE project_id = $1)
            "#,
        )
        .bind(project_id)
        .fetch_one(&state.db)
        .await?;

    Ok(Json(DataResponse::new(ProjectDetailResponse {
        project: row.into(),
        stats: ProjectStats {
            document_count,
            takeoff_count,
            quote_count,
            estimate_count,
        },
    })))
}

/// PUT /projects/:project_id
pub async fn update_project(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path(project_id): Path<Uuid>,
    Json(req): Json<UpdateProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validated(req.validate())?;

    let row: ProjectRow = sqlx::query_as(&format!(
        r#"
        UPDATE projects SET
            name = COALESCE($3, name),
            job_number = COALESCE($4, job_number),
            location = COALESCE($5, location),
            project_type = COALESCE($6, project_type),
            customer_name = COALESCE($7, customer_name),
            customer_contact = COALESCE($8, customer_contact),
            notes = COALESCE($9, notes),
            updated_at = NOW()
        WHERE id = $1 AND company_id = $2
        RETURNING {}
        "#,
        PROJECT_COLUMNS
    ))
    .bind(project_id)
    .bind(tenant.company_id)
    .bind(trimmed(req.name))
    .bind(trimmed(req.job_number))
    .bind(trimmed(req.location))
    .bind(trimmed(req.project_type))
    .bind(trimmed(req.customer_name))
    .bind(trimmed(req.customer_contact))
    .bind(trimmed(req.notes))
    .fetch_optional(&state.db)
    .await
    .map_err(|e| match ApiError::from(e) {
        ApiError::Conflict(_) => ApiError::conflict("A project with this job number already exists"),
        other => other,
    })?
    .ok_or_else(|| ApiError::not_found("Project not found"))?;

    tracing::info!(
        user_id = %tenant.user_id,
        company_id = %tenant.company_id,
        project_id = %project_id,
        "Project updated"
    );

    Ok(Json(DataResponse::new(ProjectResponse::from(row))))
}

/// DELETE /projects/:project_id
///
/// Child rows go with the project through `ON DELETE CASCADE`; stored files
/// and cached parse results are removed afterwards.
pub async fn delete_project(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path(project_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let project = require_project(&state.db, tenant.company_id, project_id).await?;

    let document_ids: Vec<Uuid> =
        sqlx::query_scalar("SELECT id FROM project_documents WHERE project_id = $1")
            .bind(project_id)
            .fetch_all(&state.db)
            .await?;

    sqlx::query("DELETE FROM projects WHERE id = $1 AND company_id = $2")
        .bind(project_id)
        .bind(tenant.company_id)
        .execute(&state.db)
        .await?;

    state.storage.delete_project(project_id).await;
    for document_id in &document_ids {
        state.cache.evict(&keys::parse_pattern(*document_id)).await;
    }

    tracing::info!(
        user_id = %tenant.user_id,
        company_id = %tenant.company_id,
        project_id = %project_id,
        documents = document_ids.len(),
        "Project deleted"
    );

    Ok(Json(MessageResponse::new(format!(
        "Project '{}' deleted",
        project.name
    ))))
}
