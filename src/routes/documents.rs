//! Plan and spec PDF uploads.

use axum::{
    extract::{Multipart, Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use super::require_project;
use crate::api::{Created, DataResponse, FileDownload, MessageResponse};
use crate::app::AppState;
use crate::auth::RequireTenant;
use crate::domain::documents::{validate_upload, DocType, DocumentQuery, DocumentResponse, ParseStatus};
use crate::error::ApiError;
use crate::services::cache::keys;
use crate::services::pdf_pages;
use crate::services::FileStorage;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct DocumentRow {
    pub id: Uuid,
    pub project_id: Uuid,
    pub doc_type: String,
    pub original_filename: String,
    pub file_path: String,
    pub file_size: i64,
    pub page_count: Option<i32>,
    pub parse_status: String,
    pub parse_method: Option<String>,
    pub parsed_at: Option<DateTime<Utc>>,
    pub uploaded_by: Option<Uuid>,
    pub uploaded_at: DateTime<Utc>,
}

impl From<DocumentRow> for DocumentResponse {
    fn from(row: DocumentRow) -> Self {
        Self {
            id: row.id,
            project_id: row.project_id,
            doc_type: DocType::parse(&row.doc_type).unwrap_or(DocType::Plan),
            original_filename: row.original_filename,
            file_size: row.file_size,
            page_count: row.page_count,
            parse_status: ParseStatus::parse(&row.parse_status),
            parse_method: row.parse_method,
            parsed_at: row.parsed_at,
            uploaded_by: row.uploaded_by,
            uploaded_at: row.uploaded_at,
        }
    }
}

pub(crate) const DOCUMENT_COLUMNS: &str = "id, project_id, doc_type, original_filename, file_path, \
     file_size, page_count, parse_status, parse_method, parsed_at, uploaded_by, uploaded_at";

/// Document row after checking the project belongs to the caller's company
pub(crate) async fn require_document(
    state: &AppState,
    company_id: Uuid,
    project_id: Uuid,
    document_id: Uuid,
) -> Result<DocumentRow, ApiError> {
    require_project(&state.db, company_id, project_id).await?;

    sqlx::query_as(&format!(
        "SELECT {} FROM project_documents WHERE id = $1 AND project_id = $2",
        DOCUMENT_COLUMNS
    ))
    .bind(document_id)
    .bind(project_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Document not found"))
}

struct Upload {
    filename: String,
    bytes: Vec<u8>,
}

/// POST /projects/:project_id/documents (multipart: `file`, `doc_type`)
pub async fn upload_document(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path(project_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    require_project(&state.db, tenant.company_id, project_id).await?;

    let mut upload: Option<Upload> = None;
    let mut doc_type = DocType::Plan;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().unwrap_or("document.pdf").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {}", e)))?;
                upload = Some(Upload {
                    filename,
                    bytes: bytes.to_vec(),
                });
            }
            Some("doc_type") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Invalid doc_type field: {}", e)))?;
                doc_type = DocType::parse(&value)
                    .ok_or_else(|| ApiError::bad_request("doc_type must be 'plan' or 'spec'"))?;
            }
            _ => {}
        }
    }

    let Upload { filename, bytes } =
        upload.ok_or_else(|| ApiError::bad_request("A 'file' field is required"))?;
    validate_upload(&filename, &bytes, state.settings.max_upload_bytes)
        .map_err(ApiError::bad_request)?;

    let bytes = Arc::new(bytes);
    let page_count = pdf_pages::page_count(bytes.clone())
        .await
        .ok()
        .map(|n| n as i32);
    let document_id = Uuid::new_v4();
    let key = FileStorage::document_key(doc_type, project_id, document_id);
    state.storage.save(&key, bytes.as_slice()).await?;

    let inserted = sqlx::query_as::<_, DocumentRow>(&format!(
        r#"
        INSERT INTO project_documents (id, project_id, doc_type, original_filename, file_path,
                                       file_size, page_count, uploaded_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING {}
        "#,
        DOCUMENT_COLUMNS
    ))
    .bind(document_id)
    .bind(project_id)
    .bind(doc_type.as_str())
    .bind(&filename)
    .bind(&key)
    .bind(bytes.len() as i64)
    .bind(page_count)
    .bind(tenant.user_id)
    .fetch_one(&state.db)
    .await;

    let row = match inserted {
        Ok(row) => row,
        Err(e) => {
            // Do not leave an orphaned file behind
            if let Err(cleanup) = state.storage.delete(&key).await {
                tracing::warn!(key = %key, error = %cleanup, "Failed to remove orphaned upload");
            }
            return Err(e.into());
        }
    };

    tracing::info!(
        user_id = %tenant.user_id,
        company_id = %tenant.company_id,
        project_id = %project_id,
        document_id = %document_id,
        doc_type = doc_type.as_str(),
        bytes = bytes.len(),
        page_count = ?page_count,
        "Document uploaded"
    );

    Ok(Created(DocumentResponse::from(row)))
}

/// GET /projects/:project_id/documents
pub async fn list_documents(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path(project_id): Path<Uuid>,
    Query(query): Query<DocumentQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_project(&state.db, tenant.company_id, project_id).await?;

    let rows: Vec<DocumentRow> = sqlx::query_as(&format!(
        r#"
        SELECT {} FROM project_documents
        WHERE project_id = $1
        AND ($2::text IS NULL OR doc_type = $2)
        ORDER BY uploaded_at DESC
        "#,
        DOCUMENT_COLUMNS
    ))
    .bind(project_id)
    .bind(query.doc_type.map(|t| t.as_str()))
    .fetch_all(&state.db)
    .await?;

    let data: Vec<DocumentResponse> = rows.into_iter().map(Into::into).collect();
    Ok(Json(DataResponse::new(data)))
}

/// GET /projects/:project_id/documents/:document_id
pub async fn get_document(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path((project_id, document_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let row = require_document(&state, tenant.company_id, project_id, document_id).await?;
    Ok(Json(DataResponse::new(DocumentResponse::from(row))))
}

/// GET /projects/:project_id/documents/:document_id/download
pub async fn download_document(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path((project_id, document_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let row = require_document(&state, tenant.company_id, project_id, document_id).await?;
    let bytes = state
        .storage
        .read(&row.file_path)
        .await?
        .ok_or_else(|| ApiError::not_found("Stored file is missing"))?;

    Ok(FileDownload::pdf(bytes, row.original_filename))
}

/// DELETE /projects/:project_id/documents/:document_id
pub async fn delete_document(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
    Path((project_id, document_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let row = require_document(&state, tenant.company_id, project_id, document_id).await?;

    sqlx::query("DELETE FROM project_documents WHERE id = $1")
        .bind(document_id)
        .execute(&state.db)
        .await?;

    match state.storage.delete(&row.file_path).await {
        Ok(true) => {}
        Ok(false) => tracing::warn!(document_id = %document_id, "Stored file was already gone"),
        Err(e) => tracing::warn!(document_id = %document_id, error = %e, "Failed to delete stored file"),
    }
    state.cache.evict(&keys::parse_pattern(document_id)).await;

    tracing::info!(
        user_id = %tenant.user_id,
        company_id = %tenant.company_id,
        project_id = %project_id,
        document_id = %document_id,
        "Document deleted"
    );

    Ok(Json(MessageResponse::new("Document deleted")))
}
