//! Company scoping for authenticated requests.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use super::middleware::{AuthError, RequireAuth};
use crate::app::AppState;
use crate::domain::companies::UserRole;
use crate::error::ErrorResponse;

/// The caller and the company every query must be filtered by
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub user_id: Uuid,
    pub company_id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub role: UserRole,
}

/// Extractor for routes that read or write company data.
///
/// Wraps `RequireAuth` and loads the caller's `users` row; callers without a
/// company, or whose account is deactivated, are refused.
#[derive(Debug, Clone)]
pub struct RequireTenant(pub TenantContext);

impl std::ops::Deref for RequireTenant {
    type Target = TenantContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug)]
pub enum TenantError {
    Auth(AuthError),
    NoCompany,
    Inactive,
    Database,
}

impl IntoResponse for TenantError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            TenantError::Auth(inner) => return inner.into_response(),
            TenantError::NoCompany => (
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                "User is not associated with a company",
            ),
            TenantError::Inactive => (StatusCode::FORBIDDEN, "FORBIDDEN", "User account is inactive"),
            TenantError::Database => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred",
            ),
        };

        let body = ErrorResponse {
            code: code.to_string(),
            message: message.to_string(),
            request_id: None,
        };

        (status, Json(body)).into_response()
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    company_id: Option<Uuid>,
    email: String,
    name: Option<String>,
    role: String,
    is_active: bool,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireTenant {
    type Rejection = TenantError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let auth = RequireAuth::from_request_parts(parts, state)
            .await
            .map_err(TenantError::Auth)?;
        let user_id = auth.user_id;

        let row: Option<UserRow> = sqlx::query_as(
            "SELECT company_id, email, name, role, is_active FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&state.db)
        .await
        .map_err(|e| {
            tracing::error!(user_id = %user_id, error = %e, "Failed to load user for tenant scope");
            TenantError::Database
        })?;

        let Some(row) = row else {
            tracing::warn!(user_id = %user_id, "Authenticated user has no profile row");
            return Err(TenantError::NoCompany);
        };
        if !row.is_active {
            return Err(TenantError::Inactive);
        }
        let company_id = row.company_id.ok_or(TenantError::NoCompany)?;

        Ok(RequireTenant(TenantContext {
            user_id,
            company_id,
            email: row.email,
            name: row.name.or_else(|| auth.display_name.clone()),
            role: UserRole::parse(&row.role),
        }))
    }
}
