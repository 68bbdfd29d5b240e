use axum::{extract::State, response::IntoResponse, Json};
use std::sync::Arc;

use super::companies::fetch_company;
use crate::api::DataResponse;
use crate::app::AppState;
use crate::auth::RequireTenant;
use crate::domain::auth::MeResponse;
use crate::error::ApiError;

/// Get the caller's profile and company
pub async fn get_me(
    State(state): State<Arc<AppState>>,
    tenant: RequireTenant,
) -> Result<impl IntoResponse, ApiError> {
    let company = fetch_company(&state.db, tenant.company_id).await?;

    Ok(Json(DataResponse::new(MeResponse {
        user_id: tenant.user_id,
        email: tenant.email.clone(),
        name: tenant.name.clone(),
        role: tenant.role,
        company: company.into(),
    })))
}
