//! Authentication routes
//!
//! These routes proxy authentication requests to Supabase Auth. Registration
//! also creates the caller's company with the caller as its admin.

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::{Created, DataResponse, MessageResponse};
use crate::app::AppState;
use crate::auth::RequireAuth;
use crate::domain::auth::{
    AuthResponse, RefreshTokenRequest, RegisterRequest, SignInRequest, SignupPendingResponse,
    SupabaseAuthResponse, SupabaseErrorResponse, SupabaseSignupResponse, User,
};
use crate::domain::companies::UserRole;
use crate::error::ApiError;

/// Error message from a failed Supabase response, or `fallback` when the body is unreadable
async fn supabase_error(response: reqwest::Response, fallback: &str) -> String {
    match response.json::<SupabaseErrorResponse>().await {
        Ok(error) => error.get_message(),
        Err(_) => fallback.to_string(),
    }
}

fn parse_user_id(id: &str) -> Result<Uuid, ApiError> {
    id.parse()
        .map_err(|_| ApiError::internal("Invalid user ID from auth service"))
}

/// Insert the company and its first admin in one transaction
async fn bootstrap_company(
    state: &AppState,
    user_id: Uuid,
    req: &RegisterRequest,
) -> Result<Uuid, ApiError> {
    let mut tx = state.db.begin().await?;

    let company_id: Uuid =
        sqlx::query_scalar("INSERT INTO companies (name, email) VALUES ($1, $2) RETURNING id")
            .bind(req.company_name.trim())
            .bind(req.email.trim())
            .fetch_one(&mut *tx)
            .await?;

    sqlx::query(
        r#"
        INSERT INTO users (id, company_id, email, name, role)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(user_id)
    .bind(company_id)
    .bind(req.email.trim())
    .bind(req.name.as_deref().map(str::trim).filter(|n| !n.is_empty()))
    .bind(UserRole::Admin.as_str())
    .execute(&mut *tx)
    .await
    .map_err(|e| match ApiError::from(e) {
        ApiError::Conflict(_) => ApiError::conflict("An account with this email already exists"),
        other => other,
    })?;

    tx.commit().await?;

    tracing::info!(
        user_id = %user_id,
        company_id = %company_id,
        "Company registered"
    );

    Ok(company_id)
}

/// Company of an existing user, if the user row exists
async fn company_of(state: &AppState, user_id: Uuid) -> Result<Option<Uuid>, ApiError> {
    let company_id = sqlx::query_scalar("SELECT company_id FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&state.db)
        .await?;
    Ok(company_id)
}

/// POST /auth/register
///
/// Sign up with Supabase and create the company.
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Response, ApiError> {
    req.validate().map_err(ApiError::bad_request)?;

    let response = state
        .http_client
        .post(format!("{}/auth/v1/signup", state.settings.supabase_url))
        .header("apikey", &state.settings.supabase_anon_key)
        .json(&serde_json::json!({
            "email": req.email.trim(),
            "password": req.password,
            "data": {
                "name": req.name,
                "company_name": req.company_name,
            }
        }))
        .send()
        .await
        .map_err(|e| ApiError::internal(format!("Failed to connect to auth service: {}", e)))?;

    if !response.status().is_success() {
        return Err(ApiError::bad_request(
            supabase_error(response, "Registration failed").await,
        ));
    }

    // Auto-confirmed projects return a session, otherwise the bare user object
    let body = response
        .text()
        .await
        .map_err(|e| ApiError::internal(format!("Failed to read auth response: {}", e)))?;

    if let Ok(session) = serde_json::from_str::<SupabaseAuthResponse>(&body) {
        let user_id = parse_user_id(&session.user.id)?;
        let company_id = bootstrap_company(&state, user_id, &req).await?;

        return Ok(Created(AuthResponse {
            access_token: session.access_token,
            refresh_token: session.refresh_token,
            expires_in: session.expires_in,
            user: User::from(session.user),
            company_id: Some(company_id),
        })
        .into_response());
    }

    if let Ok(pending) = serde_json::from_str::<SupabaseSignupResponse>(&body) {
        let user_id = parse_user_id(&pending.id)?;
        let company_id = bootstrap_company(&state, user_id, &req).await?;

        return Ok(Created(SignupPendingResponse {
            user_id: pending.id,
            email: pending.email.unwrap_or_else(|| req.email.trim().to_string()),
            company_id,
            confirmation_required: true,
            message: "Check your email to confirm your account".to_string(),
        })
        .into_response());
    }

    Err(ApiError::internal("Unexpected response from auth service"))
}

/// POST /auth/signin
pub async fn sign_in(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignInRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let response = state
        .http_client
        .post(format!(
            "{}/auth/v1/token?grant_type=password",
            state.settings.supabase_url
        ))
        .header("apikey", &state.settings.supabase_anon_key)
        .json(&serde_json::json!({
            "email": req.email,
            "password": req.password
        }))
        .send()
        .await
        .map_err(|e| ApiError::internal(format!("Failed to connect to auth service: {}", e)))?;

    if !response.status().is_success() {
        return Err(ApiError::unauthorized(
            supabase_error(response, "Invalid credentials").await,
        ));
    }

    let session: SupabaseAuthResponse = response
        .json()
        .await
        .map_err(|e| ApiError::internal(format!("Failed to parse auth response: {}", e)))?;

    let user_id = parse_user_id(&session.user.id)?;
    let company_id = company_of(&state, user_id).await?;
    if company_id.is_none() {
        tracing::warn!(user_id = %user_id, "Signed-in user has no company");
    }
    tracing::info!(user_id = %user_id, company_id = ?company_id, "User signed in");

    Ok(Json(DataResponse::new(AuthResponse {
        access_token: session.access_token,
        refresh_token: session.refresh_token,
        expires_in: session.expires_in,
        user: User::from(session.user),
        company_id,
    })))
}

/// POST /auth/refresh
pub async fn refresh_token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RefreshTokenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let response = state
        .http_client
        .post(format!(
            "{}/auth/v1/token?grant_type=refresh_token",
            state.settings.supabase_url
        ))
        .header("apikey", &state.settings.supabase_anon_key)
        .json(&serde_json::json!({ "refresh_token": req.refresh_token }))
        .send()
        .await
        .map_err(|e| ApiError::internal(format!("Failed to connect to auth service: {}", e)))?;

    if !response.status().is_success() {
        return Err(ApiError::unauthorized(
            supabase_error(response, "Invalid refresh token").await,
        ));
    }

    let session: SupabaseAuthResponse = response
        .json()
        .await
        .map_err(|e| ApiError::internal(format!("Failed to parse auth response: {}", e)))?;

    let user_id = parse_user_id(&session.user.id)?;
    let company_id = company_of(&state, user_id).await?;

    Ok(Json(DataResponse::new(AuthResponse {
        access_token: session.access_token,
        refresh_token: session.refresh_token,
        expires_in: session.expires_in,
        user: User::from(session.user),
        company_id,
    })))
}

/// POST /auth/signout
///
/// Revokes the session upstream; a failed revocation is logged, not surfaced.
pub async fn sign_out(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
) -> Result<impl IntoResponse, ApiError> {
    let result = state
        .http_client
        .post(format!("{}/auth/v1/logout", state.settings.supabase_url))
        .header("apikey", &state.settings.supabase_anon_key)
        .bearer_auth(auth.token())
        .send()
        .await;

    match result {
        Ok(response) if response.status().is_success() => {}
        Ok(response) => {
            tracing::warn!(user_id = %auth.user_id, status = %response.status(), "Upstream sign-out rejected")
        }
        Err(e) => tracing::warn!(user_id = %auth.user_id, error = %e, "Upstream sign-out failed"),
    }

    tracing::info!(user_id = %auth.user_id, email = ?auth.email, "User signed out");

    Ok(Json(MessageResponse::new("Signed out")))
}
