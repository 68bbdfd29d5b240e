use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::app::AppState;
use crate::db;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub services: ServiceHealth,
}

#[derive(Serialize)]
pub struct ServiceHealth {
    pub database: &'static str,
    pub redis: &'static str,
    pub ai_service: &'static str,
    pub mailer: &'static str,
}

/// Overall status from the individual checks; the database is the only hard dependency
fn overall_status(db_ok: bool, redis_ok: bool, ai_ok: bool) -> &'static str {
    match (db_ok, redis_ok && ai_ok) {
        (true, true) => "healthy",
        (true, false) => "degraded",
        (false, _) => "unhealthy",
    }
}

/// Health check endpoint - public
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthResponse>) {
    let (db_ok, redis_result, ai_configured) = tokio::join!(
        db::health_check(&state.db),
        state.cache.health_check(),
        async { state.plan_parser.ai().is_configured() },
    );

    let status = overall_status(db_ok, redis_result.is_ok(), ai_configured);
    if status != "healthy" {
        tracing::warn!(
            database = db_ok,
            redis = redis_result.is_ok(),
            ai_configured,
            "Health check not fully healthy"
        );
    }

    let status_code = if status == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    let ok_or_error = |ok: bool| if ok { "ok" } else { "error" };

    (
        status_code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            services: ServiceHealth {
                database: ok_or_error(db_ok),
                redis: ok_or_error(redis_result.is_ok()),
                ai_service: if ai_configured { "configured" } else { "not_configured" },
                mailer: state.mailer.transport_name(),
            },
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_failure_is_unhealthy() {
        assert_eq!(overall_status(false, true, true), "unhealthy");
        assert_eq!(overall_status(false, false, false), "unhealthy");
    }

    #[test]
    fn optional_failures_degrade() {
        assert_eq!(overall_status(true, false, true), "degraded");
        assert_eq!(overall_status(true, true, false), "degraded");
        assert_eq!(overall_status(true, true, true), "healthy");
    }
}
