mod api;
mod app;
mod auth;
mod config;
mod db;
mod domain;
mod error;
mod logging;
mod middleware;
mod routes;
mod services;

use anyhow::{Context, Result};
use std::time::Duration;

use services::{AiClient, FileStorage, Mailer, PdfRasterizer, PlanParser, RedisCache};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let settings = config::Settings::from_env()?;
    logging::init_logging(&settings.env);

    tracing::info!(
        env = ?settings.env,
        server_addr = %settings.server_addr,
        "Starting Bidcraft backend"
    );

    let pool = db::create_pool(&settings).await?;
    if settings.run_migrations {
        db::run_migrations(&pool).await?;
    }

    let cache = RedisCache::new(&settings.redis_url, settings.redis_cache_ttl_seconds).await?;
    tracing::info!("Redis cache initialized");

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("Failed to create HTTP client")?;

    let ai_client = AiClient::new(&settings)?;
    if ai_client.is_configured() {
        tokio::spawn({
            let ai_client = ai_client.clone();
            async move {
                match ai_client.health_check().await {
                    Ok(()) => tracing::info!("Vision model reachable"),
                    Err(e) => tracing::warn!(error = %e, "Vision model health check failed"),
                }
            }
        });
    }

    let rasterizer = PdfRasterizer::new(settings.pdfium_library_path.clone(), settings.pdf_render_width);
    if !rasterizer.is_available().await {
        tracing::warn!("Pdfium library not found; vision parsing will fall back to text extraction");
    }
    let plan_parser = PlanParser::new(ai_client, rasterizer);

    let mailer = Mailer::from_settings(&settings.email, http_client.clone())?;

    let storage = FileStorage::new(settings.upload_dir.clone());
    storage.ensure_layout().await?;
    tracing::info!(root = %storage.root().display(), "Upload storage ready");

    let jwks_cache = auth::JwksCache::new(http_client.clone(), &settings);
    if let Err(e) = jwks_cache.warm_cache().await {
        tracing::warn!(error = %e, "Failed to warm JWKS cache - will fetch on first request");
    }

    let state = app::AppState::new(
        pool,
        settings.clone(),
        jwks_cache,
        cache,
        plan_parser,
        mailer,
        storage,
        http_client,
    );
    let app = app::create_app(state);

    let listener = tokio::net::TcpListener::bind(&settings.server_addr).await?;
    tracing::info!("Listening on {}", settings.server_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
