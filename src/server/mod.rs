//! HTTP server assembly.

use crate::access::AccessGate;
use crate::config::Config;
use crate::db::DbPool;
use crate::pipeline::Pipeline;
use crate::signer::UrlSigner;
use crate::storage::Storage;
use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use rand::RngCore;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod error;
pub mod routes_stream;
pub mod routes_videos;

pub use auth::SessionKeys;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub db: DbPool,
    pub storage: Arc<dyn Storage>,
    pub signer: Arc<UrlSigner>,
    pub sessions: Arc<SessionKeys>,
    pub gate: Arc<AccessGate>,
    pub pipeline: Arc<Pipeline>,
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let cors = if ctx.config.server.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
    } else {
        let origins: Vec<HeaderValue> = ctx
            .config
            .server
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
    };

    let max_body = ctx.config.upload.max_size_bytes() as usize + 1024 * 1024;

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/videos", routes_videos::router(max_body))
        .nest("/api/stream", routes_stream::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

/// Resolve the signing secret: configured, or ephemeral in dev mode.
pub fn resolve_secret(config: &Config) -> Result<Vec<u8>> {
    match config.signer.secret {
        Some(ref secret) => Ok(secret.clone().into_bytes()),
        None if config.signer.dev_mode => {
            tracing::warn!(
                "signer.dev_mode: using an ephemeral signing secret; \
                 all tokens die with this process"
            );
            let mut secret = vec![0u8; 32];
            rand::thread_rng().fill_bytes(&mut secret);
            Ok(secret)
        }
        None => anyhow::bail!(
            "signer.secret is required; set signer.dev_mode = true to run with an ephemeral one"
        ),
    }
}

/// Build the full application context from configuration.
pub fn build_context(config: Config) -> Result<AppContext> {
    let secret = resolve_secret(&config)?;

    let db = crate::db::init_pool(&config.database.path)
        .context("failed to initialize database")?;
    let storage = crate::storage::from_config(&config.storage)
        .context("failed to initialize storage backend")?;
    let signer = Arc::new(UrlSigner::new(secret.clone(), config.signer.ttl_secs)?);
    let sessions = Arc::new(SessionKeys::new(secret));
    let gate = Arc::new(AccessGate::new(db.clone(), Arc::clone(&signer)));

    let encoder = crate::transcode::HlsEncoder::from_config(&config.transcode)
        .context("failed to locate transcoding tools")?;
    let pipeline = Arc::new(Pipeline::new(
        db.clone(),
        Arc::clone(&storage),
        encoder,
        config.upload.scratch_dir(),
        config.transcode.max_concurrent_jobs,
    ));

    Ok(AppContext {
        config: Arc::new(config),
        db,
        storage,
        signer,
        sessions,
        gate,
        pipeline,
    })
}

/// Start the HTTP server
pub async fn start_server(config: Config) -> Result<()> {
    let ctx = build_context(config)?;

    // Anything stranded mid-pipeline by a previous process gets a
    // definite terminal state before we accept traffic.
    let swept = Pipeline::recover_stalled(&ctx.db)
        .map_err(|e| anyhow::anyhow!("startup recovery sweep failed: {e}"))?;
    if swept > 0 {
        tracing::warn!(count = swept, "marked interrupted videos as failed");
    }

    let addr: SocketAddr = format!("{}:{}", ctx.config.server.host, ctx.config.server.port)
        .parse()
        .context("invalid server.host/server.port")?;

    let app = create_router(ctx);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!("listening on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
