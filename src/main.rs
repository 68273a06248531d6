// HTTP entry point: cleanup triggers plus health and metrics

use nutritious_cleanup::{
    core::{types::*, Config},
    orchestration::CleanupOrchestrator,
    utils::Metrics,
};

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    orchestrator: Arc<CleanupOrchestrator>,
    metrics: Metrics,
}

type ApiError = (StatusCode, String);

#[tokio::main]
async fn main() -> Result<()> {
    // Settings are read before the log level is known; surface their warnings anyway
    let bootstrap = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .finish();
    let config = tracing::subscriber::with_default(bootstrap, Config::new)
        .context("Failed to load configuration")?;
    let config = Arc::new(config);

    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new(format!(
        "nutritious_cleanup={},tower_http=warn",
        match config.log_level() {
            tracing::Level::TRACE => "trace",
            tracing::Level::DEBUG => "debug",
            tracing::Level::INFO => "info",
            tracing::Level::WARN => "warn",
            tracing::Level::ERROR => "error",
        }
    ));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("=== NUTRITIOUS CLEANUP ===");
    info!(
        "Config: classifier={} chunk={} batch={} wave={} io={} compute={}",
        config.classifier_endpoint(),
        config.chunk_size(),
        config.batch_size(),
        config.wave_size(),
        config.io_pool_size(),
        config.compute_pool_size()
    );

    let metrics = Metrics::new();
    let orchestrator = Arc::new(CleanupOrchestrator::from_config(
        config.clone(),
        metrics.clone(),
    )?);
    let state = AppState {
        config: config.clone(),
        orchestrator,
        metrics,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/stats", get(stats_endpoint))
        .route("/cleanup", post(cleanup))
        .route("/cleanup/urls", post(cleanup_urls))
        .route("/cleanup/images", post(cleanup_images))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr = format!("{}:{}", config.server_host(), config.server_port());
    info!("{}", "=".repeat(70));
    info!("Server starting on http://{}", addr);
    info!("{}", "-".repeat(70));
    info!("Endpoints:");
    info!("  GET  /                - Root endpoint");
    info!("  GET  /health          - Health check");
    info!("  GET  /metrics         - Prometheus metrics");
    info!("  GET  /stats           - Detailed statistics");
    info!("  POST /cleanup         - URL stage then image stage");
    info!("  POST /cleanup/urls    - URL stage only");
    info!("  POST /cleanup/images  - Image stage only");
    info!("{}", "=".repeat(70));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn root() -> &'static str {
    "Nutritious product image cleanup service"
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Prometheus metrics endpoint
async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

/// Metrics snapshot plus the live URL cache size (JSON)
async fn stats_endpoint(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let snapshot = serde_json::to_value(state.metrics.snapshot()).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to serialize metrics: {}", e),
        )
    })?;

    let cache = state.orchestrator.cache();
    Ok(Json(serde_json::json!({
        "metrics": snapshot,
        "url_cache": {
            "key": state.config.url_cache_key(),
            "checked": cache.len_checked(),
            "failed": cache.len_failed(),
        },
    })))
}

fn require(name: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, format!("`{}` must not be empty", name)));
    }
    Ok(())
}

/// Launch both stages in the background
///
/// # Request:
/// `{"source": "...", "url_output": "...", "image_output": "..."}`
///
/// # Response:
/// `202 Accepted` with a `CleanupAck`, before any work is done
async fn cleanup(
    State(state): State<AppState>,
    Json(request): Json<CleanupRequest>,
) -> Result<(StatusCode, Json<CleanupAck>), ApiError> {
    state.metrics.record_endpoint_request("/cleanup");
    require("source", &request.source)?;
    require("url_output", &request.url_output)?;
    require("image_output", &request.image_output)?;

    info!(
        "Cleanup requested: {} -> {} -> {}",
        request.source, request.url_output, request.image_output
    );

    let ack = CleanupAck {
        status: "started".to_string(),
        stage: "full".to_string(),
        source: request.source.clone(),
        outputs: vec![request.url_output.clone(), request.image_output.clone()],
    };
    state.orchestrator.spawn_cleanup(request);

    Ok((StatusCode::ACCEPTED, Json(ack)))
}

async fn cleanup_urls(
    State(state): State<AppState>,
    Json(request): Json<StageRequest>,
) -> Result<(StatusCode, Json<CleanupAck>), ApiError> {
    state.metrics.record_endpoint_request("/cleanup/urls");
    let ack = stage_ack(Stage::Urls, &request)?;
    state
        .orchestrator
        .spawn_url_stage(request.source, request.output);
    Ok((StatusCode::ACCEPTED, Json(ack)))
}

async fn cleanup_images(
    State(state): State<AppState>,
    Json(request): Json<StageRequest>,
) -> Result<(StatusCode, Json<CleanupAck>), ApiError> {
    state.metrics.record_endpoint_request("/cleanup/images");
    let ack = stage_ack(Stage::Images, &request)?;
    state
        .orchestrator
        .spawn_image_stage(request.source, request.output);
    Ok((StatusCode::ACCEPTED, Json(ack)))
}

fn stage_ack(stage: Stage, request: &StageRequest) -> Result<CleanupAck, ApiError> {
    require("source", &request.source)?;
    require("output", &request.output)?;
    info!("{} stage requested: {} -> {}", stage, request.source, request.output);

    Ok(CleanupAck {
        status: "started".to_string(),
        stage: stage.to_string(),
        source: request.source.clone(),
        outputs: vec![request.output.clone()],
    })
}
