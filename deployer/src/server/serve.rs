//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::DeployerError;
use crate::server::handlers::{
    clean_handler, create_deployment_handler, get_deployment_handler, get_job_handler,
    health_handler, list_jobs_handler, live_check_handler, metrics_handler, pause_handler,
    queue_stats_handler, resume_handler, version_handler,
};
use crate::server::state::ServerState;

/// Build the router with every route and middleware
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/metrics", get(metrics_handler))
        // Queue
        .route("/queue/stats", get(queue_stats_handler))
        .route("/queue/jobs", get(list_jobs_handler))
        .route("/queue/jobs/{id}", get(get_job_handler))
        .route("/queue/pause", post(pause_handler))
        .route("/queue/resume", post(resume_handler))
        .route("/queue/clean", post(clean_handler))
        // Deployments
        .route("/deployments", post(create_deployment_handler))
        .route("/deployments/{id}", get(get_deployment_handler))
        .route("/deployments/{id}/live-check", get(live_check_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), DeployerError>>, DeployerError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| DeployerError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| DeployerError::ServerError(e.to_string()))
    });

    Ok(handle)
}
