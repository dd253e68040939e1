//! HTTP request handlers

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::errors::DeployerError;
use crate::models::deployment::{Deployment, NewDeployment};
use crate::queue::{JobOptions, JobState, QueueError};
use crate::server::state::ServerState;
use crate::utils::version_info;
use crate::validate::live::LiveCheckError;

/// JSON error body with a status code
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::NotFound(_) => Self::not_found(err.to_string()),
            QueueError::InvalidArgument(_) => Self::new(StatusCode::BAD_REQUEST, err.to_string()),
            QueueError::Closed => Self::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
            _ => {
                error!("Queue error: {}", err);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        }
    }
}

impl From<DeployerError> for ApiError {
    fn from(err: DeployerError) -> Self {
        match err {
            DeployerError::QueueError(e) => e.into(),
            DeployerError::NotFound(message) => Self::not_found(message),
            other => {
                error!("Request failed: {}", other);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
            }
        }
    }
}

impl From<LiveCheckError> for ApiError {
    fn from(err: LiveCheckError) -> Self {
        match err {
            LiveCheckError::NotFound(_) => Self::not_found(err.to_string()),
            LiveCheckError::NoUrl(_) => Self::new(StatusCode::CONFLICT, err.to_string()),
            LiveCheckError::Store(e) => {
                error!("Store error during live check: {}", e);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "site-deployer".to_string(),
        version: version_info().version,
    })
}

pub async fn version_handler() -> impl IntoResponse {
    Json(version_info())
}

pub async fn metrics_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

// ================================== QUEUE ======================================= //

pub async fn queue_stats_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.queue.stats().await?))
}

/// `?states=waiting,failed&offset=0&limit=50`
#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    pub states: Option<String>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

const DEFAULT_PAGE_SIZE: usize = 50;

pub async fn list_jobs_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ListJobsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let states = match query.states.as_deref() {
        Some(raw) => raw
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(str::parse::<JobState>)
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };

    let jobs = state
        .queue
        .list_jobs(
            &states,
            query.offset.unwrap_or(0),
            query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
        )
        .await?;
    Ok(Json(jobs))
}

pub async fn get_job_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.queue.get_job(&id).await? {
        Some(job) => Ok(Json(job)),
        None => Err(QueueError::NotFound(id).into()),
    }
}

#[derive(Debug, Serialize)]
pub struct PausedResponse {
    pub paused: bool,
}

pub async fn pause_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<impl IntoResponse, ApiError> {
    state.queue.pause().await?;
    Ok(Json(PausedResponse {
        paused: state.queue.is_paused().await?,
    }))
}

pub async fn resume_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<impl IntoResponse, ApiError> {
    state.queue.resume().await?;
    Ok(Json(PausedResponse {
        paused: state.queue.is_paused().await?,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CleanRequest {
    pub older_than_ms: u64,
    pub state: JobState,
}

#[derive(Debug, Serialize)]
pub struct CleanResponse {
    pub removed: usize,
}

pub async fn clean_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<CleanRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let removed = state
        .queue
        .clean(Duration::from_millis(request.older_than_ms), request.state)
        .await?;
    Ok(Json(CleanResponse { removed }))
}

// =============================== DEPLOYMENTS ==================================== //

#[derive(Debug, Deserialize)]
pub struct CreateDeploymentRequest {
    pub website_id: String,
    pub user_id: String,
    pub version: String,
    #[serde(default)]
    pub commit_message: Option<String>,
    pub provider: String,
    #[serde(default)]
    pub options: Option<JobOptions>,
}

#[derive(Debug, Serialize)]
pub struct CreateDeploymentResponse {
    pub deployment: Deployment,
    pub job_id: String,
}

pub async fn create_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<CreateDeploymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let fields = NewDeployment {
        website_id: request.website_id,
        user_id: request.user_id,
        version: request.version,
        commit_message: request.commit_message,
    };
    let options = request.options.unwrap_or(state.job_options);

    let (deployment, handle) = state
        .orchestrator
        .request_deployment(fields, &request.provider, options)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateDeploymentResponse {
            deployment,
            job_id: handle.id,
        }),
    ))
}

pub async fn get_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.orchestrator.find(&id).await? {
        Some(deployment) => Ok(Json(deployment)),
        None => Err(ApiError::not_found("Deployment not found")),
    }
}

pub async fn live_check_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        state.orchestrator.validate_deployed_website(&id).await?,
    ))
}
