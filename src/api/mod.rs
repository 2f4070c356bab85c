use std::net::SocketAddr;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::error::{ClustermError, ErrorKind};
use crate::manager::{Manager, NodeSummary};
use crate::scheduler::JobInfo;

#[derive(Clone)]
pub struct ApiState {
    pub manager: Manager,
}

#[derive(Debug, Deserialize)]
pub struct CommissionRequest {
    pub nodes: Vec<String>,
    pub host_group: String,
    #[serde(default)]
    pub extra_vars: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommissionResponse {
    pub success: bool,
    pub job_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Serialize)]
struct JobStatusResponse {
    active: Option<JobInfo>,
    last: Option<JobInfo>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn status_for(err: &ClustermError) -> StatusCode {
    match err.kind() {
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Validation | ErrorKind::Topology | ErrorKind::StatusTransition => {
            StatusCode::BAD_REQUEST
        }
        ErrorKind::Configuration | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/nodes", get(list_nodes_handler))
        .route("/api/commission", post(commission_handler))
        .route("/api/job", get(job_status_handler))
        .route("/api/job/cancel", post(cancel_job_handler))
        .layer(cors)
        .with_state(state)
}

/// Serve the API until `shutdown` is cancelled.
pub async fn run_api(addr: SocketAddr, state: ApiState, shutdown: CancellationToken) {
    let app = router(state);

    tracing::info!(addr = %addr, "Starting API server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind API server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
    {
        tracing::error!(error = %e, "API server failed");
    }
}

async fn list_nodes_handler(State(state): State<ApiState>) -> Json<Vec<NodeSummary>> {
    Json(state.manager.node_summaries().await)
}

async fn commission_handler(
    State(state): State<ApiState>,
    Json(payload): Json<CommissionRequest>,
) -> impl IntoResponse {
    tracing::info!(nodes = ?payload.nodes, group = %payload.host_group, "Commission requested");

    match state
        .manager
        .commission(payload.nodes, payload.extra_vars, payload.host_group)
        .await
    {
        Ok(job_id) => (
            StatusCode::ACCEPTED,
            Json(CommissionResponse {
                success: true,
                job_id: Some(job_id.to_string()),
                error: None,
            }),
        ),
        Err(e) => (
            status_for(&e),
            Json(CommissionResponse {
                success: false,
                job_id: None,
                error: Some(e.to_string()),
            }),
        ),
    }
}

async fn job_status_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let gate = state.manager.gate();
    Json(JobStatusResponse {
        active: gate.active_job(),
        last: gate.last_job(),
    })
}

async fn cancel_job_handler(State(state): State<ApiState>) -> impl IntoResponse {
    if state.manager.gate().cancel_active_job() {
        StatusCode::ACCEPTED.into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "no active job".to_string(),
            }),
        )
            .into_response()
    }
}
