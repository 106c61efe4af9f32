//! Queue admin handlers: stats, DLQ reprocessing, purge.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::auth::Authenticated;
use crate::api::dto::{
    PurgeRequest, PurgeResponse, QueueStatsResponse, ReprocessRequest, ReprocessResponse,
};
use crate::app_state::AppState;
use crate::error::{ErrorResponse, PipelineError};
use crate::queue::QueueName;

/// `GET /queue/stats`: Depth of both queues.
///
/// # Errors
///
/// Returns [`PipelineError::BrokerUnavailable`] when the broker is down.
#[utoipa::path(
    get,
    path = "/api/v1/queue/stats",
    tag = "Queue",
    summary = "Queue statistics",
    description = "Ready messages and consumers on the work queue, ready messages on the dead-letter queue.",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Queue statistics", body = QueueStatsResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 503, description = "Broker unavailable", body = ErrorResponse),
    )
)]
pub async fn queue_stats(
    _auth: Authenticated,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, PipelineError> {
    let stats = state.admin.get_queue_stats().await?;
    Ok(Json(QueueStatsResponse {
        main_queue: stats.main_queue,
        dead_letter_queue: stats.dead_letter_queue,
        status: "ok".to_string(),
    }))
}

/// `POST /queue/reprocess-dlq`: Move dead-lettered jobs back to work.
///
/// # Errors
///
/// Returns [`PipelineError::BrokerUnavailable`] when nothing could be moved.
#[utoipa::path(
    post,
    path = "/api/v1/queue/reprocess-dlq",
    tag = "Queue",
    summary = "Reprocess dead letters",
    description = "Moves up to `limit` dead-lettered jobs back to the work queue with their retry count reset.",
    request_body = ReprocessRequest,
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Jobs moved", body = ReprocessResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 503, description = "Broker unavailable", body = ErrorResponse),
    )
)]
pub async fn reprocess_dlq(
    _auth: Authenticated,
    State(state): State<AppState>,
    Json(req): Json<ReprocessRequest>,
) -> Result<impl IntoResponse, PipelineError> {
    let reprocessed_count = state.admin.reprocess_dlq(req.limit).await?;
    Ok(Json(ReprocessResponse { reprocessed_count }))
}

/// `POST /queue/purge`: Drop every ready message from a queue.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidQueue`] for an unknown queue name and
/// [`PipelineError::ConfirmationRequired`] unless `confirm` is `true`.
#[utoipa::path(
    post,
    path = "/api/v1/queue/purge",
    tag = "Queue",
    summary = "Purge queue",
    description = "Removes every ready message from the named queue (the work queue by default). Requires `confirm: true`.",
    request_body = PurgeRequest,
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Queue purged", body = PurgeResponse),
        (status = 400, description = "Unknown queue or missing confirmation", body = ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 503, description = "Broker unavailable", body = ErrorResponse),
    )
)]
pub async fn purge_queue(
    _auth: Authenticated,
    State(state): State<AppState>,
    Json(req): Json<PurgeRequest>,
) -> Result<impl IntoResponse, PipelineError> {
    let queue = match req.queue_name.as_deref() {
        None => QueueName::default(),
        Some(name) => name.parse()?,
    };
    if !req.confirm {
        return Err(PipelineError::ConfirmationRequired);
    }
    let purged_count = state.admin.purge_queue(queue).await?;
    Ok(Json(PurgeResponse {
        purged_count,
        queue_name: queue.to_string(),
    }))
}

/// Queue admin routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/queue/stats", get(queue_stats))
        .route("/queue/reprocess-dlq", post(reprocess_dlq))
        .route("/queue/purge", post(purge_queue))
}
