//! Narrative handlers: submit, search, stats, trending, detail,
//! re-analysis, snapshot history, delete.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::auth::Authenticated;
use crate::api::dto::{
    DEFAULT_CHANNEL_ID, DEFAULT_MESSAGE_ID, DEFAULT_TRENDING_LIMIT, DeleteNarrativeResponse,
    DeletedToken, NarrativeDetailResponse, RECENT_ANALYSES, SnapshotParams, SubmitCallRequest,
    TrendingParams, TrendingResponse,
};
use crate::app_state::AppState;
use crate::domain::{Narrative, SentimentSnapshot};
use crate::error::{ErrorResponse, PipelineError};
use crate::service::{CallReceipt, CallSubmission};
use crate::store::{
    MAX_PAGE_SIZE, NarrativeQuery, NarrativeStats, Page, TRENDING_WINDOW_DAYS, TrendingMetric,
    clamp_limit,
};

fn non_blank(value: Option<String>, default: &str) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// `POST /narratives`: Record a buy call and queue its analysis.
///
/// # Errors
///
/// Returns [`PipelineError`] on blank fields or storage failure.
#[utoipa::path(
    post,
    path = "/api/v1/narratives",
    tag = "Narratives",
    summary = "Submit a buy call",
    description = "Creates the narrative on the first call for a token, or counts a repeat call, then queues an analysis job. Returns 201 for a new narrative and 200 for a repeat call.",
    request_body = SubmitCallRequest,
    security(("bearer" = [])),
    responses(
        (status = 201, description = "Narrative created and queued", body = CallReceipt),
        (status = 200, description = "Narrative updated and queued", body = CallReceipt),
        (status = 400, description = "Missing symbol or address", body = ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
    )
)]
pub async fn submit_call(
    _auth: Authenticated,
    State(state): State<AppState>,
    Json(req): Json<SubmitCallRequest>,
) -> Result<impl IntoResponse, PipelineError> {
    let submission = CallSubmission {
        token_symbol: req.token_symbol,
        token_address: req.token_address,
        message_id: non_blank(req.message_id, DEFAULT_MESSAGE_ID),
        channel_id: non_blank(req.channel_id, DEFAULT_CHANNEL_ID),
        timestamp: req.timestamp.unwrap_or_else(|| state.clock.now()),
    };
    let receipt = state.producer.submit_call(submission).await?;
    let status = if receipt.is_new {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(receipt)))
}

/// `GET /narratives`: Filtered, sorted, paged listing.
///
/// # Errors
///
/// Returns [`PipelineError`] on storage failure.
#[utoipa::path(
    get,
    path = "/api/v1/narratives",
    tag = "Narratives",
    summary = "Search narratives",
    description = "Filters by symbol substring, sentiment and rank ranges, and status. Sorted by `sortBy`/`sortOrder`, paged by `page`/`limit`.",
    params(NarrativeQuery),
    security(("bearer" = [])),
    responses(
        (status = 200, description = "One page of narratives", body = Page<Narrative>),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
    )
)]
pub async fn list_narratives(
    _auth: Authenticated,
    State(state): State<AppState>,
    Query(query): Query<NarrativeQuery>,
) -> Result<impl IntoResponse, PipelineError> {
    Ok(Json(state.store.search(&query).await?))
}

/// `GET /narratives/stats`: Aggregate statistics.
///
/// # Errors
///
/// Returns [`PipelineError`] on storage failure.
#[utoipa::path(
    get,
    path = "/api/v1/narratives/stats",
    tag = "Narratives",
    summary = "Narrative statistics",
    description = "Counts per status, mean sentiment over completed narratives, and the top 10 by sentiment and by rank.",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Statistics", body = NarrativeStats),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
    )
)]
pub async fn narrative_stats(
    _auth: Authenticated,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, PipelineError> {
    Ok(Json(state.store.stats().await?))
}

/// `GET /narratives/trending`: Completed narratives updated in the last
/// seven days.
///
/// # Errors
///
/// Returns [`PipelineError`] on an unknown metric or storage failure.
#[utoipa::path(
    get,
    path = "/api/v1/narratives/trending",
    tag = "Narratives",
    summary = "Trending narratives",
    description = "Completed narratives updated within the last 7 days, ordered by interactions, sentiment, or rank.",
    params(TrendingParams),
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Trending narratives", body = TrendingResponse),
        (status = 400, description = "Unknown metric", body = ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
    )
)]
pub async fn trending(
    _auth: Authenticated,
    State(state): State<AppState>,
    Query(params): Query<TrendingParams>,
) -> Result<impl IntoResponse, PipelineError> {
    let metric = match params.metric.as_deref() {
        None | Some("") => TrendingMetric::default(),
        Some(raw) => raw.parse().map_err(PipelineError::Validation)?,
    };
    let limit = params
        .limit
        .unwrap_or(DEFAULT_TRENDING_LIMIT)
        .clamp(1, MAX_PAGE_SIZE);
    let since = state.clock.now() - chrono::Duration::days(TRENDING_WINDOW_DAYS);
    let data = state.store.trending(metric, since, limit).await?;
    let metric = match metric {
        TrendingMetric::Interactions => "interactions",
        TrendingMetric::SentimentScore => "sentimentScore",
        TrendingMetric::TopicRank => "topicRank",
    };
    Ok(Json(TrendingResponse {
        metric: metric.to_string(),
        since,
        data,
    }))
}

/// `GET /narratives/{token_address}`: Narrative with its latest analyses.
///
/// # Errors
///
/// Returns [`PipelineError::NarrativeNotFound`] if no narrative exists.
#[utoipa::path(
    get,
    path = "/api/v1/narratives/{token_address}",
    tag = "Narratives",
    summary = "Get narrative",
    description = "Returns the narrative document and its 10 most recent sentiment snapshots.",
    params(("token_address" = String, Path, description = "Token contract address")),
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Narrative detail", body = NarrativeDetailResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 404, description = "Narrative not found", body = ErrorResponse),
    )
)]
pub async fn get_narrative(
    _auth: Authenticated,
    State(state): State<AppState>,
    Path(token_address): Path<String>,
) -> Result<impl IntoResponse, PipelineError> {
    let narrative = state
        .store
        .find_by_address(&token_address)
        .await?
        .ok_or_else(|| PipelineError::NarrativeNotFound(token_address.clone()))?;
    let recent = state
        .store
        .list_snapshots(&token_address, 1, RECENT_ANALYSES)
        .await?;
    Ok(Json(NarrativeDetailResponse {
        narrative,
        recent_analyses: recent.data,
    }))
}

/// `POST /narratives/{token_address}/reanalyze`: Queue a fresh analysis.
///
/// # Errors
///
/// Returns [`PipelineError::NarrativeNotFound`] if no narrative exists.
#[utoipa::path(
    post,
    path = "/api/v1/narratives/{token_address}/reanalyze",
    tag = "Narratives",
    summary = "Re-analyze narrative",
    description = "Queues a manual re-analysis without counting a call.",
    params(("token_address" = String, Path, description = "Token contract address")),
    security(("bearer" = [])),
    responses(
        (status = 202, description = "Re-analysis queued", body = CallReceipt),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 404, description = "Narrative not found", body = ErrorResponse),
    )
)]
pub async fn reanalyze(
    _auth: Authenticated,
    State(state): State<AppState>,
    Path(token_address): Path<String>,
) -> Result<impl IntoResponse, PipelineError> {
    let receipt = state.producer.reanalyze(&token_address).await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

/// `GET /narratives/{token_address}/sentiment`: Paged snapshot history.
///
/// # Errors
///
/// Returns [`PipelineError`] on storage failure.
#[utoipa::path(
    get,
    path = "/api/v1/narratives/{token_address}/sentiment",
    tag = "Narratives",
    summary = "Sentiment history",
    description = "Sentiment snapshots for the token, newest first.",
    params(
        ("token_address" = String, Path, description = "Token contract address"),
        SnapshotParams,
    ),
    security(("bearer" = [])),
    responses(
        (status = 200, description = "One page of snapshots", body = Page<SentimentSnapshot>),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
    )
)]
pub async fn sentiment_history(
    _auth: Authenticated,
    State(state): State<AppState>,
    Path(token_address): Path<String>,
    Query(params): Query<SnapshotParams>,
) -> Result<impl IntoResponse, PipelineError> {
    let page = params.page.unwrap_or(1).max(1);
    let limit = clamp_limit(params.limit);
    Ok(Json(
        state
            .store
            .list_snapshots(&token_address, page, limit)
            .await?,
    ))
}

/// `DELETE /narratives/{token_address}`: Remove a narrative and its
/// history.
///
/// # Errors
///
/// Returns [`PipelineError::NarrativeNotFound`] if no narrative exists.
#[utoipa::path(
    delete,
    path = "/api/v1/narratives/{token_address}",
    tag = "Narratives",
    summary = "Delete narrative",
    description = "Deletes the narrative document and every sentiment snapshot for the token.",
    params(("token_address" = String, Path, description = "Token contract address")),
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Narrative deleted", body = DeleteNarrativeResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 404, description = "Narrative not found", body = ErrorResponse),
    )
)]
pub async fn delete_narrative(
    _auth: Authenticated,
    State(state): State<AppState>,
    Path(token_address): Path<String>,
) -> Result<impl IntoResponse, PipelineError> {
    let (narrative, snapshots_deleted) = state
        .store
        .delete_by_address(&token_address)
        .await?
        .ok_or_else(|| PipelineError::NarrativeNotFound(token_address.clone()))?;
    tracing::warn!(
        token_symbol = %narrative.token_symbol,
        token_address = %narrative.token_address,
        snapshots_deleted,
        "narrative deleted"
    );
    Ok(Json(DeleteNarrativeResponse {
        deleted_token: DeletedToken {
            symbol: narrative.token_symbol,
            address: narrative.token_address,
        },
        snapshots_deleted,
    }))
}

/// Narrative routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/narratives", post(submit_call).get(list_narratives))
        .route("/narratives/stats", get(narrative_stats))
        .route("/narratives/trending", get(trending))
        .route(
            "/narratives/{token_address}",
            get(get_narrative).delete(delete_narrative),
        )
        .route("/narratives/{token_address}/reanalyze", post(reanalyze))
        .route(
            "/narratives/{token_address}/sentiment",
            get(sentiment_history),
        )
}
