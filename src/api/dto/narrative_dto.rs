//! Request/response DTOs for the narrative endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::domain::{Narrative, SentimentSnapshot};

/// Message id recorded for calls submitted over HTTP without one.
pub const DEFAULT_MESSAGE_ID: &str = "manual";
/// Channel id recorded for calls submitted over HTTP without one.
pub const DEFAULT_CHANNEL_ID: &str = "api";
/// Snapshots embedded in the narrative detail response.
pub const RECENT_ANALYSES: u32 = 10;
/// Default size of the trending listing.
pub const DEFAULT_TRENDING_LIMIT: u32 = 10;

/// Request body for `POST /api/v1/narratives`.
///
/// Missing symbol or address deserialize as empty and are rejected by
/// validation with a 400.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct SubmitCallRequest {
    /// Token ticker (e.g. `"BONK"`).
    pub token_symbol: String,
    /// Token contract address.
    pub token_address: String,
    /// Chat message id. Defaults to `"manual"`.
    pub message_id: Option<String>,
    /// Chat channel id. Defaults to `"api"`.
    pub channel_id: Option<String>,
    /// When the call was made. Defaults to the time of the request.
    pub timestamp: Option<DateTime<Utc>>,
}

/// Response for `GET /api/v1/narratives/{token_address}`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NarrativeDetailResponse {
    /// The narrative document.
    pub narrative: Narrative,
    /// Latest snapshots, newest first.
    pub recent_analyses: Vec<SentimentSnapshot>,
}

/// Query parameters for `GET /api/v1/narratives/trending`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(default)]
#[into_params(parameter_in = Query)]
pub struct TrendingParams {
    /// `interactions` (default), `sentimentScore` or `topicRank`.
    pub metric: Option<String>,
    /// Entries to return (max 100). Defaults to 10.
    pub limit: Option<u32>,
}

/// Response for `GET /api/v1/narratives/trending`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrendingResponse {
    /// Ordering applied.
    pub metric: String,
    /// Start of the look-back window.
    pub since: DateTime<Utc>,
    /// Narratives, best first.
    pub data: Vec<Narrative>,
}

/// Query parameters for `GET /api/v1/narratives/{token_address}/sentiment`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(default)]
#[into_params(parameter_in = Query)]
pub struct SnapshotParams {
    /// 1-based page. Defaults to 1.
    pub page: Option<u32>,
    /// Page size (max 100). Defaults to 20.
    pub limit: Option<u32>,
}

/// Identity of a deleted token.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DeletedToken {
    /// Token ticker.
    pub symbol: String,
    /// Token address.
    pub address: String,
}

/// Response for `DELETE /api/v1/narratives/{token_address}`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteNarrativeResponse {
    /// Token that was removed.
    pub deleted_token: DeletedToken,
    /// Snapshots removed with it.
    pub snapshots_deleted: u64,
}
