//! Request/response DTOs for the queue admin endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::queue::{DeadLetterStats, MainQueueStats};

/// Dead-letter jobs moved per reprocess request when no limit is given.
pub const DEFAULT_REPROCESS_LIMIT: u32 = 10;

fn default_reprocess_limit() -> u32 {
    DEFAULT_REPROCESS_LIMIT
}

/// Response for `GET /api/v1/queue/stats`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatsResponse {
    /// Work queue.
    pub main_queue: MainQueueStats,
    /// Dead-letter queue.
    pub dead_letter_queue: DeadLetterStats,
    /// `"ok"` when the broker answered.
    pub status: String,
}

/// Request body for `POST /api/v1/queue/reprocess-dlq`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ReprocessRequest {
    /// Maximum jobs to move. Defaults to 10.
    #[serde(default = "default_reprocess_limit")]
    pub limit: u32,
}

impl Default for ReprocessRequest {
    fn default() -> Self {
        Self {
            limit: DEFAULT_REPROCESS_LIMIT,
        }
    }
}

/// Response for `POST /api/v1/queue/reprocess-dlq`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReprocessResponse {
    /// Jobs moved back to the work queue.
    pub reprocessed_count: u32,
}

/// Request body for `POST /api/v1/queue/purge`.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct PurgeRequest {
    /// Queue to purge. Defaults to the work queue.
    pub queue_name: Option<String>,
    /// Must be `true`.
    pub confirm: bool,
}

/// Response for `POST /api/v1/queue/purge`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PurgeResponse {
    /// Messages removed.
    pub purged_count: u64,
    /// Queue that was purged.
    pub queue_name: String,
}
