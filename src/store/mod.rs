//! Narrative store: one document per token address plus an append-only
//! snapshot history.
//!
//! [`NarrativeStore`] is the seam between the pipeline and the document
//! database. [`InMemoryNarrativeStore`] backs tests and persistence-less
//! runs; [`PostgresNarrativeStore`] stores JSONB documents with projected
//! columns for the query predicates.
//!
//! Writes are last-write-wins. The only read-modify-write paths
//! (`record_call`, `save_analysis`, `mark_failed`, `mark_processing`) are
//! serialized per token by the backend so concurrent calls for the same
//! token never lose an increment.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::domain::{
    AnalysisResult, AnalysisStatus, CallRecord, Narrative, NarrativeId, SentimentSnapshot,
};
use crate::error::PipelineError;

pub use memory::InMemoryNarrativeStore;
pub use postgres::PostgresNarrativeStore;

/// Default page size for listings.
pub const DEFAULT_PAGE_SIZE: u32 = 20;
/// Largest accepted page size.
pub const MAX_PAGE_SIZE: u32 = 100;
/// Entries in each of the stats top lists.
pub const STATS_TOP_N: usize = 10;
/// How far back `trending` looks.
pub const TRENDING_WINDOW_DAYS: i64 = 7;

/// Field a narrative search is sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    /// Last modification (default).
    #[default]
    UpdatedAt,
    /// Creation time.
    CreatedAt,
    /// Sentiment score.
    SentimentScore,
    /// Provider rank.
    TopicRank,
    /// Calls seen.
    TotalCallsDetected,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Ascending.
    Asc,
    /// Descending (default).
    #[default]
    Desc,
}

/// Narrative search filters and paging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase", default)]
#[into_params(parameter_in = Query)]
pub struct NarrativeQuery {
    /// Case-insensitive substring of the token symbol.
    pub token_symbol: Option<String>,
    /// Inclusive lower sentiment bound.
    pub min_sentiment: Option<u8>,
    /// Inclusive upper sentiment bound.
    pub max_sentiment: Option<u8>,
    /// Inclusive lower rank bound.
    pub min_rank: Option<u32>,
    /// Inclusive upper rank bound.
    pub max_rank: Option<u32>,
    /// Lifecycle filter.
    #[param(value_type = Option<String>)]
    pub status: Option<AnalysisStatus>,
    /// Sort field.
    #[param(value_type = Option<String>)]
    pub sort_by: SortField,
    /// Sort direction.
    #[param(value_type = Option<String>)]
    pub sort_order: SortOrder,
    /// 1-based page.
    pub page: Option<u32>,
    /// Page size, at most [`MAX_PAGE_SIZE`].
    pub limit: Option<u32>,
}

impl NarrativeQuery {
    /// Effective 1-based page.
    #[must_use]
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    /// Effective page size.
    #[must_use]
    pub fn limit(&self) -> u32 {
        clamp_limit(self.limit)
    }

    /// Rows to skip.
    #[must_use]
    pub fn offset(&self) -> u64 {
        u64::from(self.page() - 1) * u64::from(self.limit())
    }

    /// Returns `true` if `narrative` passes every filter.
    #[must_use]
    pub fn matches(&self, narrative: &Narrative) -> bool {
        if let Some(symbol) = self.token_symbol.as_deref().filter(|s| !s.is_empty())
            && !narrative
                .token_symbol
                .to_lowercase()
                .contains(&symbol.to_lowercase())
        {
            return false;
        }
        if !within(
            narrative.sentiment_score.map(u32::from),
            self.min_sentiment.map(u32::from),
            self.max_sentiment.map(u32::from),
        ) {
            return false;
        }
        if !within(narrative.topic_rank, self.min_rank, self.max_rank) {
            return false;
        }
        self.status
            .is_none_or(|status| narrative.analysis_status == status)
    }
}

fn within(value: Option<u32>, min: Option<u32>, max: Option<u32>) -> bool {
    if min.is_none() && max.is_none() {
        return true;
    }
    value.is_some_and(|v| min.is_none_or(|m| v >= m) && max.is_none_or(|m| v <= m))
}

/// Clamps a requested page size into `1..=MAX_PAGE_SIZE`.
#[must_use]
pub fn clamp_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

/// Paging metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    /// 1-based page.
    pub page: u32,
    /// Page size.
    pub limit: u32,
    /// Matching rows.
    pub total: u64,
    /// Page count.
    pub pages: u64,
    /// More rows after this page.
    pub has_more: bool,
}

impl Pagination {
    /// Computes paging metadata for a page holding `returned` rows.
    #[must_use]
    pub fn new(page: u32, limit: u32, total: u64, returned: usize) -> Self {
        let limit_wide = u64::from(limit.max(1));
        let skipped = u64::from(page.saturating_sub(1)) * limit_wide;
        Self {
            page,
            limit,
            total,
            pages: total.div_ceil(limit_wide),
            has_more: skipped + (returned as u64) < total,
        }
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Page<T> {
    /// Rows.
    pub data: Vec<T>,
    /// Paging metadata.
    pub pagination: Pagination,
}

/// Narratives per lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, ToSchema)]
pub struct StatusCounts {
    /// Pending.
    pub pending: u64,
    /// Processing.
    pub processing: u64,
    /// Completed.
    pub completed: u64,
    /// Failed.
    pub failed: u64,
}

impl StatusCounts {
    /// Increments the counter for `status`.
    pub fn add(&mut self, status: AnalysisStatus, count: u64) {
        let slot = match status {
            AnalysisStatus::Pending => &mut self.pending,
            AnalysisStatus::Processing => &mut self.processing,
            AnalysisStatus::Completed => &mut self.completed,
            AnalysisStatus::Failed => &mut self.failed,
        };
        *slot += count;
    }
}

/// Short projection used in leaderboards.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NarrativeSummary {
    /// Token symbol.
    pub token_symbol: String,
    /// Token address.
    pub token_address: String,
    /// Sentiment score.
    pub sentiment_score: Option<u8>,
    /// Provider rank.
    pub topic_rank: Option<u32>,
    /// 24h interactions.
    pub interactions: u64,
}

impl From<&Narrative> for NarrativeSummary {
    fn from(n: &Narrative) -> Self {
        Self {
            token_symbol: n.token_symbol.clone(),
            token_address: n.token_address.clone(),
            sentiment_score: n.sentiment_score,
            topic_rank: n.topic_rank,
            interactions: n.social_metrics.interactions,
        }
    }
}

/// Aggregate statistics over all narratives.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NarrativeStats {
    /// Narrative count.
    pub total: u64,
    /// Count per lifecycle state.
    pub by_status: StatusCounts,
    /// Mean sentiment over completed narratives, 0 when none.
    pub average_sentiment: f64,
    /// Highest sentiment first.
    pub top_by_sentiment: Vec<NarrativeSummary>,
    /// Best (lowest) rank first.
    pub top_by_rank: Vec<NarrativeSummary>,
}

/// Ordering for the trending listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum TrendingMetric {
    /// 24h interactions, descending (default).
    #[default]
    Interactions,
    /// Sentiment, descending.
    SentimentScore,
    /// Rank, ascending.
    TopicRank,
}

impl std::str::FromStr for TrendingMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "interactions" => Ok(Self::Interactions),
            "sentimentScore" => Ok(Self::SentimentScore),
            "topicRank" => Ok(Self::TopicRank),
            other => Err(format!("unknown trending metric: {other}")),
        }
    }
}

/// Persistence capability shared by the producer, the analyzer and the
/// read surface.
#[async_trait]
pub trait NarrativeStore: Send + Sync + std::fmt::Debug {
    /// Creates the narrative for a first call or records a repeat call.
    /// Returns the narrative after the write and whether it was created.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Persistence`] on storage failure.
    async fn record_call(
        &self,
        call: &CallRecord,
        now: DateTime<Utc>,
    ) -> Result<(Narrative, bool), PipelineError>;

    /// Looks a narrative up by token address.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Persistence`] on storage failure.
    async fn find_by_address(&self, address: &str) -> Result<Option<Narrative>, PipelineError>;

    /// Looks a narrative up by id.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Persistence`] on storage failure.
    async fn find_by_id(&self, id: NarrativeId) -> Result<Option<Narrative>, PipelineError>;

    /// Overwrites enrichment fields and completes the analysis.
    ///
    /// # Errors
    ///
    /// [`PipelineError::NarrativeNotFound`] when the narrative was purged,
    /// [`PipelineError::Persistence`] on storage failure.
    async fn save_analysis(
        &self,
        id: NarrativeId,
        result: &AnalysisResult,
        now: DateTime<Utc>,
    ) -> Result<Narrative, PipelineError>;

    /// Marks the latest analysis failed.
    ///
    /// # Errors
    ///
    /// [`PipelineError::NarrativeNotFound`] when the narrative was purged,
    /// [`PipelineError::Persistence`] on storage failure.
    async fn mark_failed(
        &self,
        id: NarrativeId,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PipelineError>;

    /// Moves a narrative back to `processing` without counting a call.
    ///
    /// # Errors
    ///
    /// [`PipelineError::NarrativeNotFound`] when no narrative exists,
    /// [`PipelineError::Persistence`] on storage failure.
    async fn mark_processing(
        &self,
        address: &str,
        now: DateTime<Utc>,
    ) -> Result<Narrative, PipelineError>;

    /// Most recent snapshot for the token.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Persistence`] on storage failure.
    async fn latest_snapshot(
        &self,
        address: &str,
    ) -> Result<Option<SentimentSnapshot>, PipelineError>;

    /// Appends a snapshot.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Persistence`] on storage failure.
    async fn append_snapshot(&self, snapshot: &SentimentSnapshot) -> Result<(), PipelineError>;

    /// Snapshots for the token, newest first.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Persistence`] on storage failure.
    async fn list_snapshots(
        &self,
        address: &str,
        page: u32,
        limit: u32,
    ) -> Result<Page<SentimentSnapshot>, PipelineError>;

    /// Filtered, sorted, paged narrative listing.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Persistence`] on storage failure.
    async fn search(&self, query: &NarrativeQuery) -> Result<Page<Narrative>, PipelineError>;

    /// Aggregate statistics.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Persistence`] on storage failure.
    async fn stats(&self) -> Result<NarrativeStats, PipelineError>;

    /// Completed narratives updated since `since`, best first by `metric`.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Persistence`] on storage failure.
    async fn trending(
        &self,
        metric: TrendingMetric,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Narrative>, PipelineError>;

    /// Deletes the narrative and all of its snapshots. Returns the deleted
    /// narrative and the number of snapshots removed.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Persistence`] on storage failure.
    async fn delete_by_address(
        &self,
        address: &str,
    ) -> Result<Option<(Narrative, u64)>, PipelineError>;
}
