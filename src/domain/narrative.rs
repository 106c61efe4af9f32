//! Per-token narrative document.
//!
//! A [`Narrative`] exists once per token address. Call tracking fields are
//! mutated by the producer on every detected call; enrichment fields are
//! fully overwritten by every successful analysis (last write wins).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::NarrativeId;

/// Lifecycle of a narrative's enrichment.
///
/// `Pending → Processing → {Completed, Failed}`; a repeat call moves a
/// completed or failed narrative back to `Processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    /// Known but never submitted for analysis.
    #[default]
    Pending,
    /// A job for the latest call is queued or running.
    Processing,
    /// The latest analysis succeeded.
    Completed,
    /// The latest analysis failed; see `lastAnalysisError`.
    Failed,
}

impl AnalysisStatus {
    /// Storage and query representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for AnalysisStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown analysis status: {other}")),
        }
    }
}

/// Three-way sentiment split in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
pub struct SentimentBreakdown {
    /// Positive share.
    pub positive: u8,
    /// Neutral share.
    pub neutral: u8,
    /// Negative share.
    pub negative: u8,
}

/// Aggregated 24h social activity.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SocialMetrics {
    /// Interactions in the last 24h.
    pub interactions: u64,
    /// Number of posts.
    pub posts: u64,
    /// Distinct contributors in the last 24h.
    pub contributors: u64,
    /// Provider social score.
    pub engagement_score: f64,
}

/// Direction of the 24h change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TrendStatus {
    /// Change of +5% or more.
    Up,
    /// Change of -5% or less.
    Down,
    /// Anything in between.
    #[default]
    Flat,
}

/// Trending indicator.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Trending {
    /// Bucketed direction.
    pub status: TrendStatus,
    /// 24h percent change, two decimals.
    pub percent_change: f64,
}

/// An influential account talking about the token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TopCreator {
    /// Display name.
    pub name: String,
    /// Handle on the platform.
    pub username: String,
    /// Source platform.
    pub platform: String,
    /// Follower count.
    pub followers: u64,
    /// Provider influence score.
    pub influence_score: f64,
}

/// A high-engagement post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TopPost {
    /// Trimmed post text.
    pub text: String,
    /// Author display name.
    pub author: String,
    /// Source platform.
    pub platform: String,
    /// Interaction count.
    pub engagement: u64,
    /// Publication time.
    pub timestamp: DateTime<Utc>,
    /// Permalink, possibly empty.
    pub url: String,
}

/// A news article about the token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TopNews {
    /// Headline.
    pub title: String,
    /// Publisher.
    pub source: String,
    /// Article URL.
    pub url: String,
    /// Interaction count.
    pub engagement: u64,
    /// Publication time.
    pub published_at: DateTime<Utc>,
}

/// One daily point of the 7-day series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TimeSeriesPoint {
    /// Bucket start.
    pub timestamp: DateTime<Utc>,
    /// Sentiment for the bucket (50 when the provider omits it).
    pub sentiment: f64,
    /// Interactions in the bucket.
    pub interactions: u64,
    /// Posts in the bucket.
    pub posts: u64,
}

/// Sentiment score with its derived breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SentimentScore {
    /// Score in `[0, 100]`.
    pub score: u8,
    /// Banded breakdown derived from the score.
    pub breakdown: SentimentBreakdown,
}

/// Input for recording a detected call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    /// Token symbol, already validated non-empty.
    pub token_symbol: String,
    /// Token address, already validated non-empty.
    pub token_address: String,
    /// Chat message that carried the call.
    pub message_id: String,
    /// Chat channel the call was seen in.
    pub channel_id: String,
    /// When the call was made.
    pub timestamp: DateTime<Utc>,
}

/// Everything a successful analysis writes onto the narrative.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    /// Provider topic id.
    pub topic_id: Option<String>,
    /// Provider rank (lower is better).
    pub topic_rank: Option<u32>,
    /// Markdown AI report, absent when its fetch failed.
    pub ai_report: Option<String>,
    /// When the AI report was fetched.
    pub ai_report_generated_at: Option<DateTime<Utc>>,
    /// Score and breakdown.
    pub sentiment: SentimentScore,
    /// Social aggregates.
    pub social_metrics: SocialMetrics,
    /// Trending indicator.
    pub trending: Trending,
    /// Up to 10 creators.
    pub top_creators: Vec<TopCreator>,
    /// Up to 10 posts.
    pub top_posts: Vec<TopPost>,
    /// Up to 5 news items.
    pub top_news: Vec<TopNews>,
    /// 7-day series.
    pub time_series: Vec<TimeSeriesPoint>,
}

/// The durable per-token aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Narrative {
    /// Narrative identifier.
    pub id: NarrativeId,
    /// Token symbol as first seen.
    pub token_symbol: String,
    /// Token address, the unique key.
    pub token_address: String,

    /// Message id of the latest call.
    pub last_call_message_id: Option<String>,
    /// Channel id of the latest call.
    pub last_call_channel_id: Option<String>,
    /// Time of the latest call.
    pub last_call_timestamp: Option<DateTime<Utc>>,
    /// Number of calls seen for this token.
    pub total_calls_detected: u32,
    /// Time of the first call.
    pub first_detected_at: DateTime<Utc>,

    /// Provider topic id.
    pub topic_id: Option<String>,
    /// Provider rank, null until the first completed analysis.
    pub topic_rank: Option<u32>,
    /// Markdown AI report.
    pub ai_report: Option<String>,
    /// When the AI report was fetched.
    pub ai_report_generated_at: Option<DateTime<Utc>>,
    /// Sentiment in `[0, 100]`, null until the first completed analysis.
    pub sentiment_score: Option<u8>,
    /// Banded breakdown.
    pub sentiment_breakdown: SentimentBreakdown,
    /// Social aggregates.
    pub social_metrics: SocialMetrics,
    /// Trending indicator.
    pub trending: Trending,
    /// Top creators.
    pub top_creators: Vec<TopCreator>,
    /// Top posts.
    pub top_posts: Vec<TopPost>,
    /// Top news.
    pub top_news: Vec<TopNews>,
    /// 7-day series.
    pub time_series: Vec<TimeSeriesPoint>,

    /// Enrichment lifecycle state.
    pub analysis_status: AnalysisStatus,
    /// Error of the latest failed analysis.
    pub last_analysis_error: Option<String>,

    /// Document creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Narrative {
    /// Creates the narrative for a token's first call, already
    /// `Processing` since a job is submitted right after.
    #[must_use]
    pub fn from_first_call(call: &CallRecord, now: DateTime<Utc>) -> Self {
        Self {
            id: NarrativeId::new(),
            token_symbol: call.token_symbol.clone(),
            token_address: call.token_address.clone(),
            last_call_message_id: Some(call.message_id.clone()),
            last_call_channel_id: Some(call.channel_id.clone()),
            last_call_timestamp: Some(call.timestamp),
            total_calls_detected: 1,
            first_detected_at: call.timestamp,
            topic_id: None,
            topic_rank: None,
            ai_report: None,
            ai_report_generated_at: None,
            sentiment_score: None,
            sentiment_breakdown: SentimentBreakdown::default(),
            social_metrics: SocialMetrics::default(),
            trending: Trending::default(),
            top_creators: Vec::new(),
            top_posts: Vec::new(),
            top_news: Vec::new(),
            time_series: Vec::new(),
            analysis_status: AnalysisStatus::Processing,
            last_analysis_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Records a repeat call. Identity and `first_detected_at` are left
    /// untouched.
    pub fn record_repeat_call(&mut self, call: &CallRecord, now: DateTime<Utc>) {
        self.last_call_message_id = Some(call.message_id.clone());
        self.last_call_channel_id = Some(call.channel_id.clone());
        self.last_call_timestamp = Some(call.timestamp);
        self.total_calls_detected = self.total_calls_detected.saturating_add(1);
        self.analysis_status = AnalysisStatus::Processing;
        self.updated_at = now;
    }

    /// Re-enters `Processing` without counting a call.
    pub fn begin_processing(&mut self, now: DateTime<Utc>) {
        self.analysis_status = AnalysisStatus::Processing;
        self.updated_at = now;
    }

    /// Overwrites every enrichment field and completes the analysis.
    pub fn apply_analysis(&mut self, result: &AnalysisResult, now: DateTime<Utc>) {
        self.topic_id.clone_from(&result.topic_id);
        self.topic_rank = result.topic_rank;
        self.ai_report.clone_from(&result.ai_report);
        self.ai_report_generated_at = result.ai_report_generated_at;
        self.sentiment_score = Some(result.sentiment.score);
        self.sentiment_breakdown = result.sentiment.breakdown;
        self.social_metrics = result.social_metrics;
        self.trending = result.trending;
        self.top_creators.clone_from(&result.top_creators);
        self.top_posts.clone_from(&result.top_posts);
        self.top_news.clone_from(&result.top_news);
        self.time_series.clone_from(&result.time_series);
        self.analysis_status = AnalysisStatus::Completed;
        self.last_analysis_error = None;
        self.updated_at = now;
    }

    /// Marks the latest analysis as failed.
    pub fn mark_failed(&mut self, error: &str, now: DateTime<Utc>) {
        self.analysis_status = AnalysisStatus::Failed;
        self.last_analysis_error = Some(error.to_string());
        self.updated_at = now;
    }
}
