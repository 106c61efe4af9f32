//! Immutable point-in-time sentiment records.
//!
//! One [`SentimentSnapshot`] is appended per successful analysis. Snapshots
//! are never updated; they disappear only when their narrative is purged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::NarrativeId;

/// Why this snapshot was taken relative to earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    /// First snapshot for the token.
    Initial,
    /// Re-analysis after a new call or manual request.
    Update,
    /// Re-analysis from a scheduled refresh.
    Scheduled,
}

/// What caused the analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    /// A buy call detected on the chat platform.
    #[default]
    DiscordCall,
    /// A periodic refresh.
    ScheduledUpdate,
    /// An operator asked for a re-analysis.
    ManualRequest,
}

/// Five-way classification of a sentiment score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SentimentClass {
    /// Score below 20.
    VeryNegative,
    /// Score in `[20, 40)`.
    Negative,
    /// Score in `[40, 60)`.
    Neutral,
    /// Score in `[60, 80)`.
    Positive,
    /// Score of 80 or more.
    VeryPositive,
}

impl SentimentClass {
    /// Classifies a score with the fixed 20-point thresholds.
    #[must_use]
    pub const fn from_score(score: u8) -> Self {
        match score {
            80.. => Self::VeryPositive,
            60..=79 => Self::Positive,
            40..=59 => Self::Neutral,
            20..=39 => Self::Negative,
            _ => Self::VeryNegative,
        }
    }
}

/// Overall score with its classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OverallSentiment {
    /// Score in `[0, 100]`.
    pub score: u8,
    /// Derived classification.
    pub classification: SentimentClass,
}

/// Engagement totals for the last 24h.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
pub struct Engagement {
    /// Total interactions.
    pub total: u64,
    /// Likes.
    pub likes: u64,
    /// Shares.
    pub shares: u64,
    /// Comments.
    pub comments: u64,
    /// Views.
    pub views: u64,
    /// Posts.
    #[serde(default)]
    pub posts: u64,
}

/// Sentiment on a single source platform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PlatformScore {
    /// Score in `[0, 100]`.
    pub score: u8,
    /// Interactions attributed to the platform.
    pub volume: f64,
    /// Posts attributed to the platform.
    pub mentions: u64,
}

impl Default for PlatformScore {
    fn default() -> Self {
        Self {
            score: 50,
            volume: 0.0,
            mentions: 0,
        }
    }
}

/// Per-platform sentiment.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, ToSchema)]
pub struct PlatformSentiment {
    /// Twitter / X.
    pub twitter: PlatformScore,
    /// Reddit.
    pub reddit: PlatformScore,
    /// YouTube.
    pub youtube: PlatformScore,
    /// Telegram.
    pub telegram: PlatformScore,
}

/// A frequent term in the token's posts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Keyword {
    /// Lowercase term.
    pub term: String,
    /// Occurrences across posts.
    pub frequency: u32,
    /// Term sentiment (neutral 50 until scored).
    pub sentiment: u8,
}

/// A frequent hashtag in the token's posts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Hashtag {
    /// Lowercase tag including `#`.
    pub tag: String,
    /// Occurrences across posts.
    pub count: u32,
}

/// The call that triggered the analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CallReference {
    /// Chat message id.
    pub message_id: String,
    /// Chat channel id.
    pub channel_id: String,
    /// Call time.
    pub timestamp: DateTime<Utc>,
}

/// Deltas against the immediately preceding snapshot.
///
/// Serializes to `{}` for a token's first snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComparedToPrevious {
    /// `score - previous.score`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment_change: Option<i32>,
    /// `interactions - previous.engagement.total`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engagement_change: Option<i64>,
    /// `posts - previous.engagement.posts`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_change: Option<i64>,
}

impl ComparedToPrevious {
    /// Returns `true` when no previous snapshot was compared against.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.sentiment_change.is_none()
            && self.engagement_change.is_none()
            && self.volume_change.is_none()
    }
}

/// Provenance of the analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisMetadata {
    /// Enrichment provider.
    pub data_source: String,
    /// Provider API version.
    pub api_version: String,
    /// Wall time spent on the analysis in milliseconds.
    pub processing_time: u64,
    /// Confidence in `[0, 100]`.
    pub confidence: u8,
}

/// Outcome quality of the analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    /// Every sub-resource was fetched.
    Completed,
    /// At least one list sub-resource degraded on a provider error.
    Partial,
    /// The analysis failed.
    Failed,
}

/// An immutable analysis record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SentimentSnapshot {
    /// Parent narrative.
    pub narrative_id: NarrativeId,
    /// Token address.
    pub token_address: String,
    /// Token symbol.
    pub token_symbol: String,
    /// Initial, update or scheduled.
    pub analysis_type: AnalysisType,
    /// Overall score.
    pub overall_sentiment: OverallSentiment,
    /// Engagement totals.
    pub engagement: Engagement,
    /// Per-platform sentiment.
    pub platform_sentiment: PlatformSentiment,
    /// Top keywords.
    pub keywords: Vec<Keyword>,
    /// Top hashtags.
    pub hashtags: Vec<Hashtag>,
    /// What caused the analysis.
    pub trigger_source: TriggerSource,
    /// The triggering call.
    pub call_reference: CallReference,
    /// Deltas against the previous snapshot.
    pub compared_to_previous: ComparedToPrevious,
    /// Provenance.
    pub analysis_metadata: AnalysisMetadata,
    /// Outcome quality.
    pub status: SnapshotStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}
