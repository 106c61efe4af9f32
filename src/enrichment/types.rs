//! Provider payload schema.
//!
//! The provider's JSON varies across endpoints and plans, so every field is
//! optional and defaults when absent. Alternative spellings of the same
//! field are kept as separate members and resolved by accessor methods in
//! a fixed precedence. A payload whose shape does not fit (wrong JSON type
//! for a known field, non-object `data`) fails to deserialize and surfaces
//! as [`super::EnrichmentError::Malformed`].

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;

/// `{ "data": ... }` wrapper used by every v4 endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    /// Payload; `null` or absent means the provider has no data.
    #[serde(default = "Option::default")]
    pub data: Option<T>,
}

/// String or numeric identifier.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TopicKey {
    /// Textual id.
    Text(String),
    /// Numeric id.
    Number(f64),
}

impl std::fmt::Display for TopicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) if n.fract() == 0.0 => write!(f, "{n:.0}"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

/// Unix seconds or a date string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    /// Numeric epoch value.
    Epoch(f64),
    /// RFC 3339 or `YYYY-MM-DD HH:MM:SS` text.
    Text(String),
}

impl Timestamp {
    /// Interprets a numeric value as seconds.
    #[must_use]
    pub fn as_seconds(&self) -> Option<DateTime<Utc>> {
        match self {
            #[allow(clippy::cast_possible_truncation)]
            Self::Epoch(secs) if secs.is_finite() => {
                Utc.timestamp_millis_opt((secs * 1_000.0) as i64).single()
            }
            Self::Epoch(_) => None,
            Self::Text(text) => parse_date_text(text),
        }
    }

    /// Interprets a numeric value as milliseconds.
    #[must_use]
    pub fn as_millis(&self) -> Option<DateTime<Utc>> {
        match self {
            #[allow(clippy::cast_possible_truncation)]
            Self::Epoch(ms) if ms.is_finite() => Utc.timestamp_millis_opt(*ms as i64).single(),
            Self::Epoch(_) => None,
            Self::Text(text) => parse_date_text(text),
        }
    }
}

fn parse_date_text(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

/// Share of discussion per platform, or a single overall dominance value.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Dominance {
    /// Per-platform fractions in `[0, 1]`.
    PerPlatform(PlatformDominance),
    /// Overall social dominance (carries no platform split).
    Overall(f64),
}

/// Per-platform dominance fractions.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PlatformDominance {
    /// Twitter / X.
    pub twitter: Option<f64>,
    /// Reddit.
    pub reddit: Option<f64>,
    /// YouTube.
    pub youtube: Option<f64>,
    /// Telegram.
    pub telegram: Option<f64>,
}

/// Topic summary from `/topic/{topic}/v1`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TopicData {
    /// Provider topic id.
    pub id: Option<TopicKey>,
    /// Topic rank.
    pub topic_rank: Option<f64>,
    /// AltRank.
    pub alt_rank: Option<f64>,
    /// Direct sentiment in `[0, 100]`.
    pub sentiment: Option<f64>,
    /// Interactions in the last 24h.
    pub interactions_24h: Option<f64>,
    /// Post count.
    pub num_posts: Option<f64>,
    /// Contributors in the last 24h.
    pub contributors_24h: Option<f64>,
    /// Contributor count.
    pub num_contributors: Option<f64>,
    /// Social score.
    pub social_score: Option<f64>,
    /// 24h percent change.
    pub percent_change_24h: Option<f64>,
    /// Likes in the last 24h.
    pub likes_24h: Option<f64>,
    /// Shares in the last 24h.
    pub shares_24h: Option<f64>,
    /// Comments in the last 24h.
    pub comments_24h: Option<f64>,
    /// Views in the last 24h.
    pub views_24h: Option<f64>,
    /// Platform split.
    pub social_dominance: Option<Dominance>,
}

impl TopicData {
    /// `true` when at least one identifying or scoring field is present.
    #[must_use]
    pub const fn is_recognised(&self) -> bool {
        self.id.is_some()
            || self.sentiment.is_some()
            || self.topic_rank.is_some()
            || self.alt_rank.is_some()
            || self.interactions_24h.is_some()
            || self.num_posts.is_some()
    }

    /// AltRank, else topic rank.
    #[must_use]
    pub fn rank(&self) -> Option<f64> {
        first_positive(&[self.alt_rank, self.topic_rank])
    }

    /// Per-platform dominance when the provider reports a split.
    #[must_use]
    pub fn platform_dominance(&self) -> Option<&PlatformDominance> {
        match &self.social_dominance {
            Some(Dominance::PerPlatform(split)) => Some(split),
            _ => None,
        }
    }
}

/// Minimal `{ "name": ... }` reference.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct NamedRef {
    /// Display name.
    pub name: Option<String>,
}

/// One element of `/topic/{topic}/posts/v1`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawPost {
    /// Post text.
    pub text: Option<String>,
    /// Alternative text field.
    pub body: Option<String>,
    /// Alternative text field.
    pub content: Option<String>,
    /// Creator display name.
    pub creator_name: Option<String>,
    /// Nested creator.
    pub creator: Option<NamedRef>,
    /// Nested author.
    pub author: Option<NamedRef>,
    /// Platform.
    pub platform: Option<String>,
    /// Alternative platform field.
    pub source: Option<String>,
    /// Interactions.
    pub interactions: Option<f64>,
    /// Alternative interactions field.
    pub engagement: Option<f64>,
    /// Unix seconds.
    pub time: Option<Timestamp>,
    /// Creation date.
    pub created_at: Option<Timestamp>,
    /// Permalink.
    pub url: Option<String>,
    /// Alternative permalink field.
    pub link: Option<String>,
}

impl RawPost {
    /// Text in precedence `text`, `body`, `content`.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        first_text(&[&self.text, &self.body, &self.content])
    }

    /// Author in precedence `creator_name`, `creator.name`, `author.name`.
    #[must_use]
    pub fn author(&self) -> Option<&str> {
        first_text(&[&self.creator_name])
            .or_else(|| {
                self.creator
                    .as_ref()
                    .and_then(|c| non_empty(c.name.as_deref()))
            })
            .or_else(|| self.author.as_ref().and_then(|a| non_empty(a.name.as_deref())))
    }

    /// Platform in precedence `platform`, `source`.
    #[must_use]
    pub fn platform(&self) -> Option<&str> {
        first_text(&[&self.platform, &self.source])
    }

    /// Interactions in precedence `interactions`, `engagement`.
    #[must_use]
    pub fn engagement(&self) -> f64 {
        first_positive(&[self.interactions, self.engagement]).unwrap_or(0.0)
    }

    /// Publication time from `time` (seconds), else `created_at`.
    #[must_use]
    pub fn published(&self) -> Option<DateTime<Utc>> {
        self.time
            .as_ref()
            .and_then(Timestamp::as_seconds)
            .or_else(|| self.created_at.as_ref().and_then(Timestamp::as_millis))
    }

    /// Permalink in precedence `url`, `link`.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        first_text(&[&self.url, &self.link])
    }
}

/// One element of `/topic/{topic}/news/v1`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawNews {
    /// Headline.
    pub title: Option<String>,
    /// Alternative headline field.
    pub headline: Option<String>,
    /// Publisher.
    pub source: Option<String>,
    /// Alternative publisher field.
    pub publisher: Option<String>,
    /// Article URL.
    pub url: Option<String>,
    /// Alternative URL field.
    pub link: Option<String>,
    /// Interactions.
    pub interactions: Option<f64>,
    /// Alternative interactions field.
    pub engagement: Option<f64>,
    /// Unix seconds.
    pub time: Option<Timestamp>,
    /// Publication date.
    pub published_at: Option<Timestamp>,
}

impl RawNews {
    /// Headline in precedence `title`, `headline`.
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        first_text(&[&self.title, &self.headline])
    }

    /// Publisher in precedence `source`, `publisher`.
    #[must_use]
    pub fn source(&self) -> Option<&str> {
        first_text(&[&self.source, &self.publisher])
    }

    /// URL in precedence `url`, `link`.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        first_text(&[&self.url, &self.link])
    }

    /// Interactions in precedence `interactions`, `engagement`.
    #[must_use]
    pub fn engagement(&self) -> f64 {
        first_positive(&[self.interactions, self.engagement]).unwrap_or(0.0)
    }

    /// Publication time from `time` (seconds), else `published_at`.
    #[must_use]
    pub fn published(&self) -> Option<DateTime<Utc>> {
        self.time
            .as_ref()
            .and_then(Timestamp::as_seconds)
            .or_else(|| self.published_at.as_ref().and_then(Timestamp::as_millis))
    }
}

/// One element of `/topic/{topic}/creators/v1`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawCreator {
    /// Display name.
    pub name: Option<String>,
    /// Alternative display name field.
    pub display_name: Option<String>,
    /// Username.
    pub username: Option<String>,
    /// Handle.
    pub screen_name: Option<String>,
    /// Alternative handle field.
    pub handle: Option<String>,
    /// Platform.
    pub platform: Option<String>,
    /// Alternative platform field.
    pub source: Option<String>,
    /// Followers.
    pub followers: Option<f64>,
    /// Alternative followers field.
    pub follower_count: Option<f64>,
    /// Influence score.
    pub influence_score: Option<f64>,
    /// Alternative influence field.
    pub score: Option<f64>,
}

impl RawCreator {
    /// Name in precedence `name`, `display_name`, `username`.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        first_text(&[&self.name, &self.display_name, &self.username])
    }

    /// Handle in precedence `screen_name`, `username`, `handle`.
    #[must_use]
    pub fn handle(&self) -> Option<&str> {
        first_text(&[&self.screen_name, &self.username, &self.handle])
    }

    /// Platform in precedence `platform`, `source`.
    #[must_use]
    pub fn platform(&self) -> Option<&str> {
        first_text(&[&self.platform, &self.source])
    }

    /// Followers in precedence `followers`, `follower_count`.
    #[must_use]
    pub fn followers(&self) -> f64 {
        first_positive(&[self.followers, self.follower_count]).unwrap_or(0.0)
    }

    /// Influence in precedence `influence_score`, `score`.
    #[must_use]
    pub fn influence(&self) -> f64 {
        first_positive(&[self.influence_score, self.score]).unwrap_or(0.0)
    }
}

/// One element of `/topic/{topic}/time-series/v1`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawTimePoint {
    /// Unix seconds.
    pub time: Option<Timestamp>,
    /// Alternative timestamp field.
    pub timestamp: Option<Timestamp>,
    /// Bucket sentiment.
    pub sentiment: Option<f64>,
    /// Bucket interactions.
    pub interactions: Option<f64>,
    /// Bucket posts.
    pub posts: Option<f64>,
    /// Alternative posts field.
    pub num_posts: Option<f64>,
}

impl RawTimePoint {
    /// Bucket start from `time` (seconds), else `timestamp`.
    #[must_use]
    pub fn at(&self) -> Option<DateTime<Utc>> {
        self.time
            .as_ref()
            .and_then(Timestamp::as_seconds)
            .or_else(|| self.timestamp.as_ref().and_then(Timestamp::as_millis))
    }

    /// Posts in precedence `posts`, `num_posts`.
    #[must_use]
    pub fn post_count(&self) -> f64 {
        first_positive(&[self.posts, self.num_posts]).unwrap_or(0.0)
    }
}

/// First non-empty string.
fn first_text<'a>(candidates: &[&'a Option<String>]) -> Option<&'a str> {
    candidates
        .iter()
        .find_map(|candidate| non_empty(candidate.as_deref()))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.trim().is_empty())
}

/// First finite non-zero number.
pub(crate) fn first_positive(candidates: &[Option<f64>]) -> Option<f64> {
    candidates
        .iter()
        .flatten()
        .copied()
        .find(|v| v.is_finite() && *v != 0.0)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn topic_accepts_numeric_or_text_id_and_missing_fields() {
        let Ok(env) = serde_json::from_str::<Envelope<TopicData>>(
            r#"{"data": {"id": 12345, "alt_rank": 12, "sentiment": 71.6}}"#,
        ) else {
            panic!("decode failed");
        };
        let Some(topic) = env.data else {
            panic!("expected data");
        };
        assert_eq!(topic.id.as_ref().map(|id| id.to_string()), Some("12345".to_string()));
        assert_eq!(topic.rank(), Some(12.0));
        assert!(topic.interactions_24h.is_none());
    }

    #[test]
    fn null_data_means_no_data() {
        let Ok(env) = serde_json::from_str::<Envelope<TopicData>>(r#"{"data": null}"#) else {
            panic!("decode failed");
        };
        assert!(env.data.is_none());
        let Ok(env) = serde_json::from_str::<Envelope<TopicData>>(r#"{"error": "x"}"#) else {
            panic!("decode failed");
        };
        assert!(env.data.is_none());
    }

    #[test]
    fn wrong_shapes_are_rejected() {
        assert!(serde_json::from_str::<Envelope<TopicData>>(r#"{"data": [1, 2]}"#).is_err());
        assert!(
            serde_json::from_str::<Envelope<TopicData>>(r#"{"data": {"sentiment": "high"}}"#)
                .is_err()
        );
    }

    #[test]
    fn dominance_can_be_scalar_or_split() {
        let Ok(scalar) =
            serde_json::from_str::<TopicData>(r#"{"social_dominance": 0.42}"#)
        else {
            panic!("decode failed");
        };
        assert!(scalar.platform_dominance().is_none());

        let Ok(split) =
            serde_json::from_str::<TopicData>(r#"{"social_dominance": {"twitter": 0.3}}"#)
        else {
            panic!("decode failed");
        };
        assert_eq!(split.platform_dominance().and_then(|d| d.twitter), Some(0.3));
    }

    #[test]
    fn post_fields_resolve_in_precedence() {
        let post = RawPost {
            body: Some("from body".to_string()),
            content: Some("from content".to_string()),
            author: Some(NamedRef {
                name: Some("alice".to_string()),
            }),
            source: Some("reddit".to_string()),
            engagement: Some(12.0),
            link: Some("https://example.com/p".to_string()),
            time: Some(Timestamp::Epoch(1_700_000_000.0)),
            ..RawPost::default()
        };
        assert_eq!(post.text(), Some("from body"));
        assert_eq!(post.author(), Some("alice"));
        assert_eq!(post.platform(), Some("reddit"));
        assert!((post.engagement() - 12.0).abs() < f64::EPSILON);
        assert_eq!(post.url(), Some("https://example.com/p"));
        assert_eq!(post.published().map(|t| t.timestamp()), Some(1_700_000_000));
    }

    #[test]
    fn zero_counts_fall_through_like_missing_ones() {
        let creator = RawCreator {
            followers: Some(0.0),
            follower_count: Some(900.0),
            ..RawCreator::default()
        };
        assert!((creator.followers() - 900.0).abs() < f64::EPSILON);
    }

    #[test]
    fn text_timestamps_parse() {
        let rfc = Timestamp::Text("2024-03-01T12:00:00Z".to_string());
        let plain = Timestamp::Text("2024-03-01 12:00:00".to_string());
        assert_eq!(rfc.as_millis(), plain.as_millis());
        assert!(Timestamp::Text("yesterday".to_string()).as_millis().is_none());
    }
}
