//! Pure aggregation from provider payloads to narrative fields and
//! snapshots.
//!
//! Nothing here performs I/O. The analyzer feeds an
//! [`EnrichmentBundle`] in and persists what comes out.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::domain::job::AnalysisJob;
use crate::domain::narrative::{
    AnalysisResult, Narrative, SentimentBreakdown, SentimentScore, SocialMetrics, TimeSeriesPoint,
    TopCreator, TopNews, TopPost, TrendStatus, Trending,
};
use crate::domain::snapshot::{
    AnalysisMetadata, AnalysisType, CallReference, ComparedToPrevious, Engagement, Hashtag,
    Keyword, OverallSentiment, PlatformScore, PlatformSentiment, SentimentClass,
    SentimentSnapshot, SnapshotStatus, TriggerSource,
};
use crate::enrichment::types::first_positive;
use crate::enrichment::{EnrichmentBundle, RawCreator, RawNews, RawPost, RawTimePoint, TopicData};

/// Creators kept on the narrative.
pub const TOP_CREATORS: usize = 10;
/// Posts kept on the narrative.
pub const TOP_POSTS: usize = 10;
/// News items kept on the narrative.
pub const TOP_NEWS: usize = 5;
/// Keywords kept on a snapshot.
pub const TOP_KEYWORDS: usize = 20;
/// Hashtags kept on a snapshot.
pub const TOP_HASHTAGS: usize = 15;
/// Percent change at or beyond which a topic counts as trending.
pub const TREND_THRESHOLD: f64 = 5.0;
/// Provider name recorded on snapshots.
pub const DATA_SOURCE: &str = "LunarCrush";
/// Provider API version recorded on snapshots.
pub const API_VERSION: &str = "v4";

const NEUTRAL_SCORE: u8 = 50;
const UNRANKED: f64 = 999.0;
const STOP_WORDS: [&str; 16] = [
    "the", "a", "an", "and", "or", "but", "is", "are", "was", "were", "to", "for", "of", "in",
    "on", "at",
];

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_score(value: f64) -> u8 {
    if value.is_finite() {
        value.round().clamp(0.0, 100.0) as u8
    } else {
        NEUTRAL_SCORE
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_count(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value.round() as u64
    } else {
        0
    }
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

/// Three-way split for a score, from five fixed bands.
#[must_use]
pub const fn breakdown(score: u8) -> SentimentBreakdown {
    let (positive, neutral, negative) = match score {
        70.. => (70, 20, 10),
        60..=69 => (60, 30, 10),
        50..=59 => (40, 40, 20),
        40..=49 => (30, 40, 30),
        _ => (20, 30, 50),
    };
    SentimentBreakdown {
        positive,
        neutral,
        negative,
    }
}

/// Scores a topic.
///
/// A direct `sentiment` value is rounded and clamped to `[0, 100]`. Without
/// one, the score blends log-scaled 24h interactions (0.4), log-scaled
/// contributors (0.3) and an inverted rank (0.3).
#[must_use]
pub fn score_sentiment(topic: &TopicData) -> SentimentScore {
    let score = match finite(topic.sentiment) {
        Some(direct) => to_score(direct),
        None => fallback_score(topic),
    };
    SentimentScore {
        score,
        breakdown: breakdown(score),
    }
}

fn fallback_score(topic: &TopicData) -> u8 {
    let interactions =
        first_positive(&[topic.interactions_24h, topic.num_posts]).unwrap_or(0.0).max(0.0);
    let contributors = first_positive(&[topic.contributors_24h, topic.num_contributors])
        .unwrap_or(0.0)
        .max(0.0);
    let rank = first_positive(&[topic.topic_rank]).unwrap_or(UNRANKED);

    let interaction_signal = ((interactions + 1.0).log10() * 20.0).min(100.0);
    let contributor_signal = ((contributors + 1.0).log10() * 25.0).min(100.0);
    let rank_signal = (100.0 - rank / 10.0).max(0.0);

    to_score(interaction_signal * 0.4 + contributor_signal * 0.3 + rank_signal * 0.3)
}

/// Trend direction from the 24h percent change.
#[must_use]
pub fn trending(topic: &TopicData) -> Trending {
    let change = finite(topic.percent_change_24h).unwrap_or(0.0);
    let status = if change >= TREND_THRESHOLD {
        TrendStatus::Up
    } else if change <= -TREND_THRESHOLD {
        TrendStatus::Down
    } else {
        TrendStatus::Flat
    };
    Trending {
        status,
        percent_change: (change * 100.0).round() / 100.0,
    }
}

/// 24h social totals.
#[must_use]
pub fn social_metrics(topic: &TopicData) -> SocialMetrics {
    SocialMetrics {
        interactions: topic.interactions_24h.map_or(0, to_count),
        posts: topic.num_posts.map_or(0, to_count),
        contributors: first_positive(&[topic.contributors_24h, topic.num_contributors])
            .map_or(0, to_count),
        engagement_score: finite(topic.social_score).unwrap_or(0.0),
    }
}

/// Named creators, at most [`TOP_CREATORS`].
#[must_use]
pub fn top_creators(raw: &[RawCreator]) -> Vec<TopCreator> {
    raw.iter()
        .take(TOP_CREATORS)
        .filter_map(|creator| {
            let name = creator.name()?;
            Some(TopCreator {
                name: name.to_string(),
                username: creator.handle().unwrap_or_default().to_string(),
                platform: creator.platform().unwrap_or("unknown").to_string(),
                followers: to_count(creator.followers()),
                influence_score: creator.influence(),
            })
        })
        .collect()
}

/// Posts with text, at most [`TOP_POSTS`]. Undated posts take `now`.
#[must_use]
pub fn top_posts(raw: &[RawPost], now: DateTime<Utc>) -> Vec<TopPost> {
    raw.iter()
        .take(TOP_POSTS)
        .filter_map(|post| {
            let text = post.text()?;
            Some(TopPost {
                text: text.trim().to_string(),
                author: post.author().unwrap_or("Unknown").to_string(),
                platform: post.platform().unwrap_or("unknown").to_string(),
                engagement: to_count(post.engagement()),
                timestamp: post.published().unwrap_or(now),
                url: post.url().unwrap_or_default().to_string(),
            })
        })
        .collect()
}

/// News items with both a title and a url, at most [`TOP_NEWS`].
#[must_use]
pub fn top_news(raw: &[RawNews], now: DateTime<Utc>) -> Vec<TopNews> {
    raw.iter()
        .take(TOP_NEWS)
        .filter_map(|news| {
            let title = news.title()?;
            let url = news.url()?;
            Some(TopNews {
                title: title.trim().to_string(),
                source: news.source().unwrap_or("Unknown").to_string(),
                url: url.to_string(),
                engagement: to_count(news.engagement()),
                published_at: news.published().unwrap_or(now),
            })
        })
        .collect()
}

/// Every point with a valid timestamp.
#[must_use]
pub fn time_series(raw: &[RawTimePoint]) -> Vec<TimeSeriesPoint> {
    raw.iter()
        .filter_map(|point| {
            Some(TimeSeriesPoint {
                timestamp: point.at()?,
                sentiment: first_positive(&[point.sentiment]).unwrap_or(50.0),
                interactions: point.interactions.map_or(0, to_count),
                posts: to_count(point.post_count()),
            })
        })
        .collect()
}

/// Narrative fields computed from one bundle.
#[must_use]
pub fn analysis_result(
    bundle: &EnrichmentBundle,
    ai_report: Option<String>,
    now: DateTime<Utc>,
) -> AnalysisResult {
    let topic = &bundle.topic;
    let ai_report_generated_at = ai_report.as_ref().map(|_| now);
    AnalysisResult {
        topic_id: topic.id.as_ref().map(ToString::to_string),
        topic_rank: topic.rank().map(to_count).and_then(|r| u32::try_from(r).ok()),
        ai_report,
        ai_report_generated_at,
        sentiment: score_sentiment(topic),
        social_metrics: social_metrics(topic),
        trending: trending(topic),
        top_creators: top_creators(&bundle.creators),
        top_posts: top_posts(&bundle.posts, now),
        top_news: top_news(&bundle.news, now),
        time_series: time_series(&bundle.time_series),
    }
}

/// Per-platform scores from the topic's dominance split. Platforms without
/// a non-zero share keep the neutral default.
#[must_use]
pub fn platform_sentiment(topic: &TopicData) -> PlatformSentiment {
    let Some(split) = topic.platform_dominance() else {
        return PlatformSentiment::default();
    };
    let interactions = finite(topic.interactions_24h).unwrap_or(0.0);
    let posts = finite(topic.num_posts).unwrap_or(0.0);
    let score = |share: Option<f64>| {
        first_positive(&[share]).map_or_else(PlatformScore::default, |d| PlatformScore {
            score: to_score((d * 200.0).min(100.0)),
            volume: d * interactions,
            mentions: to_count(d * posts),
        })
    };
    PlatformSentiment {
        twitter: score(split.twitter),
        reddit: score(split.reddit),
        youtube: score(split.youtube),
        telegram: score(split.telegram),
    }
}

/// Engagement totals for a snapshot.
#[must_use]
pub fn engagement(topic: &TopicData, social: &SocialMetrics) -> Engagement {
    Engagement {
        total: social.interactions,
        likes: topic.likes_24h.map_or(0, to_count),
        shares: topic.shares_24h.map_or(0, to_count),
        comments: topic.comments_24h.map_or(0, to_count),
        views: topic.views_24h.map_or(0, to_count),
        posts: social.posts,
    }
}

/// Counts terms in first-seen order, then ranks by count. Ties keep the
/// order of first appearance.
fn rank_terms<I>(terms: I, top: usize) -> Vec<(String, u32)>
where
    I: IntoIterator<Item = String>,
{
    let mut counts: Vec<(String, u32)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for term in terms {
        if let Some(slot) = index.get(&term).and_then(|&i| counts.get_mut(i)) {
            slot.1 = slot.1.saturating_add(1);
        } else {
            index.insert(term.clone(), counts.len());
            counts.push((term, 1));
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts.truncate(top);
    counts
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Most frequent lowercase words of three or more letters across all
/// posts, stop words excluded.
#[must_use]
pub fn keywords(posts: &[RawPost]) -> Vec<Keyword> {
    let words = posts.iter().filter_map(RawPost::text).flat_map(|text| {
        text.to_lowercase()
            .split(|c: char| !is_word_char(c))
            .filter(|w| w.len() >= 3 && w.chars().all(|c| c.is_ascii_lowercase()))
            .filter(|w| !STOP_WORDS.contains(w))
            .map(str::to_string)
            .collect::<Vec<_>>()
    });
    rank_terms(words, TOP_KEYWORDS)
        .into_iter()
        .map(|(term, frequency)| Keyword {
            term,
            frequency,
            sentiment: NEUTRAL_SCORE,
        })
        .collect()
}

fn hashtags_in(text: &str) -> Vec<String> {
    text.split('#')
        .skip(1)
        .filter_map(|segment| {
            let end = segment
                .char_indices()
                .find(|&(_, c)| !is_word_char(c))
                .map_or(segment.len(), |(i, _)| i);
            let tag = segment.get(..end)?;
            (!tag.is_empty()).then(|| format!("#{}", tag.to_ascii_lowercase()))
        })
        .collect()
}

/// Most frequent hashtags across all posts, lowercased.
#[must_use]
pub fn hashtags(posts: &[RawPost]) -> Vec<Hashtag> {
    let tags = posts
        .iter()
        .filter_map(RawPost::text)
        .flat_map(hashtags_in);
    rank_terms(tags, TOP_HASHTAGS)
        .into_iter()
        .map(|(tag, count)| Hashtag { tag, count })
        .collect()
}

/// Deltas against the previous snapshot; empty without one.
#[must_use]
pub fn compare_to_previous(
    score: u8,
    engagement: &Engagement,
    previous: Option<&SentimentSnapshot>,
) -> ComparedToPrevious {
    let Some(previous) = previous else {
        return ComparedToPrevious::default();
    };
    let delta = |now: u64, before: u64| {
        i64::try_from(now)
            .unwrap_or(i64::MAX)
            .saturating_sub(i64::try_from(before).unwrap_or(i64::MAX))
    };
    ComparedToPrevious {
        sentiment_change: Some(i32::from(score) - i32::from(previous.overall_sentiment.score)),
        engagement_change: Some(delta(engagement.total, previous.engagement.total)),
        volume_change: Some(delta(engagement.posts, previous.engagement.posts)),
    }
}

/// `initial` without a prior snapshot, `scheduled` for scheduled refreshes,
/// otherwise `update`.
#[must_use]
pub const fn analysis_type(has_previous: bool, trigger: TriggerSource) -> AnalysisType {
    match (has_previous, trigger) {
        (false, _) => AnalysisType::Initial,
        (true, TriggerSource::ScheduledUpdate) => AnalysisType::Scheduled,
        (true, _) => AnalysisType::Update,
    }
}

/// Confidence from the topic's social score, 50 when absent.
#[must_use]
pub fn confidence(topic: &TopicData) -> u8 {
    first_positive(&[topic.social_score]).map_or(NEUTRAL_SCORE, to_score)
}

/// Builds the snapshot appended after a successful analysis.
#[must_use]
pub fn snapshot(
    narrative: &Narrative,
    job: &AnalysisJob,
    bundle: &EnrichmentBundle,
    result: &AnalysisResult,
    previous: Option<&SentimentSnapshot>,
    processing_time_ms: u64,
    now: DateTime<Utc>,
) -> SentimentSnapshot {
    let topic = &bundle.topic;
    let score = result.sentiment.score;
    let engagement = engagement(topic, &result.social_metrics);
    let compared_to_previous = compare_to_previous(score, &engagement, previous);
    SentimentSnapshot {
        narrative_id: narrative.id,
        token_address: narrative.token_address.clone(),
        token_symbol: narrative.token_symbol.clone(),
        analysis_type: analysis_type(previous.is_some(), job.trigger),
        overall_sentiment: OverallSentiment {
            score,
            classification: SentimentClass::from_score(score),
        },
        engagement,
        platform_sentiment: platform_sentiment(topic),
        keywords: keywords(&bundle.posts),
        hashtags: hashtags(&bundle.posts),
        trigger_source: job.trigger,
        call_reference: CallReference {
            message_id: job.call_context.message_id.clone(),
            channel_id: job.call_context.channel_id.clone(),
            timestamp: job.call_context.timestamp,
        },
        compared_to_previous,
        analysis_metadata: AnalysisMetadata {
            data_source: DATA_SOURCE.to_string(),
            api_version: API_VERSION.to_string(),
            processing_time: processing_time_ms,
            confidence: confidence(topic),
        },
        status: if bundle.degraded.is_empty() {
            SnapshotStatus::Completed
        } else {
            SnapshotStatus::Partial
        },
        created_at: now,
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::job::tests::job;
    use crate::domain::narrative::tests::call;
    use crate::enrichment::types::{Dominance, NamedRef, PlatformDominance, Timestamp};
    use crate::enrichment::Resource;

    fn post(text: &str) -> RawPost {
        RawPost {
            text: Some(text.to_string()),
            ..RawPost::default()
        }
    }

    #[test]
    fn direct_sentiment_is_rounded_and_banded() {
        let topic = TopicData {
            sentiment: Some(71.6),
            ..TopicData::default()
        };
        let scored = score_sentiment(&topic);
        assert_eq!(scored.score, 72);
        assert_eq!(scored.breakdown, breakdown(70));

        let over = TopicData {
            sentiment: Some(140.0),
            ..TopicData::default()
        };
        assert_eq!(score_sentiment(&over).score, 100);
    }

    #[test]
    fn bands_follow_fixed_thresholds() {
        assert_eq!(breakdown(65).positive, 60);
        assert_eq!(breakdown(50).negative, 20);
        assert_eq!(breakdown(45).neutral, 40);
        assert_eq!(breakdown(39).negative, 50);
    }

    #[test]
    fn fallback_blends_interactions_contributors_and_rank() {
        // log10(10000)·20 = 80, log10(100)·25 = 50, 100 − 100/10 = 90
        let topic = TopicData {
            interactions_24h: Some(9_999.0),
            num_contributors: Some(99.0),
            topic_rank: Some(100.0),
            ..TopicData::default()
        };
        assert_eq!(score_sentiment(&topic).score, 74);

        // rank defaults to 999: 100 − 99.9 = 0.1 → 0.03
        assert_eq!(score_sentiment(&TopicData::default()).score, 0);
    }

    #[test]
    fn trend_thresholds_are_inclusive() {
        let at = |change: f64| {
            trending(&TopicData {
                percent_change_24h: Some(change),
                ..TopicData::default()
            })
        };
        assert_eq!(at(5.0).status, TrendStatus::Up);
        assert_eq!(at(-5.0).status, TrendStatus::Down);
        assert_eq!(at(4.99).status, TrendStatus::Flat);
        assert!((at(12.3456).percent_change - 12.35).abs() < 1e-9);
    }

    #[test]
    fn shaping_drops_incomplete_items() {
        let creators = vec![
            RawCreator {
                username: Some("alice".to_string()),
                ..RawCreator::default()
            },
            RawCreator::default(),
        ];
        let shaped = top_creators(&creators);
        assert_eq!(shaped.len(), 1);
        assert_eq!(shaped.first().map(|c| c.name.as_str()), Some("alice"));
        assert_eq!(shaped.first().map(|c| c.platform.as_str()), Some("unknown"));

        let now = Utc::now();
        let posts = vec![post("  gm  "), post("   ")];
        let shaped = top_posts(&posts, now);
        assert_eq!(shaped.len(), 1);
        assert_eq!(shaped.first().map(|p| p.text.as_str()), Some("gm"));
        assert_eq!(shaped.first().map(|p| p.author.as_str()), Some("Unknown"));
        assert_eq!(shaped.first().map(|p| p.timestamp), Some(now));

        let news = vec![
            RawNews {
                title: Some("BONK rallies".to_string()),
                url: Some("https://example.com/n".to_string()),
                ..RawNews::default()
            },
            RawNews {
                title: Some("no link".to_string()),
                ..RawNews::default()
            },
        ];
        let shaped = top_news(&news, now);
        assert_eq!(shaped.len(), 1);
        assert_eq!(shaped.first().map(|n| n.source.as_str()), Some("Unknown"));
    }

    #[test]
    fn shaping_caps_list_lengths() {
        let posts: Vec<RawPost> = (0..15).map(|i| post(&format!("post {i}"))).collect();
        assert_eq!(top_posts(&posts, Utc::now()).len(), TOP_POSTS);

        let creators: Vec<RawCreator> = (0..12)
            .map(|i| RawCreator {
                name: Some(format!("c{i}")),
                ..RawCreator::default()
            })
            .collect();
        assert_eq!(top_creators(&creators).len(), TOP_CREATORS);
    }

    #[test]
    fn time_series_keeps_only_dated_points() {
        let points = vec![
            RawTimePoint {
                time: Some(Timestamp::Epoch(1_700_000_000.0)),
                interactions: Some(10.0),
                ..RawTimePoint::default()
            },
            RawTimePoint {
                timestamp: Some(Timestamp::Text("garbage".to_string())),
                ..RawTimePoint::default()
            },
        ];
        let series = time_series(&points);
        assert_eq!(series.len(), 1);
        assert!(series.iter().all(|p| (p.sentiment - 50.0).abs() < f64::EPSILON));
    }

    #[test]
    fn keywords_skip_stop_words_and_short_or_mixed_tokens() {
        let posts = vec![
            post("The moon is near, moon soon! abc1 to go"),
            post("MOON and gm"),
        ];
        let words = keywords(&posts);
        let Some(first) = words.first() else {
            panic!("expected keywords");
        };
        assert_eq!(first.term, "moon");
        assert_eq!(first.frequency, 3);
        assert_eq!(first.sentiment, 50);
        let terms: Vec<&str> = words.iter().map(|k| k.term.as_str()).collect();
        assert_eq!(terms, vec!["moon", "near", "soon"]);
    }

    #[test]
    fn hashtags_are_lowercased_and_counted() {
        let posts = vec![post("#BONK to the moon #bonk #sol"), post("##Sol! #")];
        let tags = hashtags(&posts);
        let counts: Vec<(&str, u32)> = tags.iter().map(|h| (h.tag.as_str(), h.count)).collect();
        assert_eq!(counts, vec![("#bonk", 2), ("#sol", 2)]);
    }

    #[test]
    fn platform_scores_come_from_dominance() {
        let topic = TopicData {
            interactions_24h: Some(1_000.0),
            num_posts: Some(50.0),
            social_dominance: Some(Dominance::PerPlatform(PlatformDominance {
                twitter: Some(0.3),
                reddit: Some(0.8),
                ..PlatformDominance::default()
            })),
            ..TopicData::default()
        };
        let platforms = platform_sentiment(&topic);
        assert_eq!(platforms.twitter.score, 60);
        assert!((platforms.twitter.volume - 300.0).abs() < 1e-9);
        assert_eq!(platforms.twitter.mentions, 15);
        assert_eq!(platforms.reddit.score, 100);
        assert_eq!(platforms.youtube, PlatformScore::default());

        let scalar = TopicData {
            social_dominance: Some(Dominance::Overall(0.4)),
            ..TopicData::default()
        };
        assert_eq!(platform_sentiment(&scalar), PlatformSentiment::default());
    }

    #[test]
    fn analysis_type_depends_on_history_and_trigger() {
        assert_eq!(
            analysis_type(false, TriggerSource::ScheduledUpdate),
            AnalysisType::Initial
        );
        assert_eq!(
            analysis_type(true, TriggerSource::ScheduledUpdate),
            AnalysisType::Scheduled
        );
        assert_eq!(
            analysis_type(true, TriggerSource::DiscordCall),
            AnalysisType::Update
        );
    }

    #[test]
    fn snapshot_compares_against_previous() {
        let now = Utc::now();
        let narrative = Narrative::from_first_call(&call("Dez63", now), now);
        let job = job("BONK", "Dez63", 7);
        let bundle = EnrichmentBundle {
            topic: TopicData {
                sentiment: Some(60.0),
                interactions_24h: Some(500.0),
                num_posts: Some(20.0),
                ..TopicData::default()
            },
            posts: vec![RawPost {
                text: Some("gm".to_string()),
                author: Some(NamedRef {
                    name: Some("bob".to_string()),
                }),
                ..RawPost::default()
            }],
            ..EnrichmentBundle::default()
        };
        let result = analysis_result(&bundle, None, now);
        let first = snapshot(&narrative, &job, &bundle, &result, None, 12, now);
        assert_eq!(first.analysis_type, AnalysisType::Initial);
        assert!(first.compared_to_previous.is_empty());
        assert_eq!(first.status, SnapshotStatus::Completed);
        assert_eq!(first.analysis_metadata.confidence, 50);
        assert_eq!(first.engagement.posts, 20);

        let mut later = bundle.clone();
        later.topic.sentiment = Some(52.0);
        later.topic.interactions_24h = Some(800.0);
        later.topic.num_posts = Some(25.0);
        later.degraded.push(Resource::News);
        let result = analysis_result(&later, Some("report".to_string()), now);
        assert_eq!(result.ai_report_generated_at, Some(now));
        let second = snapshot(&narrative, &job, &later, &result, Some(&first), 9, now);
        assert_eq!(second.analysis_type, AnalysisType::Update);
        assert_eq!(second.compared_to_previous.sentiment_change, Some(-8));
        assert_eq!(second.compared_to_previous.engagement_change, Some(300));
        assert_eq!(second.compared_to_previous.volume_change, Some(5));
        assert_eq!(second.status, SnapshotStatus::Partial);
    }
}
