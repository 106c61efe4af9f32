//! Enrichment provider boundary.
//!
//! [`EnrichmentClient`] is the capability "fetch enrichment data for a
//! topic key". [`fetch_bundle`] runs the per-job fan-out: five
//! independently fallible sub-requests issued concurrently, each trying
//! the token symbol first and the token address as fallback.
//!
//! Only topic metadata is mandatory. Every list sub-resource degrades to
//! an empty list on failure, and the degradation is recorded so the
//! snapshot can be marked partial.

pub mod error;
pub mod lunarcrush;
pub mod scripted;
pub mod types;

use std::future::Future;

use async_trait::async_trait;
use tracing::{debug, warn};

pub use error::{EnrichmentError, Result};
pub use lunarcrush::LunarCrushClient;
pub use scripted::ScriptedEnrichmentClient;
pub use types::{RawCreator, RawNews, RawPost, RawTimePoint, TopicData};

/// Days of history requested for the time series.
pub const TIME_SERIES_DAYS: u32 = 7;
/// Posts requested per job.
pub const POSTS_LIMIT: u32 = 10;
/// News items requested per job.
pub const NEWS_LIMIT: u32 = 5;
/// Creators requested per job.
pub const CREATORS_LIMIT: u32 = 10;

/// Source of third-party social analytics for a topic key.
///
/// Keys are token symbols or addresses; implementations normalize them
/// as the provider requires.
#[async_trait]
pub trait EnrichmentClient: Send + Sync + std::fmt::Debug {
    /// Topic summary.
    ///
    /// # Errors
    ///
    /// [`EnrichmentError::NotFound`] when the provider has no data for the
    /// key, otherwise the transport or decoding failure.
    async fn topic(&self, key: &str) -> Result<TopicData>;

    /// Daily time series covering the last `days` days.
    ///
    /// # Errors
    ///
    /// Transport or decoding failure.
    async fn time_series(&self, key: &str, days: u32) -> Result<Vec<RawTimePoint>>;

    /// Top posts.
    ///
    /// # Errors
    ///
    /// Transport or decoding failure.
    async fn posts(&self, key: &str, limit: u32) -> Result<Vec<RawPost>>;

    /// Top news.
    ///
    /// # Errors
    ///
    /// Transport or decoding failure.
    async fn news(&self, key: &str, limit: u32) -> Result<Vec<RawNews>>;

    /// Top creators.
    ///
    /// # Errors
    ///
    /// Transport or decoding failure.
    async fn creators(&self, key: &str, limit: u32) -> Result<Vec<RawCreator>>;

    /// Markdown AI summary for the topic.
    ///
    /// # Errors
    ///
    /// Transport failure.
    async fn ai_report(&self, key: &str) -> Result<String>;
}

/// List sub-resources of a job's fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// 7-day series.
    TimeSeries,
    /// Top posts.
    Posts,
    /// Top news.
    News,
    /// Top creators.
    Creators,
}

impl Resource {
    /// Log label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TimeSeries => "time_series",
            Self::Posts => "posts",
            Self::News => "news",
            Self::Creators => "creators",
        }
    }
}

/// Raw provider data gathered for one job.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentBundle {
    /// Topic summary.
    pub topic: TopicData,
    /// Daily series.
    pub time_series: Vec<RawTimePoint>,
    /// Posts.
    pub posts: Vec<RawPost>,
    /// News.
    pub news: Vec<RawNews>,
    /// Creators.
    pub creators: Vec<RawCreator>,
    /// List sub-resources that fell back to empty because of a provider
    /// error.
    pub degraded: Vec<Resource>,
}

/// Runs the concurrent fan-out for one token.
///
/// # Errors
///
/// Returns the topic error when topic metadata could be fetched with
/// neither key. List failures never fail the bundle.
pub async fn fetch_bundle(
    client: &dyn EnrichmentClient,
    symbol: &str,
    address: &str,
) -> Result<EnrichmentBundle> {
    let (topic, time_series, posts, news, creators) = tokio::join!(
        with_fallback(symbol, address, |key| async move { client.topic(&key).await }),
        with_fallback(symbol, address, |key| async move {
            client.time_series(&key, TIME_SERIES_DAYS).await
        }),
        with_fallback(symbol, address, |key| async move {
            client.posts(&key, POSTS_LIMIT).await
        }),
        with_fallback(symbol, address, |key| async move {
            client.news(&key, NEWS_LIMIT).await
        }),
        with_fallback(symbol, address, |key| async move {
            client.creators(&key, CREATORS_LIMIT).await
        }),
    );

    let topic = topic?;
    let mut degraded = Vec::new();
    let time_series = or_empty(Resource::TimeSeries, symbol, time_series, &mut degraded);
    let posts = or_empty(Resource::Posts, symbol, posts, &mut degraded);
    let news = or_empty(Resource::News, symbol, news, &mut degraded);
    let creators = or_empty(Resource::Creators, symbol, creators, &mut degraded);

    Ok(EnrichmentBundle {
        topic,
        time_series,
        posts,
        news,
        creators,
        degraded,
    })
}

/// Tries `primary`, then `fallback` unless the failure makes a second key
/// pointless (provider rate limit or plan restriction).
async fn with_fallback<T, F, Fut>(primary: &str, fallback: &str, fetch: F) -> Result<T>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match fetch(primary.to_string()).await {
        Ok(value) => Ok(value),
        Err(err @ (EnrichmentError::RateLimited | EnrichmentError::PlanRestricted)) => Err(err),
        Err(err) if fallback.is_empty() || fallback.eq_ignore_ascii_case(primary) => Err(err),
        Err(err) => {
            debug!(primary, fallback, error = %err, "primary key failed, trying fallback");
            fetch(fallback.to_string()).await
        }
    }
}

fn or_empty<T>(
    resource: Resource,
    symbol: &str,
    outcome: Result<Vec<T>>,
    degraded: &mut Vec<Resource>,
) -> Vec<T> {
    match outcome {
        Ok(items) => items,
        Err(EnrichmentError::PlanRestricted) => {
            debug!(resource = resource.as_str(), symbol, "not available on current plan");
            Vec::new()
        }
        Err(err) => {
            warn!(resource = resource.as_str(), symbol, error = %err, "sub-resource unavailable");
            degraded.push(resource);
            Vec::new()
        }
    }
}
