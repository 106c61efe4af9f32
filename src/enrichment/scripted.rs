//! Scripted in-process enrichment client.
//!
//! Responses are configured per lowercased topic key; unconfigured keys
//! answer "no data" for topics and AI reports and an empty list for list
//! resources. Every call is counted so tests can assert on fan-out and
//! fallback behaviour.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{
    EnrichmentClient, EnrichmentError, RawCreator, RawNews, RawPost, RawTimePoint, Result,
    TopicData,
};

/// Client operation, for call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    /// [`EnrichmentClient::topic`].
    Topic,
    /// [`EnrichmentClient::time_series`].
    TimeSeries,
    /// [`EnrichmentClient::posts`].
    Posts,
    /// [`EnrichmentClient::news`].
    News,
    /// [`EnrichmentClient::creators`].
    Creators,
    /// [`EnrichmentClient::ai_report`].
    AiReport,
}

#[derive(Debug, Default)]
struct Script {
    topics: HashMap<String, Result<TopicData>>,
    time_series: HashMap<String, Result<Vec<RawTimePoint>>>,
    posts: HashMap<String, Result<Vec<RawPost>>>,
    news: HashMap<String, Result<Vec<RawNews>>>,
    creators: HashMap<String, Result<Vec<RawCreator>>>,
    ai_reports: HashMap<String, Result<String>>,
    calls: HashMap<Call, u32>,
}

/// Enrichment client answering from a configured script.
#[derive(Debug, Default)]
pub struct ScriptedEnrichmentClient {
    script: Mutex<Script>,
}

impl ScriptedEnrichmentClient {
    /// Creates a client with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Scripts the topic response for `key`.
    pub fn set_topic(&self, key: &str, response: Result<TopicData>) {
        self.script().topics.insert(key.to_lowercase(), response);
    }

    /// Scripts the time series response for `key`.
    pub fn set_time_series(&self, key: &str, response: Result<Vec<RawTimePoint>>) {
        self.script().time_series.insert(key.to_lowercase(), response);
    }

    /// Scripts the posts response for `key`.
    pub fn set_posts(&self, key: &str, response: Result<Vec<RawPost>>) {
        self.script().posts.insert(key.to_lowercase(), response);
    }

    /// Scripts the news response for `key`.
    pub fn set_news(&self, key: &str, response: Result<Vec<RawNews>>) {
        self.script().news.insert(key.to_lowercase(), response);
    }

    /// Scripts the creators response for `key`.
    pub fn set_creators(&self, key: &str, response: Result<Vec<RawCreator>>) {
        self.script().creators.insert(key.to_lowercase(), response);
    }

    /// Scripts the AI report response for `key`.
    pub fn set_ai_report(&self, key: &str, response: Result<String>) {
        self.script().ai_reports.insert(key.to_lowercase(), response);
    }

    /// Number of times `call` was made.
    #[must_use]
    pub fn calls(&self, call: Call) -> u32 {
        self.script().calls.get(&call).copied().unwrap_or(0)
    }

    fn answer<T: Clone>(
        &self,
        call: Call,
        key: &str,
        pick: impl FnOnce(&Script) -> Option<&Result<T>>,
        default: impl FnOnce(String) -> Result<T>,
    ) -> Result<T> {
        let mut script = self.script();
        *script.calls.entry(call).or_insert(0) += 1;
        let key = key.to_lowercase();
        pick(&*script).cloned().unwrap_or_else(|| default(key))
    }
}

#[async_trait]
impl EnrichmentClient for ScriptedEnrichmentClient {
    async fn topic(&self, key: &str) -> Result<TopicData> {
        let lookup = key.to_lowercase();
        self.answer(
            Call::Topic,
            key,
            |s| s.topics.get(&lookup),
            |k| Err(EnrichmentError::NotFound(k)),
        )
    }

    async fn time_series(&self, key: &str, _days: u32) -> Result<Vec<RawTimePoint>> {
        let lookup = key.to_lowercase();
        self.answer(
            Call::TimeSeries,
            key,
            |s| s.time_series.get(&lookup),
            |_| Ok(Vec::new()),
        )
    }

    async fn posts(&self, key: &str, _limit: u32) -> Result<Vec<RawPost>> {
        let lookup = key.to_lowercase();
        self.answer(Call::Posts, key, |s| s.posts.get(&lookup), |_| Ok(Vec::new()))
    }

    async fn news(&self, key: &str, _limit: u32) -> Result<Vec<RawNews>> {
        let lookup = key.to_lowercase();
        self.answer(Call::News, key, |s| s.news.get(&lookup), |_| Ok(Vec::new()))
    }

    async fn creators(&self, key: &str, _limit: u32) -> Result<Vec<RawCreator>> {
        let lookup = key.to_lowercase();
        self.answer(
            Call::Creators,
            key,
            |s| s.creators.get(&lookup),
            |_| Ok(Vec::new()),
        )
    }

    async fn ai_report(&self, key: &str) -> Result<String> {
        let lookup = key.to_lowercase();
        self.answer(
            Call::AiReport,
            key,
            |s| s.ai_reports.get(&lookup),
            |k| Err(EnrichmentError::NotFound(k)),
        )
    }
}
