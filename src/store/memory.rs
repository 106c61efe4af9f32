//! In-memory narrative store.
//!
//! Narratives are kept in a `HashMap` keyed by token address and the
//! snapshot history in per-token vectors, all behind one
//! [`tokio::sync::RwLock`] so every read-modify-write is atomic.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{
    NarrativeQuery, NarrativeStats, NarrativeStore, NarrativeSummary, Page, Pagination, SortField,
    SortOrder, STATS_TOP_N, StatusCounts, TrendingMetric, clamp_limit,
};
use crate::domain::{
    AnalysisResult, AnalysisStatus, CallRecord, Narrative, NarrativeId, SentimentSnapshot,
};
use crate::error::PipelineError;

#[derive(Debug, Default)]
struct Inner {
    narratives: HashMap<String, Narrative>,
    snapshots: HashMap<String, Vec<SentimentSnapshot>>,
}

impl Inner {
    fn by_id_mut(&mut self, id: NarrativeId) -> Result<&mut Narrative, PipelineError> {
        self.narratives
            .values_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| PipelineError::NarrativeNotFound(id.to_string()))
    }
}

/// Narrative store held entirely in process memory.
#[derive(Debug, Default)]
pub struct InMemoryNarrativeStore {
    inner: RwLock<Inner>,
}

impl InMemoryNarrativeStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored narratives.
    pub async fn len(&self) -> usize {
        self.inner.read().await.narratives.len()
    }

    /// Returns `true` if no narrative is stored.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.narratives.is_empty()
    }
}

fn compare_by(field: SortField, a: &Narrative, b: &Narrative) -> Ordering {
    match field {
        SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        SortField::CreatedAt => a.created_at.cmp(&b.created_at),
        SortField::SentimentScore => a.sentiment_score.cmp(&b.sentiment_score),
        SortField::TopicRank => a.topic_rank.cmp(&b.topic_rank),
        SortField::TotalCallsDetected => a.total_calls_detected.cmp(&b.total_calls_detected),
    }
}

fn page_of<T: Clone>(items: &[T], page: u32, limit: u32) -> Page<T> {
    let skip = usize::try_from(u64::from(page.saturating_sub(1)) * u64::from(limit))
        .unwrap_or(usize::MAX);
    let data: Vec<T> = items
        .iter()
        .skip(skip)
        .take(limit as usize)
        .cloned()
        .collect();
    let pagination = Pagination::new(page, limit, items.len() as u64, data.len());
    Page { data, pagination }
}

#[async_trait]
impl NarrativeStore for InMemoryNarrativeStore {
    async fn record_call(
        &self,
        call: &CallRecord,
        now: DateTime<Utc>,
    ) -> Result<(Narrative, bool), PipelineError> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.narratives.get_mut(&call.token_address) {
            existing.record_repeat_call(call, now);
            return Ok((existing.clone(), false));
        }
        let narrative = Narrative::from_first_call(call, now);
        inner
            .narratives
            .insert(call.token_address.clone(), narrative.clone());
        Ok((narrative, true))
    }

    async fn find_by_address(&self, address: &str) -> Result<Option<Narrative>, PipelineError> {
        Ok(self.inner.read().await.narratives.get(address).cloned())
    }

    async fn find_by_id(&self, id: NarrativeId) -> Result<Option<Narrative>, PipelineError> {
        Ok(self
            .inner
            .read()
            .await
            .narratives
            .values()
            .find(|n| n.id == id)
            .cloned())
    }

    async fn save_analysis(
        &self,
        id: NarrativeId,
        result: &AnalysisResult,
        now: DateTime<Utc>,
    ) -> Result<Narrative, PipelineError> {
        let mut inner = self.inner.write().await;
        let narrative = inner.by_id_mut(id)?;
        narrative.apply_analysis(result, now);
        Ok(narrative.clone())
    }

    async fn mark_failed(
        &self,
        id: NarrativeId,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        let mut inner = self.inner.write().await;
        inner.by_id_mut(id)?.mark_failed(error, now);
        Ok(())
    }

    async fn mark_processing(
        &self,
        address: &str,
        now: DateTime<Utc>,
    ) -> Result<Narrative, PipelineError> {
        let mut inner = self.inner.write().await;
        let narrative = inner
            .narratives
            .get_mut(address)
            .ok_or_else(|| PipelineError::NarrativeNotFound(address.to_string()))?;
        narrative.begin_processing(now);
        Ok(narrative.clone())
    }

    async fn latest_snapshot(
        &self,
        address: &str,
    ) -> Result<Option<SentimentSnapshot>, PipelineError> {
        Ok(self
            .inner
            .read()
            .await
            .snapshots
            .get(address)
            .and_then(|history| history.last())
            .cloned())
    }

    async fn append_snapshot(&self, snapshot: &SentimentSnapshot) -> Result<(), PipelineError> {
        self.inner
            .write()
            .await
            .snapshots
            .entry(snapshot.token_address.clone())
            .or_default()
            .push(snapshot.clone());
        Ok(())
    }

    async fn list_snapshots(
        &self,
        address: &str,
        page: u32,
        limit: u32,
    ) -> Result<Page<SentimentSnapshot>, PipelineError> {
        let inner = self.inner.read().await;
        let newest_first: Vec<SentimentSnapshot> = inner
            .snapshots
            .get(address)
            .map(|history| history.iter().rev().cloned().collect())
            .unwrap_or_default();
        Ok(page_of(&newest_first, page.max(1), clamp_limit(Some(limit))))
    }

    async fn search(&self, query: &NarrativeQuery) -> Result<Page<Narrative>, PipelineError> {
        let inner = self.inner.read().await;
        let mut hits: Vec<Narrative> = inner
            .narratives
            .values()
            .filter(|n| query.matches(n))
            .cloned()
            .collect();
        hits.sort_by(|a, b| {
            let primary = compare_by(query.sort_by, a, b);
            let primary = match query.sort_order {
                SortOrder::Asc => primary,
                SortOrder::Desc => primary.reverse(),
            };
            primary.then_with(|| a.token_address.cmp(&b.token_address))
        });
        Ok(page_of(&hits, query.page(), query.limit()))
    }

    async fn stats(&self) -> Result<NarrativeStats, PipelineError> {
        let inner = self.inner.read().await;
        let all: Vec<&Narrative> = inner.narratives.values().collect();

        let mut by_status = StatusCounts::default();
        for narrative in &all {
            by_status.add(narrative.analysis_status, 1);
        }

        let completed_scores: Vec<f64> = all
            .iter()
            .filter(|n| n.analysis_status == AnalysisStatus::Completed)
            .filter_map(|n| n.sentiment_score.map(f64::from))
            .collect();
        let average_sentiment = if completed_scores.is_empty() {
            0.0
        } else {
            completed_scores.iter().sum::<f64>() / completed_scores.len() as f64
        };

        let mut by_sentiment: Vec<&Narrative> = all
            .iter()
            .copied()
            .filter(|n| n.sentiment_score.is_some())
            .collect();
        by_sentiment.sort_by(|a, b| b.sentiment_score.cmp(&a.sentiment_score));

        let mut by_rank: Vec<&Narrative> = all
            .iter()
            .copied()
            .filter(|n| n.topic_rank.is_some())
            .collect();
        by_rank.sort_by(|a, b| a.topic_rank.cmp(&b.topic_rank));

        Ok(NarrativeStats {
            total: all.len() as u64,
            by_status,
            average_sentiment,
            top_by_sentiment: by_sentiment
                .into_iter()
                .take(STATS_TOP_N)
                .map(NarrativeSummary::from)
                .collect(),
            top_by_rank: by_rank
                .into_iter()
                .take(STATS_TOP_N)
                .map(NarrativeSummary::from)
                .collect(),
        })
    }

    async fn trending(
        &self,
        metric: TrendingMetric,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Narrative>, PipelineError> {
        let inner = self.inner.read().await;
        let mut hits: Vec<Narrative> = inner
            .narratives
            .values()
            .filter(|n| n.analysis_status == AnalysisStatus::Completed && n.updated_at >= since)
            .cloned()
            .collect();
        match metric {
            TrendingMetric::Interactions => hits.sort_by(|a, b| {
                b.social_metrics
                    .interactions
                    .cmp(&a.social_metrics.interactions)
            }),
            TrendingMetric::SentimentScore => {
                hits.sort_by(|a, b| b.sentiment_score.cmp(&a.sentiment_score));
            }
            TrendingMetric::TopicRank => hits.sort_by(|a, b| match (a.topic_rank, b.topic_rank) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }),
        }
        hits.truncate(clamp_limit(Some(limit)) as usize);
        Ok(hits)
    }

    async fn delete_by_address(
        &self,
        address: &str,
    ) -> Result<Option<(Narrative, u64)>, PipelineError> {
        let mut inner = self.inner.write().await;
        let Some(narrative) = inner.narratives.remove(address) else {
            return Ok(None);
        };
        let removed = inner
            .snapshots
            .remove(address)
            .map_or(0, |history| history.len() as u64);
        Ok(Some((narrative, removed)))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::narrative::tests::{call, result};
    use chrono::Duration;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn record_call_creates_then_increments() {
        let store = InMemoryNarrativeStore::new();
        let now = Utc::now();

        let Ok((first, is_new)) = store.record_call(&call("Dez63", now), now).await else {
            panic!("record failed");
        };
        assert!(is_new);
        assert_eq!(first.total_calls_detected, 1);

        let later = now + Duration::seconds(10);
        let Ok((second, is_new)) = store.record_call(&call("Dez63", later), later).await else {
            panic!("record failed");
        };
        assert!(!is_new);
        assert_eq!(second.id, first.id);
        assert_eq!(second.total_calls_detected, 2);
        assert_eq!(second.first_detected_at, now);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn concurrent_calls_never_lose_increments() {
        let store = std::sync::Arc::new(InMemoryNarrativeStore::new());
        let now = Utc::now();
        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = std::sync::Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.record_call(&call("Dez63", now), now).await
            }));
        }
        let mut created = 0;
        for handle in handles {
            let Ok(Ok((_, is_new))) = handle.await else {
                panic!("task failed");
            };
            if is_new {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        let Ok(Some(narrative)) = store.find_by_address("Dez63").await else {
            panic!("narrative missing");
        };
        assert_eq!(narrative.total_calls_detected, 20);
    }

    #[tokio::test]
    async fn save_analysis_on_purged_narrative_is_not_found() {
        let store = InMemoryNarrativeStore::new();
        let outcome = store
            .save_analysis(NarrativeId::new(), &result(50), Utc::now())
            .await;
        assert!(matches!(outcome, Err(PipelineError::NarrativeNotFound(_))));
    }

    #[tokio::test]
    async fn search_sorts_and_pages() {
        let store = InMemoryNarrativeStore::new();
        let now = Utc::now();
        for (i, score) in [40u8, 90, 65].into_iter().enumerate() {
            let address = format!("addr-{i}");
            let Ok((n, _)) = store.record_call(&call(&address, now), now).await else {
                panic!("record failed");
            };
            assert_ok!(store.save_analysis(n.id, &result(score), now).await);
        }

        let query = NarrativeQuery {
            sort_by: SortField::SentimentScore,
            limit: Some(2),
            ..NarrativeQuery::default()
        };
        let Ok(page) = store.search(&query).await else {
            panic!("search failed");
        };
        let scores: Vec<Option<u8>> = page.data.iter().map(|n| n.sentiment_score).collect();
        assert_eq!(scores, vec![Some(90), Some(65)]);
        assert_eq!(page.pagination.total, 3);
        assert!(page.pagination.has_more);
    }

    #[tokio::test]
    async fn stats_average_only_completed() {
        let store = InMemoryNarrativeStore::new();
        let now = Utc::now();
        let Ok((a, _)) = store.record_call(&call("a", now), now).await else {
            panic!("record failed");
        };
        let Ok((b, _)) = store.record_call(&call("b", now), now).await else {
            panic!("record failed");
        };
        assert_ok!(store.record_call(&call("c", now), now).await);
        assert_ok!(store.save_analysis(a.id, &result(80), now).await);
        assert_ok!(store.save_analysis(b.id, &result(60), now).await);
        assert_ok!(store.mark_failed(b.id, "no topic data", now).await);

        let Ok(stats) = store.stats().await else {
            panic!("stats failed");
        };
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_status.completed, 1);
        assert_eq!(stats.by_status.failed, 1);
        assert_eq!(stats.by_status.processing, 1);
        assert!((stats.average_sentiment - 80.0).abs() < f64::EPSILON);
        assert_eq!(stats.top_by_sentiment.len(), 2);
    }

    #[tokio::test]
    async fn delete_removes_snapshots_too() {
        let store = InMemoryNarrativeStore::new();
        let now = Utc::now();
        assert_ok!(store.record_call(&call("Dez63", now), now).await);
        let Ok(None) = store.delete_by_address("missing").await else {
            panic!("expected nothing to delete");
        };
        let Ok(Some((deleted, snapshots))) = store.delete_by_address("Dez63").await else {
            panic!("expected deletion");
        };
        assert_eq!(deleted.token_address, "Dez63");
        assert_eq!(snapshots, 0);
        assert!(store.is_empty().await);
    }
}
