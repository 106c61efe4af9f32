//! Enrichment and aggregation for one job.

use std::sync::Arc;

use crate::domain::{AnalysisJob, Clock, Narrative, SentimentSnapshot};
use crate::enrichment::{EnrichmentClient, EnrichmentError, fetch_bundle};
use crate::error::PipelineError;
use crate::store::NarrativeStore;

use super::aggregation;

/// What a successful analysis wrote.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    /// The narrative after the overwrite.
    pub narrative: Narrative,
    /// The appended snapshot.
    pub snapshot: SentimentSnapshot,
}

/// Runs the enrichment pipeline for a job and persists the result.
///
/// On failure the narrative is marked `failed` with the error message
/// before the error is returned.
#[derive(Debug)]
pub struct NarrativeAnalyzer {
    store: Arc<dyn NarrativeStore>,
    client: Arc<dyn EnrichmentClient>,
    clock: Arc<dyn Clock>,
}

impl NarrativeAnalyzer {
    /// Creates a new `NarrativeAnalyzer`.
    #[must_use]
    pub fn new(
        store: Arc<dyn NarrativeStore>,
        client: Arc<dyn EnrichmentClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            client,
            clock,
        }
    }

    /// Analyzes the job's token.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::EnrichmentUnavailable`] when neither key yields
    ///   topic data or the payload has an unknown shape.
    /// - [`PipelineError::TransientProvider`] on network, 5xx or 429.
    /// - [`PipelineError::NarrativeNotFound`] when the narrative was purged.
    /// - [`PipelineError::Persistence`] on storage failure.
    pub async fn analyze(&self, job: &AnalysisJob) -> Result<AnalysisOutcome, PipelineError> {
        match self.run(job).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                let now = self.clock.now();
                if let Err(mark_err) = self
                    .store
                    .mark_failed(job.narrative_id, &err.to_string(), now)
                    .await
                {
                    tracing::warn!(
                        narrative_id = %job.narrative_id,
                        error = %mark_err,
                        "could not record analysis failure"
                    );
                }
                tracing::error!(
                    token_symbol = %job.token_symbol,
                    token_address = %job.token_address,
                    error = %err,
                    "analysis failed"
                );
                Err(err)
            }
        }
    }

    async fn run(&self, job: &AnalysisJob) -> Result<AnalysisOutcome, PipelineError> {
        let started = self.clock.now();
        tracing::info!(
            token_symbol = %job.token_symbol,
            token_address = %job.token_address,
            retries = job.retries,
            "analysis started"
        );

        let bundle = fetch_bundle(self.client.as_ref(), &job.token_symbol, &job.token_address)
            .await
            .map_err(|err| match err {
                EnrichmentError::NotFound(_) => PipelineError::EnrichmentUnavailable(format!(
                    "no topic data for {} or {}",
                    job.token_symbol, job.token_address
                )),
                other => other.into(),
            })?;

        let ai_report = match self.client.ai_report(&job.token_symbol).await {
            Ok(report) => Some(report),
            Err(err) => {
                tracing::warn!(token_symbol = %job.token_symbol, error = %err, "AI report unavailable");
                None
            }
        };

        let now = self.clock.now();
        let result = aggregation::analysis_result(&bundle, ai_report, now);
        let narrative = self
            .store
            .save_analysis(job.narrative_id, &result, now)
            .await?;

        let previous = self.store.latest_snapshot(&narrative.token_address).await?;
        let processing_time =
            u64::try_from((self.clock.now() - started).num_milliseconds()).unwrap_or(0);
        let snapshot = aggregation::snapshot(
            &narrative,
            job,
            &bundle,
            &result,
            previous.as_ref(),
            processing_time,
            now,
        );
        self.store.append_snapshot(&snapshot).await?;

        tracing::info!(
            token_symbol = %job.token_symbol,
            narrative_id = %narrative.id,
            sentiment = result.sentiment.score,
            processing_ms = processing_time,
            partial = !bundle.degraded.is_empty(),
            "analysis completed"
        );
        Ok(AnalysisOutcome {
            narrative,
            snapshot,
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::job::tests::job;
    use crate::domain::narrative::tests::call;
    use crate::domain::snapshot::{AnalysisType, SnapshotStatus};
    use crate::domain::{AnalysisStatus, ManualClock};
    use crate::enrichment::{ScriptedEnrichmentClient, TopicData};
    use crate::store::InMemoryNarrativeStore;

    struct Harness {
        store: Arc<InMemoryNarrativeStore>,
        client: Arc<ScriptedEnrichmentClient>,
        analyzer: NarrativeAnalyzer,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryNarrativeStore::new());
        let client = Arc::new(ScriptedEnrichmentClient::new());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_epoch());
        let analyzer = NarrativeAnalyzer::new(
            Arc::clone(&store) as Arc<dyn NarrativeStore>,
            Arc::clone(&client) as Arc<dyn EnrichmentClient>,
            clock,
        );
        Harness {
            store,
            client,
            analyzer,
        }
    }

    async fn job_for(store: &InMemoryNarrativeStore, address: &str) -> AnalysisJob {
        let now = chrono::Utc::now();
        let Ok((narrative, _)) = store.record_call(&call(address, now), now).await else {
            panic!("record_call failed");
        };
        let mut job = job("BONK", address, 7);
        job.narrative_id = narrative.id;
        job
    }

    fn topic(sentiment: f64) -> Result<TopicData, EnrichmentError> {
        Ok(TopicData {
            sentiment: Some(sentiment),
            ..TopicData::default()
        })
    }

    #[tokio::test]
    async fn success_completes_narrative_and_appends_initial_snapshot() {
        let h = harness();
        h.client.set_topic("bonk", topic(68.0));
        h.client
            .set_ai_report("bonk", Err(EnrichmentError::Network("timeout".to_string())));
        let job = job_for(&h.store, "Dez63").await;

        let Ok(outcome) = h.analyzer.analyze(&job).await else {
            panic!("analysis failed");
        };
        assert_eq!(outcome.narrative.analysis_status, AnalysisStatus::Completed);
        assert_eq!(outcome.narrative.sentiment_score, Some(68));
        assert!(outcome.narrative.ai_report.is_none());
        assert_eq!(outcome.snapshot.analysis_type, AnalysisType::Initial);
        assert_eq!(outcome.snapshot.status, SnapshotStatus::Completed);
    }

    #[tokio::test]
    async fn second_run_is_an_update_with_exact_delta() {
        let h = harness();
        h.client.set_topic("bonk", topic(60.0));
        h.client.set_ai_report("bonk", Ok("# BONK".to_string()));
        let job = job_for(&h.store, "Dez63").await;
        let Ok(_) = h.analyzer.analyze(&job).await else {
            panic!("first analysis failed");
        };

        h.client.set_topic("bonk", topic(47.0));
        let Ok(second) = h.analyzer.analyze(&job).await else {
            panic!("second analysis failed");
        };
        assert_eq!(second.snapshot.analysis_type, AnalysisType::Update);
        assert_eq!(second.snapshot.compared_to_previous.sentiment_change, Some(-13));
        assert_eq!(second.narrative.ai_report.as_deref(), Some("# BONK"));
    }

    #[tokio::test]
    async fn missing_topic_marks_narrative_failed() {
        let h = harness();
        let job = job_for(&h.store, "Dez63").await;

        let outcome = h.analyzer.analyze(&job).await;
        assert!(matches!(
            outcome,
            Err(PipelineError::EnrichmentUnavailable(_))
        ));

        let Ok(Some(narrative)) = h.store.find_by_address("Dez63").await else {
            panic!("narrative missing");
        };
        assert_eq!(narrative.analysis_status, AnalysisStatus::Failed);
        assert!(
            narrative
                .last_analysis_error
                .is_some_and(|e| e.contains("no topic data"))
        );
    }

    #[tokio::test]
    async fn rate_limited_provider_is_transient() {
        let h = harness();
        h.client.set_topic("bonk", Err(EnrichmentError::RateLimited));
        let job = job_for(&h.store, "Dez63").await;

        let Err(err) = h.analyzer.analyze(&job).await else {
            panic!("expected failure");
        };
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn purged_narrative_is_not_found() {
        let h = harness();
        h.client.set_topic("bonk", topic(60.0));
        let job = job_for(&h.store, "Dez63").await;
        let Ok(Some(_)) = h.store.delete_by_address("Dez63").await else {
            panic!("delete failed");
        };

        let outcome = h.analyzer.analyze(&job).await;
        assert!(matches!(outcome, Err(PipelineError::NarrativeNotFound(_))));
        assert!(h.store.is_empty().await);
    }
}
