//! Where the producer sends jobs.
//!
//! [`QueueSink`] publishes to the broker. [`DirectSink`] runs the analysis
//! in a background task, bypassing the queue. [`FailoverSink`] prefers the
//! queue and falls back to direct processing while a [`CircuitBreaker`]
//! reports the broker as unhealthy.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use utoipa::ToSchema;

use crate::domain::AnalysisJob;
use crate::error::PipelineError;
use crate::queue::{EnqueueOutcome, JobQueue};

use super::analyzer::NarrativeAnalyzer;
use super::breaker::CircuitBreaker;

/// How a submitted job was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SinkOutcome {
    /// Persisted on the broker.
    Queued,
    /// Persisted on the broker, which is above its high-water mark.
    Buffered,
    /// Processing directly (degraded mode).
    Direct,
}

/// Destination for analysis jobs.
#[async_trait]
pub trait JobSink: Send + Sync + std::fmt::Debug {
    /// Hands the job over for processing.
    ///
    /// # Errors
    ///
    /// [`PipelineError::BrokerUnavailable`] when a queue-backed sink cannot
    /// store the job.
    async fn submit(&self, job: AnalysisJob) -> Result<SinkOutcome, PipelineError>;
}

/// Publishes jobs to the broker's main queue.
#[derive(Debug)]
pub struct QueueSink {
    queue: Arc<dyn JobQueue>,
}

impl QueueSink {
    /// Creates a sink over `queue`.
    #[must_use]
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl JobSink for QueueSink {
    async fn submit(&self, job: AnalysisJob) -> Result<SinkOutcome, PipelineError> {
        let outcome = self.queue.enqueue(&job).await?;
        tracing::info!(
            token_symbol = %job.token_symbol,
            narrative_id = %job.narrative_id,
            priority = job.priority,
            "job enqueued"
        );
        Ok(match outcome {
            EnqueueOutcome::Persisted => SinkOutcome::Queued,
            EnqueueOutcome::Buffered => {
                tracing::warn!(token_symbol = %job.token_symbol, "queue above high-water mark");
                SinkOutcome::Buffered
            }
        })
    }
}

/// Runs jobs immediately on background tasks.
#[derive(Debug)]
pub struct DirectSink {
    analyzer: Arc<NarrativeAnalyzer>,
    tasks: Mutex<JoinSet<()>>,
}

impl DirectSink {
    /// Creates a sink that analyzes with `analyzer`.
    #[must_use]
    pub fn new(analyzer: Arc<NarrativeAnalyzer>) -> Self {
        Self {
            analyzer,
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Waits for every direct analysis started so far. Submissions made
    /// while waiting are not blocked and are not waited for.
    pub async fn wait_idle(&self) {
        let mut tasks = std::mem::take(&mut *self.tasks.lock().await);
        while tasks.join_next().await.is_some() {}
    }
}

#[async_trait]
impl JobSink for DirectSink {
    async fn submit(&self, job: AnalysisJob) -> Result<SinkOutcome, PipelineError> {
        let analyzer = Arc::clone(&self.analyzer);
        let mut tasks = self.tasks.lock().await;
        while tasks.try_join_next().is_some() {}
        tracing::warn!(
            token_symbol = %job.token_symbol,
            narrative_id = %job.narrative_id,
            "degraded mode: analyzing without the queue"
        );
        tasks.spawn(async move {
            // Failures are already recorded on the narrative.
            let _ = analyzer.analyze(&job).await;
        });
        Ok(SinkOutcome::Direct)
    }
}

/// Queue first, direct processing while the broker circuit is open.
#[derive(Debug)]
pub struct FailoverSink {
    primary: Arc<dyn JobSink>,
    fallback: Arc<dyn JobSink>,
    breaker: CircuitBreaker,
}

impl FailoverSink {
    /// Creates a failover sink.
    #[must_use]
    pub fn new(
        primary: Arc<dyn JobSink>,
        fallback: Arc<dyn JobSink>,
        breaker: CircuitBreaker,
    ) -> Self {
        Self {
            primary,
            fallback,
            breaker,
        }
    }

    /// The breaker guarding the primary sink.
    #[must_use]
    pub const fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

#[async_trait]
impl JobSink for FailoverSink {
    async fn submit(&self, job: AnalysisJob) -> Result<SinkOutcome, PipelineError> {
        if self.breaker.allows() {
            match self.primary.submit(job.clone()).await {
                Ok(outcome) => {
                    self.breaker.record_success();
                    return Ok(outcome);
                }
                Err(err) => {
                    self.breaker.record_failure();
                    tracing::warn!(
                        token_symbol = %job.token_symbol,
                        error = %err,
                        "broker enqueue failed, falling back"
                    );
                }
            }
        } else {
            tracing::debug!(token_symbol = %job.token_symbol, "broker circuit open, bypassing queue");
        }
        self.fallback.submit(job).await
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::QueueConfig;
    use crate::domain::job::tests::job;
    use crate::domain::{Clock, ManualClock};
    use crate::enrichment::{EnrichmentClient, ScriptedEnrichmentClient};
    use crate::queue::{InMemoryJobQueue, QueueName};
    use crate::store::{InMemoryNarrativeStore, NarrativeStore};

    fn direct(clock: &Arc<dyn Clock>) -> Arc<DirectSink> {
        let store: Arc<dyn NarrativeStore> = Arc::new(InMemoryNarrativeStore::new());
        let client: Arc<dyn EnrichmentClient> = Arc::new(ScriptedEnrichmentClient::new());
        let analyzer = Arc::new(NarrativeAnalyzer::new(store, client, Arc::clone(clock)));
        Arc::new(DirectSink::new(analyzer))
    }

    fn failover() -> (Arc<InMemoryJobQueue>, Arc<DirectSink>, FailoverSink) {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_epoch());
        let queue = Arc::new(InMemoryJobQueue::new(
            Arc::clone(&clock),
            &QueueConfig::default(),
        ));
        let direct = direct(&clock);
        let sink = FailoverSink::new(
            Arc::new(QueueSink::new(Arc::clone(&queue) as Arc<dyn JobQueue>)),
            Arc::clone(&direct) as Arc<dyn JobSink>,
            CircuitBreaker::new(2, Duration::from_secs(30), clock),
        );
        (queue, direct, sink)
    }

    #[tokio::test]
    async fn healthy_broker_receives_the_job() {
        let (queue, _, sink) = failover();
        let outcome = sink.submit(job("BONK", "Dez63", 7)).await;
        assert!(matches!(outcome, Ok(SinkOutcome::Queued)));
        assert_eq!(queue.ready_bodies(QueueName::Main).await.len(), 1);
    }

    #[tokio::test]
    async fn broker_failure_falls_back_to_direct_and_opens_circuit() {
        let (queue, direct, sink) = failover();
        queue.set_available(false);

        for _ in 0..2 {
            let outcome = sink.submit(job("BONK", "Dez63", 7)).await;
            assert!(matches!(outcome, Ok(SinkOutcome::Direct)));
        }
        assert!(!sink.breaker().allows());

        queue.set_available(true);
        let outcome = sink.submit(job("BONK", "Dez63", 7)).await;
        assert!(matches!(outcome, Ok(SinkOutcome::Direct)));
        assert!(queue.ready_bodies(QueueName::Main).await.is_empty());
        direct.wait_idle().await;
    }

    #[tokio::test]
    async fn submit_is_not_blocked_while_waiting_for_idle() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_epoch());
        let direct = direct(&clock);
        let Ok(SinkOutcome::Direct) = direct.submit(job("BONK", "Dez63", 7)).await else {
            panic!("direct submit failed");
        };

        let mut waiting = tokio_test::task::spawn(direct.wait_idle());
        let _ = waiting.poll();
        let submitted =
            tokio::time::timeout(Duration::from_secs(1), direct.submit(job("WIF", "EKp12", 7)))
                .await;
        assert!(matches!(submitted, Ok(Ok(SinkOutcome::Direct))));

        drop(waiting);
        direct.wait_idle().await;
        assert!(direct.tasks.lock().await.is_empty());
    }
}
