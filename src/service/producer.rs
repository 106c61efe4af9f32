//! Call submission: record the call, then hand a job to the sink.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::job::{NEW_TOKEN_PRIORITY, REPEAT_CALL_PRIORITY};
use crate::domain::{AnalysisJob, CallContext, CallRecord, Clock, NarrativeId, TriggerSource};
use crate::error::PipelineError;
use crate::store::NarrativeStore;

use super::sink::{JobSink, SinkOutcome};

/// Status reported for every accepted submission.
pub const QUEUED: &str = "queued";
/// Message id stamped on operator-triggered re-analyses.
pub const MANUAL_REANALYSIS_MESSAGE: &str = "manual_reanalysis";
/// Channel id stamped on operator-triggered re-analyses.
pub const SYSTEM_CHANNEL: &str = "system";

/// A detected buy call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSubmission {
    /// Token ticker.
    pub token_symbol: String,
    /// Token contract address.
    pub token_address: String,
    /// Chat message id.
    pub message_id: String,
    /// Chat channel id.
    pub channel_id: String,
    /// When the call was made.
    pub timestamp: DateTime<Utc>,
}

/// Acknowledgment of an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CallReceipt {
    /// Narrative the job will update.
    pub narrative_id: NarrativeId,
    /// `true` when the narrative was created by this call.
    pub is_new: bool,
    /// Always `"queued"`; analysis has not necessarily run.
    pub status: String,
    /// Human-readable summary.
    pub message: String,
    /// How the job was accepted.
    pub delivery: SinkOutcome,
}

/// Turns calls into analysis jobs.
#[derive(Debug)]
pub struct CallProducer {
    store: Arc<dyn NarrativeStore>,
    sink: Arc<dyn JobSink>,
    clock: Arc<dyn Clock>,
}

fn required(field: &str, value: &str) -> Result<String, PipelineError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::Validation(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

impl CallProducer {
    /// Creates a new `CallProducer`.
    #[must_use]
    pub fn new(
        store: Arc<dyn NarrativeStore>,
        sink: Arc<dyn JobSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, sink, clock }
    }

    /// Records the call and submits a job: priority 7 for a new token,
    /// 5 for a repeat call.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::Validation`] when the symbol or address is blank.
    /// - [`PipelineError::Persistence`] when the narrative write fails.
    /// - [`PipelineError::BrokerUnavailable`] only if the sink has no
    ///   fallback.
    pub async fn submit_call(
        &self,
        submission: CallSubmission,
    ) -> Result<CallReceipt, PipelineError> {
        let call = CallRecord {
            token_symbol: required("tokenSymbol", &submission.token_symbol)?,
            token_address: required("tokenAddress", &submission.token_address)?,
            message_id: submission.message_id,
            channel_id: submission.channel_id,
            timestamp: submission.timestamp,
        };
        let now = self.clock.now();
        let (narrative, is_new) = self.store.record_call(&call, now).await?;
        tracing::info!(
            token_symbol = %call.token_symbol,
            token_address = %call.token_address,
            narrative_id = %narrative.id,
            is_new,
            total_calls = narrative.total_calls_detected,
            "call recorded"
        );

        let job = AnalysisJob {
            token_symbol: call.token_symbol,
            token_address: call.token_address,
            narrative_id: narrative.id,
            call_context: CallContext {
                message_id: call.message_id,
                channel_id: call.channel_id,
                timestamp: call.timestamp,
                is_update: !is_new,
            },
            retries: 0,
            enqueued_at: now,
            priority: if is_new {
                NEW_TOKEN_PRIORITY
            } else {
                REPEAT_CALL_PRIORITY
            },
            reprocessed_at: None,
            trigger: TriggerSource::DiscordCall,
        };
        let delivery = self.sink.submit(job).await?;

        let message = if is_new {
            "Narrative created and queued for analysis"
        } else {
            "Narrative updated and queued for re-analysis"
        };
        Ok(CallReceipt {
            narrative_id: narrative.id,
            is_new,
            status: QUEUED.to_string(),
            message: message.to_string(),
            delivery,
        })
    }

    /// Queues a fresh analysis of an existing narrative without counting a
    /// call.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::NarrativeNotFound`] when no narrative exists.
    /// - [`PipelineError::Persistence`] on storage failure.
    pub async fn reanalyze(&self, token_address: &str) -> Result<CallReceipt, PipelineError> {
        let now = self.clock.now();
        let narrative = self.store.mark_processing(token_address, now).await?;
        let job = AnalysisJob {
            token_symbol: narrative.token_symbol.clone(),
            token_address: narrative.token_address.clone(),
            narrative_id: narrative.id,
            call_context: CallContext {
                message_id: MANUAL_REANALYSIS_MESSAGE.to_string(),
                channel_id: SYSTEM_CHANNEL.to_string(),
                timestamp: now,
                is_update: true,
            },
            retries: 0,
            enqueued_at: now,
            priority: REPEAT_CALL_PRIORITY,
            reprocessed_at: None,
            trigger: TriggerSource::ManualRequest,
        };
        let delivery = self.sink.submit(job).await?;
        tracing::info!(
            token_symbol = %narrative.token_symbol,
            narrative_id = %narrative.id,
            "manual re-analysis queued"
        );
        Ok(CallReceipt {
            narrative_id: narrative.id,
            is_new: false,
            status: QUEUED.to_string(),
            message: "Re-analysis queued".to_string(),
            delivery,
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::domain::{AnalysisStatus, ManualClock};
    use crate::queue::{InMemoryJobQueue, JobQueue, QueueName};
    use crate::service::sink::QueueSink;
    use crate::store::InMemoryNarrativeStore;
    use tokio_test::{assert_err, assert_ok};

    struct Harness {
        store: Arc<InMemoryNarrativeStore>,
        queue: Arc<InMemoryJobQueue>,
        producer: CallProducer,
    }

    fn harness() -> Harness {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_epoch());
        let store = Arc::new(InMemoryNarrativeStore::new());
        let queue = Arc::new(InMemoryJobQueue::new(
            Arc::clone(&clock),
            &QueueConfig::default(),
        ));
        let sink = Arc::new(QueueSink::new(Arc::clone(&queue) as Arc<dyn JobQueue>));
        let producer = CallProducer::new(
            Arc::clone(&store) as Arc<dyn NarrativeStore>,
            sink,
            clock,
        );
        Harness {
            store,
            queue,
            producer,
        }
    }

    fn submission(symbol: &str, address: &str) -> CallSubmission {
        CallSubmission {
            token_symbol: symbol.to_string(),
            token_address: address.to_string(),
            message_id: "m-1".to_string(),
            channel_id: "c-1".to_string(),
            timestamp: Utc::now(),
        }
    }

    async fn queued_jobs(h: &Harness) -> Vec<AnalysisJob> {
        h.queue
            .ready_bodies(QueueName::Main)
            .await
            .iter()
            .filter_map(|b| AnalysisJob::from_slice(b).ok())
            .collect()
    }

    #[tokio::test]
    async fn first_call_is_new_and_high_priority() {
        let h = harness();
        let receipt = assert_ok!(h.producer.submit_call(submission("BONK", "Dez63")).await);
        assert!(receipt.is_new);
        assert_eq!(receipt.status, "queued");
        assert_eq!(receipt.delivery, SinkOutcome::Queued);

        let jobs = queued_jobs(&h).await;
        assert_eq!(jobs.len(), 1);
        let Some(job) = jobs.first() else {
            panic!("expected job");
        };
        assert_eq!(job.priority, NEW_TOKEN_PRIORITY);
        assert_eq!(job.retries, 0);
        assert!(!job.call_context.is_update);
        assert_eq!(job.narrative_id, receipt.narrative_id);
    }

    #[tokio::test]
    async fn repeat_call_increments_and_uses_lower_priority() {
        let h = harness();
        assert_ok!(h.producer.submit_call(submission("BONK", "Dez63")).await);
        let receipt = assert_ok!(h.producer.submit_call(submission("BONK", "Dez63")).await);
        assert!(!receipt.is_new);

        let Ok(Some(narrative)) = h.store.find_by_address("Dez63").await else {
            panic!("narrative missing");
        };
        assert_eq!(narrative.total_calls_detected, 2);
        assert_eq!(narrative.analysis_status, AnalysisStatus::Processing);

        let priorities: Vec<u8> = queued_jobs(&h).await.iter().map(|j| j.priority).collect();
        assert_eq!(priorities, vec![NEW_TOKEN_PRIORITY, REPEAT_CALL_PRIORITY]);
    }

    #[tokio::test]
    async fn blank_fields_are_rejected_before_queueing() {
        let h = harness();
        let err = assert_err!(h.producer.submit_call(submission("  ", "Dez63")).await);
        assert!(matches!(err, PipelineError::Validation(_)));
        let err = assert_err!(h.producer.submit_call(submission("BONK", "")).await);
        assert!(matches!(err, PipelineError::Validation(_)));
        assert!(h.store.is_empty().await);
        assert!(queued_jobs(&h).await.is_empty());
    }

    #[tokio::test]
    async fn reanalyze_requires_an_existing_narrative() {
        let h = harness();
        let err = assert_err!(h.producer.reanalyze("Dez63").await);
        assert!(matches!(err, PipelineError::NarrativeNotFound(_)));

        assert_ok!(h.producer.submit_call(submission("BONK", "Dez63")).await);
        let receipt = assert_ok!(h.producer.reanalyze("Dez63").await);
        assert!(!receipt.is_new);

        let jobs = queued_jobs(&h).await;
        let Some(job) = jobs.iter().find(|j| j.trigger == TriggerSource::ManualRequest) else {
            panic!("expected manual job");
        };
        assert_eq!(job.call_context.message_id, MANUAL_REANALYSIS_MESSAGE);
        assert_eq!(job.call_context.channel_id, SYSTEM_CHANNEL);
        assert_eq!(job.priority, REPEAT_CALL_PRIORITY);

        let Ok(Some(narrative)) = h.store.find_by_address("Dez63").await else {
            panic!("narrative missing");
        };
        assert_eq!(narrative.total_calls_detected, 1);
    }
}
