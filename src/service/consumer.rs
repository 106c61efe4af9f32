//! Rate-limited single-flight consumer of the main queue.
//!
//! Per delivery:
//!
//! 1. If the [`RateGate`] is closed, the message is requeued and the
//!    consumer sleeps out the remaining interval.
//! 2. If another job is mid-processing, the message is requeued.
//! 3. Otherwise the body is decoded, the gate is marked and the job
//!    analyzed.
//! 4. Success acks the message. Failure republishes the job with
//!    `retries + 1`, or dead-letters the original once the retry budget is
//!    spent.
//!
//! Bodies that do not decode as a job are dead-lettered immediately and
//! leave the gate open. A failed ack, nack or retry publish is returned as
//! an error; the delivery goes back to ready and is redelivered.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;

use crate::domain::{AnalysisJob, Clock};
use crate::error::PipelineError;
use crate::queue::{Delivery, JobQueue};

use super::analyzer::NarrativeAnalyzer;
use super::rate_gate::RateGate;

/// What the consumer did with one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Analyzed successfully and acknowledged.
    Acked,
    /// Requeued because the rate gate was closed; the consumer slept `wait`.
    RateLimited {
        /// Time slept before accepting more deliveries.
        wait: Duration,
    },
    /// Requeued because another job was mid-processing.
    Busy,
    /// Failed and republished with the new retry count.
    Retried {
        /// Retry count on the republished job.
        retries: u32,
    },
    /// Failed for the last time and dead-lettered.
    DeadLettered {
        /// Failed attempts, including this one.
        retries: u32,
    },
    /// Undecodable body, dead-lettered.
    Malformed,
}

/// Clears the processing flag on every exit path.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl<'a> ProcessingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Single logical worker draining the main queue.
#[derive(Debug)]
pub struct RateLimitedConsumer {
    queue: Arc<dyn JobQueue>,
    analyzer: Arc<NarrativeAnalyzer>,
    gate: RateGate,
    processing: AtomicBool,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
}

impl RateLimitedConsumer {
    /// Creates a consumer spacing jobs `interval` apart.
    #[must_use]
    pub fn new(
        queue: Arc<dyn JobQueue>,
        analyzer: Arc<NarrativeAnalyzer>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            analyzer,
            gate: RateGate::new(interval),
            processing: AtomicBool::new(false),
            clock,
            poll_interval,
        }
    }

    /// `true` while a job is being analyzed.
    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    /// Processes one delivery.
    ///
    /// # Errors
    ///
    /// [`PipelineError::BrokerUnavailable`] when the ack, nack or retry
    /// publish fails. Analysis failures are not errors here; they become
    /// [`DeliveryOutcome::Retried`] or [`DeliveryOutcome::DeadLettered`].
    pub async fn handle_delivery(
        &self,
        delivery: Delivery,
    ) -> Result<DeliveryOutcome, PipelineError> {
        let now = self.clock.now();
        if let Some(wait) = self.gate.remaining(now) {
            self.queue.nack(delivery.tag, true).await?;
            tracing::debug!(
                wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                "rate gate closed, job requeued"
            );
            self.clock.sleep(wait).await;
            return Ok(DeliveryOutcome::RateLimited { wait });
        }

        let Some(_guard) = ProcessingGuard::acquire(&self.processing) else {
            self.queue.nack(delivery.tag, true).await?;
            tracing::debug!("consumer busy, job requeued");
            return Ok(DeliveryOutcome::Busy);
        };

        let job = match AnalysisJob::from_slice(&delivery.body) {
            Ok(job) => job,
            Err(err) => {
                Self::settle(self.queue.nack(delivery.tag, false).await)?;
                tracing::error!(
                    error = %err,
                    bytes = delivery.body.len(),
                    "malformed job payload dead-lettered"
                );
                return Ok(DeliveryOutcome::Malformed);
            }
        };
        self.gate.mark(now);

        if self.analyzer.analyze(&job).await.is_ok() {
            Self::settle(self.queue.ack(delivery.tag).await)?;
            return Ok(DeliveryOutcome::Acked);
        }

        let next = job.next_attempt();
        if AnalysisJob::is_exhausted_after(next.retries) {
            Self::settle(self.queue.nack(delivery.tag, false).await)?;
            tracing::error!(
                token_symbol = %job.token_symbol,
                narrative_id = %job.narrative_id,
                retries = next.retries,
                "retries exhausted, job dead-lettered"
            );
            Ok(DeliveryOutcome::DeadLettered {
                retries: next.retries,
            })
        } else {
            Self::settle(self.queue.complete_with_retry(delivery.tag, &next).await)?;
            tracing::warn!(
                token_symbol = %job.token_symbol,
                narrative_id = %job.narrative_id,
                retries = next.retries,
                "job scheduled for retry"
            );
            Ok(DeliveryOutcome::Retried {
                retries: next.retries,
            })
        }
    }

    /// Logs a failed settle. The broker has already returned the delivery
    /// to ready, so it is redelivered on a later poll.
    fn settle(result: Result<(), PipelineError>) -> Result<(), PipelineError> {
        if let Err(err) = &result {
            tracing::warn!(error = %err, "settle failed, job left for redelivery");
        }
        result
    }

    /// Claims and processes at most one message. `None` when nothing was
    /// delivered.
    ///
    /// # Errors
    ///
    /// [`PipelineError::BrokerUnavailable`] on broker failure.
    pub async fn poll_once(&self) -> Result<Option<DeliveryOutcome>, PipelineError> {
        let Some(delivery) = self.queue.receive().await? else {
            return Ok(None);
        };
        self.handle_delivery(delivery).await.map(Some)
    }

    /// Consumes until `shutdown` turns `true` or its sender is dropped. An
    /// in-flight job always finishes first.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        self.queue.register_consumer();
        tracing::info!(
            interval_ms = u64::try_from(self.gate.interval().as_millis()).unwrap_or(u64::MAX),
            "consumer started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.poll_once().await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(err) => tracing::warn!(error = %err, "consumer poll failed"),
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                () = self.clock.sleep(self.poll_interval) => {}
            }
        }

        self.queue.unregister_consumer();
        tracing::info!("consumer stopped");
    }
}
