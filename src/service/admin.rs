//! Operator actions on the queues.

use std::sync::Arc;

use crate::domain::{AnalysisJob, Clock};
use crate::error::PipelineError;
use crate::queue::{JobQueue, QueueName, QueueStats};

/// Read and repair access to the broker.
#[derive(Debug)]
pub struct QueueAdmin {
    queue: Arc<dyn JobQueue>,
    clock: Arc<dyn Clock>,
}

impl QueueAdmin {
    /// Creates a new `QueueAdmin`.
    #[must_use]
    pub fn new(queue: Arc<dyn JobQueue>, clock: Arc<dyn Clock>) -> Self {
        Self { queue, clock }
    }

    /// Ready depth and consumers of the main queue, ready depth of the DLQ.
    ///
    /// # Errors
    ///
    /// [`PipelineError::BrokerUnavailable`] on broker failure.
    pub async fn get_queue_stats(&self) -> Result<QueueStats, PipelineError> {
        self.queue.stats().await
    }

    /// Moves up to `limit` dead-lettered jobs back to the main queue with
    /// `retries` reset to 0. A DLQ message is acknowledged only after its
    /// republish succeeded. Undecodable entries are dropped and not counted.
    ///
    /// Returns the number of jobs moved.
    ///
    /// # Errors
    ///
    /// [`PipelineError::BrokerUnavailable`] when the broker fails before
    /// any job was moved.
    pub async fn reprocess_dlq(&self, limit: u32) -> Result<u32, PipelineError> {
        let mut moved = 0_u32;
        for _ in 0..limit {
            let Some(delivery) = self.queue.get_dead_letter().await? else {
                break;
            };
            let job = match AnalysisJob::from_slice(&delivery.body) {
                Ok(job) => job,
                Err(err) => {
                    self.queue.ack(delivery.tag).await?;
                    tracing::warn!(error = %err, "dropped undecodable dead-letter entry");
                    continue;
                }
            };

            let reset = job.reset_for_reprocess(self.clock.now());
            let body = reset
                .to_vec()
                .map_err(|e| PipelineError::Internal(e.to_string()))?;
            match self
                .queue
                .publish(QueueName::Main, &body, reset.priority)
                .await
            {
                Ok(_) => {
                    self.queue.ack(delivery.tag).await?;
                    moved += 1;
                    tracing::info!(
                        token_symbol = %reset.token_symbol,
                        narrative_id = %reset.narrative_id,
                        "dead-letter job reprocessed"
                    );
                }
                Err(err) => {
                    self.queue.nack(delivery.tag, true).await?;
                    tracing::warn!(error = %err, moved, "DLQ reprocess interrupted");
                    if moved == 0 {
                        return Err(err);
                    }
                    break;
                }
            }
        }
        Ok(moved)
    }

    /// Removes every ready message from `queue`.
    ///
    /// # Errors
    ///
    /// [`PipelineError::BrokerUnavailable`] on broker failure.
    pub async fn purge_queue(&self, queue: QueueName) -> Result<u64, PipelineError> {
        let purged = self.queue.purge(queue).await?;
        tracing::warn!(queue = %queue, purged, "queue purged");
        Ok(purged)
    }
}
