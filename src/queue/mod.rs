//! Broker queue: a durable priority queue plus its dead-letter queue.
//!
//! Delivery is at-least-once with manual acknowledgment. A delivered
//! message stays claimed until it is acked, nacked or completed with a
//! retry. Rejecting a main-queue message without requeue dead-letters it
//! for a fixed retention window.
//!
//! [`InMemoryJobQueue`] backs tests and persistence-less runs;
//! [`PostgresJobQueue`] claims rows with `FOR UPDATE SKIP LOCKED`.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::AnalysisJob;
use crate::error::PipelineError;

pub use memory::InMemoryJobQueue;
pub use postgres::PostgresJobQueue;

/// Name of the main work queue.
pub const MAIN_QUEUE: &str = "narrative_analysis_queue";
/// Name of the dead-letter queue.
pub const DEAD_LETTER_QUEUE: &str = "narrative_analysis_dlq";
/// Unacknowledged main-queue deliveries a consumer may hold.
pub const PREFETCH: usize = 1;

/// One of the two queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
pub enum QueueName {
    /// Work queue.
    #[default]
    #[serde(rename = "narrative_analysis_queue")]
    Main,
    /// Dead-letter queue.
    #[serde(rename = "narrative_analysis_dlq")]
    DeadLetter,
}

impl QueueName {
    /// Broker-level name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Main => MAIN_QUEUE,
            Self::DeadLetter => DEAD_LETTER_QUEUE,
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueueName {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            MAIN_QUEUE => Ok(Self::Main),
            DEAD_LETTER_QUEUE => Ok(Self::DeadLetter),
            other => Err(PipelineError::InvalidQueue(other.to_string())),
        }
    }
}

/// Result of a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Stored durably.
    Persisted,
    /// Stored, but the queue is above its high-water mark.
    Buffered,
}

/// Opaque handle identifying a claimed message.
pub type DeliveryTag = u64;

/// A claimed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Handle for ack / nack.
    pub tag: DeliveryTag,
    /// Queue the message was claimed from.
    pub queue: QueueName,
    /// Raw JSON body.
    pub body: Vec<u8>,
    /// Broker priority.
    pub priority: u8,
    /// `true` if the message was delivered before and not acknowledged.
    pub redelivered: bool,
}

/// Depth and consumer count of the main queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MainQueueStats {
    /// Queue name.
    pub name: String,
    /// Ready messages.
    pub message_count: u64,
    /// Attached consumers.
    pub consumer_count: u32,
}

/// Depth of the dead-letter queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterStats {
    /// Queue name.
    pub name: String,
    /// Ready messages.
    pub message_count: u64,
}

/// Snapshot of both queues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    /// Work queue.
    pub main_queue: MainQueueStats,
    /// Dead-letter queue.
    pub dead_letter_queue: DeadLetterStats,
}

/// Durable broker capability.
#[async_trait]
pub trait JobQueue: Send + Sync + std::fmt::Debug {
    /// Publishes a job to the main queue at the job's priority.
    ///
    /// # Errors
    ///
    /// [`PipelineError::BrokerUnavailable`] when the broker cannot store it.
    async fn enqueue(&self, job: &AnalysisJob) -> Result<EnqueueOutcome, PipelineError>;

    /// Claims the next main-queue message, highest priority first. Returns
    /// `None` when the queue is empty or the prefetch window is full.
    ///
    /// # Errors
    ///
    /// [`PipelineError::BrokerUnavailable`] on broker failure.
    async fn receive(&self) -> Result<Option<Delivery>, PipelineError>;

    /// Removes a claimed message permanently.
    ///
    /// # Errors
    ///
    /// [`PipelineError::BrokerUnavailable`] on broker failure or unknown tag.
    async fn ack(&self, tag: DeliveryTag) -> Result<(), PipelineError>;

    /// Rejects a claimed message. With `requeue` it becomes ready again at
    /// its original position; without, a main-queue message is
    /// dead-lettered and a dead-letter message is dropped.
    ///
    /// # Errors
    ///
    /// [`PipelineError::BrokerUnavailable`] on broker failure or unknown tag.
    async fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<(), PipelineError>;

    /// Removes the claimed original and publishes `updated` to the main
    /// queue in one step.
    ///
    /// # Errors
    ///
    /// [`PipelineError::BrokerUnavailable`] on broker failure or unknown
    /// tag; the original stays claimed in that case.
    async fn complete_with_retry(
        &self,
        tag: DeliveryTag,
        updated: &AnalysisJob,
    ) -> Result<(), PipelineError>;

    /// Claims the oldest unexpired dead-letter message.
    ///
    /// # Errors
    ///
    /// [`PipelineError::BrokerUnavailable`] on broker failure.
    async fn get_dead_letter(&self) -> Result<Option<Delivery>, PipelineError>;

    /// Publishes a raw body to `queue`.
    ///
    /// # Errors
    ///
    /// [`PipelineError::BrokerUnavailable`] on broker failure.
    async fn publish(
        &self,
        queue: QueueName,
        body: &[u8],
        priority: u8,
    ) -> Result<EnqueueOutcome, PipelineError>;

    /// Ready depths and consumer count.
    ///
    /// # Errors
    ///
    /// [`PipelineError::BrokerUnavailable`] on broker failure.
    async fn stats(&self) -> Result<QueueStats, PipelineError>;

    /// Removes every ready message from `queue`, returning the count.
    ///
    /// # Errors
    ///
    /// [`PipelineError::BrokerUnavailable`] on broker failure.
    async fn purge(&self, queue: QueueName) -> Result<u64, PipelineError>;

    /// Records a consumer attaching to the main queue.
    fn register_consumer(&self);

    /// Records a consumer detaching from the main queue.
    fn unregister_consumer(&self);
}
