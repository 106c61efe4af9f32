//! In-process broker with the same delivery semantics as the durable one.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{
    DeadLetterStats, Delivery, DeliveryTag, EnqueueOutcome, JobQueue, MainQueueStats, PREFETCH,
    QueueName, QueueStats,
};
use crate::config::QueueConfig;
use crate::domain::{AnalysisJob, Clock};
use crate::error::PipelineError;

#[derive(Debug, Clone)]
struct Stored {
    priority: u8,
    body: Vec<u8>,
    redelivered: bool,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Ready main-queue messages, highest priority then oldest first.
    main: BTreeMap<(Reverse<u8>, u64), Stored>,
    /// Ready dead-letter messages in arrival order.
    dead: BTreeMap<u64, Stored>,
    unacked: HashMap<DeliveryTag, (QueueName, Stored)>,
    next_seq: u64,
}

impl Inner {
    fn seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn push(&mut self, queue: QueueName, stored: Stored) {
        let seq = self.seq();
        self.insert_at(queue, seq, stored);
    }

    fn insert_at(&mut self, queue: QueueName, seq: u64, stored: Stored) {
        match queue {
            QueueName::Main => {
                self.main.insert((Reverse(stored.priority), seq), stored);
            }
            QueueName::DeadLetter => {
                self.dead.insert(seq, stored);
            }
        }
    }

    fn drop_expired(&mut self, now: DateTime<Utc>) {
        self.dead
            .retain(|_, stored| stored.expires_at.is_none_or(|at| at > now));
    }

    fn main_in_flight(&self) -> usize {
        self.unacked
            .values()
            .filter(|(queue, _)| *queue == QueueName::Main)
            .count()
    }

    fn take_unacked(&mut self, tag: DeliveryTag) -> Result<(QueueName, Stored), PipelineError> {
        self.unacked
            .remove(&tag)
            .ok_or_else(|| PipelineError::BrokerUnavailable(format!("unknown delivery tag {tag}")))
    }
}

/// Broker held in process memory.
///
/// [`InMemoryJobQueue::set_available`] simulates a broker outage: while
/// unavailable every operation fails with
/// [`PipelineError::BrokerUnavailable`].
#[derive(Debug)]
pub struct InMemoryJobQueue {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    dlq_ttl: chrono::Duration,
    high_water_mark: u64,
    available: AtomicBool,
    consumers: AtomicU32,
}

impl InMemoryJobQueue {
    /// Creates an empty broker.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, config: &QueueConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
            dlq_ttl: config.dlq_ttl,
            high_water_mark: config.high_water_mark,
            available: AtomicBool::new(true),
            consumers: AtomicU32::new(0),
        }
    }

    /// Toggles simulated availability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Bodies of ready messages in `queue`, in delivery order.
    pub async fn ready_bodies(&self, queue: QueueName) -> Vec<Vec<u8>> {
        let mut inner = self.inner.lock().await;
        inner.drop_expired(self.clock.now());
        match queue {
            QueueName::Main => inner.main.values().map(|s| s.body.clone()).collect(),
            QueueName::DeadLetter => inner.dead.values().map(|s| s.body.clone()).collect(),
        }
    }

    /// Claimed but unacknowledged messages across both queues.
    pub async fn unacked_count(&self) -> usize {
        self.inner.lock().await.unacked.len()
    }

    fn check_available(&self) -> Result<(), PipelineError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PipelineError::BrokerUnavailable(
                "in-memory broker marked unavailable".to_string(),
            ))
        }
    }

    /// Checks availability before a settle. On an outage the delivery
    /// leaves the in-flight window and goes back to ready, marked
    /// redelivered.
    async fn check_settle(&self, tag: DeliveryTag) -> Result<(), PipelineError> {
        let Err(err) = self.check_available() else {
            return Ok(());
        };
        let mut inner = self.inner.lock().await;
        if let Ok((queue, mut stored)) = inner.take_unacked(tag) {
            stored.redelivered = true;
            inner.insert_at(queue, tag, stored);
        }
        Err(err)
    }

    fn outcome(&self, depth: usize) -> EnqueueOutcome {
        if depth as u64 > self.high_water_mark {
            EnqueueOutcome::Buffered
        } else {
            EnqueueOutcome::Persisted
        }
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: &AnalysisJob) -> Result<EnqueueOutcome, PipelineError> {
        let body = job
            .to_vec()
            .map_err(|e| PipelineError::Internal(e.to_string()))?;
        self.publish(QueueName::Main, &body, job.priority).await
    }

    async fn receive(&self) -> Result<Option<Delivery>, PipelineError> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        if inner.main_in_flight() >= PREFETCH {
            return Ok(None);
        }
        let Some(((_, seq), stored)) = inner.main.pop_first() else {
            return Ok(None);
        };
        let delivery = Delivery {
            tag: seq,
            queue: QueueName::Main,
            body: stored.body.clone(),
            priority: stored.priority,
            redelivered: stored.redelivered,
        };
        inner.unacked.insert(seq, (QueueName::Main, stored));
        Ok(Some(delivery))
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<(), PipelineError> {
        self.check_settle(tag).await?;
        self.inner.lock().await.take_unacked(tag)?;
        Ok(())
    }

    async fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<(), PipelineError> {
        self.check_settle(tag).await?;
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        let (queue, mut stored) = inner.take_unacked(tag)?;
        if requeue {
            stored.redelivered = true;
            inner.insert_at(queue, tag, stored);
            return Ok(());
        }
        if queue == QueueName::Main {
            stored.redelivered = false;
            stored.expires_at = Some(now + self.dlq_ttl);
            inner.push(QueueName::DeadLetter, stored);
        }
        Ok(())
    }

    async fn complete_with_retry(
        &self,
        tag: DeliveryTag,
        updated: &AnalysisJob,
    ) -> Result<(), PipelineError> {
        self.check_settle(tag).await?;
        let body = updated
            .to_vec()
            .map_err(|e| PipelineError::Internal(e.to_string()))?;
        let mut inner = self.inner.lock().await;
        inner.take_unacked(tag)?;
        inner.push(
            QueueName::Main,
            Stored {
                priority: updated.priority,
                body,
                redelivered: false,
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn get_dead_letter(&self) -> Result<Option<Delivery>, PipelineError> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        inner.drop_expired(self.clock.now());
        let Some((seq, stored)) = inner.dead.pop_first() else {
            return Ok(None);
        };
        let delivery = Delivery {
            tag: seq,
            queue: QueueName::DeadLetter,
            body: stored.body.clone(),
            priority: stored.priority,
            redelivered: stored.redelivered,
        };
        inner.unacked.insert(seq, (QueueName::DeadLetter, stored));
        Ok(Some(delivery))
    }

    async fn publish(
        &self,
        queue: QueueName,
        body: &[u8],
        priority: u8,
    ) -> Result<EnqueueOutcome, PipelineError> {
        self.check_available()?;
        let now = self.clock.now();
        let expires_at = (queue == QueueName::DeadLetter).then(|| now + self.dlq_ttl);
        let mut inner = self.inner.lock().await;
        inner.push(
            queue,
            Stored {
                priority,
                body: body.to_vec(),
                redelivered: false,
                expires_at,
            },
        );
        let depth = match queue {
            QueueName::Main => inner.main.len(),
            QueueName::DeadLetter => inner.dead.len(),
        };
        Ok(self.outcome(depth))
    }

    async fn stats(&self) -> Result<QueueStats, PipelineError> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        inner.drop_expired(self.clock.now());
        Ok(QueueStats {
            main_queue: MainQueueStats {
                name: QueueName::Main.to_string(),
                message_count: inner.main.len() as u64,
                consumer_count: self.consumers.load(Ordering::SeqCst),
            },
            dead_letter_queue: DeadLetterStats {
                name: QueueName::DeadLetter.to_string(),
                message_count: inner.dead.len() as u64,
            },
        })
    }

    async fn purge(&self, queue: QueueName) -> Result<u64, PipelineError> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        inner.drop_expired(self.clock.now());
        let removed = match queue {
            QueueName::Main => std::mem::take(&mut inner.main).len(),
            QueueName::DeadLetter => std::mem::take(&mut inner.dead).len(),
        };
        Ok(removed as u64)
    }

    fn register_consumer(&self) {
        self.consumers.fetch_add(1, Ordering::SeqCst);
    }

    fn unregister_consumer(&self) {
        let _ = self
            .consumers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::ManualClock;
    use crate::domain::job::tests::job;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn queue() -> (Arc<ManualClock>, InMemoryJobQueue) {
        let clock = Arc::new(ManualClock::at_epoch());
        let shared: Arc<dyn Clock> = Arc::clone(&clock) as Arc<dyn Clock>;
        (clock, InMemoryJobQueue::new(shared, &QueueConfig::default()))
    }

    async fn next_job(q: &InMemoryJobQueue) -> (Delivery, AnalysisJob) {
        let Ok(Some(delivery)) = q.receive().await else {
            panic!("expected a delivery");
        };
        let Ok(job) = AnalysisJob::from_slice(&delivery.body) else {
            panic!("undecodable body");
        };
        (delivery, job)
    }

    #[tokio::test]
    async fn higher_priority_drains_first_then_fifo() {
        let (_, q) = queue();
        assert_ok!(q.enqueue(&job("OLD", "a", 5)).await);
        assert_ok!(q.enqueue(&job("NEW", "b", 7)).await);
        assert_ok!(q.enqueue(&job("OLD2", "c", 5)).await);

        let mut order = Vec::new();
        for _ in 0..3 {
            let (delivery, job) = next_job(&q).await;
            order.push(job.token_symbol);
            assert_ok!(q.ack(delivery.tag).await);
        }
        assert_eq!(order, vec!["NEW", "OLD", "OLD2"]);
    }

    #[tokio::test]
    async fn prefetch_limits_outstanding_deliveries() {
        let (_, q) = queue();
        assert_ok!(q.enqueue(&job("A", "a", 5)).await);
        assert_ok!(q.enqueue(&job("B", "b", 5)).await);

        let (first, _) = next_job(&q).await;
        let Ok(None) = q.receive().await else {
            panic!("prefetch window should be full");
        };
        assert_ok!(q.ack(first.tag).await);
        let (second, job) = next_job(&q).await;
        assert_eq!(job.token_symbol, "B");
        assert_ok!(q.ack(second.tag).await);
    }

    #[tokio::test]
    async fn requeue_returns_message_to_head() {
        let (_, q) = queue();
        assert_ok!(q.enqueue(&job("A", "a", 5)).await);
        assert_ok!(q.enqueue(&job("B", "b", 5)).await);

        let (first, _) = next_job(&q).await;
        assert_ok!(q.nack(first.tag, true).await);
        let (again, job) = next_job(&q).await;
        assert_eq!(job.token_symbol, "A");
        assert!(again.redelivered);
    }

    #[tokio::test]
    async fn reject_dead_letters_and_ttl_expires() {
        let (clock, q) = queue();
        assert_ok!(q.enqueue(&job("A", "a", 5)).await);
        let (delivery, _) = next_job(&q).await;
        assert_ok!(q.nack(delivery.tag, false).await);

        let Ok(stats) = q.stats().await else {
            panic!("stats failed");
        };
        assert_eq!(stats.main_queue.message_count, 0);
        assert_eq!(stats.dead_letter_queue.message_count, 1);

        clock.advance(Duration::from_secs(24 * 3600 + 1));
        let Ok(stats) = q.stats().await else {
            panic!("stats failed");
        };
        assert_eq!(stats.dead_letter_queue.message_count, 0);
    }

    #[tokio::test]
    async fn complete_with_retry_swaps_payload() {
        let (_, q) = queue();
        assert_ok!(q.enqueue(&job("A", "a", 7)).await);
        let (delivery, job) = next_job(&q).await;
        assert_ok!(q.complete_with_retry(delivery.tag, &job.next_attempt()).await);
        assert_eq!(q.unacked_count().await, 0);

        let (retry, job) = next_job(&q).await;
        assert_eq!(job.retries, 1);
        assert_eq!(retry.priority, 7);
        assert!(!retry.redelivered);
    }

    #[tokio::test]
    async fn failed_settle_returns_delivery_to_ready() {
        let (_, q) = queue();
        assert_ok!(q.enqueue(&job("A", "a", 5)).await);
        assert_ok!(q.enqueue(&job("B", "b", 5)).await);

        let (first, _) = next_job(&q).await;
        q.set_available(false);
        assert_err!(q.ack(first.tag).await);
        q.set_available(true);
        assert_eq!(q.unacked_count().await, 0);

        let (again, job) = next_job(&q).await;
        assert_eq!(job.token_symbol, "A");
        assert!(again.redelivered);
        assert_ok!(q.ack(again.tag).await);

        let (second, _) = next_job(&q).await;
        q.set_available(false);
        assert_err!(q.complete_with_retry(second.tag, &job.next_attempt()).await);
        assert_err!(q.nack(second.tag, false).await);
        q.set_available(true);
        let (again, job) = next_job(&q).await;
        assert_eq!(job.token_symbol, "B");
        assert_eq!(job.retries, 0);
        assert!(again.redelivered);
    }

    #[tokio::test]
    async fn unavailable_broker_fails_everything() {
        let (_, q) = queue();
        q.set_available(false);
        assert_err!(q.enqueue(&job("A", "a", 5)).await);
        assert_err!(q.stats().await);
        q.set_available(true);
        assert_ok!(q.enqueue(&job("A", "a", 5)).await);
    }

    #[tokio::test]
    async fn above_high_water_mark_is_buffered() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_epoch());
        let config = QueueConfig {
            high_water_mark: 1,
            ..QueueConfig::default()
        };
        let q = InMemoryJobQueue::new(clock, &config);
        let Ok(EnqueueOutcome::Persisted) = q.enqueue(&job("A", "a", 5)).await else {
            panic!("first enqueue should persist");
        };
        let Ok(EnqueueOutcome::Buffered) = q.enqueue(&job("B", "b", 5)).await else {
            panic!("second enqueue should be buffered");
        };
        let Ok(stats) = q.stats().await else {
            panic!("stats failed");
        };
        assert_eq!(stats.main_queue.message_count, 2);
    }

    #[tokio::test]
    async fn purge_counts_ready_messages_and_consumers_are_tracked() {
        let (_, q) = queue();
        assert_ok!(q.enqueue(&job("A", "a", 5)).await);
        assert_ok!(q.enqueue(&job("B", "b", 5)).await);
        q.register_consumer();
        let Ok(stats) = q.stats().await else {
            panic!("stats failed");
        };
        assert_eq!(stats.main_queue.consumer_count, 1);
        q.unregister_consumer();
        q.unregister_consumer();

        let Ok(removed) = q.purge(QueueName::Main).await else {
            panic!("purge failed");
        };
        assert_eq!(removed, 2);
        let Ok(stats) = q.stats().await else {
            panic!("stats failed");
        };
        assert_eq!(stats.main_queue.consumer_count, 0);
    }
}
