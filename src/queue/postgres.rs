//! Durable broker on a PostgreSQL message table.
//!
//! Both queues share `queue_messages`, keyed by `queue_name`. Consumers
//! claim the next ready row with `FOR UPDATE SKIP LOCKED`, so concurrent
//! processes never receive the same message. A claimed row stays in the
//! `unacked` state until it is acknowledged; rows left claimed by a
//! crashed process are returned to `ready` by
//! [`PostgresJobQueue::recover_unacked`] at startup. A settle that fails
//! mid-flight drops the delivery from the local window and its row is
//! returned to `ready` on the next successful receive.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::Mutex;

use super::{
    DeadLetterStats, Delivery, DeliveryTag, EnqueueOutcome, JobQueue, MainQueueStats, PREFETCH,
    QueueName, QueueStats,
};
use crate::config::QueueConfig;
use crate::domain::{AnalysisJob, Clock};
use crate::error::PipelineError;

fn broker_err(err: sqlx::Error) -> PipelineError {
    PipelineError::BrokerUnavailable(err.to_string())
}

fn tag_of(id: i64) -> DeliveryTag {
    u64::try_from(id).unwrap_or_default()
}

fn id_of(tag: DeliveryTag) -> i64 {
    i64::try_from(tag).unwrap_or(i64::MAX)
}

/// Broker backed by `sqlx::PgPool`.
#[derive(Debug)]
pub struct PostgresJobQueue {
    pool: PgPool,
    clock: Arc<dyn Clock>,
    dlq_ttl: chrono::Duration,
    high_water_mark: u64,
    consumers: AtomicU32,
    /// Deliveries this process holds, by tag.
    in_flight: Mutex<HashMap<DeliveryTag, QueueName>>,
    /// Deliveries whose settle failed; their rows are still `unacked`.
    orphaned: Mutex<Vec<DeliveryTag>>,
}

impl PostgresJobQueue {
    /// Creates a broker over the given connection pool.
    #[must_use]
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>, config: &QueueConfig) -> Self {
        Self {
            pool,
            clock,
            dlq_ttl: config.dlq_ttl,
            high_water_mark: config.high_water_mark,
            consumers: AtomicU32::new(0),
            in_flight: Mutex::new(HashMap::new()),
            orphaned: Mutex::new(Vec::new()),
        }
    }

    /// Returns every claimed message to the ready state, flagged as
    /// redelivered. Call once at startup before consuming.
    ///
    /// # Errors
    ///
    /// [`PipelineError::BrokerUnavailable`] on database failure.
    pub async fn recover_unacked(&self) -> Result<u64, PipelineError> {
        let result = sqlx::query(
            "UPDATE queue_messages SET state = 'ready', redelivered = TRUE, claimed_at = NULL \
             WHERE state = 'unacked'",
        )
        .execute(&self.pool)
        .await
        .map_err(broker_err)?;
        Ok(result.rows_affected())
    }

    async fn drop_expired(&self) -> Result<(), PipelineError> {
        sqlx::query(
            "DELETE FROM queue_messages WHERE expires_at IS NOT NULL AND expires_at <= $1 \
             AND state = 'ready'",
        )
        .bind(self.clock.now())
        .execute(&self.pool)
        .await
        .map_err(broker_err)?;
        Ok(())
    }

    async fn ready_count(&self, queue: QueueName) -> Result<u64, PipelineError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM queue_messages WHERE queue_name = $1 AND state = 'ready'",
        )
        .bind(queue.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(broker_err)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn claim(&self, queue: QueueName) -> Result<Option<Delivery>, PipelineError> {
        let row = sqlx::query_as::<_, (i64, i16, Vec<u8>, bool)>(
            "UPDATE queue_messages SET state = 'unacked', claimed_at = $2 \
             WHERE id = ( \
                 SELECT id FROM queue_messages \
                 WHERE queue_name = $1 AND state = 'ready' \
                   AND (expires_at IS NULL OR expires_at > $2) \
                 ORDER BY priority DESC, enqueued_at ASC, id ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING id, priority, body, redelivered",
        )
        .bind(queue.as_str())
        .bind(self.clock.now())
        .fetch_optional(&self.pool)
        .await
        .map_err(broker_err)?;

        let Some((id, priority, body, redelivered)) = row else {
            return Ok(None);
        };
        let tag = tag_of(id);
        self.in_flight.lock().await.insert(tag, queue);
        Ok(Some(Delivery {
            tag,
            queue,
            body,
            priority: u8::try_from(priority).unwrap_or(0),
            redelivered,
        }))
    }

    async fn release(&self, tag: DeliveryTag) -> Result<QueueName, PipelineError> {
        self.in_flight
            .lock()
            .await
            .remove(&tag)
            .ok_or_else(|| PipelineError::BrokerUnavailable(format!("unknown delivery tag {tag}")))
    }

    /// Releases `tag` when a settle query failed, remembering its row for
    /// [`Self::restore_orphaned`].
    async fn settled(
        &self,
        tag: DeliveryTag,
        result: Result<(), PipelineError>,
    ) -> Result<(), PipelineError> {
        if let Err(err) = result {
            if self.in_flight.lock().await.remove(&tag).is_some() {
                self.orphaned.lock().await.push(tag);
            }
            tracing::warn!(tag, error = %err, "settle failed, delivery released");
            return Err(err);
        }
        self.release(tag).await?;
        Ok(())
    }

    async fn restore_orphaned(&self) -> Result<(), PipelineError> {
        let mut orphaned = self.orphaned.lock().await;
        if orphaned.is_empty() {
            return Ok(());
        }
        let ids: Vec<i64> = orphaned.iter().copied().map(id_of).collect();
        sqlx::query(
            "UPDATE queue_messages SET state = 'ready', redelivered = TRUE, claimed_at = NULL \
             WHERE id = ANY($1) AND state = 'unacked'",
        )
        .bind(ids)
        .execute(&self.pool)
        .await
        .map_err(broker_err)?;
        orphaned.clear();
        Ok(())
    }

    async fn swap(
        &self,
        tag: DeliveryTag,
        priority: u8,
        body: Vec<u8>,
    ) -> Result<(), PipelineError> {
        let mut tx = self.pool.begin().await.map_err(broker_err)?;
        sqlx::query("DELETE FROM queue_messages WHERE id = $1 AND state = 'unacked'")
            .bind(id_of(tag))
            .execute(&mut *tx)
            .await
            .map_err(broker_err)?;
        sqlx::query(
            "INSERT INTO queue_messages (queue_name, priority, body, enqueued_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(QueueName::Main.as_str())
        .bind(i16::from(priority))
        .bind(body)
        .bind(self.clock.now())
        .execute(&mut *tx)
        .await
        .map_err(broker_err)?;
        tx.commit().await.map_err(broker_err)
    }

    async fn insert(
        &self,
        queue: QueueName,
        body: &[u8],
        priority: u8,
    ) -> Result<EnqueueOutcome, PipelineError> {
        let now = self.clock.now();
        let expires_at = (queue == QueueName::DeadLetter).then(|| now + self.dlq_ttl);
        sqlx::query(
            "INSERT INTO queue_messages (queue_name, priority, body, enqueued_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(queue.as_str())
        .bind(i16::from(priority))
        .bind(body)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(broker_err)?;

        if self.ready_count(queue).await? > self.high_water_mark {
            Ok(EnqueueOutcome::Buffered)
        } else {
            Ok(EnqueueOutcome::Persisted)
        }
    }
}

#[async_trait]
impl JobQueue for PostgresJobQueue {
    async fn enqueue(&self, job: &AnalysisJob) -> Result<EnqueueOutcome, PipelineError> {
        let body = job
            .to_vec()
            .map_err(|e| PipelineError::Internal(e.to_string()))?;
        self.insert(QueueName::Main, &body, job.priority).await
    }

    async fn receive(&self) -> Result<Option<Delivery>, PipelineError> {
        let outstanding = self
            .in_flight
            .lock()
            .await
            .values()
            .filter(|q| **q == QueueName::Main)
            .count();
        if outstanding >= PREFETCH {
            return Ok(None);
        }
        self.restore_orphaned().await?;
        self.claim(QueueName::Main).await
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<(), PipelineError> {
        let result = sqlx::query("DELETE FROM queue_messages WHERE id = $1 AND state = 'unacked'")
            .bind(id_of(tag))
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(broker_err);
        self.settled(tag, result).await
    }

    async fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<(), PipelineError> {
        let queue = self
            .in_flight
            .lock()
            .await
            .get(&tag)
            .copied()
            .ok_or_else(|| {
                PipelineError::BrokerUnavailable(format!("unknown delivery tag {tag}"))
            })?;

        let query = match (requeue, queue) {
            (true, _) => sqlx::query(
                "UPDATE queue_messages SET state = 'ready', redelivered = TRUE, claimed_at = NULL \
                 WHERE id = $1",
            )
            .bind(id_of(tag)),
            (false, QueueName::Main) => {
                let now = self.clock.now();
                sqlx::query(
                    "UPDATE queue_messages SET queue_name = $2, state = 'ready', priority = 0, \
                     redelivered = FALSE, claimed_at = NULL, enqueued_at = $3, expires_at = $4 \
                     WHERE id = $1",
                )
                .bind(id_of(tag))
                .bind(QueueName::DeadLetter.as_str())
                .bind(now)
                .bind(now + self.dlq_ttl)
            }
            (false, QueueName::DeadLetter) => {
                sqlx::query("DELETE FROM queue_messages WHERE id = $1").bind(id_of(tag))
            }
        };
        let result = query
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(broker_err);
        self.settled(tag, result).await
    }

    async fn complete_with_retry(
        &self,
        tag: DeliveryTag,
        updated: &AnalysisJob,
    ) -> Result<(), PipelineError> {
        let body = updated
            .to_vec()
            .map_err(|e| PipelineError::Internal(e.to_string()))?;
        let result = self.swap(tag, updated.priority, body).await;
        self.settled(tag, result).await
    }

    async fn get_dead_letter(&self) -> Result<Option<Delivery>, PipelineError> {
        self.drop_expired().await?;
        self.claim(QueueName::DeadLetter).await
    }

    async fn publish(
        &self,
        queue: QueueName,
        body: &[u8],
        priority: u8,
    ) -> Result<EnqueueOutcome, PipelineError> {
        self.insert(queue, body, priority).await
    }

    async fn stats(&self) -> Result<QueueStats, PipelineError> {
        self.drop_expired().await?;
        Ok(QueueStats {
            main_queue: MainQueueStats {
                name: QueueName::Main.to_string(),
                message_count: self.ready_count(QueueName::Main).await?,
                consumer_count: self.consumers.load(Ordering::SeqCst),
            },
            dead_letter_queue: DeadLetterStats {
                name: QueueName::DeadLetter.to_string(),
                message_count: self.ready_count(QueueName::DeadLetter).await?,
            },
        })
    }

    async fn purge(&self, queue: QueueName) -> Result<u64, PipelineError> {
        self.drop_expired().await?;
        let result =
            sqlx::query("DELETE FROM queue_messages WHERE queue_name = $1 AND state = 'ready'")
                .bind(queue.as_str())
                .execute(&self.pool)
                .await
                .map_err(broker_err)?;
        Ok(result.rows_affected())
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
