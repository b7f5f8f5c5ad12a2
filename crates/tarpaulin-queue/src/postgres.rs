//! Postgres-backed message channel.
//!
//! Messages are rows of `queue_messages`. A receive claims the oldest visible row
//! with `FOR UPDATE SKIP LOCKED`, bumps its `delivery_count` and pushes `visible_at`
//! forward by the lease; a consumer that dies without settling therefore sees its
//! message redelivered once the lease runs out. Publishers `pg_notify` so idle
//! consumers wake before their poll interval.

use crate::channel::{Delivery, MessageChannel};
use crate::error::{QueueError, QueueResult};
use crate::QueueBackend;
use async_trait::async_trait;
use bytes::Bytes;
use sqlx::postgres::PgListener;
use sqlx::{PgPool, Row};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Channel name for PostgreSQL LISTEN/NOTIFY when a message is published.
pub const QUEUE_NOTIFY_CHANNEL: &str = "tarpaulin_queue";

pub struct PgChannel {
    pool: PgPool,
    lease: Duration,
    published: Arc<Notify>,
    listening: AtomicBool,
    listener_task: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl PgChannel {
    pub fn new(pool: PgPool, lease: Duration) -> Self {
        Self {
            pool,
            lease,
            published: Arc::new(Notify::new()),
            listening: AtomicBool::new(false),
            listener_task: std::sync::Mutex::new(None),
        }
    }

    /// Start the LISTEN task on first use. It reconnects on its own until the
    /// channel is dropped.
    fn ensure_listener(&self) {
        if self.listening.swap(true, Ordering::SeqCst) {
            return;
        }
        let pool = self.pool.clone();
        let notify = self.published.clone();
        let handle = tokio::spawn(async move {
            loop {
                match PgListener::connect_with(&pool).await {
                    Ok(mut listener) => {
                        if let Err(e) = listener.listen(QUEUE_NOTIFY_CHANNEL).await {
                            tracing::warn!(error = %e, "LISTEN failed, will retry");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                            continue;
                        }
                        while listener.recv().await.is_ok() {
                            notify.notify_one();
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "PgListener connect failed, will retry");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });
        if let Ok(mut slot) = self.listener_task.lock() {
            *slot = Some(handle);
        }
    }

    /// Settle-time guard: only the holder of the current lease may settle.
    fn stale(delivery: &Delivery) -> QueueError {
        tracing::warn!(
            delivery_id = delivery.id,
            delivery_count = delivery.delivery_count,
            "Delivery no longer held, lease expired or already settled"
        );
        QueueError::UnknownDelivery(delivery.id)
    }
}

impl Drop for PgChannel {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.listener_task.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

#[async_trait]
impl MessageChannel for PgChannel {
    #[tracing::instrument(skip(self))]
    async fn connect(&self, queue: &str) -> QueueResult<()> {
        sqlx::query("INSERT INTO queues (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
            .bind(queue)
            .execute(&self.pool)
            .await?;
        tracing::debug!(queue = %queue, "Queue declared");
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> QueueResult<()> {
        let mut tx = self.pool.begin().await?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO queue_messages (queue, payload) VALUES ($1, $2) RETURNING id",
        )
        .bind(queue)
        .bind(payload)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
                QueueError::UnknownQueue(queue.to_string())
            }
            other => other.into(),
        })?;

        // Consumers fall back to polling if the notification is lost.
        if let Err(e) = sqlx::query("SELECT pg_notify($1, $2)")
            .bind(QUEUE_NOTIFY_CHANNEL)
            .bind(queue)
            .execute(&mut *tx)
            .await
        {
            tracing::warn!(
                error = %e,
                message_id = id,
                "Failed to send pg_notify, consumers will discover message via polling"
            );
        }

        tx.commit().await?;
        tracing::debug!(queue = %queue, message_id = id, "Message published");
        Ok(())
    }

    async fn receive(&self, queue: &str) -> QueueResult<Option<Delivery>> {
        let row = sqlx::query(
            r#"
            UPDATE queue_messages
            SET delivery_count = delivery_count + 1,
                visible_at = NOW() + make_interval(secs => $2)
            WHERE id = (
                SELECT id FROM queue_messages
                WHERE queue = $1 AND visible_at <= NOW()
                ORDER BY visible_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, queue, payload, delivery_count
            "#,
        )
        .bind(queue)
        .bind(self.lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let payload: Vec<u8> = row.try_get("payload")?;
        let delivery_count: i32 = row.try_get("delivery_count")?;
        Ok(Some(Delivery {
            id: row.try_get("id")?,
            queue: row.try_get("queue")?,
            payload: Bytes::from(payload),
            delivery_count: u32::try_from(delivery_count).unwrap_or_default(),
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        let result =
            sqlx::query("DELETE FROM queue_messages WHERE id = $1 AND delivery_count = $2")
                .bind(delivery.id)
                .bind(delivery.delivery_count as i32)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(Self::stale(delivery));
        }
        Ok(())
    }

    async fn requeue(&self, delivery: &Delivery, delay: Duration) -> QueueResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE queue_messages
            SET visible_at = NOW() + make_interval(secs => $3)
            WHERE id = $1 AND delivery_count = $2
            "#,
        )
        .bind(delivery.id)
        .bind(delivery.delivery_count as i32)
        .bind(delay.as_secs_f64())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Self::stale(delivery));
        }
        Ok(())
    }

    async fn dead_letter(
        &self,
        delivery: &Delivery,
        dead_letter_queue: &str,
        reason: &str,
    ) -> QueueResult<()> {
        let mut tx = self.pool.begin().await?;

        let payload: Option<Vec<u8>> = sqlx::query_scalar(
            "DELETE FROM queue_messages WHERE id = $1 AND delivery_count = $2 RETURNING payload",
        )
        .bind(delivery.id)
        .bind(delivery.delivery_count as i32)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(payload) = payload else {
            return Err(Self::stale(delivery));
        };

        sqlx::query("INSERT INTO queues (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
            .bind(dead_letter_queue)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO queue_messages (queue, payload, delivery_count, last_error, source_queue)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(dead_letter_queue)
        .bind(payload)
        .bind(delivery.delivery_count as i32)
        .bind(reason)
        .bind(&delivery.queue)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn wait_for_publish(&self, _queue: &str, max_wait: Duration) {
        self.ensure_listener();
        let _ = tokio::time::timeout(max_wait, self.published.notified()).await;
    }

    fn backend_type(&self) -> QueueBackend {
        QueueBackend::Postgres
    }
}
