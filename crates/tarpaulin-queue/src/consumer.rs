//! Serialized consume loop.
//!
//! One message is received, handled and settled before the next is received. The
//! handler reports a [`ProcessOutcome`]; [`settle_policy`] turns it into an ack,
//! a delayed requeue or a dead-letter.

use crate::channel::{Delivery, MessageChannel};
use crate::error::QueueResult;
use crate::retry::compute_retry_backoff;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tarpaulin_core::Config;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Result of handling one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Success,
    /// A later delivery may succeed.
    RetryableFailure(String),
    /// The message can never be processed.
    PermanentFailure(String),
}

impl ProcessOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessOutcome::Success)
    }
}

/// What the consumer did with a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    Requeued { delay: Duration },
    DeadLettered { reason: String },
}

/// Map a handler outcome to a settlement.
///
/// Retryable failures are requeued with `2^(delivery_count - 1)` seconds of backoff
/// until `max_deliveries` deliveries have been made, then dead-lettered.
pub fn settle_policy(outcome: ProcessOutcome, delivery_count: u32, max_deliveries: u32) -> Settlement {
    match outcome {
        ProcessOutcome::Success => Settlement::Acked,
        ProcessOutcome::RetryableFailure(_) if delivery_count < max_deliveries => {
            Settlement::Requeued {
                delay: compute_retry_backoff(delivery_count.saturating_sub(1)),
            }
        }
        ProcessOutcome::RetryableFailure(reason) => Settlement::DeadLettered {
            reason: format!("gave up after {} deliveries: {}", delivery_count, reason),
        },
        ProcessOutcome::PermanentFailure(reason) => Settlement::DeadLettered { reason },
    }
}

/// Handles the payload of one delivered message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, payload: &[u8]) -> ProcessOutcome;
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub queue: String,
    pub dead_letter_queue: String,
    pub max_deliveries: u32,
    /// Longest idle wait between receive attempts.
    pub poll_interval: Duration,
}

impl ConsumerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            queue: config.image_queue().to_string(),
            dead_letter_queue: config.dead_letter_queue().to_string(),
            max_deliveries: config.worker_max_deliveries(),
            poll_interval: config.worker_poll_interval(),
        }
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            queue: "images".to_string(),
            dead_letter_queue: "images.dead".to_string(),
            max_deliveries: 5,
            poll_interval: Duration::from_millis(1000),
        }
    }
}

/// Counters reported when the consume loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub acked: u64,
    pub requeued: u64,
    pub dead_lettered: u64,
}

impl ConsumerStats {
    fn record(&mut self, settlement: &Settlement) {
        match settlement {
            Settlement::Acked => self.acked += 1,
            Settlement::Requeued { .. } => self.requeued += 1,
            Settlement::DeadLettered { .. } => self.dead_lettered += 1,
        }
    }
}

pub struct Consumer {
    channel: Arc<dyn MessageChannel>,
    handler: Arc<dyn MessageHandler>,
    config: ConsumerConfig,
}

impl Consumer {
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        handler: Arc<dyn MessageHandler>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            channel,
            handler,
            config,
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Consume until `shutdown` is cancelled.
    ///
    /// Cancellation is observed between messages; a message being handled runs to
    /// completion and is settled first.
    pub async fn run(&self, shutdown: CancellationToken) -> ConsumerStats {
        tracing::info!(
            queue = %self.config.queue,
            dead_letter_queue = %self.config.dead_letter_queue,
            max_deliveries = self.config.max_deliveries,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            backend = %self.channel.backend_type(),
            "Consumer started"
        );

        let mut stats = ConsumerStats::default();

        while !shutdown.is_cancelled() {
            match self.process_next().await {
                Ok(Some(settlement)) => {
                    stats.record(&settlement);
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, queue = %self.config.queue, "Failed to receive message");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.channel.wait_for_publish(&self.config.queue, self.config.poll_interval) => {}
            }
        }

        tracing::info!(
            acked = stats.acked,
            requeued = stats.requeued,
            dead_lettered = stats.dead_lettered,
            "Consumer stopped"
        );
        stats
    }

    /// Receive, handle and settle at most one message.
    ///
    /// Returns `Ok(None)` when the queue is empty. A settlement that fails to reach
    /// the channel is logged; the message is then redelivered by the broker.
    pub async fn process_next(&self) -> QueueResult<Option<Settlement>> {
        let Some(delivery) = self.channel.receive(&self.config.queue).await? else {
            return Ok(None);
        };

        let span = tracing::info_span!(
            "delivery",
            delivery.id = delivery.id,
            delivery.count = delivery.delivery_count,
            queue = %delivery.queue
        );

        async {
            let outcome = self.handler.handle(&delivery.payload).await;
            let settlement = settle_policy(
                outcome.clone(),
                delivery.delivery_count,
                self.config.max_deliveries,
            );
            self.settle(&delivery, &outcome, &settlement).await;
            Ok(Some(settlement))
        }
        .instrument(span)
        .await
    }

    async fn settle(&self, delivery: &Delivery, outcome: &ProcessOutcome, settlement: &Settlement) {
        let result = match settlement {
            Settlement::Acked => {
                tracing::info!(delivery_id = delivery.id, "Message processed, acknowledging");
                self.channel.ack(delivery).await
            }
            Settlement::Requeued { delay } => {
                tracing::warn!(
                    delivery_id = delivery.id,
                    delivery_count = delivery.delivery_count,
                    max_deliveries = self.config.max_deliveries,
                    backoff_seconds = delay.as_secs(),
                    outcome = ?outcome,
                    "Message processing failed, scheduling redelivery"
                );
                self.channel.requeue(delivery, *delay).await
            }
            Settlement::DeadLettered { reason } => {
                tracing::error!(
                    delivery_id = delivery.id,
                    delivery_count = delivery.delivery_count,
                    dead_letter_queue = %self.config.dead_letter_queue,
                    reason = %reason,
                    "Message abandoned, moving to dead-letter queue"
                );
                self.channel
                    .dead_letter(delivery, &self.config.dead_letter_queue, reason)
                    .await
            }
        };

        if let Err(e) = result {
            tracing::error!(
                delivery_id = delivery.id,
                error = %e,
                "Failed to settle message, it will be redelivered"
            );
        }
    }
}
