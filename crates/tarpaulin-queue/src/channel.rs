use crate::error::QueueResult;
use crate::QueueBackend;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// A message handed to a consumer.
///
/// Must be settled with exactly one of `ack`, `requeue` or `dead_letter`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: i64,
    pub queue: String,
    pub payload: Bytes,
    /// Number of times this message has been handed out, including this one.
    pub delivery_count: u32,
}

/// Durable at-least-once work queue.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Ensure `queue` exists. Idempotent.
    ///
    /// Fails with `QueueError::ConnectionRefused` while the broker is unreachable.
    async fn connect(&self, queue: &str) -> QueueResult<()>;

    /// Enqueue an opaque payload. The producer never observes delivery.
    async fn publish(&self, queue: &str, payload: &[u8]) -> QueueResult<()>;

    /// Claim the next visible message, if any.
    async fn receive(&self, queue: &str) -> QueueResult<Option<Delivery>>;

    /// Remove a processed message for good.
    async fn ack(&self, delivery: &Delivery) -> QueueResult<()>;

    /// Return a message to its queue, visible again after `delay`.
    async fn requeue(&self, delivery: &Delivery, delay: Duration) -> QueueResult<()>;

    /// Move a message to `dead_letter_queue`, recording why it was abandoned.
    async fn dead_letter(
        &self,
        delivery: &Delivery,
        dead_letter_queue: &str,
        reason: &str,
    ) -> QueueResult<()>;

    /// Resolve when a message may have been published to `queue`, or after
    /// `max_wait`. Spurious wakeups are allowed.
    async fn wait_for_publish(&self, queue: &str, max_wait: Duration);

    fn backend_type(&self) -> QueueBackend;
}
