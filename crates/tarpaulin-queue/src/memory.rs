//! In-process message channel.
//!
//! Used by tests and single-process development setups. Messages live only as long
//! as the channel value.

use crate::channel::{Delivery, MessageChannel};
use crate::error::{QueueError, QueueResult};
use crate::QueueBackend;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Message {
    payload: Bytes,
    delivery_count: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Message>,
    delayed: Vec<(Instant, Message)>,
    unacked: HashMap<i64, Message>,
}

impl QueueState {
    fn promote_due(&mut self, now: Instant) {
        let mut i = 0;
        while i < self.delayed.len() {
            if self.delayed[i].0 <= now {
                let (_, message) = self.delayed.remove(i);
                self.ready.push_back(message);
            } else {
                i += 1;
            }
        }
    }
}

/// A message moved to a dead-letter queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub source_queue: String,
    pub payload: Bytes,
    pub reason: String,
    pub delivery_count: u32,
}

#[derive(Default)]
pub struct MemoryChannel {
    queues: Mutex<HashMap<String, QueueState>>,
    dead_letters: Mutex<HashMap<String, Vec<DeadLetter>>>,
    next_id: AtomicI64,
    refuse_connects: AtomicU32,
    published: Notify,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls to `connect` fail with `ConnectionRefused`.
    pub fn refuse_next_connects(&self, n: u32) {
        self.refuse_connects.store(n, Ordering::SeqCst);
    }

    /// Return every in-flight delivery of `queue` to the ready list, as a broker
    /// does when a consumer disconnects without settling. Returns the number of
    /// messages recovered.
    pub fn recover_unacked(&self, queue: &str) -> usize {
        let recovered = {
            let mut queues = self.lock_queues();
            let Some(state) = queues.get_mut(queue) else {
                return 0;
            };
            let mut ids: Vec<i64> = state.unacked.keys().copied().collect();
            ids.sort_unstable();
            for id in &ids {
                if let Some(message) = state.unacked.remove(id) {
                    state.ready.push_back(message);
                }
            }
            ids.len()
        };
        if recovered > 0 {
            self.published.notify_one();
        }
        recovered
    }

    /// Messages waiting to be received, including delayed ones.
    pub fn pending(&self, queue: &str) -> usize {
        self.lock_queues()
            .get(queue)
            .map(|state| state.ready.len() + state.delayed.len())
            .unwrap_or(0)
    }

    /// Messages received but not yet settled.
    pub fn in_flight(&self, queue: &str) -> usize {
        self.lock_queues()
            .get(queue)
            .map(|state| state.unacked.len())
            .unwrap_or(0)
    }

    pub fn dead_letters(&self, dead_letter_queue: &str) -> Vec<DeadLetter> {
        self.lock_dead_letters()
            .get(dead_letter_queue)
            .cloned()
            .unwrap_or_default()
    }

    fn lock_queues(&self) -> std::sync::MutexGuard<'_, HashMap<String, QueueState>> {
        // A poisoned lock only means another thread panicked mid-update; the maps stay usable.
        self.queues.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_dead_letters(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<DeadLetter>>> {
        self.dead_letters.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Remove an in-flight message, failing if it was already settled.
    fn take_unacked(&self, delivery: &Delivery) -> QueueResult<Message> {
        let mut queues = self.lock_queues();
        queues
            .get_mut(&delivery.queue)
            .ok_or_else(|| QueueError::UnknownQueue(delivery.queue.clone()))?
            .unacked
            .remove(&delivery.id)
            .ok_or(QueueError::UnknownDelivery(delivery.id))
    }
}

#[async_trait]
impl MessageChannel for MemoryChannel {
    async fn connect(&self, queue: &str) -> QueueResult<()> {
        let refused = self
            .refuse_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(QueueError::ConnectionRefused(
                "memory channel refusing connections".to_string(),
            ));
        }
        self.lock_queues().entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> QueueResult<()> {
        {
            let mut queues = self.lock_queues();
            let state = queues
                .get_mut(queue)
                .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;
            state.ready.push_back(Message {
                payload: Bytes::copy_from_slice(payload),
                delivery_count: 0,
            });
        }
        self.published.notify_one();
        Ok(())
    }

    async fn receive(&self, queue: &str) -> QueueResult<Option<Delivery>> {
        let mut queues = self.lock_queues();
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;
        state.promote_due(Instant::now());

        let Some(mut message) = state.ready.pop_front() else {
            return Ok(None);
        };
        message.delivery_count += 1;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let delivery = Delivery {
            id,
            queue: queue.to_string(),
            payload: message.payload.clone(),
            delivery_count: message.delivery_count,
        };
        state.unacked.insert(id, message);
        Ok(Some(delivery))
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        self.take_unacked(delivery).map(|_| ())
    }

    async fn requeue(&self, delivery: &Delivery, delay: Duration) -> QueueResult<()> {
        let message = self.take_unacked(delivery)?;
        {
            let mut queues = self.lock_queues();
            let state = queues.entry(delivery.queue.clone()).or_default();
            if delay.is_zero() {
                state.ready.push_back(message);
            } else {
                state.delayed.push((Instant::now() + delay, message));
            }
        }
        self.published.notify_one();
        Ok(())
    }

    async fn dead_letter(
        &self,
        delivery: &Delivery,
        dead_letter_queue: &str,
        reason: &str,
    ) -> QueueResult<()> {
        let message = self.take_unacked(delivery)?;
        self.lock_dead_letters()
            .entry(dead_letter_queue.to_string())
            .or_default()
            .push(DeadLetter {
                source_queue: delivery.queue.clone(),
                payload: message.payload,
                reason: reason.to_string(),
                delivery_count: message.delivery_count,
            });
        Ok(())
    }

    async fn wait_for_publish(&self, _queue: &str, max_wait: Duration) {
        let _ = tokio::time::timeout(max_wait, self.published.notified()).await;
    }

    fn backend_type(&self) -> QueueBackend {
        QueueBackend::Memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUEUE: &str = "images";

    async fn channel() -> MemoryChannel {
        let channel = MemoryChannel::new();
        channel.connect(QUEUE).await.unwrap();
        channel
    }

    #[tokio::test]
    async fn publish_then_receive_in_order() {
        let channel = channel().await;
        channel.publish(QUEUE, b"a").await.unwrap();
        channel.publish(QUEUE, b"b").await.unwrap();

        let first = channel.receive(QUEUE).await.unwrap().unwrap();
        let second = channel.receive(QUEUE).await.unwrap().unwrap();
        assert_eq!(first.payload, Bytes::from_static(b"a"));
        assert_eq!(second.payload, Bytes::from_static(b"b"));
        assert_eq!(first.delivery_count, 1);
        assert!(channel.receive(QUEUE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let channel = channel().await;
        channel.publish(QUEUE, b"kept").await.unwrap();
        channel.connect(QUEUE).await.unwrap();
        assert_eq!(channel.pending(QUEUE), 1);
    }

    #[tokio::test]
    async fn publish_to_undeclared_queue_fails() {
        let channel = MemoryChannel::new();
        assert!(matches!(
            channel.publish("nope", b"x").await,
            Err(QueueError::UnknownQueue(_))
        ));
    }

    #[tokio::test]
    async fn ack_removes_message() {
        let channel = channel().await;
        channel.publish(QUEUE, b"x").await.unwrap();
        let delivery = channel.receive(QUEUE).await.unwrap().unwrap();
        channel.ack(&delivery).await.unwrap();

        assert_eq!(channel.in_flight(QUEUE), 0);
        assert_eq!(channel.recover_unacked(QUEUE), 0);
        assert!(matches!(
            channel.ack(&delivery).await,
            Err(QueueError::UnknownDelivery(_))
        ));
    }

    #[tokio::test]
    async fn unacked_message_is_redelivered_after_disconnect() {
        let channel = channel().await;
        channel.publish(QUEUE, b"x").await.unwrap();
        let first = channel.receive(QUEUE).await.unwrap().unwrap();
        assert!(channel.receive(QUEUE).await.unwrap().is_none());

        assert_eq!(channel.recover_unacked(QUEUE), 1);
        let second = channel.receive(QUEUE).await.unwrap().unwrap();
        assert_eq!(second.payload, first.payload);
        assert_eq!(second.delivery_count, 2);
        assert_ne!(second.id, first.id);
    }

    #[tokio::test]
    async fn requeue_with_delay_hides_message_until_due() {
        let channel = channel().await;
        channel.publish(QUEUE, b"x").await.unwrap();
        let delivery = channel.receive(QUEUE).await.unwrap().unwrap();
        channel
            .requeue(&delivery, Duration::from_millis(30))
            .await
            .unwrap();

        assert!(channel.receive(QUEUE).await.unwrap().is_none());
        tokio::time::sleep(Duration::from_millis(40)).await;
        let again = channel.receive(QUEUE).await.unwrap().unwrap();
        assert_eq!(again.delivery_count, 2);
    }

    #[tokio::test]
    async fn dead_letter_records_reason() {
        let channel = channel().await;
        channel.publish(QUEUE, b"bad").await.unwrap();
        let delivery = channel.receive(QUEUE).await.unwrap().unwrap();
        channel
            .dead_letter(&delivery, "images.dead", "not an image")
            .await
            .unwrap();

        let dead = channel.dead_letters("images.dead");
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].reason, "not an image");
        assert_eq!(dead[0].source_queue, QUEUE);
        assert_eq!(channel.pending(QUEUE), 0);
    }

    #[tokio::test]
    async fn refused_connects_are_counted_down() {
        let channel = MemoryChannel::new();
        channel.refuse_next_connects(2);
        assert!(channel.connect(QUEUE).await.unwrap_err().is_connection_refused());
        assert!(channel.connect(QUEUE).await.unwrap_err().is_connection_refused());
        channel.connect(QUEUE).await.unwrap();
    }

    #[tokio::test]
    async fn wait_for_publish_wakes_on_publish() {
        let channel = std::sync::Arc::new(channel().await);
        let publisher = channel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            publisher.publish(QUEUE, b"x").await.unwrap();
        });

        let start = std::time::Instant::now();
        channel
            .wait_for_publish(QUEUE, Duration::from_secs(5))
            .await;
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(channel.receive(QUEUE).await.unwrap().is_some());
    }
}
