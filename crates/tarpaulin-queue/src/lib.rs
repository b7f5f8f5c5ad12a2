//! Tarpaulin Queue Library
//!
//! Durable, at-least-once work queue connecting the ingest API (producer) to the
//! resize worker (consumer).
//!
//! A consumer receives a [`Delivery`], processes it and settles it exactly once:
//! [`MessageChannel::ack`] on success, [`MessageChannel::requeue`] for a later
//! retry or [`MessageChannel::dead_letter`] when the message can never succeed.
//! A delivery that is never settled (consumer crash, lost connection) becomes
//! visible again and is redelivered with an incremented `delivery_count`.

pub mod channel;
pub mod consumer;
pub mod error;
pub mod factory;
pub mod memory;
#[cfg(feature = "queue-postgres")]
pub mod postgres;
pub mod retry;

pub use channel::{Delivery, MessageChannel};
pub use consumer::{
    settle_policy, Consumer, ConsumerConfig, ConsumerStats, MessageHandler, ProcessOutcome,
    Settlement,
};
pub use error::{QueueError, QueueResult};
pub use factory::create_channel;
pub use memory::{DeadLetter, MemoryChannel};
#[cfg(feature = "queue-postgres")]
pub use postgres::PgChannel;
pub use retry::{compute_retry_backoff, connect_with_retry, Backoff, RetryPolicy};
pub use tarpaulin_core::QueueBackend;
