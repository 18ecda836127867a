//! Task storage.
//!
//! A task is `pending` until a worker takes it, `active` while it is being
//! delivered, and is then acked (removed), put back to `pending` for a retry,
//! or moved to the dead-letter set.

mod memory;
#[cfg(feature = "redb")]
mod durable;

use std::sync::Arc;

use accounts_core::QueuePriority;
use async_trait::async_trait;
use tokio::sync::Notify;

pub use self::memory::MemoryBroker;
#[cfg(feature = "redb")]
pub use self::durable::RedbBroker;
use super::TaskMessage;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("queue storage failure: {0:#}")]
    Storage(#[source] anyhow::Error),
    #[error("queue codec failure: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Durable task queue with three priority tiers.
///
/// Used as `Arc<dyn Broker>`.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Stores a new pending task and wakes idle workers.
    async fn enqueue(&self, msg: TaskMessage) -> Result<(), BrokerError>;

    /// Moves the earliest due task of `queue` to the active set.
    async fn dequeue(&self, queue: QueuePriority, now_ms: i64) -> Result<Option<TaskMessage>, BrokerError>;

    /// Removes a delivered task. Unknown ids are ignored.
    async fn ack(&self, id: &str) -> Result<(), BrokerError>;

    /// Puts an active task back to pending, due at `msg.process_at`.
    async fn retry(&self, msg: TaskMessage) -> Result<(), BrokerError>;

    /// Moves an active task to the dead-letter set.
    async fn dead_letter(&self, msg: TaskMessage) -> Result<(), BrokerError>;

    async fn list_dead(&self) -> Result<Vec<TaskMessage>, BrokerError>;

    /// Number of pending tasks in `queue`, due or not.
    async fn pending_len(&self, queue: QueuePriority) -> Result<usize, BrokerError>;

    /// Signalled whenever new work is enqueued.
    fn notifier(&self) -> Arc<Notify>;
}
