//! Durable, priority-tiered background tasks.
//!
//! - [`broker`]: task storage (pending, active, dead-letter)
//! - [`distributor`]: request-side producer
//! - [`processor`]: worker pool that delivers tasks to handlers
//! - [`handlers`]: email side effects

pub mod broker;
pub mod distributor;
pub mod handlers;
pub mod processor;

use accounts_core::{QueuePriority, TaskOptions};
use serde::{Deserialize, Serialize};

pub use broker::{Broker, BrokerError, MemoryBroker};
#[cfg(feature = "redb")]
pub use broker::RedbBroker;
pub use distributor::TaskDistributor;
pub use handlers::{SendPasswordResetEmailHandler, SendVerifyEmailHandler};
pub use processor::{LogErrorHandler, ProcessorConfig, TaskErrorHandler, TaskHandler, TaskProcessor};

/// A task as stored by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub id: String,
    pub name: String,
    /// JSON document handed unchanged to the handler.
    pub payload: String,
    pub queue: QueuePriority,
    /// Total delivery attempts allowed.
    pub max_retry: u32,
    /// Failed deliveries so far.
    pub retried: u32,
    /// Earliest delivery time, epoch milliseconds.
    pub process_at: i64,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl TaskMessage {
    #[must_use]
    pub fn new(name: &str, payload: String, opts: TaskOptions, now_ms: i64) -> Self {
        let delay = i64::try_from(opts.process_in.as_millis()).unwrap_or(i64::MAX);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            payload,
            queue: opts.priority,
            max_retry: opts.max_retry.max(1),
            retried: 0,
            process_at: now_ms.saturating_add(delay),
            last_error: None,
        }
    }

    /// True once the delivery that just failed was the last one allowed.
    #[must_use]
    pub fn exhausted(&self) -> bool {
        self.retried + 1 >= self.max_retry
    }
}
