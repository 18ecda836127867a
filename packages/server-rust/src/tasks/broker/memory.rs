use std::collections::HashMap;
use std::sync::Arc;

use accounts_core::QueuePriority;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{Broker, BrokerError};
use crate::tasks::TaskMessage;

#[derive(Debug, Default)]
struct State {
    /// Per tier, in enqueue order.
    pending: HashMap<QueuePriority, Vec<TaskMessage>>,
    active: HashMap<String, TaskMessage>,
    dead: Vec<TaskMessage>,
}

/// Process-local broker. Tasks do not survive a restart.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    state: Mutex<State>,
    notify: Arc<Notify>,
}

impl MemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn active_len(&self) -> usize {
        self.state.lock().active.len()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn enqueue(&self, msg: TaskMessage) -> Result<(), BrokerError> {
        self.state.lock().pending.entry(msg.queue).or_default().push(msg);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn dequeue(&self, queue: QueuePriority, now_ms: i64) -> Result<Option<TaskMessage>, BrokerError> {
        let mut state = self.state.lock();
        let Some(tier) = state.pending.get_mut(&queue) else {
            return Ok(None);
        };
        let next = tier
            .iter()
            .enumerate()
            .filter(|(_, m)| m.process_at <= now_ms)
            .min_by_key(|(_, m)| m.process_at)
            .map(|(i, _)| i);
        let Some(index) = next else {
            return Ok(None);
        };
        let msg = tier.remove(index);
        state.active.insert(msg.id.clone(), msg.clone());
        Ok(Some(msg))
    }

    async fn ack(&self, id: &str) -> Result<(), BrokerError> {
        self.state.lock().active.remove(id);
        Ok(())
    }

    async fn retry(&self, msg: TaskMessage) -> Result<(), BrokerError> {
        {
            let mut state = self.state.lock();
            state.active.remove(&msg.id);
            state.pending.entry(msg.queue).or_default().push(msg);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn dead_letter(&self, msg: TaskMessage) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        state.active.remove(&msg.id);
        state.dead.push(msg);
        Ok(())
    }

    async fn list_dead(&self) -> Result<Vec<TaskMessage>, BrokerError> {
        Ok(self.state.lock().dead.clone())
    }

    async fn pending_len(&self, queue: QueuePriority) -> Result<usize, BrokerError> {
        Ok(self.state.lock().pending.get(&queue).map_or(0, Vec::len))
    }

    fn notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }
}
