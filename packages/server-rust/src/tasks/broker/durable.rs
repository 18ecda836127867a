//! `redb`-backed broker. Tasks survive restarts; tasks that were active when
//! the process stopped are put back to pending on open.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use accounts_core::QueuePriority;
use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use tokio::sync::Notify;

use super::{Broker, BrokerError};
use crate::tasks::TaskMessage;

/// Pending tasks. Key: `{queue}/{process_at:020}/{seq:020}/{id}`.
const PENDING: TableDefinition<'static, &'static str, &'static [u8]> = TableDefinition::new("pending");
/// Tasks being delivered. Key: task id.
const ACTIVE: TableDefinition<'static, &'static str, &'static [u8]> = TableDefinition::new("active");
/// Exhausted tasks. Key: task id.
const DEAD: TableDefinition<'static, &'static str, &'static [u8]> = TableDefinition::new("dead");

fn storage(err: impl Into<redb::Error>) -> BrokerError {
    BrokerError::Storage(anyhow::Error::new(err.into()))
}

fn pending_key(msg: &TaskMessage, seq: u64) -> String {
    format!(
        "{}/{:020}/{seq:020}/{}",
        msg.queue.as_str(),
        msg.process_at.max(0),
        msg.id
    )
}

/// Lexicographic bounds of one tier; `0` sorts right after `/`.
fn tier_range(queue: QueuePriority) -> (String, String) {
    (format!("{}/", queue.as_str()), format!("{}0", queue.as_str()))
}

#[derive(Debug)]
pub struct RedbBroker {
    db: Arc<Database>,
    seq: Arc<AtomicU64>,
    notify: Arc<Notify>,
}

impl RedbBroker {
    /// Opens or creates the queue file at `path`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened or the recovery pass fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BrokerError> {
        let db = Database::create(path.as_ref()).map_err(storage)?;
        let broker = Self {
            db: Arc::new(db),
            seq: Arc::new(AtomicU64::new(0)),
            notify: Arc::new(Notify::new()),
        };
        broker.recover()?;
        Ok(broker)
    }

    /// Creates the tables and requeues anything left active.
    fn recover(&self) -> Result<(), BrokerError> {
        let txn = self.db.begin_write().map_err(storage)?;
        let mut requeued = 0u64;
        {
            let mut pending = txn.open_table(PENDING).map_err(storage)?;
            let mut active = txn.open_table(ACTIVE).map_err(storage)?;
            txn.open_table(DEAD).map_err(storage)?;

            let mut stale = Vec::new();
            for entry in active.iter().map_err(storage)? {
                let (key, value) = entry.map_err(storage)?;
                stale.push((key.value().to_string(), serde_json::from_slice::<TaskMessage>(value.value())?));
            }
            for (id, msg) in stale {
                active.remove(id.as_str()).map_err(storage)?;
                let key = pending_key(&msg, self.seq.fetch_add(1, Ordering::SeqCst));
                pending
                    .insert(key.as_str(), serde_json::to_vec(&msg)?.as_slice())
                    .map_err(storage)?;
                requeued += 1;
            }
        }
        txn.commit().map_err(storage)?;
        if requeued > 0 {
            tracing::info!(requeued, "requeued tasks left active by a previous run");
        }
        Ok(())
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, BrokerError>
    where
        T: Send + 'static,
        F: FnOnce(&Database, &AtomicU64) -> Result<T, BrokerError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let seq = Arc::clone(&self.seq);
        tokio::task::spawn_blocking(move || f(&db, &seq))
            .await
            .map_err(|e| BrokerError::Storage(anyhow::Error::new(e)))?
    }
}

fn put_pending(db: &Database, seq: &AtomicU64, msg: &TaskMessage, from_active: bool) -> Result<(), BrokerError> {
    let bytes = serde_json::to_vec(msg)?;
    let key = pending_key(msg, seq.fetch_add(1, Ordering::SeqCst));
    let txn = db.begin_write().map_err(storage)?;
    {
        if from_active {
            let mut active = txn.open_table(ACTIVE).map_err(storage)?;
            active.remove(msg.id.as_str()).map_err(storage)?;
        }
        let mut pending = txn.open_table(PENDING).map_err(storage)?;
        pending.insert(key.as_str(), bytes.as_slice()).map_err(storage)?;
    }
    txn.commit().map_err(storage)
}

#[async_trait]
impl Broker for RedbBroker {
    async fn enqueue(&self, msg: TaskMessage) -> Result<(), BrokerError> {
        self.blocking(move |db, seq| put_pending(db, seq, &msg, false))
            .await?;
        self.notify.notify_waiters();
        Ok(())
    }

    async fn dequeue(&self, queue: QueuePriority, now_ms: i64) -> Result<Option<TaskMessage>, BrokerError> {
        self.blocking(move |db, _| {
            let (start, end) = tier_range(queue);
            let txn = db.begin_write().map_err(storage)?;
            let taken = {
                let mut pending = txn.open_table(PENDING).map_err(storage)?;
                let first = {
                    let mut range = pending.range(start.as_str()..end.as_str()).map_err(storage)?;
                    match range.next() {
                        Some(entry) => {
                            let (key, value) = entry.map_err(storage)?;
                            let msg: TaskMessage = serde_json::from_slice(value.value())?;
                            Some((key.value().to_string(), msg))
                        }
                        None => None,
                    }
                };
                match first {
                    Some((key, msg)) if msg.process_at <= now_ms => {
                        pending.remove(key.as_str()).map_err(storage)?;
                        let mut active = txn.open_table(ACTIVE).map_err(storage)?;
                        active
                            .insert(msg.id.as_str(), serde_json::to_vec(&msg)?.as_slice())
                            .map_err(storage)?;
                        Some(msg)
                    }
                    _ => None,
                }
            };
            if taken.is_some() {
                txn.commit().map_err(storage)?;
            } else {
                txn.abort().map_err(storage)?;
            }
            Ok(taken)
        })
        .await
    }

    async fn ack(&self, id: &str) -> Result<(), BrokerError> {
        let id = id.to_string();
        self.blocking(move |db, _| {
            let txn = db.begin_write().map_err(storage)?;
            {
                let mut active = txn.open_table(ACTIVE).map_err(storage)?;
                active.remove(id.as_str()).map_err(storage)?;
            }
            txn.commit().map_err(storage)
        })
        .await
    }

    async fn retry(&self, msg: TaskMessage) -> Result<(), BrokerError> {
        self.blocking(move |db, seq| put_pending(db, seq, &msg, true))
            .await?;
        self.notify.notify_waiters();
        Ok(())
    }

    async fn dead_letter(&self, msg: TaskMessage) -> Result<(), BrokerError> {
        self.blocking(move |db, _| {
            let bytes = serde_json::to_vec(&msg)?;
            let txn = db.begin_write().map_err(storage)?;
            {
                let mut active = txn.open_table(ACTIVE).map_err(storage)?;
                active.remove(msg.id.as_str()).map_err(storage)?;
                let mut dead = txn.open_table(DEAD).map_err(storage)?;
                dead.insert(msg.id.as_str(), bytes.as_slice()).map_err(storage)?;
            }
            txn.commit().map_err(storage)
        })
        .await
    }

    async fn list_dead(&self) -> Result<Vec<TaskMessage>, BrokerError> {
        self.blocking(|db, _| {
            let txn = db.begin_read().map_err(storage)?;
            let dead = txn.open_table(DEAD).map_err(storage)?;
            let mut out = Vec::new();
            for entry in dead.iter().map_err(storage)? {
                let (_, value) = entry.map_err(storage)?;
                out.push(serde_json::from_slice(value.value())?);
            }
            Ok(out)
        })
        .await
    }

    async fn pending_len(&self, queue: QueuePriority) -> Result<usize, BrokerError> {
        self.blocking(move |db, _| {
            let (start, end) = tier_range(queue);
            let txn = db.begin_read().map_err(storage)?;
            let pending = txn.open_table(PENDING).map_err(storage)?;
            let range = pending.range(start.as_str()..end.as_str()).map_err(storage)?;
            Ok(range.count())
        })
        .await
    }

    fn notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }
}
