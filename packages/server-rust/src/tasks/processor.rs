//! Worker pool that delivers queued tasks to their handlers.
//!
//! Each worker picks a tier by weighted draw (critical 6, default 3, low 1),
//! falls through the remaining tiers when the drawn one is empty, and sleeps
//! on the broker's notifier or the poll interval when every tier is empty.
//! A failed delivery is retried with exponential backoff until the task's
//! attempt budget is spent, then dead-lettered.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use accounts_core::{ContextSnapshot, QueuePriority, RequestContext, TranslationStore, Translator};
use async_trait::async_trait;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{Broker, BrokerError, TaskMessage};
use crate::security::now_millis;

// ---------------------------------------------------------------------------
// Handler traits
// ---------------------------------------------------------------------------

/// Executes one task type. Handlers must be idempotent: a task may be
/// delivered more than once.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// `payload` is the JSON document given at enqueue time.
    async fn handle(&self, ctx: &RequestContext, payload: &str) -> anyhow::Result<()>;
}

/// Observes every failed delivery, before the retry decision.
pub trait TaskErrorHandler: Send + Sync {
    fn handle_error(&self, ctx: &RequestContext, msg: &TaskMessage, err: &anyhow::Error);
}

/// Logs failed deliveries.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorHandler;

impl TaskErrorHandler for LogErrorHandler {
    fn handle_error(&self, ctx: &RequestContext, msg: &TaskMessage, err: &anyhow::Error) {
        warn!(
            task = %msg.name,
            id = %msg.id,
            attempt = msg.retried + 1,
            max_retry = msg.max_retry,
            request_id = ctx.request_id(),
            error = format!("{err:#}"),
            "task delivery failed"
        );
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Number of worker tasks.
    pub concurrency: usize,
    /// Longest a worker sleeps when every tier is empty.
    pub poll_interval: Duration,
    /// Delay before the first retry; doubled on each later one.
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            poll_interval: Duration::from_millis(200),
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(600),
        }
    }
}

impl ProcessorConfig {
    /// Delay before the retry that follows failure number `failures` (1-based).
    #[must_use]
    pub fn backoff(&self, failures: u32) -> Duration {
        let shift = failures.saturating_sub(1).min(31);
        self.base_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }
}

/// Tier visiting order for one poll: a weighted draw without replacement.
pub(crate) fn tier_order(rng: &mut impl Rng) -> Vec<QueuePriority> {
    let mut remaining = QueuePriority::ALL.to_vec();
    let mut order = Vec::with_capacity(remaining.len());
    while !remaining.is_empty() {
        let total: u32 = remaining.iter().map(|q| q.weight()).sum();
        let mut roll = rng.random_range(0..total);
        let mut pick = 0;
        for (i, q) in remaining.iter().enumerate() {
            if roll < q.weight() {
                pick = i;
                break;
            }
            roll -= q.weight();
        }
        order.push(remaining.remove(pick));
    }
    order
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Attempts at recording a delivery outcome before the worker gives up.
const SETTLE_ATTEMPTS: u32 = 5;

/// Broker transition that closes a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Ack,
    Retry,
    DeadLetter,
}

impl Settlement {
    fn as_str(self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Retry => "retry",
            Self::DeadLetter => "dead_letter",
        }
    }
}

struct Worker {
    broker: Arc<dyn Broker>,
    translations: Arc<TranslationStore>,
    config: ProcessorConfig,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    error_handler: Arc<dyn TaskErrorHandler>,
}

impl Worker {
    async fn run(self: Arc<Self>, index: usize, shutdown: CancellationToken) {
        debug!(worker = index, "task worker started");
        let notify = self.broker.notifier();
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.poll_once().await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => warn!(worker = index, error = %e, "task poll failed"),
            }

            tokio::select! {
                () = shutdown.cancelled() => break,
                () = &mut notified => {}
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
        debug!(worker = index, "task worker stopped");
    }

    /// Delivers at most one task. Returns whether one was found.
    async fn poll_once(&self) -> Result<bool, BrokerError> {
        let order = tier_order(&mut rand::rng());
        let now = now_millis();
        for queue in order {
            if let Some(msg) = self.broker.dequeue(queue, now).await? {
                self.deliver(msg).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn context_for(&self, msg: &TaskMessage) -> RequestContext {
        let snapshot = serde_json::from_str::<serde_json::Value>(&msg.payload)
            .ok()
            .and_then(|mut v| v.get_mut("ctx").map(serde_json::Value::take))
            .and_then(|v| serde_json::from_value::<ContextSnapshot>(v).ok())
            .unwrap_or_default();
        let translator: Arc<dyn Translator> = self.translations.current();
        RequestContext::from_snapshot(snapshot, translator)
    }

    async fn deliver(&self, mut msg: TaskMessage) -> Result<(), BrokerError> {
        let Some(handler) = self.handlers.get(&msg.name).cloned() else {
            error!(task = %msg.name, id = %msg.id, "no handler registered, task dead-lettered");
            msg.last_error = Some(format!("no handler registered for {}", msg.name));
            return self.settle(Settlement::DeadLetter, msg).await;
        };

        let ctx = Arc::new(self.context_for(&msg));
        let run = {
            let ctx = Arc::clone(&ctx);
            let payload = msg.payload.clone();
            tokio::spawn(async move { handler.handle(&ctx, &payload).await })
        };
        let result = match run.await {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("task handler panicked: {e}")),
        };

        match result {
            Ok(()) => {
                debug!(task = %msg.name, id = %msg.id, request_id = ctx.request_id(), "task delivered");
                self.settle(Settlement::Ack, msg).await
            }
            Err(err) => {
                self.error_handler.handle_error(&ctx, &msg, &err);
                let exhausted = msg.exhausted();
                msg.retried += 1;
                msg.last_error = Some(format!("{err:#}"));
                if exhausted {
                    error!(
                        task = %msg.name,
                        id = %msg.id,
                        attempts = msg.retried,
                        request_id = ctx.request_id(),
                        error = msg.last_error.as_deref().unwrap_or_default(),
                        "task exhausted its retries, dead-lettered"
                    );
                    self.settle(Settlement::DeadLetter, msg).await
                } else {
                    let delay = self.config.backoff(msg.retried);
                    let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
                    msg.process_at = now_millis().saturating_add(delay_ms);
                    self.settle(Settlement::Retry, msg).await
                }
            }
        }
    }

    /// Records the outcome of a delivery, retrying the broker call so the
    /// task does not stay in the active set after a transient failure.
    async fn settle(&self, settlement: Settlement, msg: TaskMessage) -> Result<(), BrokerError> {
        let mut attempt = 1;
        loop {
            let result = match settlement {
                Settlement::Ack => self.broker.ack(&msg.id).await,
                Settlement::Retry => self.broker.retry(msg.clone()).await,
                Settlement::DeadLetter => self.broker.dead_letter(msg.clone()).await,
            };
            match result {
                Ok(()) => return Ok(()),
                Err(e) if attempt < SETTLE_ATTEMPTS => {
                    warn!(
                        task = %msg.name,
                        id = %msg.id,
                        settlement = settlement.as_str(),
                        attempt,
                        error = %e,
                        "recording task outcome failed, retrying"
                    );
                    tokio::time::sleep(self.config.poll_interval.saturating_mul(attempt)).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        task = %msg.name,
                        id = %msg.id,
                        settlement = settlement.as_str(),
                        attempts = attempt,
                        error = %e,
                        "giving up on recording task outcome"
                    );
                    return Err(e);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// TaskProcessor
// ---------------------------------------------------------------------------

/// Owns the worker pool. Register handlers, then [`start`](Self::start).
pub struct TaskProcessor {
    broker: Arc<dyn Broker>,
    translations: Arc<TranslationStore>,
    config: ProcessorConfig,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    error_handler: Arc<dyn TaskErrorHandler>,
    shutdown: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl TaskProcessor {
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>, translations: Arc<TranslationStore>, config: ProcessorConfig) -> Self {
        Self {
            broker,
            translations,
            config,
            handlers: HashMap::new(),
            error_handler: Arc::new(LogErrorHandler),
            shutdown: CancellationToken::new(),
            workers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_error_handler(mut self, handler: Arc<dyn TaskErrorHandler>) -> Self {
        self.error_handler = handler;
        self
    }

    /// Binds `name` to `handler`. Takes effect at the next `start`.
    pub fn register(&mut self, name: &str, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(name.to_string(), handler);
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.workers.is_empty()
    }

    /// Spawns the workers. Calling it again while running is a no-op.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        self.shutdown = CancellationToken::new();
        let worker = Arc::new(Worker {
            broker: Arc::clone(&self.broker),
            translations: Arc::clone(&self.translations),
            config: self.config.clone(),
            handlers: self.handlers.clone(),
            error_handler: Arc::clone(&self.error_handler),
        });
        let concurrency = self.config.concurrency.max(1);
        self.workers = (0..concurrency)
            .map(|i| tokio::spawn(Arc::clone(&worker).run(i, self.shutdown.clone())))
            .collect();
        info!(concurrency, handlers = self.handlers.len(), "task processor started");
    }

    /// Stops polling and waits for in-flight deliveries to finish.
    pub async fn shutdown(&mut self) {
        self.shutdown.cancel();
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "task worker ended abnormally");
            }
        }
        info!("task processor stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
