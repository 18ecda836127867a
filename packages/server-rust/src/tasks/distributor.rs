//! Request-side task producer.

use std::sync::Arc;

use accounts_core::tasks::{
    SendPasswordResetEmailPayload, SendVerifyEmailPayload, TASK_SEND_PASSWORD_RESET_EMAIL,
    TASK_SEND_VERIFY_EMAIL,
};
use accounts_core::{AppError, RequestContext, TaskOptions};
use serde::Serialize;
use tracing::debug;

use super::{Broker, TaskMessage};
use crate::security::now_millis;

/// Serializes payloads and submits them to the broker. Never waits for a
/// consumer.
#[derive(Clone)]
pub struct TaskDistributor {
    broker: Arc<dyn Broker>,
}

impl std::fmt::Debug for TaskDistributor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDistributor").finish_non_exhaustive()
    }
}

impl TaskDistributor {
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// Enqueues task `name` and returns its id.
    ///
    /// # Errors
    ///
    /// Returns an `Internal` [`AppError`] if the payload cannot be encoded or
    /// the broker rejects the task.
    pub async fn enqueue<P: Serialize + Sync>(
        &self,
        ctx: &RequestContext,
        name: &str,
        payload: &P,
        opts: TaskOptions,
    ) -> Result<String, AppError> {
        let location = "accounts.tasks.enqueue";
        let payload = serde_json::to_string(payload).map_err(|e| {
            AppError::internal(ctx, location, format!("failed to encode {name} payload"), e)
        })?;
        let msg = TaskMessage::new(name, payload, opts, now_millis());
        let id = msg.id.clone();
        let queue = msg.queue;
        self.broker
            .enqueue(msg)
            .await
            .map_err(|e| AppError::internal(ctx, location, format!("failed to enqueue {name}"), e))?;
        debug!(task = name, id = %id, queue = queue.as_str(), request_id = ctx.request_id(), "task enqueued");
        Ok(id)
    }

    /// # Errors
    ///
    /// See [`TaskDistributor::enqueue`].
    pub async fn send_verify_email(
        &self,
        ctx: &RequestContext,
        payload: &SendVerifyEmailPayload,
        opts: TaskOptions,
    ) -> Result<String, AppError> {
        self.enqueue(ctx, TASK_SEND_VERIFY_EMAIL, payload, opts).await
    }

    /// # Errors
    ///
    /// See [`TaskDistributor::enqueue`].
    pub async fn send_password_reset_email(
        &self,
        ctx: &RequestContext,
        payload: &SendPasswordResetEmailPayload,
        opts: TaskOptions,
    ) -> Result<String, AppError> {
        self.enqueue(ctx, TASK_SEND_PASSWORD_RESET_EMAIL, payload, opts).await
    }
}
