//! Background task names, queue tiers and payloads.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::ContextSnapshot;

pub const TASK_SEND_VERIFY_EMAIL: &str = "send_verify_email";
pub const TASK_SEND_PASSWORD_RESET_EMAIL: &str = "send_password_reset_email";

/// Queue tier. Consumers poll tiers in proportion to [`QueuePriority::weight`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueuePriority {
    Critical,
    #[default]
    Default,
    Low,
}

impl QueuePriority {
    pub const ALL: [Self; 3] = [Self::Critical, Self::Default, Self::Low];

    #[must_use]
    pub fn weight(self) -> u32 {
        match self {
            Self::Critical => 6,
            Self::Default => 3,
            Self::Low => 1,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Default => "default",
            Self::Low => "low",
        }
    }
}

/// Delivery options supplied at enqueue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskOptions {
    /// Total delivery attempts before the task is dead-lettered.
    pub max_retry: u32,
    /// Delay before the first delivery.
    pub process_in: Duration,
    pub priority: QueuePriority,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            max_retry: 25,
            process_in: Duration::ZERO,
            priority: QueuePriority::Default,
        }
    }
}

impl TaskOptions {
    #[must_use]
    pub fn max_retry(mut self, n: u32) -> Self {
        self.max_retry = n;
        self
    }

    #[must_use]
    pub fn process_in(mut self, delay: Duration) -> Self {
        self.process_in = delay;
        self
    }

    #[must_use]
    pub fn priority(mut self, priority: QueuePriority) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendVerifyEmailPayload {
    pub ctx: ContextSnapshot,
    pub email: String,
    pub token: String,
    pub token_id: String,
    /// Token lifetime, shown in the email.
    pub hours: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendPasswordResetEmailPayload {
    pub ctx: ContextSnapshot,
    pub email: String,
    pub token: String,
    pub token_id: String,
    pub hours: u32,
}
