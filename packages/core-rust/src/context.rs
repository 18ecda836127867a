//! Request-scoped execution context.
//!
//! A [`RequestContext`] is built once per inbound call and never mutated.
//! Narrowing the deadline produces a new value. Background tasks carry a
//! serializable [`ContextSnapshot`] instead and rebuild a fresh context on the
//! consumer side.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::i18n::{Params, TranslationTable, Translator};

/// Authenticated session attached to a call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub token: String,
    /// Epoch milliseconds.
    pub created_at: i64,
    /// Epoch milliseconds.
    pub expires_at: i64,
    /// Epoch milliseconds.
    pub last_activity_at: i64,
    pub user_id: String,
    pub device_id: String,
    /// Space-separated role names.
    pub roles: String,
    pub is_oauth: bool,
    pub props: BTreeMap<String, String>,
}

impl Session {
    #[must_use]
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at > 0 && self.expires_at < now_ms
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.split_whitespace().any(|r| r == role)
    }
}

/// Serializable part of a [`RequestContext`].
///
/// Has no cancellation handle or deadline; those belong to a live call only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    #[serde(default)]
    pub session: Option<Session>,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub forwarded_for: String,
    #[serde(default)]
    pub user_agent: String,
    /// Already resolved to a supported locale.
    #[serde(default)]
    pub accept_language: String,
    #[serde(default)]
    pub server_name: String,
    #[serde(default)]
    pub path: String,
}

/// Immutable per-call context: identity, locale, deadline and cancellation.
#[derive(Clone)]
pub struct RequestContext {
    data: ContextSnapshot,
    cancel: CancellationToken,
    deadline: Option<Instant>,
    translator: Arc<dyn Translator>,
}

impl RequestContext {
    /// Builds a live context with a fresh cancellation handle and no deadline.
    #[must_use]
    pub fn new(data: ContextSnapshot, translator: Arc<dyn Translator>) -> Self {
        Self {
            data,
            cancel: CancellationToken::new(),
            deadline: None,
            translator,
        }
    }

    /// Rebuilds a context from a snapshot carried by a background task.
    ///
    /// The result never inherits the producer's deadline or cancellation.
    #[must_use]
    pub fn from_snapshot(snapshot: ContextSnapshot, translator: Arc<dyn Translator>) -> Self {
        Self::new(snapshot, translator)
    }

    /// Serializable copy for task payloads. The session token is left out.
    #[must_use]
    pub fn snapshot(&self) -> ContextSnapshot {
        let mut data = self.data.clone();
        if let Some(session) = data.session.as_mut() {
            session.token.clear();
        }
        data
    }

    /// Copy whose deadline is the earlier of the current one and `deadline`.
    ///
    /// Cancelling `self` also cancels the copy.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        };
        Self {
            data: self.data.clone(),
            cancel: self.cancel.child_token(),
            deadline: Some(deadline),
            translator: Arc::clone(&self.translator),
        }
    }

    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline. `None` means unbounded.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Renders `id` in this call's locale, falling back to `id` itself.
    #[must_use]
    pub fn translate(&self, id: &str, params: &Params) -> String {
        match self
            .translator
            .translate(&self.data.accept_language, id, params)
        {
            Ok(text) if !text.is_empty() => text,
            _ => id.to_string(),
        }
    }

    #[must_use]
    pub fn translator(&self) -> &Arc<dyn Translator> {
        &self.translator
    }

    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.data.session.as_ref()
    }

    /// Session user, or empty when the call is anonymous.
    #[must_use]
    pub fn user_id(&self) -> &str {
        self.data.session.as_ref().map_or("", |s| s.user_id.as_str())
    }

    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.data.request_id
    }

    #[must_use]
    pub fn ip_address(&self) -> &str {
        &self.data.ip_address
    }

    #[must_use]
    pub fn forwarded_for(&self) -> &str {
        &self.data.forwarded_for
    }

    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.data.user_agent
    }

    #[must_use]
    pub fn accept_language(&self) -> &str {
        &self.data.accept_language
    }

    #[must_use]
    pub fn server_name(&self) -> &str {
        &self.data.server_name
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.data.path
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(
            ContextSnapshot::default(),
            Arc::new(TranslationTable::empty("en")),
        )
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.data.request_id)
            .field("user_id", &self.user_id())
            .field("accept_language", &self.data.accept_language)
            .field("path", &self.data.path)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}
