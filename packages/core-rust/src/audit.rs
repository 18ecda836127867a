//! Audit record of a single operation.
//!
//! The record is created when an operation starts and is emitted by the
//! server's audit guard once the operation finishes, whatever the outcome.

use serde::{Deserialize, Serialize};

use crate::context::RequestContext;
use crate::i18n::{ParamValue, Params};

pub const EVENT_SUPPLIER_CREATE: &str = "supplier_create";
pub const EVENT_CUSTOMER_CREATE: &str = "customer_create";
pub const EVENT_EMAIL_CONFIRMATION: &str = "email_confirmation";
pub const EVENT_PASSWORD_FORGOT: &str = "password_forgot";
pub const EVENT_LOGIN: &str = "login";
pub const EVENT_CUSTOMER_PROFILE_GET: &str = "customer_profile_get";
pub const EVENT_SUPPLIER_PROFILE_GET: &str = "supplier_profile_get";
pub const EVENT_DASHBOARD_GET: &str = "dashboard_get";

/// Outcome of an audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    #[default]
    Fail,
    Success,
    Attempt,
}

impl EventStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fail => "fail",
            Self::Success => "success",
            Self::Attempt => "attempt",
        }
    }
}

/// Who performed the operation, captured when the record is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditActor {
    pub user_id: String,
    pub session_id: String,
    pub ip_address: String,
    pub client: String,
    pub forwarded_for: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditEventData {
    pub parameters: Params,
    pub prior_state: Params,
    pub result_state: Params,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub event_name: String,
    pub status: EventStatus,
    pub actor: AuditActor,
    pub path: String,
    pub request_id: String,
    pub event_data: AuditEventData,
}

impl AuditRecord {
    /// Starts a record for `event`, snapshotting the actor from `ctx`.
    #[must_use]
    pub fn new(ctx: &RequestContext, event: &str, status: EventStatus) -> Self {
        let (user_id, session_id) = ctx
            .session()
            .map(|s| (s.user_id.clone(), s.id.clone()))
            .unwrap_or_default();
        Self {
            event_name: event.to_string(),
            status,
            actor: AuditActor {
                user_id,
                session_id,
                ip_address: ctx.ip_address().to_string(),
                client: ctx.user_agent().to_string(),
                forwarded_for: ctx.forwarded_for().to_string(),
            },
            path: ctx.path().to_string(),
            request_id: ctx.request_id().to_string(),
            event_data: AuditEventData::default(),
        }
    }

    pub fn set_parameter(&mut self, key: &str, value: impl Into<ParamValue>) {
        self.event_data
            .parameters
            .insert(key.to_string(), value.into());
    }

    pub fn set_prior_state(&mut self, state: Params) {
        self.event_data.prior_state = state;
    }

    pub fn set_result_state(&mut self, state: Params) {
        self.event_data.result_state = state;
    }

    /// Marks the operation successful. Calling it again changes nothing.
    pub fn success(&mut self) {
        self.status = EventStatus::Success;
    }

    pub fn fail(&mut self) {
        self.status = EventStatus::Fail;
    }
}
