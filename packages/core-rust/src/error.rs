//! Structured, localizable error values.
//!
//! [`AppError`] is the internal error: it carries the call site, the server-only
//! diagnostic and the wrapped cause. [`WireError`] is the flat projection that
//! is allowed to leave the process. The only way from one to the other is
//! [`AppError::to_wire`] / [`AppError::into_wire`], so diagnostics cannot reach a
//! client by accident.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::context::RequestContext;
use crate::i18n::Params;

/// Upper bound on the rendered length of an [`AppError`], in bytes.
pub const MAX_ERROR_LENGTH: usize = 1024;

/// Marker message for errors that were intentionally left untranslated.
pub const NO_TRANSLATION: &str = "<untranslated>";

/// Translation key of the generic internal error.
pub const ERR_MSG_INTERNAL: &str = "server.internal.error";

/// Translation key used by [`AppError::empty`].
pub const ERR_MSG_UNKNOWN: &str = "error.unknown";

/// Field name → localized message.
pub type FieldErrors = BTreeMap<String, String>;

/// Field name → (sub-field → localized message), for nested request structures.
pub type NestedFieldErrors = BTreeMap<String, BTreeMap<String, String>>;

// ---------------------------------------------------------------------------
// Code
// ---------------------------------------------------------------------------

/// RPC status code space. Numeric values follow the gRPC status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum Code {
    Ok,
    Canceled,
    #[default]
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl Code {
    /// Translation key of the generic, user-safe message for this code.
    ///
    /// `Ok` has no message of its own and maps to `error.unknown`.
    #[must_use]
    pub fn translation_id(self) -> &'static str {
        match self {
            Self::Canceled => "error.canceled",
            Self::InvalidArgument => "error.invalid_argument",
            Self::DeadlineExceeded => "error.deadline_exceeded",
            Self::NotFound => "error.not_found",
            Self::AlreadyExists => "error.already_exists",
            Self::PermissionDenied => "error.permission_denied",
            Self::ResourceExhausted => "error.resource_exhausted",
            Self::FailedPrecondition => "error.failed_precondition",
            Self::Aborted => "error.aborted",
            Self::OutOfRange => "error.out_of_range",
            Self::Unimplemented => "error.unimplemented",
            Self::Internal => "error.internal",
            Self::Unavailable => "error.unavailable",
            Self::DataLoss => "error.data_loss",
            Self::Unauthenticated => "error.unauthenticated",
            Self::Ok | Self::Unknown => "error.unknown",
        }
    }

    /// HTTP status used when this code is carried over an HTTP transport.
    #[must_use]
    pub fn http_status(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::InvalidArgument | Self::FailedPrecondition | Self::OutOfRange => 400,
            Self::Unauthenticated => 401,
            Self::PermissionDenied => 403,
            Self::NotFound => 404,
            Self::AlreadyExists | Self::Aborted => 409,
            Self::ResourceExhausted => 429,
            Self::Canceled => 499,
            Self::Unimplemented => 501,
            Self::Unavailable => 503,
            Self::DeadlineExceeded => 504,
            Self::Unknown | Self::Internal | Self::DataLoss => 500,
        }
    }
}

impl From<i32> for Code {
    fn from(value: i32) -> Self {
        match value {
            0 => Self::Ok,
            1 => Self::Canceled,
            3 => Self::InvalidArgument,
            4 => Self::DeadlineExceeded,
            5 => Self::NotFound,
            6 => Self::AlreadyExists,
            7 => Self::PermissionDenied,
            8 => Self::ResourceExhausted,
            9 => Self::FailedPrecondition,
            10 => Self::Aborted,
            11 => Self::OutOfRange,
            12 => Self::Unimplemented,
            13 => Self::Internal,
            14 => Self::Unavailable,
            15 => Self::DataLoss,
            16 => Self::Unauthenticated,
            _ => Self::Unknown,
        }
    }
}

impl From<Code> for i32 {
    fn from(code: Code) -> Self {
        match code {
            Code::Ok => 0,
            Code::Canceled => 1,
            Code::Unknown => 2,
            Code::InvalidArgument => 3,
            Code::DeadlineExceeded => 4,
            Code::NotFound => 5,
            Code::AlreadyExists => 6,
            Code::PermissionDenied => 7,
            Code::ResourceExhausted => 8,
            Code::FailedPrecondition => 9,
            Code::Aborted => 10,
            Code::OutOfRange => 11,
            Code::Unimplemented => 12,
            Code::Internal => 13,
            Code::Unavailable => 14,
            Code::DataLoss => 15,
            Code::Unauthenticated => 16,
        }
    }
}

// ---------------------------------------------------------------------------
// WireError
// ---------------------------------------------------------------------------

/// Boundary-safe error: the only error shape serialized into responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub id: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_id: String,
    pub status_code: Code,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: FieldErrors,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors_nested: NestedFieldErrors,
    #[serde(default)]
    pub skip_translation: bool,
}

// ---------------------------------------------------------------------------
// AppError
// ---------------------------------------------------------------------------

/// Internal application error.
///
/// `message` is resolved once, at construction, from `id` in the caller's
/// locale. Nothing downstream re-translates it.
#[derive(Debug, Default)]
pub struct AppError {
    /// Call site, e.g. `accounts.domain.login`.
    pub location: String,
    /// Stable machine key; also the translation key.
    pub id: String,
    /// Localized, user-facing text.
    pub message: String,
    /// Server-only diagnostic.
    pub detailed_error: String,
    pub request_id: String,
    pub status_code: Code,
    pub errors: FieldErrors,
    pub errors_nested: NestedFieldErrors,
    pub skip_translation: bool,
    /// Server-only wrapped cause.
    pub cause: Option<anyhow::Error>,
}

impl AppError {
    /// Builds an error and resolves its message in the context's locale.
    ///
    /// A missing translation falls back to `id`; construction never fails.
    #[must_use]
    pub fn new(
        ctx: &RequestContext,
        location: &str,
        id: &str,
        params: &Params,
        detail: impl Into<String>,
        status: Code,
    ) -> Self {
        Self {
            location: location.to_string(),
            id: id.to_string(),
            message: ctx.translate(id, params),
            detailed_error: detail.into(),
            request_id: ctx.request_id().to_string(),
            status_code: status,
            ..Self::default()
        }
    }

    /// Builds an error whose message is the raw `id` and is never translated.
    #[must_use]
    pub fn untranslated(location: &str, id: &str, detail: impl Into<String>, status: Code) -> Self {
        Self {
            location: location.to_string(),
            id: id.to_string(),
            message: id.to_string(),
            detailed_error: detail.into(),
            status_code: status,
            skip_translation: true,
            ..Self::default()
        }
    }

    /// Shorthand for the generic internal error wrapping `cause`.
    #[must_use]
    pub fn internal(
        ctx: &RequestContext,
        location: &str,
        detail: impl Into<String>,
        cause: impl Into<anyhow::Error>,
    ) -> Self {
        Self::new(ctx, location, ERR_MSG_INTERNAL, &Params::new(), detail, Code::Internal)
            .wrap(cause)
    }

    /// The well-known value used when no error was actually received.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            id: ERR_MSG_UNKNOWN.to_string(),
            message: ERR_MSG_UNKNOWN.to_string(),
            status_code: Code::Unknown,
            ..Self::default()
        }
    }

    /// Attaches the underlying cause.
    #[must_use]
    pub fn wrap(mut self, cause: impl Into<anyhow::Error>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Adds a localized message for a single request field.
    #[must_use]
    pub fn with_field_error(
        mut self,
        ctx: &RequestContext,
        field: &str,
        id: &str,
        params: &Params,
    ) -> Self {
        self.errors
            .insert(field.to_string(), ctx.translate(id, params));
        self
    }

    /// Adds a localized message for a field inside a nested request structure.
    #[must_use]
    pub fn with_nested_field_error(
        mut self,
        ctx: &RequestContext,
        field: &str,
        sub_field: &str,
        id: &str,
        params: &Params,
    ) -> Self {
        self.errors_nested
            .entry(field.to_string())
            .or_default()
            .insert(sub_field.to_string(), ctx.translate(id, params));
        self
    }

    /// Drops the server-only diagnostic and cause.
    pub fn wipe_detailed(&mut self) {
        self.detailed_error.clear();
        self.cause = None;
    }

    /// Boundary-safe copy.
    #[must_use]
    pub fn to_wire(&self) -> WireError {
        WireError {
            id: self.id.clone(),
            message: self.message.clone(),
            request_id: self.request_id.clone(),
            status_code: self.status_code,
            errors: self.errors.clone(),
            errors_nested: self.errors_nested.clone(),
            skip_translation: self.skip_translation,
        }
    }

    /// Consuming variant of [`AppError::to_wire`].
    #[must_use]
    pub fn into_wire(self) -> WireError {
        WireError {
            id: self.id,
            message: self.message,
            request_id: self.request_id,
            status_code: self.status_code,
            errors: self.errors,
            errors_nested: self.errors_nested,
            skip_translation: self.skip_translation,
        }
    }

    /// Rebuilds a local error from one received over the wire.
    ///
    /// `None` yields [`AppError::empty`].
    #[must_use]
    pub fn from_wire(wire: Option<&WireError>) -> Self {
        let Some(wire) = wire else {
            return Self::empty();
        };
        Self {
            id: wire.id.clone(),
            message: wire.message.clone(),
            request_id: wire.request_id.clone(),
            status_code: wire.status_code,
            errors: wire.errors.clone(),
            errors_nested: wire.errors_nested.clone(),
            skip_translation: wire.skip_translation,
            ..Self::default()
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        if !self.location.is_empty() {
            out.push_str(&self.location);
            out.push_str(": ");
        }
        let has_message = self.message != NO_TRANSLATION;
        if has_message {
            out.push_str(&self.message);
        }
        if !self.detailed_error.is_empty() {
            if has_message {
                out.push_str(", ");
            }
            out.push_str(&self.detailed_error);
        }
        if let Some(cause) = &self.cause {
            out.push_str(", ");
            out.push_str(&cause.to_string());
        }
        f.write_str(&truncate(&out, MAX_ERROR_LENGTH))
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|c| c as &(dyn std::error::Error + 'static))
    }
}

impl From<AppError> for WireError {
    fn from(err: AppError) -> Self {
        err.into_wire()
    }
}

/// Cuts `s` to at most `max` bytes on a char boundary, appending `...` when cut.
fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
