//! Store failure taxonomy.
//!
//! Every failure leaving the store is a [`DbError`]; raw driver errors never
//! cross that boundary.

use std::fmt;

/// Closed set of store failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbErrorKind {
    NotFound,
    UniqueViolation,
    ForeignKeyViolation,
    NotNullViolation,
    ConnectionException,
    InsufficientPrivilege,
    SerializationFailure,
    Internal,
}

impl DbErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::UniqueViolation => "unique_violation",
            Self::ForeignKeyViolation => "foreign_key_violation",
            Self::NotNullViolation => "not_null_violation",
            Self::ConnectionException => "connection_exception",
            Self::InsufficientPrivilege => "insufficient_privilege",
            Self::SerializationFailure => "serialization_failure",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for DbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified store failure.
#[derive(Debug, thiserror::Error)]
#[error("{path}: {kind}: {msg}")]
pub struct DbError {
    pub kind: DbErrorKind,
    /// Human-readable summary, e.g. the offending field for a violation.
    pub msg: String,
    /// Store operation that failed, e.g. `accounts.store.user_create`.
    pub path: String,
    /// Vendor detail text, if any.
    pub details: String,
    #[source]
    pub cause: Option<anyhow::Error>,
}

impl DbError {
    #[must_use]
    pub fn new(kind: DbErrorKind, path: &str, msg: impl Into<String>) -> Self {
        Self {
            kind,
            msg: msg.into(),
            path: path.to_string(),
            details: String::new(),
            cause: None,
        }
    }

    #[must_use]
    pub fn not_found(path: &str) -> Self {
        Self::new(DbErrorKind::NotFound, path, "no rows in result set")
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    #[must_use]
    pub fn with_cause(mut self, cause: impl Into<anyhow::Error>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    #[must_use]
    pub fn is(&self, kind: DbErrorKind) -> bool {
        self.kind == kind
    }
}
