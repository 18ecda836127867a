//! Maps driver failures onto [`DbErrorKind`].
//!
//! Drivers are seen through [`VendorFailure`], so the mapping itself is
//! driver-agnostic and testable without a database.

use std::sync::LazyLock;

use accounts_core::{DbError, DbErrorKind};
use async_trait::async_trait;
use regex::Regex;
use tracing::warn;

static NOT_NULL_COLUMN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"column "(.+?)""#).expect("valid column regex"));

/// What the classifier needs to know about a driver failure.
pub trait VendorFailure: std::error::Error + Send + Sync + 'static {
    /// Five-character SQLSTATE, when the failure came from the server.
    fn sqlstate(&self) -> Option<String>;
    /// Primary server message, e.g. `null value in column "email" ...`.
    fn server_message(&self) -> Option<String>;
    /// Server detail, e.g. `Key (email)=(a@b.c) already exists.`
    fn server_detail(&self) -> Option<String>;
    /// The driver's "query returned no rows" sentinel.
    fn is_no_rows(&self) -> bool;
    /// Failure reaching or keeping the connection, outside any SQLSTATE.
    fn is_connection(&self) -> bool {
        false
    }
}

/// An open transaction that can be abandoned.
#[async_trait]
pub trait Rollback: Send {
    async fn rollback(self) -> anyhow::Result<()>;
}

/// Field name from `Key (field)=(value) already exists.`
fn duplicate_field(detail: &str) -> Option<&str> {
    let (key, _) = detail.split_once(")=(")?;
    let field = key.trim_start().strip_prefix("Key (")?;
    (!field.is_empty()).then_some(field)
}

fn not_null_column(message: &str) -> Option<&str> {
    NOT_NULL_COLUMN
        .captures(message)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Classifies `err` raised by the store operation `path`.
///
/// Vendor codes are checked before the no-rows sentinel. Anything unknown is
/// `Internal`. The original error is kept as the cause.
pub fn classify<E: VendorFailure>(err: E, path: &str) -> DbError {
    let detail = err.server_detail().unwrap_or_default();
    let message = err.server_message().unwrap_or_default();

    let (kind, msg) = match err.sqlstate().as_deref() {
        Some("23505") => (
            DbErrorKind::UniqueViolation,
            duplicate_field(&detail).map_or_else(
                || "duplicate key value".to_string(),
                |f| format!("{f} already exists"),
            ),
        ),
        Some("23503") => (
            DbErrorKind::ForeignKeyViolation,
            "referenced record is not found".to_string(),
        ),
        Some("23502") => (
            DbErrorKind::NotNullViolation,
            format!("{} cannot be null", not_null_column(&message).unwrap_or("value")),
        ),
        Some(code) if code.starts_with("08") => (
            DbErrorKind::ConnectionException,
            "database connection exception".to_string(),
        ),
        Some("42501") => (
            DbErrorKind::InsufficientPrivilege,
            "insufficient permissions to perform an action".to_string(),
        ),
        Some("40001") => (
            DbErrorKind::SerializationFailure,
            "could not serialize access due to concurrent update".to_string(),
        ),
        Some(_) => (DbErrorKind::Internal, "database error".to_string()),
        None if err.is_no_rows() => (
            DbErrorKind::NotFound,
            "the requested resource is not found".to_string(),
        ),
        None if err.is_connection() => (
            DbErrorKind::ConnectionException,
            "database connection exception".to_string(),
        ),
        None => (DbErrorKind::Internal, "database error".to_string()),
    };

    DbError::new(kind, path, msg)
        .with_details(detail)
        .with_cause(err)
}

/// Rolls `tx` back, then classifies `err`.
///
/// A failed rollback is logged and otherwise ignored; the returned error
/// always describes `err`.
pub async fn classify_with_rollback<T, E>(tx: T, err: E, path: &str) -> DbError
where
    T: Rollback,
    E: VendorFailure,
{
    if let Err(rb) = tx.rollback().await {
        warn!(path, error = %rb, "failed to roll back transaction");
    }
    classify(err, path)
}

// ---------------------------------------------------------------------------
// RawDbFailure
// ---------------------------------------------------------------------------

/// Driver-neutral failure, used by the in-memory store and in tests.
#[derive(Debug, Clone, Default, thiserror::Error)]
#[error("{message}")]
pub struct RawDbFailure {
    pub sqlstate: Option<String>,
    pub message: String,
    pub detail: Option<String>,
    pub no_rows: bool,
}

impl RawDbFailure {
    #[must_use]
    pub fn vendor(sqlstate: &str, message: impl Into<String>) -> Self {
        Self {
            sqlstate: Some(sqlstate.to_string()),
            message: message.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn no_rows() -> Self {
        Self {
            message: "no rows in result set".to_string(),
            no_rows: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl VendorFailure for RawDbFailure {
    fn sqlstate(&self) -> Option<String> {
        self.sqlstate.clone()
    }

    fn server_message(&self) -> Option<String> {
        Some(self.message.clone())
    }

    fn server_detail(&self) -> Option<String> {
        self.detail.clone()
    }

    fn is_no_rows(&self) -> bool {
        self.no_rows
    }
}

// ---------------------------------------------------------------------------
// sqlx
// ---------------------------------------------------------------------------

#[cfg(feature = "postgres")]
impl VendorFailure for sqlx::Error {
    fn sqlstate(&self) -> Option<String> {
        match self {
            Self::Database(db) => db.code().map(|c| c.into_owned()),
            _ => None,
        }
    }

    fn server_message(&self) -> Option<String> {
        match self {
            Self::Database(db) => Some(db.message().to_string()),
            _ => None,
        }
    }

    fn server_detail(&self) -> Option<String> {
        match self {
            Self::Database(db) => db
                .try_downcast_ref::<sqlx::postgres::PgDatabaseError>()
                .and_then(|pg| pg.detail())
                .map(str::to_string),
            _ => None,
        }
    }

    fn is_no_rows(&self) -> bool {
        matches!(self, Self::RowNotFound)
    }

    fn is_connection(&self) -> bool {
        matches!(self, Self::Io(_) | Self::PoolTimedOut | Self::PoolClosed | Self::Tls(_))
    }
}

#[cfg(feature = "postgres")]
#[async_trait]
impl Rollback for sqlx::Transaction<'_, sqlx::Postgres> {
    async fn rollback(self) -> anyhow::Result<()> {
        sqlx::Transaction::rollback(self).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn unique_violation_names_the_field() {
        let err = classify(
            RawDbFailure::vendor("23505", "duplicate key value violates unique constraint \"users_email_key\"")
                .with_detail("Key (email)=(a@b.c) already exists."),
            "accounts.store.signup_supplier",
        );
        assert_eq!(err.kind, DbErrorKind::UniqueViolation);
        assert!(err.msg.contains("email"));
        assert_eq!(err.path, "accounts.store.signup_supplier");
        assert!(err.cause.is_some());
    }

    #[test]
    fn unique_violation_without_detail_still_classifies() {
        let err = classify(RawDbFailure::vendor("23505", "dup"), "p");
        assert_eq!(err.kind, DbErrorKind::UniqueViolation);
    }

    #[test]
    fn not_null_names_the_column() {
        let err = classify(
            RawDbFailure::vendor(
                "23502",
                "null value in column \"username\" of relation \"users\" violates not-null constraint",
            ),
            "p",
        );
        assert_eq!(err.kind, DbErrorKind::NotNullViolation);
        assert_eq!(err.msg, "username cannot be null");
    }

    #[test]
    fn vendor_codes_map_to_kinds() {
        let cases = [
            ("23503", DbErrorKind::ForeignKeyViolation),
            ("08000", DbErrorKind::ConnectionException),
            ("08003", DbErrorKind::ConnectionException),
            ("08006", DbErrorKind::ConnectionException),
            ("08001", DbErrorKind::ConnectionException),
            ("42501", DbErrorKind::InsufficientPrivilege),
            ("40001", DbErrorKind::SerializationFailure),
            ("22001", DbErrorKind::Internal),
        ];
        for (code, kind) in cases {
            assert_eq!(classify(RawDbFailure::vendor(code, "x"), "p").kind, kind, "{code}");
        }
    }

    #[test]
    fn no_rows_is_not_found() {
        assert_eq!(classify(RawDbFailure::no_rows(), "p").kind, DbErrorKind::NotFound);
    }

    #[test]
    fn vendor_code_wins_over_sentinel() {
        let mut raw = RawDbFailure::vendor("23505", "dup").with_detail("Key (username)=(x) already exists.");
        raw.no_rows = true;
        let err = classify(raw, "p");
        assert_eq!(err.kind, DbErrorKind::UniqueViolation);
        assert!(err.msg.contains("username"));
    }

    #[test]
    fn unknown_failure_is_internal_with_cause() {
        let err = classify(RawDbFailure::other("driver exploded"), "p");
        assert_eq!(err.kind, DbErrorKind::Internal);
        assert_eq!(err.cause.map(|c| c.to_string()).as_deref(), Some("driver exploded"));
    }

    struct FakeTx {
        rolled_back: Arc<AtomicBool>,
        fail: bool,
    }

    #[async_trait]
    impl Rollback for FakeTx {
        async fn rollback(self) -> anyhow::Result<()> {
            self.rolled_back.store(true, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("connection reset during rollback");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn rollback_runs_before_classification() {
        let flag = Arc::new(AtomicBool::new(false));
        let tx = FakeTx {
            rolled_back: flag.clone(),
            fail: false,
        };
        let err = classify_with_rollback(tx, RawDbFailure::vendor("23503", "fk"), "p").await;
        assert!(flag.load(Ordering::SeqCst));
        assert_eq!(err.kind, DbErrorKind::ForeignKeyViolation);
    }

    #[tokio::test]
    async fn rollback_failure_does_not_replace_the_error() {
        let flag = Arc::new(AtomicBool::new(false));
        let tx = FakeTx {
            rolled_back: flag.clone(),
            fail: true,
        };
        let err = classify_with_rollback(tx, RawDbFailure::vendor("23505", "dup"), "p").await;
        assert!(flag.load(Ordering::SeqCst));
        assert_eq!(err.kind, DbErrorKind::UniqueViolation);
    }
}
