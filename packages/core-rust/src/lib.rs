//! Accounts core: error model, translations, request context, audit records,
//! store error kinds, task payloads and RPC messages.

pub mod audit;
pub mod context;
pub mod db;
pub mod error;
pub mod i18n;
pub mod messages;
pub mod models;
pub mod tasks;

pub use audit::{AuditRecord, EventStatus};
pub use context::{ContextSnapshot, RequestContext, Session};
pub use db::{DbError, DbErrorKind};
pub use error::{AppError, Code, WireError};
pub use i18n::{params, ParamValue, Params, TranslationStore, TranslationTable, Translator};
pub use messages::Reply;
pub use tasks::{QueuePriority, TaskOptions};
