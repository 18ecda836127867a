//! Account persistence.
//!
//! Every failure leaving a [`UsersStore`] is a classified [`DbError`].

pub mod classify;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use accounts_core::models::{Token, User};
use accounts_core::{DbError, RequestContext};
use async_trait::async_trait;

pub use classify::{classify, classify_with_rollback, RawDbFailure, Rollback, VendorFailure};
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

/// Transactional CRUD over users and one-time tokens.
///
/// Used as `Arc<dyn UsersStore>`.
#[async_trait]
pub trait UsersStore: Send + Sync {
    async fn users_get_by_email(&self, ctx: &RequestContext, email: &str) -> Result<User, DbError>;

    async fn users_get_by_id(&self, ctx: &RequestContext, id: &str) -> Result<User, DbError>;

    /// Inserts the user and its email-confirmation token in one transaction.
    async fn signup_supplier(&self, ctx: &RequestContext, user: &User, token: &Token) -> Result<(), DbError>;

    async fn tokens_get(&self, ctx: &RequestContext, token_id: &str) -> Result<Token, DbError>;

    async fn tokens_get_all_by_user_id(&self, ctx: &RequestContext, user_id: &str) -> Result<Vec<Token>, DbError>;

    async fn tokens_add(&self, ctx: &RequestContext, token: &Token) -> Result<(), DbError>;

    /// Returns the number of deleted tokens.
    async fn tokens_delete_all_password_reset_by_user_id(
        &self,
        ctx: &RequestContext,
        user_id: &str,
    ) -> Result<u64, DbError>;

    /// Marks the token used and the owner's email verified, atomically.
    async fn mark_email_as_confirmed(&self, ctx: &RequestContext, token_id: &str) -> Result<(), DbError>;
}
