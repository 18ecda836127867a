//! In-process [`UsersStore`].
//!
//! Failures are raised as [`RawDbFailure`] values and go through the same
//! classifier as the SQL store. Per-operation call counts and one-shot
//! failure injection make it usable as a test double.

use accounts_core::models::{Token, TokenType, User};
use accounts_core::{DbError, RequestContext};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::classify::{classify, RawDbFailure};
use super::UsersStore;

pub mod ops {
    pub const USERS_GET_BY_EMAIL: &str = "accounts.store.users_get_by_email";
    pub const USERS_GET_BY_ID: &str = "accounts.store.users_get_by_id";
    pub const SIGNUP_SUPPLIER: &str = "accounts.store.signup_supplier";
    pub const TOKENS_GET: &str = "accounts.store.tokens_get";
    pub const TOKENS_GET_ALL_BY_USER_ID: &str = "accounts.store.tokens_get_all_by_user_id";
    pub const TOKENS_ADD: &str = "accounts.store.tokens_add";
    pub const TOKENS_DELETE_PASSWORD_RESET: &str = "accounts.store.tokens_delete_all_password_reset_by_user_id";
    pub const MARK_EMAIL_AS_CONFIRMED: &str = "accounts.store.mark_email_as_confirmed";
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    users: DashMap<String, User>,
    tokens: DashMap<String, Token>,
    /// Serializes multi-row writes.
    write: Mutex<()>,
    calls: DashMap<&'static str, u32>,
    injected: DashMap<&'static str, RawDbFailure>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a user directly, bypassing uniqueness checks.
    pub fn insert_user(&self, user: User) {
        self.users.insert(user.id.clone(), user);
    }

    pub fn insert_token(&self, token: Token) {
        self.tokens.insert(token.id.clone(), token);
    }

    #[must_use]
    pub fn user(&self, id: &str) -> Option<User> {
        self.users.get(id).map(|u| u.clone())
    }

    #[must_use]
    pub fn user_by_email(&self, email: &str) -> Option<User> {
        self.users.iter().find(|u| u.email == email).map(|u| u.clone())
    }

    #[must_use]
    pub fn token(&self, id: &str) -> Option<Token> {
        self.tokens.get(id).map(|t| t.clone())
    }

    #[must_use]
    pub fn tokens_of(&self, user_id: &str, token_type: TokenType) -> Vec<Token> {
        self.tokens
            .iter()
            .filter(|t| t.user_id == user_id && t.token_type == token_type)
            .map(|t| t.clone())
            .collect()
    }

    /// Makes the next call of `op` (one of [`ops`]) fail with `failure`.
    pub fn fail_next(&self, op: &'static str, failure: RawDbFailure) {
        self.injected.insert(op, failure);
    }

    /// Number of times `op` was invoked.
    #[must_use]
    pub fn calls(&self, op: &'static str) -> u32 {
        self.calls.get(op).map_or(0, |c| *c)
    }

    fn enter(&self, ctx: &RequestContext, op: &'static str) -> Result<(), DbError> {
        *self.calls.entry(op).or_insert(0) += 1;
        if ctx.is_cancelled() {
            return Err(classify(RawDbFailure::other("context canceled"), op));
        }
        match self.injected.remove(op) {
            Some((_, failure)) => Err(classify(failure, op)),
            None => Ok(()),
        }
    }

    fn unique_email(&self, email: &str) -> Result<(), RawDbFailure> {
        if self.users.iter().any(|u| u.email == email) {
            return Err(
                RawDbFailure::vendor("23505", "duplicate key value violates unique constraint \"users_email_key\"")
                    .with_detail(format!("Key (email)=({email}) already exists.")),
            );
        }
        Ok(())
    }
}

#[async_trait]
impl UsersStore for MemoryStore {
    async fn users_get_by_email(&self, ctx: &RequestContext, email: &str) -> Result<User, DbError> {
        self.enter(ctx, ops::USERS_GET_BY_EMAIL)?;
        self.users
            .iter()
            .find(|u| u.email == email)
            .map(|u| u.clone())
            .ok_or_else(|| classify(RawDbFailure::no_rows(), ops::USERS_GET_BY_EMAIL))
    }

    async fn users_get_by_id(&self, ctx: &RequestContext, id: &str) -> Result<User, DbError> {
        self.enter(ctx, ops::USERS_GET_BY_ID)?;
        self.user(id)
            .ok_or_else(|| classify(RawDbFailure::no_rows(), ops::USERS_GET_BY_ID))
    }

    async fn signup_supplier(&self, ctx: &RequestContext, user: &User, token: &Token) -> Result<(), DbError> {
        self.enter(ctx, ops::SIGNUP_SUPPLIER)?;
        let _tx = self.write.lock();
        self.unique_email(&user.email)
            .map_err(|f| classify(f, ops::SIGNUP_SUPPLIER))?;
        if self.tokens.contains_key(&token.id) {
            return Err(classify(
                RawDbFailure::vendor("23505", "duplicate key value violates unique constraint \"tokens_pkey\"")
                    .with_detail(format!("Key (id)=({}) already exists.", token.id)),
                ops::SIGNUP_SUPPLIER,
            ));
        }
        self.users.insert(user.id.clone(), user.clone());
        self.tokens.insert(token.id.clone(), token.clone());
        Ok(())
    }

    async fn tokens_get(&self, ctx: &RequestContext, token_id: &str) -> Result<Token, DbError> {
        self.enter(ctx, ops::TOKENS_GET)?;
        self.token(token_id)
            .ok_or_else(|| classify(RawDbFailure::no_rows(), ops::TOKENS_GET))
    }

    async fn tokens_get_all_by_user_id(&self, ctx: &RequestContext, user_id: &str) -> Result<Vec<Token>, DbError> {
        self.enter(ctx, ops::TOKENS_GET_ALL_BY_USER_ID)?;
        Ok(self
            .tokens
            .iter()
            .filter(|t| t.user_id == user_id)
            .map(|t| t.clone())
            .collect())
    }

    async fn tokens_add(&self, ctx: &RequestContext, token: &Token) -> Result<(), DbError> {
        self.enter(ctx, ops::TOKENS_ADD)?;
        if !self.users.contains_key(&token.user_id) {
            return Err(classify(
                RawDbFailure::vendor("23503", "insert or update on table \"tokens\" violates foreign key constraint"),
                ops::TOKENS_ADD,
            ));
        }
        self.tokens.insert(token.id.clone(), token.clone());
        Ok(())
    }

    async fn tokens_delete_all_password_reset_by_user_id(
        &self,
        ctx: &RequestContext,
        user_id: &str,
    ) -> Result<u64, DbError> {
        self.enter(ctx, ops::TOKENS_DELETE_PASSWORD_RESET)?;
        let before = self.tokens.len();
        self.tokens
            .retain(|_, t| !(t.user_id == user_id && t.token_type == TokenType::PasswordReset));
        Ok((before - self.tokens.len()) as u64)
    }

    async fn mark_email_as_confirmed(&self, ctx: &RequestContext, token_id: &str) -> Result<(), DbError> {
        self.enter(ctx, ops::MARK_EMAIL_AS_CONFIRMED)?;
        let _tx = self.write.lock();
        let user_id = {
            let mut token = self
                .tokens
                .get_mut(token_id)
                .ok_or_else(|| classify(RawDbFailure::no_rows(), ops::MARK_EMAIL_AS_CONFIRMED))?;
            token.used = true;
            token.user_id.clone()
        };
        if let Some(mut user) = self.users.get_mut(&user_id) {
            user.is_email_verified = true;
        }
        Ok(())
    }
}
