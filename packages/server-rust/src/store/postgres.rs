//! PostgreSQL [`UsersStore`] over a `sqlx` pool.

use accounts_core::models::{ImageMetadata, Token, TokenType, User};
use accounts_core::{DbError, DbErrorKind, RequestContext};
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};

use super::classify::{classify, classify_with_rollback};
use super::UsersStore;

const SELECT_USER: &str = r"
    SELECT id, username, first_name, last_name, email, user_type, membership,
           is_email_verified, password, auth_service, auth_data, roles, locale,
           image, image_metadata, created_at, updated_at
    FROM users
";

const SELECT_TOKEN: &str = r"
    SELECT id, user_id, token, type, used, created_at, expires_at FROM tokens
";

#[derive(FromRow)]
struct UserRow {
    id: String,
    username: String,
    first_name: String,
    last_name: String,
    email: String,
    user_type: String,
    membership: String,
    is_email_verified: bool,
    password: String,
    auth_service: String,
    auth_data: String,
    roles: Vec<String>,
    locale: String,
    image: Option<String>,
    image_metadata: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl UserRow {
    fn into_user(self, path: &str) -> Result<User, DbError> {
        let image_metadata = self
            .image_metadata
            .filter(|m| !m.is_empty())
            .map(|m| serde_json::from_str::<ImageMetadata>(&m))
            .transpose()
            .map_err(|e| {
                DbError::new(DbErrorKind::Internal, path, "failed to decode users.image_metadata").with_cause(e)
            })?;
        Ok(User {
            id: self.id,
            username: self.username,
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
            user_type: self.user_type,
            membership: self.membership,
            is_email_verified: self.is_email_verified,
            password: self.password,
            auth_service: self.auth_service,
            auth_data: self.auth_data,
            roles: self.roles,
            locale: self.locale,
            image: self.image,
            image_metadata,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct TokenRow {
    id: String,
    user_id: String,
    token: String,
    #[sqlx(rename = "type")]
    token_type: String,
    used: bool,
    created_at: i64,
    expires_at: i64,
}

impl TokenRow {
    fn into_token(self, path: &str) -> Result<Token, DbError> {
        let token_type = match self.token_type.as_str() {
            "email_confirmation" => TokenType::EmailConfirmation,
            "password_reset" => TokenType::PasswordReset,
            other => {
                return Err(DbError::new(
                    DbErrorKind::Internal,
                    path,
                    format!("unknown token type {other}"),
                ))
            }
        };
        Ok(Token {
            id: self.id,
            user_id: self.user_id,
            token_hash: self.token,
            token_type,
            used: self.used,
            created_at: self.created_at,
            expires_at: self.expires_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn user_where(&self, clause: &str, value: &str, path: &str) -> Result<User, DbError> {
        sqlx::query_as::<_, UserRow>(&format!("{SELECT_USER} {clause}"))
            .bind(value)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify(e, path))?
            .into_user(path)
    }
}

#[async_trait]
impl UsersStore for PgStore {
    async fn users_get_by_email(&self, _ctx: &RequestContext, email: &str) -> Result<User, DbError> {
        self.user_where("WHERE email = $1", email, "accounts.store.users_get_by_email")
            .await
    }

    async fn users_get_by_id(&self, _ctx: &RequestContext, id: &str) -> Result<User, DbError> {
        self.user_where("WHERE id = $1", id, "accounts.store.users_get_by_id")
            .await
    }

    async fn signup_supplier(&self, _ctx: &RequestContext, user: &User, token: &Token) -> Result<(), DbError> {
        let path = "accounts.store.signup_supplier";
        let image_metadata = user
            .image_metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| {
                DbError::new(DbErrorKind::Internal, path, "failed to encode users.image_metadata").with_cause(e)
            })?;

        let mut tx = self.pool.begin().await.map_err(|e| classify(e, path))?;

        let inserted = sqlx::query(
            r"
            INSERT INTO users (
                id, username, first_name, last_name, email, user_type, membership,
                is_email_verified, password, auth_service, auth_data, roles, locale,
                image, image_metadata, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ",
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.email)
        .bind(&user.user_type)
        .bind(&user.membership)
        .bind(user.is_email_verified)
        .bind(&user.password)
        .bind(&user.auth_service)
        .bind(&user.auth_data)
        .bind(&user.roles)
        .bind(&user.locale)
        .bind(&user.image)
        .bind(&image_metadata)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&mut *tx)
        .await;
        if let Err(e) = inserted {
            return Err(classify_with_rollback(tx, e, path).await);
        }

        let inserted = sqlx::query(
            "INSERT INTO tokens (id, user_id, token, type, used, created_at, expires_at) VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&token.id)
        .bind(&user.id)
        .bind(&token.token_hash)
        .bind(token.token_type.as_str())
        .bind(token.used)
        .bind(token.created_at)
        .bind(token.expires_at)
        .execute(&mut *tx)
        .await;
        if let Err(e) = inserted {
            return Err(classify_with_rollback(tx, e, path).await);
        }

        tx.commit().await.map_err(|e| classify(e, path))
    }

    async fn tokens_get(&self, _ctx: &RequestContext, token_id: &str) -> Result<Token, DbError> {
        let path = "accounts.store.tokens_get";
        sqlx::query_as::<_, TokenRow>(&format!("{SELECT_TOKEN} WHERE id = $1"))
            .bind(token_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify(e, path))?
            .into_token(path)
    }

    async fn tokens_get_all_by_user_id(&self, _ctx: &RequestContext, user_id: &str) -> Result<Vec<Token>, DbError> {
        let path = "accounts.store.tokens_get_all_by_user_id";
        sqlx::query_as::<_, TokenRow>(&format!("{SELECT_TOKEN} WHERE user_id = $1"))
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify(e, path))?
            .into_iter()
            .map(|row| row.into_token(path))
            .collect()
    }

    async fn tokens_add(&self, _ctx: &RequestContext, token: &Token) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO tokens (id, user_id, token, type, used, created_at, expires_at) VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&token.id)
        .bind(&token.user_id)
        .bind(&token.token_hash)
        .bind(token.token_type.as_str())
        .bind(token.used)
        .bind(token.created_at)
        .bind(token.expires_at)
        .execute(&self.pool)
        .await
        .map(|_| ())
        .map_err(|e| classify(e, "accounts.store.tokens_add"))
    }

    async fn tokens_delete_all_password_reset_by_user_id(
        &self,
        _ctx: &RequestContext,
        user_id: &str,
    ) -> Result<u64, DbError> {
        sqlx::query("DELETE FROM tokens WHERE user_id = $1 AND type = $2")
            .bind(user_id)
            .bind(TokenType::PasswordReset.as_str())
            .execute(&self.pool)
            .await
            .map(|r| r.rows_affected())
            .map_err(|e| classify(e, "accounts.store.tokens_delete_all_password_reset_by_user_id"))
    }

    async fn mark_email_as_confirmed(&self, _ctx: &RequestContext, token_id: &str) -> Result<(), DbError> {
        let path = "accounts.store.mark_email_as_confirmed";
        let mut tx = self.pool.begin().await.map_err(|e| classify(e, path))?;

        let user_id = sqlx::query_scalar::<_, String>("UPDATE tokens SET used = TRUE WHERE id = $1 RETURNING user_id")
            .bind(token_id)
            .fetch_one(&mut *tx)
            .await;
        let user_id = match user_id {
            Ok(id) => id,
            Err(e) => return Err(classify_with_rollback(tx, e, path).await),
        };

        let updated = sqlx::query("UPDATE users SET is_email_verified = TRUE WHERE id = $1")
            .bind(&user_id)
            .execute(&mut *tx)
            .await;
        if let Err(e) = updated {
            return Err(classify_with_rollback(tx, e, path).await);
        }

        tx.commit().await.map_err(|e| classify(e, path))
    }
}
