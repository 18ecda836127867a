use std::sync::Arc;

use accounts_core::audit::EVENT_EMAIL_CONFIRMATION;
use accounts_core::messages::{EmailConfirmationRequest, SuccessResponseData};
use accounts_core::models::TokenType;
use accounts_core::{params, AppError, Code, DbError, Params, RequestContext};
use tracing::info;

use super::{internal_db, not_found_or_internal, validate, Accounts};
use crate::security::{now_millis, verify_token};

const LOCATION: &str = "accounts.domain.email_confirmation";

impl Accounts {
    /// Consumes an email-confirmation token and marks the email verified.
    ///
    /// A token that was already used answers with a success message and
    /// changes nothing.
    pub async fn email_confirmation(
        self: Arc<Self>,
        ctx: Arc<RequestContext>,
        req: EmailConfirmationRequest,
    ) -> Result<SuccessResponseData, AppError> {
        let mut audit = self.audit(&ctx, EVENT_EMAIL_CONFIRMATION);
        audit.set_parameter("email", req.email.as_str());
        audit.set_parameter("token_id", req.token_id.as_str());

        let req = EmailConfirmationRequest {
            email: req.email.trim().to_lowercase(),
            ..req
        };
        validate::email_confirmation(&ctx, &req)?;

        let invalid = |id: &str| AppError::new(&ctx, LOCATION, id, &Params::new(), "", Code::InvalidArgument);

        let token = self
            .store
            .tokens_get(&ctx, &req.token_id)
            .await
            .map_err(|e| not_found_or_internal(&ctx, LOCATION, "email_confirm.token.not_found", e))?;
        if token.token_type != TokenType::EmailConfirmation {
            return Err(not_found_or_internal(
                &ctx,
                LOCATION,
                "email_confirm.token.not_found",
                DbError::not_found(LOCATION).with_details("token is not an email confirmation token"),
            ));
        }

        // The secret is checked before anything about the owner is revealed.
        if !verify_token(&req.token, &token.token_hash) {
            return Err(invalid("email_confirm.token.error"));
        }

        let user = self
            .store
            .users_get_by_id(&ctx, &token.user_id)
            .await
            .map_err(|e| not_found_or_internal(&ctx, LOCATION, "email_confirm.token.not_found", e))?;
        if user.email != req.email {
            return Err(invalid("email_confirm.email.error"));
        }

        audit.set_prior_state(params([
            ("is_email_verified", user.is_email_verified),
            ("token_used", token.used),
        ]));

        if token.used {
            audit.success();
            return Ok(SuccessResponseData::message(
                ctx.translate("email_confirm.already_confirmed", &Params::new()),
            ));
        }
        if token.expires_at < now_millis() {
            return Err(invalid("email_confirm.token.expired"));
        }

        self.store
            .mark_email_as_confirmed(&ctx, &token.id)
            .await
            .map_err(|e| internal_db(&ctx, LOCATION, e))?;

        info!(user_id = %user.id, request_id = %ctx.request_id(), "email confirmed");
        audit.set_result_state(params([("is_email_verified", true), ("token_used", true)]));
        audit.success();
        Ok(SuccessResponseData::message(
            ctx.translate("email_confirm.confirmed_successfully", &Params::new()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use accounts_core::models::{Token, User};
    use accounts_core::EventStatus;

    use super::*;
    use crate::security::{generate_token, hash_token};
    use crate::service::domain::testkit::Harness;
    use crate::store::memory::ops;

    const SECRET: &str = "s3cret-token";

    fn seed(h: &Harness, used: bool, expires_at: i64, token_type: TokenType) -> (User, Token) {
        let mut user = h.seed_supplier("ada@example.com", "correct-horse-1");
        user.is_email_verified = used;
        h.store.insert_user(user.clone());
        let token = Token {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user.id.clone(),
            token_hash: hash_token(SECRET),
            token_type,
            used,
            created_at: now_millis(),
            expires_at,
        };
        h.store.insert_token(token.clone());
        (user, token)
    }

    fn req(token: &Token, secret: &str) -> EmailConfirmationRequest {
        EmailConfirmationRequest {
            email: "ADA@example.com".to_string(),
            token: secret.to_string(),
            token_id: token.id.clone(),
        }
    }

    fn in_one_hour() -> i64 {
        now_millis() + 3_600_000
    }

    #[tokio::test]
    async fn valid_token_confirms_email() {
        let h = Harness::new();
        let (user, token) = seed(&h, false, in_one_hour(), TokenType::EmailConfirmation);

        let data = h.accounts.clone().email_confirmation(h.ctx(), req(&token, SECRET)).await.unwrap();

        assert_eq!(data.message.as_deref(), Some("Your email has been confirmed"));
        assert!(h.store.user(&user.id).unwrap().is_email_verified);
        assert!(h.store.token(&token.id).unwrap().used);
        assert_eq!(h.audit.records()[0].status, EventStatus::Success);
    }

    #[tokio::test]
    async fn used_token_is_idempotent_success() {
        let h = Harness::new();
        let (_, token) = seed(&h, true, in_one_hour(), TokenType::EmailConfirmation);

        let data = h.accounts.clone().email_confirmation(h.ctx(), req(&token, SECRET)).await.unwrap();

        assert_eq!(data.message.as_deref(), Some("Your email is already confirmed"));
        assert_eq!(h.store.calls(ops::MARK_EMAIL_AS_CONFIRMED), 0);
        assert_eq!(h.audit.records()[0].status, EventStatus::Success);
    }

    #[tokio::test]
    async fn expired_token_changes_nothing() {
        let h = Harness::new();
        let (user, token) = seed(&h, false, now_millis() - 1, TokenType::EmailConfirmation);

        let err = h
            .accounts
            .clone()
            .email_confirmation(h.ctx(), req(&token, SECRET))
            .await
            .unwrap_err();

        assert_eq!(err.id, "email_confirm.token.expired");
        assert_eq!(err.status_code, Code::InvalidArgument);
        assert_eq!(err.message, "The confirmation link has expired");
        assert!(!h.store.user(&user.id).unwrap().is_email_verified);
        assert_eq!(h.store.calls(ops::MARK_EMAIL_AS_CONFIRMED), 0);
        assert_eq!(h.audit.records()[0].status, EventStatus::Fail);
    }

    #[tokio::test]
    async fn wrong_secret_is_rejected() {
        let h = Harness::new();
        let (_, token) = seed(&h, false, in_one_hour(), TokenType::EmailConfirmation);
        let other = generate_token(std::time::Duration::from_secs(60));

        let err = h
            .accounts
            .clone()
            .email_confirmation(h.ctx(), req(&token, &other.token))
            .await
            .unwrap_err();
        assert_eq!(err.id, "email_confirm.token.error");
        assert_eq!(h.store.calls(ops::MARK_EMAIL_AS_CONFIRMED), 0);
    }

    #[tokio::test]
    async fn unknown_or_foreign_tokens_are_not_found() {
        let h = Harness::new();
        let (_, reset) = seed(&h, false, in_one_hour(), TokenType::PasswordReset);

        let err = h
            .accounts
            .clone()
            .email_confirmation(h.ctx(), req(&reset, SECRET))
            .await
            .unwrap_err();
        assert_eq!(err.status_code, Code::NotFound);

        let missing = Token {
            id: uuid::Uuid::new_v4().to_string(),
            ..reset
        };
        let err = h
            .accounts
            .clone()
            .email_confirmation(h.ctx(), req(&missing, SECRET))
            .await
            .unwrap_err();
        assert_eq!(err.id, "email_confirm.token.not_found");
        assert_eq!(err.status_code, Code::NotFound);
    }

    #[tokio::test]
    async fn mismatched_email_is_rejected() {
        let h = Harness::new();
        let (_, token) = seed(&h, false, in_one_hour(), TokenType::EmailConfirmation);
        let mut r = req(&token, SECRET);
        r.email = "someone@example.com".to_string();

        let err = h.accounts.clone().email_confirmation(h.ctx(), r).await.unwrap_err();
        assert_eq!(err.id, "email_confirm.email.error");
    }

    #[tokio::test]
    async fn wrong_secret_does_not_reveal_the_owner_email() {
        let h = Harness::new();
        let (_, token) = seed(&h, false, in_one_hour(), TokenType::EmailConfirmation);
        let mut r = req(&token, "guessed-secret");
        r.email = "someone@example.com".to_string();

        let err = h.accounts.clone().email_confirmation(h.ctx(), r).await.unwrap_err();
        assert_eq!(err.id, "email_confirm.token.error");
        assert_eq!(h.store.calls(ops::USERS_GET_BY_ID), 0);
    }
}
