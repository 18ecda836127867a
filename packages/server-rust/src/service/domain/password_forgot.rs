use std::sync::Arc;
use std::time::Duration;

use accounts_core::audit::EVENT_PASSWORD_FORGOT;
use accounts_core::messages::{PasswordForgotRequest, SuccessResponseData};
use accounts_core::models::{Token, TokenType};
use accounts_core::tasks::SendPasswordResetEmailPayload;
use accounts_core::{params, AppError, Code, Params, RequestContext};
use tracing::debug;

use super::{email_lookup_error, email_task_options, field_error, internal_db, validate, Accounts};
use crate::security::generate_token;

const LOCATION: &str = "accounts.domain.password_forgot";

impl Accounts {
    /// Replaces any outstanding reset token and queues a reset email.
    pub async fn password_forgot(
        self: Arc<Self>,
        ctx: Arc<RequestContext>,
        req: PasswordForgotRequest,
    ) -> Result<SuccessResponseData, AppError> {
        let mut audit = self.audit(&ctx, EVENT_PASSWORD_FORGOT);
        audit.set_parameter("email", req.email.as_str());

        let email = req.email.trim().to_lowercase();
        if !validate::is_valid_email(&email) {
            return Err(field_error(
                &ctx,
                LOCATION,
                "email",
                "email.invalid",
                &Params::new(),
                "",
                Code::InvalidArgument,
            ));
        }

        let user = self
            .store
            .users_get_by_email(&ctx, &email)
            .await
            .map_err(|e| email_lookup_error(&ctx, LOCATION, e))?;
        if user.is_sso() {
            return Err(AppError::new(
                &ctx,
                LOCATION,
                "forgot.password.sso.error",
                &params([("AuthService", user.auth_service.as_str())]),
                "",
                Code::InvalidArgument,
            ));
        }

        let removed = self
            .store
            .tokens_delete_all_password_reset_by_user_id(&ctx, &user.id)
            .await
            .map_err(|e| internal_db(&ctx, LOCATION, e))?;
        debug!(user_id = %user.id, removed, "cleared previous password reset tokens");

        let hours = self.config.get().security.token_password_reset_expiry_hours;
        let generated = generate_token(Duration::from_secs(u64::from(hours) * 3600));
        let token = Token {
            id: generated.id.clone(),
            user_id: user.id.clone(),
            token_hash: generated.hash.clone(),
            token_type: TokenType::PasswordReset,
            used: false,
            created_at: generated.created_at,
            expires_at: generated.expires_at,
        };
        self.store
            .tokens_add(&ctx, &token)
            .await
            .map_err(|e| internal_db(&ctx, LOCATION, e))?;

        let payload = SendPasswordResetEmailPayload {
            ctx: ctx.snapshot(),
            email: user.email.clone(),
            token: generated.token,
            token_id: token.id.clone(),
            hours,
        };
        self.tasks
            .send_password_reset_email(&ctx, &payload, email_task_options())
            .await?;

        audit.set_result_state(params([("token_id", token.id.as_str())]));
        audit.success();
        let email_param = params([("Email", user.email.as_str())]);
        Ok(
            SuccessResponseData::message(ctx.translate("forgot.password.success_message", &Params::new()))
                .with_metadata(
                    "description",
                    ctx.translate("forgot.password.success_message.description", &email_param),
                ),
        )
    }
}

#[cfg(test)]
mod tests {
    use accounts_core::models::User;
    use accounts_core::{EventStatus, QueuePriority};

    use super::*;
    use crate::security::{now_millis, verify_token};
    use crate::service::domain::testkit::Harness;
    use crate::store::memory::ops;
    use crate::tasks::Broker;

    fn req(email: &str) -> PasswordForgotRequest {
        PasswordForgotRequest {
            email: email.to_string(),
        }
    }

    #[tokio::test]
    async fn replaces_reset_tokens_and_queues_email() {
        let h = Harness::new();
        let user = h.seed_supplier("ada@example.com", "correct-horse-1");
        h.store.insert_token(Token {
            id: "old-reset".to_string(),
            user_id: user.id.clone(),
            token_hash: "x".to_string(),
            token_type: TokenType::PasswordReset,
            used: false,
            created_at: now_millis(),
            expires_at: now_millis() + 1000,
        });

        let data = h
            .accounts
            .clone()
            .password_forgot(h.ctx(), req("  ADA@example.com"))
            .await
            .unwrap();
        assert_eq!(data.message.as_deref(), Some("Check your inbox"));
        assert_eq!(data.metadata["description"], "We sent a reset link to ada@example.com");

        let tokens = h.store.tokens_of(&user.id, TokenType::PasswordReset);
        assert_eq!(tokens.len(), 1);
        assert_ne!(tokens[0].id, "old-reset");

        let task = h.broker.dequeue(QueuePriority::Critical, i64::MAX).await.unwrap().unwrap();
        assert_eq!(task.name, accounts_core::tasks::TASK_SEND_PASSWORD_RESET_EMAIL);
        let payload: SendPasswordResetEmailPayload = serde_json::from_str(&task.payload).unwrap();
        assert_eq!(payload.hours, 24);
        assert!(verify_token(&payload.token, &tokens[0].token_hash));
        assert_eq!(h.audit.records()[0].status, EventStatus::Success);
    }

    #[tokio::test]
    async fn unknown_email_is_not_found() {
        let h = Harness::new();
        let err = h
            .accounts
            .clone()
            .password_forgot(h.ctx(), req("ghost@example.com"))
            .await
            .unwrap_err();
        assert_eq!(err.id, "email.not_found");
        assert_eq!(err.status_code, Code::NotFound);
        assert_eq!(h.store.calls(ops::TOKENS_ADD), 0);
    }

    #[tokio::test]
    async fn invalid_email_never_hits_the_store() {
        let h = Harness::new();
        let err = h.accounts.clone().password_forgot(h.ctx(), req("nope")).await.unwrap_err();
        assert_eq!(err.id, "email.invalid");
        assert_eq!(err.errors["email"], "The email is invalid");
        assert_eq!(h.store.calls(ops::USERS_GET_BY_EMAIL), 0);
    }

    #[tokio::test]
    async fn sso_accounts_cannot_reset() {
        let h = Harness::new();
        h.store.insert_user(User {
            id: "sso".to_string(),
            email: "sso@example.com".to_string(),
            auth_service: "google".to_string(),
            ..User::default()
        });
        let err = h
            .accounts
            .clone()
            .password_forgot(h.ctx(), req("sso@example.com"))
            .await
            .unwrap_err();
        assert_eq!(err.id, "forgot.password.sso.error");
        assert_eq!(h.broker.pending_len(QueuePriority::Critical).await.unwrap(), 0);
    }
}
