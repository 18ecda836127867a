//! Email side effects run by the task processor.

use std::sync::Arc;

use accounts_core::tasks::{SendPasswordResetEmailPayload, SendVerifyEmailPayload};
use accounts_core::RequestContext;
use anyhow::Context as _;
use async_trait::async_trait;

use super::TaskHandler;
use crate::mailer::Mailer;

/// Sends the email-confirmation link.
#[derive(Clone)]
pub struct SendVerifyEmailHandler {
    mailer: Arc<dyn Mailer>,
}

impl SendVerifyEmailHandler {
    #[must_use]
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }
}

#[async_trait]
impl TaskHandler for SendVerifyEmailHandler {
    async fn handle(&self, ctx: &RequestContext, payload: &str) -> anyhow::Result<()> {
        let p: SendVerifyEmailPayload =
            serde_json::from_str(payload).context("malformed send_verify_email payload")?;
        self.mailer
            .send_verify_email(ctx.accept_language(), &p.email, &p.token, &p.token_id, p.hours)
            .await
    }
}

/// Sends the password-reset link.
#[derive(Clone)]
pub struct SendPasswordResetEmailHandler {
    mailer: Arc<dyn Mailer>,
}

impl SendPasswordResetEmailHandler {
    #[must_use]
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }
}

#[async_trait]
impl TaskHandler for SendPasswordResetEmailHandler {
    async fn handle(&self, ctx: &RequestContext, payload: &str) -> anyhow::Result<()> {
        let p: SendPasswordResetEmailPayload =
            serde_json::from_str(payload).context("malformed send_password_reset_email payload")?;
        self.mailer
            .send_password_reset_email(ctx.accept_language(), &p.email, &p.token, &p.token_id, p.hours)
            .await
    }
}

#[cfg(test)]
mod tests {
    use accounts_core::ContextSnapshot;

    use super::*;
    use crate::mailer::MemoryMailer;

    fn ctx(locale: &str) -> RequestContext {
        RequestContext::from_snapshot(
            ContextSnapshot {
                accept_language: locale.to_string(),
                ..ContextSnapshot::default()
            },
            RequestContext::default().translator().clone(),
        )
    }

    #[tokio::test]
    async fn verify_handler_uses_context_locale_and_real_token() {
        let mailer = Arc::new(MemoryMailer::new());
        let payload = serde_json::to_string(&SendVerifyEmailPayload {
            ctx: ContextSnapshot::default(),
            email: "a@b.c".to_string(),
            token: "raw-secret".to_string(),
            token_id: "tid".to_string(),
            hours: 48,
        })
        .unwrap();

        SendVerifyEmailHandler::new(mailer.clone())
            .handle(&ctx("es"), &payload)
            .await
            .unwrap();

        let sent = &mailer.attempts()[0];
        assert_eq!(sent.kind, "verify");
        assert_eq!(sent.locale, "es");
        assert_eq!(sent.token, "raw-secret");
        assert_eq!(sent.hours, 48);
    }

    #[tokio::test]
    async fn reset_handler_propagates_mailer_failure() {
        let mailer = Arc::new(MemoryMailer::failing(1));
        let payload = serde_json::to_string(&SendPasswordResetEmailPayload {
            ctx: ContextSnapshot::default(),
            email: "a@b.c".to_string(),
            token: "t".to_string(),
            token_id: "i".to_string(),
            hours: 24,
        })
        .unwrap();

        let handler = SendPasswordResetEmailHandler::new(mailer.clone());
        assert!(handler.handle(&ctx("en"), &payload).await.is_err());
        assert!(handler.handle(&ctx("en"), &payload).await.is_ok());
        assert_eq!(mailer.attempts()[1].kind, "password_reset");
    }

    #[tokio::test]
    async fn malformed_payload_is_an_error() {
        let handler = SendVerifyEmailHandler::new(Arc::new(MemoryMailer::new()));
        let err = handler.handle(&ctx("en"), "{not json").await.unwrap_err();
        assert!(format!("{err:#}").contains("malformed"));
    }
}
