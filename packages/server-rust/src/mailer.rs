//! Outbound email.
//!
//! Rendering HTML bodies is left to the delivery gateway; this module builds
//! the subject and action link and hands them to a [`Mailer`].

use std::sync::Arc;

use accounts_core::{params, ParamValue, TranslationStore, Translator};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

/// Sends account emails. Implementations must tolerate duplicate sends.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_verify_email(
        &self,
        locale: &str,
        email: &str,
        token: &str,
        token_id: &str,
        hours: u32,
    ) -> anyhow::Result<()>;

    async fn send_password_reset_email(
        &self,
        locale: &str,
        email: &str,
        token: &str,
        token_id: &str,
        hours: u32,
    ) -> anyhow::Result<()>;
}

/// A composed email, ready for a delivery gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub link: String,
    pub note: String,
}

fn action_link(base: &str, token: &str, token_id: &str, email: &str) -> String {
    format!("{base}?token={token}&token_id={token_id}&email={email}")
}

/// Builds emails from the translation table.
#[derive(Debug, Clone)]
pub struct EmailComposer {
    translations: Arc<TranslationStore>,
    site_name: String,
    confirmation_url: String,
    password_reset_url: String,
}

impl EmailComposer {
    #[must_use]
    pub fn new(
        translations: Arc<TranslationStore>,
        site_name: impl Into<String>,
        confirmation_url: impl Into<String>,
        password_reset_url: impl Into<String>,
    ) -> Self {
        Self {
            translations,
            site_name: site_name.into(),
            confirmation_url: confirmation_url.into(),
            password_reset_url: password_reset_url.into(),
        }
    }

    fn tr(&self, locale: &str, id: &str, hours: u32) -> String {
        let params = params([
            ("SiteName", ParamValue::from(self.site_name.as_str())),
            ("Hours", ParamValue::from(hours)),
        ]);
        self.translations
            .current()
            .translate(locale, id, &params)
            .unwrap_or_else(|_| id.to_string())
    }

    #[must_use]
    pub fn verify_email(&self, locale: &str, email: &str, token: &str, token_id: &str, hours: u32) -> OutgoingEmail {
        OutgoingEmail {
            to: email.to_string(),
            subject: self.tr(locale, "templates.verify.title", hours),
            link: action_link(&self.confirmation_url, token, token_id, email),
            note: self.tr(locale, "templates.verify.part4", hours),
        }
    }

    #[must_use]
    pub fn password_reset(&self, locale: &str, email: &str, token: &str, token_id: &str, hours: u32) -> OutgoingEmail {
        OutgoingEmail {
            to: email.to_string(),
            subject: self.tr(locale, "templates.reset_password.title", hours),
            link: action_link(&self.password_reset_url, token, token_id, email),
            note: self.tr(locale, "templates.reset_password.part3", hours),
        }
    }
}

/// Mailer that composes emails and logs them instead of delivering.
///
/// The link carries the token secret, so only the recipient, subject and
/// token id are logged.
#[derive(Debug, Clone)]
pub struct LogMailer {
    composer: EmailComposer,
}

impl LogMailer {
    #[must_use]
    pub fn new(composer: EmailComposer) -> Self {
        Self { composer }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send_verify_email(
        &self,
        locale: &str,
        email: &str,
        token: &str,
        token_id: &str,
        hours: u32,
    ) -> anyhow::Result<()> {
        let msg = self.composer.verify_email(locale, email, token, token_id, hours);
        info!(to = %msg.to, subject = %msg.subject, token_id, "verify email composed");
        Ok(())
    }

    async fn send_password_reset_email(
        &self,
        locale: &str,
        email: &str,
        token: &str,
        token_id: &str,
        hours: u32,
    ) -> anyhow::Result<()> {
        let msg = self.composer.password_reset(locale, email, token, token_id, hours);
        info!(to = %msg.to, subject = %msg.subject, token_id, "password reset email composed");
        Ok(())
    }
}

/// What a [`MemoryMailer`] was asked to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub kind: &'static str,
    pub locale: String,
    pub email: String,
    pub token: String,
    pub token_id: String,
    pub hours: u32,
}

/// Recording mailer for tests. Fails the first `fail_first` attempts.
#[derive(Debug, Default)]
pub struct MemoryMailer {
    attempts: Mutex<Vec<SentEmail>>,
    fail_first: Mutex<u32>,
}

impl MemoryMailer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failing(times: u32) -> Self {
        Self {
            attempts: Mutex::default(),
            fail_first: Mutex::new(times),
        }
    }

    /// Every send attempt, including failed ones.
    #[must_use]
    pub fn attempts(&self) -> Vec<SentEmail> {
        self.attempts.lock().clone()
    }

    fn record(&self, sent: SentEmail) -> anyhow::Result<()> {
        self.attempts.lock().push(sent);
        let mut remaining = self.fail_first.lock();
        if *remaining > 0 {
            *remaining -= 1;
            anyhow::bail!("smtp: connection refused");
        }
        Ok(())
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send_verify_email(
        &self,
        locale: &str,
        email: &str,
        token: &str,
        token_id: &str,
        hours: u32,
    ) -> anyhow::Result<()> {
        self.record(SentEmail {
            kind: "verify",
            locale: locale.to_string(),
            email: email.to_string(),
            token: token.to_string(),
            token_id: token_id.to_string(),
            hours,
        })
    }

    async fn send_password_reset_email(
        &self,
        locale: &str,
        email: &str,
        token: &str,
        token_id: &str,
        hours: u32,
    ) -> anyhow::Result<()> {
        self.record(SentEmail {
            kind: "password_reset",
            locale: locale.to_string(),
            email: email.to_string(),
            token: token.to_string(),
            token_id: token_id.to_string(),
            hours,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use accounts_core::TranslationTable;

    use super::*;

    fn composer() -> EmailComposer {
        let mut en = HashMap::new();
        en.insert("templates.verify.title".to_string(), "Verify your {{SiteName}} email".to_string());
        en.insert("templates.verify.part4".to_string(), "The link expires in {{Hours}} hours".to_string());
        let mut raw = HashMap::new();
        raw.insert("en".to_string(), en);
        EmailComposer::new(
            Arc::new(TranslationStore::new(TranslationTable::compile("en", &raw).unwrap())),
            "Shop",
            "https://shop.test/confirm",
            "https://shop.test/reset",
        )
    }

    #[test]
    fn verify_email_is_localized_and_linked() {
        let msg = composer().verify_email("en", "a@b.c", "tok", "tid", 24);
        assert_eq!(msg.subject, "Verify your Shop email");
        assert_eq!(msg.note, "The link expires in 24 hours");
        assert_eq!(msg.link, "https://shop.test/confirm?token=tok&token_id=tid&email=a@b.c");
    }

    #[test]
    fn missing_translation_falls_back_to_id() {
        let msg = composer().password_reset("en", "a@b.c", "tok", "tid", 1);
        assert_eq!(msg.subject, "templates.reset_password.title");
        assert!(msg.link.starts_with("https://shop.test/reset?"));
    }

    #[tokio::test]
    async fn memory_mailer_fails_then_succeeds() {
        let mailer = MemoryMailer::failing(1);
        assert!(mailer.send_verify_email("en", "a@b.c", "t", "i", 24).await.is_err());
        assert!(mailer.send_verify_email("en", "a@b.c", "t", "i", 24).await.is_ok());
        assert_eq!(mailer.attempts().len(), 2);
    }
}
