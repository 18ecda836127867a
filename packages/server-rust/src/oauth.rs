//! OAuth provider adapter: accepts login challenges on the provider's admin
//! API.

use std::sync::Arc;
use std::time::Duration;

use accounts_core::RequestContext;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ConfigStore;

/// Deadline for the whole accept exchange, retries included.
pub const ACCEPT_LOGIN_DEADLINE: Duration = Duration::from_secs(12);
pub const ACCEPT_LOGIN_ATTEMPTS: u32 = 3;

/// What the provider is told about an authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginAcceptance {
    pub subject: String,
    pub remember: bool,
    pub remember_for: u64,
    pub context: LoginContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginContext {
    pub lang: String,
    pub email: String,
    pub first_name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    /// The provider answered with an OAuth error document.
    #[error("login rejected by provider: {code}: {description}")]
    Rejected { code: String, description: String },
    /// Transport failure, provider-side failure, deadline, or a malformed
    /// answer.
    #[error("oauth provider unavailable: {0:#}")]
    Unavailable(#[source] anyhow::Error),
}

impl OAuthError {
    /// Translation key describing a rejection, `None` for other failures.
    #[must_use]
    pub fn message_id(&self) -> Option<&'static str> {
        match self {
            Self::Rejected { code, description } => Some(rejection_message_id(code, description)),
            Self::Unavailable(_) => None,
        }
    }
}

/// Maps an OAuth error code to a translation key.
#[must_use]
pub fn rejection_message_id(code: &str, description: &str) -> &'static str {
    match code {
        "invalid_request" if description.starts_with("redirect_uri") => "oauth.invalid_request.redirect_uri",
        "invalid_request" => "oauth.invalid_request.general",
        "access_denied" => "oauth.access_denied.user",
        "unauthorized_client" => "oauth.unauthorized_client",
        "unsupported_response_type" => "oauth.unsupported_response_type",
        "invalid_scope" => "oauth.invalid_scope",
        "server_error" => "oauth.server_error.internal",
        "temporarily_unavailable" => "oauth.temporarily_unavailable",
        _ => "oauth.unknown_error",
    }
}

/// Accepts a login challenge and returns the URL to redirect the user to.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    async fn accept_login(
        &self,
        ctx: &RequestContext,
        challenge: &str,
        login: &LoginAcceptance,
    ) -> Result<String, OAuthError>;
}

// ---------------------------------------------------------------------------
// HTTP provider
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct AcceptResponse {
    #[serde(default)]
    redirect_to: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

/// Talks to the provider admin API at the live `oauth.admin_url`.
#[derive(Debug, Clone)]
pub struct HttpOAuthProvider {
    client: reqwest::Client,
    config: Arc<ConfigStore>,
    attempts: u32,
    deadline: Duration,
}

impl HttpOAuthProvider {
    #[must_use]
    pub fn new(client: reqwest::Client, config: Arc<ConfigStore>) -> Self {
        Self {
            client,
            config,
            attempts: ACCEPT_LOGIN_ATTEMPTS,
            deadline: ACCEPT_LOGIN_DEADLINE,
        }
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    async fn put_with_retry(&self, url: &str, login: &LoginAcceptance) -> Result<reqwest::Response, OAuthError> {
        let mut last = None;
        for attempt in 1..=self.attempts.max(1) {
            match self.client.put(url).json(login).send().await {
                Ok(resp) if resp.status().is_server_error() => {
                    warn!(attempt, status = resp.status().as_u16(), "oauth login accept failed on provider side");
                    last = Some(anyhow::anyhow!("provider answered {}", resp.status()));
                }
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    warn!(attempt, error = %e, "oauth login accept request failed");
                    last = Some(e.into());
                }
            }
            if attempt < self.attempts {
                tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
            }
        }
        Err(OAuthError::Unavailable(
            last.unwrap_or_else(|| anyhow::anyhow!("no attempt was made")),
        ))
    }

    async fn exchange(&self, challenge: &str, login: &LoginAcceptance) -> Result<String, OAuthError> {
        let admin_url = self.config.get().oauth.admin_url.clone();
        let url = format!("{admin_url}/oauth2/auth/requests/login/accept?login_challenge={challenge}");
        let resp = self.put_with_retry(&url, login).await?;

        if resp.status() != reqwest::StatusCode::OK {
            let body: ErrorResponse = resp
                .json()
                .await
                .map_err(|e| OAuthError::Unavailable(anyhow::Error::new(e).context("malformed oauth error document")))?;
            return Err(OAuthError::Rejected {
                code: body.error,
                description: body.error_description,
            });
        }

        let body: AcceptResponse = resp
            .json()
            .await
            .map_err(|e| OAuthError::Unavailable(anyhow::Error::new(e).context("malformed login accept answer")))?;
        if body.redirect_to.is_empty() {
            return Err(OAuthError::Unavailable(anyhow::anyhow!("provider returned an empty redirect_to")));
        }
        Ok(body.redirect_to)
    }
}

#[async_trait]
impl OAuthProvider for HttpOAuthProvider {
    async fn accept_login(
        &self,
        ctx: &RequestContext,
        challenge: &str,
        login: &LoginAcceptance,
    ) -> Result<String, OAuthError> {
        let budget = ctx.remaining().map_or(self.deadline, |left| left.min(self.deadline));
        let redirect = tokio::time::timeout(budget, self.exchange(challenge, login))
            .await
            .map_err(|_| OAuthError::Unavailable(anyhow::anyhow!("login accept exceeded {budget:?}")))??;
        debug!(request_id = ctx.request_id(), "oauth login accepted");
        Ok(redirect)
    }
}

// ---------------------------------------------------------------------------
// In-memory provider
// ---------------------------------------------------------------------------

/// Scripted provider for tests and local runs.
#[derive(Debug, Default)]
pub struct MemoryOAuthProvider {
    rejection: Option<(String, String)>,
    unavailable: bool,
    accepted: Mutex<Vec<(String, LoginAcceptance)>>,
}

impl MemoryOAuthProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn rejecting(code: &str, description: &str) -> Self {
        Self {
            rejection: Some((code.to_string(), description.to_string())),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    /// `(challenge, acceptance)` pairs seen so far.
    #[must_use]
    pub fn accepted(&self) -> Vec<(String, LoginAcceptance)> {
        self.accepted.lock().clone()
    }
}

#[async_trait]
impl OAuthProvider for MemoryOAuthProvider {
    async fn accept_login(
        &self,
        _ctx: &RequestContext,
        challenge: &str,
        login: &LoginAcceptance,
    ) -> Result<String, OAuthError> {
        if self.unavailable {
            return Err(OAuthError::Unavailable(anyhow::anyhow!("connection refused")));
        }
        if let Some((code, description)) = &self.rejection {
            return Err(OAuthError::Rejected {
                code: code.clone(),
                description: description.clone(),
            });
        }
        self.accepted.lock().push((challenge.to_string(), login.clone()));
        Ok(format!("https://auth.local/callback?login_verifier={challenge}"))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    use axum::extract::{Query, State};
    use axum::http::StatusCode;
    use axum::routing::put;
    use axum::{Json, Router};

    use super::*;
    use crate::config::AppConfig;

    fn login() -> LoginAcceptance {
        LoginAcceptance {
            subject: "u1".to_string(),
            remember: true,
            remember_for: 3600,
            context: LoginContext {
                lang: "en".to_string(),
                email: "a@b.c".to_string(),
                first_name: "Ada".to_string(),
            },
        }
    }

    /// Serves the accept endpoint; the first `fail_first` calls answer 503.
    async fn spawn_provider(fail_first: u32, reject: bool) -> (HttpOAuthProvider, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let app = Router::new()
            .route(
                "/oauth2/auth/requests/login/accept",
                put(
                    move |State(calls): State<Arc<AtomicU32>>,
                          Query(q): Query<HashMap<String, String>>,
                          Json(body): Json<serde_json::Value>| async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst);
                        if n < fail_first {
                            return (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({})));
                        }
                        if reject {
                            return (
                                StatusCode::UNAUTHORIZED,
                                Json(serde_json::json!({
                                    "error": "access_denied",
                                    "error_description": "denied"
                                })),
                            );
                        }
                        assert_eq!(body["subject"], "u1");
                        let challenge = q.get("login_challenge").cloned().unwrap_or_default();
                        (
                            StatusCode::OK,
                            Json(serde_json::json!({ "redirect_to": format!("https://app/cb?c={challenge}") })),
                        )
                    },
                ),
            )
            .with_state(Arc::clone(&calls));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let mut config = AppConfig::default();
        config.oauth.admin_url = format!("http://{addr}");
        let provider = HttpOAuthProvider::new(reqwest::Client::new(), Arc::new(ConfigStore::new(config)));
        (provider, calls)
    }

    #[tokio::test]
    async fn accepted_login_returns_redirect() {
        let (provider, calls) = spawn_provider(0, false).await;
        let redirect = provider
            .accept_login(&RequestContext::default(), "ch-1", &login())
            .await
            .unwrap();
        assert_eq!(redirect, "https://app/cb?c=ch-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn provider_errors_are_retried() {
        let (provider, calls) = spawn_provider(2, false).await;
        assert!(provider
            .accept_login(&RequestContext::default(), "ch", &login())
            .await
            .is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let (provider, calls) = spawn_provider(5, false).await;
        let err = provider
            .accept_login(&RequestContext::default(), "ch", &login())
            .await
            .unwrap_err();
        assert!(matches!(err, OAuthError::Unavailable(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rejection_maps_to_message_id() {
        let (provider, _) = spawn_provider(0, true).await;
        let err = provider
            .accept_login(&RequestContext::default(), "ch", &login())
            .await
            .unwrap_err();
        assert_eq!(err.message_id(), Some("oauth.access_denied.user"));
    }

    #[tokio::test]
    async fn unreachable_provider_is_unavailable() {
        let mut config = AppConfig::default();
        config.oauth.admin_url = "http://127.0.0.1:1".to_string();
        let provider = HttpOAuthProvider::new(reqwest::Client::new(), Arc::new(ConfigStore::new(config)))
            .with_deadline(Duration::from_secs(2));
        let err = provider
            .accept_login(&RequestContext::default(), "ch", &login())
            .await
            .unwrap_err();
        assert!(matches!(err, OAuthError::Unavailable(_)));
    }

    #[test]
    fn rejection_ids() {
        assert_eq!(rejection_message_id("invalid_request", "redirect_uri mismatch"), "oauth.invalid_request.redirect_uri");
        assert_eq!(rejection_message_id("invalid_request", "other"), "oauth.invalid_request.general");
        assert_eq!(rejection_message_id("weird", ""), "oauth.unknown_error");
    }
}
