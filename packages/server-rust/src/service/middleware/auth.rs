//! Bearer-token gate for protected methods.

use std::collections::HashSet;
use std::sync::Arc;
use std::task::{Context, Poll};

use tower::{Layer, Service};
use tracing::debug;

use crate::security::{AuthError, TokenValidator};
use crate::service::call::{Call, CallFuture, HandlerResult, Status};
use crate::service::context::headers;

/// Extracts the token from an `authorization: Bearer <token>` value.
fn bearer_token(call: &Call) -> Result<&str, AuthError> {
    let value = call
        .metadata
        .get(headers::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::Missing)?
        .trim();
    match (value.get(..7), value.get(7..)) {
        (Some(scheme), Some(token)) if scheme.eq_ignore_ascii_case("bearer ") && !token.trim().is_empty() => {
            Ok(token.trim())
        }
        _ => Err(AuthError::Missing),
    }
}

// ---------------------------------------------------------------------------
// AuthLayer
// ---------------------------------------------------------------------------

/// Tower layer that rejects calls to protected methods before the handler runs.
///
/// Methods outside the allow-list pass through untouched. On success the
/// validated claims are attached to the call scope.
#[derive(Debug, Clone)]
pub struct AuthLayer {
    validator: Arc<dyn TokenValidator>,
    protected: Arc<HashSet<String>>,
}

impl AuthLayer {
    #[must_use]
    pub fn new(validator: Arc<dyn TokenValidator>, protected: HashSet<String>) -> Self {
        Self {
            validator,
            protected: Arc::new(protected),
        }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            validator: Arc::clone(&self.validator),
            protected: Arc::clone(&self.protected),
        }
    }
}

// ---------------------------------------------------------------------------
// AuthService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AuthService<S> {
    inner: S,
    validator: Arc<dyn TokenValidator>,
    protected: Arc<HashSet<String>>,
}

impl<S> Service<Call> for AuthService<S>
where
    S: Service<Call, Response = HandlerResult, Error = Status> + Send,
    S::Future: Send + 'static,
{
    type Response = HandlerResult;
    type Error = Status;
    type Future = CallFuture<HandlerResult>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut call: Call) -> Self::Future {
        if !self.protected.contains(&call.method) {
            return Box::pin(self.inner.call(call));
        }

        let claims = bearer_token(&call).and_then(|token| self.validator.validate(token));
        match claims {
            Ok(claims) => {
                call.extensions.insert(claims);
                Box::pin(self.inner.call(call))
            }
            Err(e) => {
                debug!(method = %call.method, error = %e, "rejected unauthenticated call");
                Box::pin(async move { Err(Status::unauthenticated(e.to_string())) })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use accounts_core::Code;
    use http::{HeaderMap, HeaderValue};
    use tower::ServiceExt;

    use super::*;
    use crate::security::Claims;
    use crate::service::call::ResponseData;

    #[derive(Debug)]
    struct FixedValidator;

    impl TokenValidator for FixedValidator {
        fn validate(&self, token: &str) -> Result<Claims, AuthError> {
            if token == "good" {
                Ok(Claims {
                    sub: "u1".to_string(),
                    exp: 0,
                    sid: String::new(),
                    roles: String::new(),
                })
            } else {
                Err(AuthError::Invalid("bad signature".to_string()))
            }
        }
    }

    fn layer() -> AuthLayer {
        AuthLayer::new(
            Arc::new(FixedValidator),
            ["GetCustomerProfile".to_string()].into_iter().collect(),
        )
    }

    fn call(method: &str, auth: Option<&'static str>) -> Call {
        let mut md = HeaderMap::new();
        if let Some(v) = auth {
            md.insert("authorization", HeaderValue::from_static(v));
        }
        Call::new(method, md, Vec::new())
    }

    /// Handler that counts calls and echoes the claims subject.
    #[derive(Clone)]
    struct CountingHandler {
        hits: Arc<AtomicU32>,
    }

    impl Service<Call> for CountingHandler {
        type Response = HandlerResult;
        type Error = Status;
        type Future = CallFuture<HandlerResult>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, call: Call) -> Self::Future {
            self.hits.fetch_add(1, Ordering::SeqCst);
            let sub = call
                .extensions
                .get::<Claims>()
                .map(|c| c.sub.clone())
                .unwrap_or_default();
            Box::pin(async move { Ok(Ok(ResponseData::Unary(serde_json::Value::String(sub)))) })
        }
    }

    fn counting_handler(hits: Arc<AtomicU32>) -> CountingHandler {
        CountingHandler { hits }
    }

    #[tokio::test]
    async fn unprotected_method_passes_without_token() {
        let hits = Arc::new(AtomicU32::new(0));
        let svc = layer().layer(counting_handler(Arc::clone(&hits)));
        assert!(svc.oneshot(call("Login", None)).await.is_ok());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn protected_method_without_token_is_rejected_before_handler() {
        let hits = Arc::new(AtomicU32::new(0));
        let svc = layer().layer(counting_handler(Arc::clone(&hits)));
        let err = svc.oneshot(call("GetCustomerProfile", None)).await.unwrap_err();
        assert_eq!(err.code, Code::Unauthenticated);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn protected_method_with_bad_token_is_rejected() {
        let hits = Arc::new(AtomicU32::new(0));
        let svc = layer().layer(counting_handler(Arc::clone(&hits)));
        let err = svc
            .oneshot(call("GetCustomerProfile", Some("Bearer nope")))
            .await
            .unwrap_err();
        assert_eq!(err.code, Code::Unauthenticated);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn protected_method_with_valid_token_reaches_handler_with_claims() {
        let hits = Arc::new(AtomicU32::new(0));
        let svc = layer().layer(counting_handler(Arc::clone(&hits)));
        let result = svc
            .oneshot(call("GetCustomerProfile", Some("Bearer good")))
            .await
            .unwrap();
        let Ok(ResponseData::Unary(sub)) = result else {
            panic!("expected data");
        };
        assert_eq!(sub, "u1");
    }

    #[tokio::test]
    async fn allow_list_match_is_exact() {
        let hits = Arc::new(AtomicU32::new(0));
        let svc = layer().layer(counting_handler(Arc::clone(&hits)));
        assert!(svc.oneshot(call("getcustomerprofile", None)).await.is_ok());
    }
}
