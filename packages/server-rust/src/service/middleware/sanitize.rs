//! Outermost layer: the only place a domain error is turned into a reply.
//!
//! Full errors (detail, cause, location) are logged here and never leave the
//! process. Transport statuses get a localized, generic message.

use std::sync::Arc;
use std::task::{Context, Poll};

use accounts_core::{AppError, Reply};
use tower::{Layer, Service};
use tracing::{error, warn};

use crate::service::call::{Call, CallFuture, HandlerResult, ResponseData, RpcReply, Status};
use crate::service::context::ContextBuilder;

fn log_domain_error(method: &str, err: &AppError) {
    let cause = err.cause.as_ref().map(|c| format!("{c:#}")).unwrap_or_default();
    error!(
        method,
        location = %err.location,
        id = %err.id,
        request_id = %err.request_id,
        status = ?err.status_code,
        detail = %err.detailed_error,
        cause = %cause,
        "call failed"
    );
}

// ---------------------------------------------------------------------------
// SanitizeLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SanitizeLayer {
    builder: Arc<ContextBuilder>,
}

impl SanitizeLayer {
    #[must_use]
    pub fn new(builder: Arc<ContextBuilder>) -> Self {
        Self { builder }
    }
}

impl<S> Layer<S> for SanitizeLayer {
    type Service = SanitizeService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SanitizeService {
            inner,
            builder: Arc::clone(&self.builder),
        }
    }
}

// ---------------------------------------------------------------------------
// SanitizeService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SanitizeService<S> {
    inner: S,
    builder: Arc<ContextBuilder>,
}

impl<S> Service<Call> for SanitizeService<S>
where
    S: Service<Call, Response = HandlerResult, Error = Status> + Send,
    S::Future: Send + 'static,
{
    type Response = RpcReply;
    type Error = Status;
    type Future = CallFuture<RpcReply>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: Call) -> Self::Future {
        let method = call.method.clone();
        let metadata = call.metadata.clone();
        let builder = Arc::clone(&self.builder);
        let fut = self.inner.call(call);

        Box::pin(async move {
            match fut.await {
                Ok(Ok(ResponseData::Unary(data))) => Ok(RpcReply::Unary(Reply::Data(data))),
                Ok(Ok(ResponseData::ConfigStream(sub))) => Ok(RpcReply::Stream(sub)),
                Ok(Err(err)) => {
                    log_domain_error(&method, &err);
                    Ok(RpcReply::Unary(Reply::Error(err.into_wire())))
                }
                Err(status) => {
                    warn!(method = %method, code = ?status.code, message = %status.message, "call rejected");
                    let message = builder.translate(&metadata, status.code.translation_id());
                    Err(Status::new(status.code, message))
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use accounts_core::{Code, Params, RequestContext, TranslationStore, TranslationTable};
    use http::{HeaderMap, HeaderValue};
    use tower::ServiceExt;

    use super::*;
    use crate::config::{AppConfig, ConfigStore};

    enum Outcome {
        Data,
        Domain,
        Rejected,
    }

    struct FixedService(Outcome);

    impl Service<Call> for FixedService {
        type Response = HandlerResult;
        type Error = Status;
        type Future = CallFuture<HandlerResult>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _call: Call) -> Self::Future {
            let result = match self.0 {
                Outcome::Data => Ok(Ok(ResponseData::Unary(serde_json::json!({"ok": true})))),
                Outcome::Domain => {
                    let mut err = AppError::new(
                        &RequestContext::default(),
                        "accounts.test",
                        "email.not_found",
                        &Params::new(),
                        "select from users: no rows; dsn=postgres://secret",
                        Code::NotFound,
                    );
                    err = err.wrap(anyhow::anyhow!("driver stack"));
                    Ok(Err(err))
                }
                Outcome::Rejected => Err(Status::unauthenticated("jwt: bad signature")),
            };
            Box::pin(async move { result })
        }
    }

    fn builder() -> Arc<ContextBuilder> {
        let mut config = AppConfig::default();
        config.localization.available_locales = vec!["en".to_string(), "es".to_string()];
        let mut en = HashMap::new();
        en.insert("error.unauthenticated".to_string(), "Please sign in".to_string());
        let mut es = HashMap::new();
        es.insert("error.unauthenticated".to_string(), "Inicia sesión".to_string());
        let mut raw = HashMap::new();
        raw.insert("en".to_string(), en);
        raw.insert("es".to_string(), es);
        Arc::new(ContextBuilder::new(
            Arc::new(ConfigStore::new(config)),
            Arc::new(TranslationStore::new(TranslationTable::compile("en", &raw).unwrap())),
        ))
    }

    fn call(lang: &'static str) -> Call {
        let mut md = HeaderMap::new();
        md.insert("accept-language", HeaderValue::from_static(lang));
        Call::new("Login", md, Vec::new())
    }

    #[tokio::test]
    async fn data_passes_through() {
        let svc = SanitizeLayer::new(builder()).layer(FixedService(Outcome::Data));
        let RpcReply::Unary(Reply::Data(v)) = svc.oneshot(call("en")).await.unwrap() else {
            panic!("expected data");
        };
        assert_eq!(v["ok"], true);
    }

    #[tokio::test]
    async fn domain_error_becomes_wire_error_without_diagnostics() {
        let svc = SanitizeLayer::new(builder()).layer(FixedService(Outcome::Domain));
        let RpcReply::Unary(Reply::Error(wire)) = svc.oneshot(call("en")).await.unwrap() else {
            panic!("expected error branch");
        };
        assert_eq!(wire.id, "email.not_found");
        assert_eq!(wire.status_code, Code::NotFound);
        let json = serde_json::to_string(&wire).unwrap();
        assert!(!json.contains("secret"));
        assert!(!json.contains("driver stack"));
        assert!(!json.contains("accounts.test"));
    }

    #[tokio::test]
    async fn status_message_is_replaced_by_localized_text() {
        let svc = SanitizeLayer::new(builder()).layer(FixedService(Outcome::Rejected));
        let status = svc.oneshot(call("es")).await.unwrap_err();
        assert_eq!(status.code, Code::Unauthenticated);
        assert_eq!(status.message, "Inicia sesión");
    }
}
