//! Builds the request context and attaches it to the call scope.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::service::call::{Call, CallFuture, HandlerResult, Status};
use crate::service::context::ContextBuilder;

/// Prefix used to derive a context path when the metadata carries none.
pub const PATH_PREFIX: &str = "/accounts.v1.AccountsService/";

// ---------------------------------------------------------------------------
// ContextLayer
// ---------------------------------------------------------------------------

/// Tower layer that attaches an `Arc<RequestContext>` to every call and runs
/// the rest of the pipeline inside a `call` span carrying the request id.
///
/// The context gets `default_timeout` as its deadline; handlers may narrow it
/// further for outbound calls.
#[derive(Debug, Clone)]
pub struct ContextLayer {
    builder: Arc<ContextBuilder>,
    default_timeout: Duration,
}

impl ContextLayer {
    #[must_use]
    pub fn new(builder: Arc<ContextBuilder>, default_timeout: Duration) -> Self {
        Self {
            builder,
            default_timeout,
        }
    }
}

impl<S> Layer<S> for ContextLayer {
    type Service = ContextService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ContextService {
            inner,
            builder: Arc::clone(&self.builder),
            default_timeout: self.default_timeout,
        }
    }
}

// ---------------------------------------------------------------------------
// ContextService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ContextService<S> {
    inner: S,
    builder: Arc<ContextBuilder>,
    default_timeout: Duration,
}

impl<S> Service<Call> for ContextService<S>
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
        let fallback_path = format!("{PATH_PREFIX}{}", call.method);
        let ctx = self
            .builder
            .build(&call.metadata, &fallback_path)
            .with_timeout(self.default_timeout);
        let span = info_span!(
            "call",
            method = %call.method,
            request_id = %ctx.request_id(),
            path = %ctx.path(),
        );
        call.extensions.insert(Arc::new(ctx));
        let fut = span.in_scope(|| self.inner.call(call));
        Box::pin(fut.instrument(span))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use accounts_core::{TranslationStore, TranslationTable};
    use http::{HeaderMap, HeaderValue};
    use parking_lot::Mutex;
    use tower::{service_fn, ServiceExt};
    use tracing::field::{Field, Visit};
    use tracing::span::{Attributes, Id};
    use tracing_subscriber::layer::SubscriberExt;

    use super::*;
    use crate::config::{AppConfig, ConfigStore};
    use crate::service::call::ResponseData;

    #[tokio::test]
    async fn attaches_context_with_deadline_and_path() {
        let mut config = AppConfig::default();
        config.localization.available_locales = vec!["en".to_string(), "es".to_string()];
        let builder = Arc::new(ContextBuilder::new(
            Arc::new(ConfigStore::new(config)),
            Arc::new(TranslationStore::new(TranslationTable::empty("en"))),
        ));

        let svc = ContextLayer::new(builder, Duration::from_secs(5)).layer(service_fn(
            |call: Call| async move {
                let ctx = call.context().expect("context attached");
                let body = serde_json::json!({
                    "lang": ctx.accept_language(),
                    "path": ctx.path(),
                    "has_deadline": ctx.deadline().is_some(),
                });
                Ok::<HandlerResult, Status>(Ok(ResponseData::Unary(body)))
            },
        ));

        let mut md = HeaderMap::new();
        md.insert("accept-language", HeaderValue::from_static("es"));
        let result = svc.oneshot(Call::new("Login", md, Vec::new())).await.unwrap();

        let Ok(ResponseData::Unary(body)) = result else {
            panic!("expected data");
        };
        assert_eq!(body["lang"], "es");
        assert_eq!(body["path"], "/accounts.v1.AccountsService/Login");
        assert_eq!(body["has_deadline"], true);
    }

    fn builder() -> Arc<ContextBuilder> {
        Arc::new(ContextBuilder::new(
            Arc::new(ConfigStore::default()),
            Arc::new(TranslationStore::new(TranslationTable::empty("en"))),
        ))
    }

    #[derive(Default)]
    struct RequestIdField(String);

    impl Visit for RequestIdField {
        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            if field.name() == "request_id" {
                self.0 = format!("{value:?}");
            }
        }
    }

    /// Records `(span name, request_id)` for every new span.
    #[derive(Clone, Default)]
    struct Spans(Arc<Mutex<Vec<(String, String)>>>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for Spans {
        fn on_new_span(&self, attrs: &Attributes<'_>, _id: &Id, _ctx: tracing_subscriber::layer::Context<'_, S>) {
            let mut field = RequestIdField::default();
            attrs.record(&mut field);
            self.0.lock().push((attrs.metadata().name().to_string(), field.0));
        }
    }

    #[tokio::test]
    async fn inner_services_run_inside_a_call_span() {
        let spans = Spans::default();
        let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(spans.clone()));

        let svc = ContextLayer::new(builder(), Duration::from_secs(5)).layer(service_fn(|_call: Call| async {
            let current = tracing::Span::current()
                .metadata()
                .map(|m| m.name().to_string());
            Ok::<HandlerResult, Status>(Ok(ResponseData::Unary(serde_json::json!({ "span": current }))))
        }));

        let mut md = HeaderMap::new();
        md.insert("x-request-id", HeaderValue::from_static("req-9"));
        let result = svc.oneshot(Call::new("Login", md, Vec::new())).await.unwrap();

        let Ok(ResponseData::Unary(body)) = result else {
            panic!("expected data");
        };
        assert_eq!(body["span"], "call");
        assert_eq!(*spans.0.lock(), vec![("call".to_string(), "req-9".to_string())]);
    }
}
