//! Call timing and outcome recorded through `tracing` spans.

use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::service::call::{Call, CallFuture, HandlerResult, Status};

/// Classifies a finished call for the `outcome` span field.
#[must_use]
pub fn outcome(result: &Result<HandlerResult, Status>) -> &'static str {
    match result {
        Ok(Ok(_)) => "ok",
        Ok(Err(_)) => "domain_error",
        Err(_) => "status_error",
    }
}

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments calls with timing and outcome.
#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<Call> for MetricsService<S>
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

    fn call(&mut self, call: Call) -> Self::Future {
        let method = call.method.clone();
        let request_id = call
            .context()
            .map(|c| c.request_id().to_string())
            .unwrap_or_default();

        let span = info_span!(
            "rpc",
            method = %method,
            request_id = %request_id,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(call);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = start.elapsed().as_millis() as u64;
                let outcome = outcome(&result);
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                tracing::info!(method = %method, duration_ms, outcome, "rpc complete");
                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use accounts_core::{AppError, Code};
    use http::HeaderMap;
    use tower::ServiceExt;

    use super::*;
    use crate::service::call::ResponseData;

    /// Completes immediately with whatever it was built with.
    struct FixedService {
        fail: Option<Code>,
        domain_error: bool,
    }

    impl Service<Call> for FixedService {
        type Response = HandlerResult;
        type Error = Status;
        type Future = CallFuture<HandlerResult>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _call: Call) -> Self::Future {
            let fail = self.fail;
            let domain_error = self.domain_error;
            Box::pin(async move {
                if let Some(code) = fail {
                    return Err(Status::new(code, "boom"));
                }
                if domain_error {
                    return Ok(Err(AppError::empty()));
                }
                Ok(Ok(ResponseData::Unary(serde_json::Value::Null)))
            })
        }
    }

    fn make_call() -> Call {
        Call::new("Login", HeaderMap::new(), Vec::new())
    }

    #[tokio::test]
    async fn passes_results_through_unchanged() {
        let svc = MetricsLayer.layer(FixedService {
            fail: None,
            domain_error: false,
        });
        assert!(svc.oneshot(make_call()).await.unwrap().is_ok());

        let svc = MetricsLayer.layer(FixedService {
            fail: Some(Code::Unavailable),
            domain_error: false,
        });
        assert_eq!(svc.oneshot(make_call()).await.unwrap_err().code, Code::Unavailable);
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(outcome(&Ok(Ok(ResponseData::Unary(serde_json::Value::Null)))), "ok");
        assert_eq!(outcome(&Ok(Err(AppError::empty()))), "domain_error");
        assert_eq!(outcome(&Err(Status::internal("x"))), "status_error");
    }
}
