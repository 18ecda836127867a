//! Deadline and cancellation enforcement for calls.
//!
//! The budget comes from the call's request context when one is attached,
//! otherwise from the layer default.

use std::task::{Context, Poll};
use std::time::Duration;

use accounts_core::Code;
use tower::{Layer, Service};

use crate::service::call::{Call, CallFuture, HandlerResult, Status};

// ---------------------------------------------------------------------------
// TimeoutLayer
// ---------------------------------------------------------------------------

/// Tower layer that bounds each call by its context deadline.
///
/// A cancelled context ends the call with `Canceled` without waiting for the
/// handler.
#[derive(Debug, Clone)]
pub struct TimeoutLayer {
    default: Duration,
}

impl TimeoutLayer {
    #[must_use]
    pub fn new(default: Duration) -> Self {
        Self { default }
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService {
            inner,
            default: self.default,
        }
    }
}

// ---------------------------------------------------------------------------
// TimeoutService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
    default: Duration,
}

impl<S> Service<Call> for TimeoutService<S>
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
        let ctx = call.context();
        let budget = ctx
            .as_ref()
            .and_then(|c| c.remaining())
            .unwrap_or(self.default);
        let cancel = ctx.map(|c| c.cancellation().clone()).unwrap_or_default();
        let fut = self.inner.call(call);

        Box::pin(async move {
            tokio::select! {
                res = tokio::time::timeout(budget, fut) => match res {
                    Ok(result) => result,
                    Err(_elapsed) => Err(Status::deadline_exceeded(format!(
                        "call exceeded {}ms",
                        budget.as_millis()
                    ))),
                },
                () = cancel.cancelled() => Err(Status::new(Code::Canceled, "call cancelled")),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use accounts_core::RequestContext;
    use http::HeaderMap;
    use tower::ServiceExt;

    use super::*;
    use crate::service::call::ResponseData;

    struct SlowService {
        delay_ms: u64,
    }

    impl Service<Call> for SlowService {
        type Response = HandlerResult;
        type Error = Status;
        type Future = CallFuture<HandlerResult>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _call: Call) -> Self::Future {
            let delay = self.delay_ms;
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(Ok(ResponseData::Unary(serde_json::Value::Null)))
            })
        }
    }

    fn make_call(ctx: Option<RequestContext>) -> Call {
        let mut call = Call::new("Login", HeaderMap::new(), Vec::new());
        if let Some(ctx) = ctx {
            call.extensions.insert(Arc::new(ctx));
        }
        call
    }

    #[tokio::test]
    async fn completes_within_timeout() {
        let svc = TimeoutLayer::new(Duration::from_secs(1)).layer(SlowService { delay_ms: 10 });
        assert!(svc.oneshot(make_call(None)).await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn default_budget_applies_without_context() {
        let svc = TimeoutLayer::new(Duration::from_millis(50)).layer(SlowService { delay_ms: 500 });
        let err = svc.oneshot(make_call(None)).await.unwrap_err();
        assert_eq!(err.code, Code::DeadlineExceeded);
    }

    #[tokio::test]
    async fn context_deadline_wins_over_default() {
        let ctx = RequestContext::default().with_timeout(Duration::from_millis(30));
        let svc = TimeoutLayer::new(Duration::from_secs(10)).layer(SlowService { delay_ms: 500 });
        let err = svc.oneshot(make_call(Some(ctx))).await.unwrap_err();
        assert_eq!(err.code, Code::DeadlineExceeded);
    }

    #[tokio::test]
    async fn cancelled_context_stops_the_call() {
        let ctx = RequestContext::default();
        ctx.cancellation().cancel();
        let svc = TimeoutLayer::new(Duration::from_secs(10)).layer(SlowService { delay_ms: 500 });
        let err = svc.oneshot(make_call(Some(ctx))).await.unwrap_err();
        assert_eq!(err.code, Code::Canceled);
    }
}
