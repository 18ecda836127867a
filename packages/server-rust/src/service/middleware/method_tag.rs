//! Tags the call scope with the invoked method name.

use std::task::{Context, Poll};

use tower::{Layer, Service};

use crate::service::call::{Call, CallFuture, CalledMethod, HandlerResult, Status};

// ---------------------------------------------------------------------------
// MethodTagLayer
// ---------------------------------------------------------------------------

/// First layer after sanitization. Later layers and handlers read the tag
/// through [`Call::called_method`].
#[derive(Debug, Clone, Default)]
pub struct MethodTagLayer;

impl<S> Layer<S> for MethodTagLayer {
    type Service = MethodTagService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MethodTagService { inner }
    }
}

// ---------------------------------------------------------------------------
// MethodTagService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MethodTagService<S> {
    inner: S,
}

impl<S> Service<Call> for MethodTagService<S>
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
        call.extensions.insert(CalledMethod(call.method.clone()));
        Box::pin(self.inner.call(call))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use http::HeaderMap;
    use tower::{service_fn, ServiceExt};

    use super::*;
    use crate::service::call::ResponseData;

    #[tokio::test]
    async fn inner_service_sees_method_tag() {
        let svc = MethodTagLayer.layer(service_fn(|call: Call| async move {
            let tag = call.called_method().unwrap_or_default().to_string();
            Ok::<HandlerResult, Status>(Ok(ResponseData::Unary(serde_json::Value::String(tag))))
        }));

        let result = svc
            .oneshot(Call::new("Login", HeaderMap::new(), Vec::new()))
            .await
            .unwrap();
        match result {
            Ok(ResponseData::Unary(v)) => assert_eq!(v, "Login"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
