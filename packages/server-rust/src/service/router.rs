//! Method routing: dispatches a [`Call`] to the handler registered for its
//! method name.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll};

use accounts_core::{AppError, Code, Params, RequestContext};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tower::util::BoxCloneSyncService;
use tower::{service_fn, Service};

use super::call::{Call, CallFuture, HandlerResult, ResponseData, Status};
use super::context::context_get;

/// Method names served by the accounts service.
pub mod methods {
    pub const LOGIN: &str = "Login";
    pub const CREATE_SUPPLIER: &str = "CreateSupplier";
    pub const EMAIL_CONFIRMATION: &str = "EmailConfirmation";
    pub const PASSWORD_FORGOT: &str = "PasswordForgot";
    pub const GET_CUSTOMER_PROFILE: &str = "GetCustomerProfile";
    pub const GET_SUPPLIER_PROFILE: &str = "GetSupplierProfile";
    pub const GET_SUPPLIER_DASHBOARD: &str = "GetSupplierDashboard";
    pub const CONFIG_LISTENER: &str = "ConfigListener";
}

/// A type-erased handler for one method.
pub type BoxedHandler = BoxCloneSyncService<Call, HandlerResult, Status>;

// ---------------------------------------------------------------------------
// Unary adapters
// ---------------------------------------------------------------------------

fn decode<Req: DeserializeOwned>(ctx: &RequestContext, body: &[u8]) -> Result<Req, AppError> {
    let body = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}".as_slice()
    } else {
        body
    };
    serde_json::from_slice(body).map_err(|e| {
        AppError::new(
            ctx,
            "accounts.service.decode",
            Code::InvalidArgument.translation_id(),
            &Params::new(),
            format!("invalid request body: {e}"),
            Code::InvalidArgument,
        )
    })
}

async fn run_unary<Req, Resp, F, Fut>(f: F, call: Call) -> HandlerResult
where
    Req: DeserializeOwned,
    Resp: Serialize,
    F: Fn(Arc<RequestContext>, Req) -> Fut,
    Fut: Future<Output = Result<Resp, AppError>>,
{
    let ctx = context_get(&call.extensions)?;
    let req = decode::<Req>(&ctx, &call.body)?;
    let resp = f(Arc::clone(&ctx), req).await?;
    ResponseData::unary(&resp).map_err(|e| {
        AppError::internal(&ctx, "accounts.service.encode", "failed to encode response", e)
    })
}

/// Wraps an async domain function as a handler.
///
/// The adapter fetches the request context, decodes the JSON body into `Req`
/// and serializes the `Resp` data branch. Domain errors stay in the
/// `Ok(Err(..))` branch so the sanitize layer can shape them.
pub fn unary<Req, Resp, F, Fut>(f: F) -> BoxedHandler
where
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    F: Fn(Arc<RequestContext>, Req) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, AppError>> + Send + 'static,
{
    BoxCloneSyncService::new(service_fn(move |call: Call| {
        let f = f.clone();
        async move { Ok::<HandlerResult, Status>(run_unary(f, call).await) }
    }))
}

// ---------------------------------------------------------------------------
// RpcRouter
// ---------------------------------------------------------------------------

/// Routes calls to handlers by exact method name.
///
/// Calls for an unregistered method fail with `Unimplemented`.
#[derive(Clone, Default)]
pub struct RpcRouter {
    handlers: HashMap<&'static str, BoxedHandler>,
}

impl RpcRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for `method`, replacing any previous one.
    pub fn register<S>(&mut self, method: &'static str, handler: S)
    where
        S: Service<Call, Response = HandlerResult, Error = Status> + Clone + Send + Sync + 'static,
        S::Future: Send + 'static,
    {
        self.handlers.insert(method, BoxCloneSyncService::new(handler));
    }

    /// Builder-style [`RpcRouter::register`].
    #[must_use]
    pub fn route<S>(mut self, method: &'static str, handler: S) -> Self
    where
        S: Service<Call, Response = HandlerResult, Error = Status> + Clone + Send + Sync + 'static,
        S::Future: Send + 'static,
    {
        self.register(method, handler);
        self
    }

    #[must_use]
    pub fn methods(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for RpcRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcRouter")
            .field("methods", &self.methods())
            .finish()
    }
}

impl Service<Call> for RpcRouter {
    type Response = HandlerResult;
    type Error = Status;
    type Future = CallFuture<HandlerResult>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        for handler in self.handlers.values_mut() {
            match handler.poll_ready(cx) {
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: Call) -> Self::Future {
        match self.handlers.get_mut(call.method.as_str()) {
            Some(handler) => handler.call(call),
            None => {
                let method = call.method;
                Box::pin(async move { Err(Status::unimplemented(format!("unknown method {method}"))) })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
