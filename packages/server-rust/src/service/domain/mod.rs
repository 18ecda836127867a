//! Account operations behind the RPC methods.
//!
//! Each operation is an `async fn` on [`Accounts`] taking the request context
//! and the decoded request. Domain failures are returned as [`AppError`]
//! values; the pipeline turns them into the error branch of the reply.

mod email_confirmation;
mod login;
mod password_forgot;
mod profile;
mod signup;
pub mod validate;

#[cfg(test)]
pub(crate) mod testkit;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use accounts_core::{AppError, Code, DbError, DbErrorKind, Params, QueuePriority, RequestContext, TaskOptions};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tower::service_fn;
use tower::util::BoxCloneSyncService;

use super::audit::{AuditGuard, AuditSink};
use super::call::{Call, ConfigSubscription, HandlerResult, ResponseData, Status};
use super::context::context_get;
use super::router::{methods, unary, BoxedHandler, RpcRouter};
use crate::config::ConfigStore;
use crate::objects::ObjectStore;
use crate::oauth::OAuthProvider;
use crate::store::UsersStore;
use crate::tasks::TaskDistributor;

/// Options for account emails: critical tier, 10 attempts, sent after 10s.
#[must_use]
pub fn email_task_options() -> TaskOptions {
    TaskOptions::default()
        .priority(QueuePriority::Critical)
        .max_retry(10)
        .process_in(Duration::from_secs(10))
}

/// Account service state shared by every handler.
pub struct Accounts {
    store: Arc<dyn UsersStore>,
    tasks: TaskDistributor,
    oauth: Arc<dyn OAuthProvider>,
    objects: Arc<dyn ObjectStore>,
    config: Arc<ConfigStore>,
    audit: Arc<dyn AuditSink>,
}

impl std::fmt::Debug for Accounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accounts").finish_non_exhaustive()
    }
}

impl Accounts {
    #[must_use]
    pub fn new(
        store: Arc<dyn UsersStore>,
        tasks: TaskDistributor,
        oauth: Arc<dyn OAuthProvider>,
        objects: Arc<dyn ObjectStore>,
        config: Arc<ConfigStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            tasks,
            oauth,
            objects,
            config,
            audit,
        }
    }

    fn audit(&self, ctx: &RequestContext, event: &str) -> AuditGuard {
        AuditGuard::open(Arc::clone(&self.audit), ctx, event)
    }

    /// Router with every accounts method registered.
    #[must_use]
    pub fn router(self: &Arc<Self>) -> RpcRouter {
        RpcRouter::new()
            .route(methods::LOGIN, bind(self, Self::login))
            .route(methods::CREATE_SUPPLIER, bind(self, Self::create_supplier))
            .route(methods::EMAIL_CONFIRMATION, bind(self, Self::email_confirmation))
            .route(methods::PASSWORD_FORGOT, bind(self, Self::password_forgot))
            .route(methods::GET_CUSTOMER_PROFILE, bind(self, Self::customer_profile))
            .route(methods::GET_SUPPLIER_PROFILE, bind(self, Self::supplier_profile))
            .route(methods::GET_SUPPLIER_DASHBOARD, bind(self, Self::supplier_dashboard))
            .route(methods::CONFIG_LISTENER, self.config_listener())
    }

    /// Streaming handler: hands the transport a subscription to config changes.
    fn config_listener(&self) -> BoxedHandler {
        let config = Arc::clone(&self.config);
        BoxCloneSyncService::new(service_fn(move |call: Call| {
            let config = Arc::clone(&config);
            async move {
                let result = context_get(&call.extensions).map(|ctx| {
                    ResponseData::ConfigStream(ConfigSubscription {
                        ctx,
                        changes: config.subscribe(),
                    })
                });
                Ok::<HandlerResult, Status>(result)
            }
        }))
    }
}

/// Adapts `Accounts::op(self: Arc<Self>, ctx, req)` into a unary handler.
fn bind<Req, Resp, F, Fut>(accounts: &Arc<Accounts>, op: F) -> BoxedHandler
where
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    F: Fn(Arc<Accounts>, Arc<RequestContext>, Req) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, AppError>> + Send + 'static,
{
    let accounts = Arc::clone(accounts);
    unary(move |ctx, req| op(Arc::clone(&accounts), ctx, req))
}

// ---------------------------------------------------------------------------
// Shared error shapes
// ---------------------------------------------------------------------------

/// Error with a localized message and the same message on `field`.
pub(crate) fn field_error(
    ctx: &RequestContext,
    location: &str,
    field: &str,
    id: &str,
    params: &Params,
    detail: impl Into<String>,
    status: Code,
) -> AppError {
    AppError::new(ctx, location, id, params, detail, status).with_field_error(ctx, field, id, params)
}

/// Any store failure without a dedicated id.
pub(crate) fn internal_db(ctx: &RequestContext, location: &str, err: DbError) -> AppError {
    let detail = format!("{}: {}", err.kind, err.details);
    AppError::internal(ctx, location, detail, err)
}

/// `NotFound` becomes `id` with [`Code::NotFound`]; everything else is internal.
pub(crate) fn not_found_or_internal(ctx: &RequestContext, location: &str, id: &str, err: DbError) -> AppError {
    if err.is(DbErrorKind::NotFound) {
        AppError::new(ctx, location, id, &Params::new(), err.details.clone(), Code::NotFound).wrap(err)
    } else {
        internal_db(ctx, location, err)
    }
}

/// Failed lookup by email: `email.not_found` on the `email` field, or internal.
pub(crate) fn email_lookup_error(ctx: &RequestContext, location: &str, err: DbError) -> AppError {
    if err.is(DbErrorKind::NotFound) {
        field_error(ctx, location, "email", "email.not_found", &Params::new(), err.details.clone(), Code::NotFound).wrap(err)
    } else {
        internal_db(ctx, location, err)
    }
}

#[cfg(test)]
mod tests {
    use accounts_core::messages::LoginRequest;
    use accounts_core::Reply;
    use http::HeaderMap;
    use tower::ServiceExt;

    use super::testkit::Harness;
    use super::*;
    use crate::service::call::RpcReply;
    use crate::service::middleware::build_call_pipeline;

    #[test]
    fn router_registers_every_method() {
        let h = Harness::new();
        assert_eq!(
            h.accounts.router().methods(),
            vec![
                methods::CONFIG_LISTENER,
                methods::CREATE_SUPPLIER,
                methods::EMAIL_CONFIRMATION,
                methods::GET_CUSTOMER_PROFILE,
                methods::GET_SUPPLIER_DASHBOARD,
                methods::GET_SUPPLIER_PROFILE,
                methods::LOGIN,
                methods::PASSWORD_FORGOT,
            ]
        );
    }

    #[test]
    fn email_options() {
        let opts = email_task_options();
        assert_eq!(opts.priority, QueuePriority::Critical);
        assert_eq!(opts.max_retry, 10);
        assert_eq!(opts.process_in, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn login_through_pipeline_returns_data_union() {
        let h = Harness::new();
        h.seed_supplier("ada@example.com", "correct-horse-1");
        let pipeline = build_call_pipeline(
            h.accounts.router(),
            h.context_builder(),
            h.validator(),
            &crate::service::config::ServiceConfig::default(),
        );
        let body = serde_json::to_vec(&LoginRequest {
            email: "ada@example.com".to_string(),
            password: "correct-horse-1".to_string(),
            login_challenge: "ch-1".to_string(),
        })
        .unwrap();

        let reply = pipeline
            .oneshot(Call::new(methods::LOGIN, HeaderMap::new(), body))
            .await
            .unwrap();
        let RpcReply::Unary(Reply::Data(data)) = reply else {
            panic!("expected data branch");
        };
        assert!(data["metadata"]["redirect_to"]
            .as_str()
            .unwrap()
            .contains("login_verifier=ch-1"));
    }

    #[tokio::test]
    async fn config_listener_streams_changes() {
        let h = Harness::new();
        let pipeline = build_call_pipeline(
            h.accounts.router(),
            h.context_builder(),
            h.validator(),
            &crate::service::config::ServiceConfig::default(),
        );
        let reply = pipeline
            .oneshot(Call::new(methods::CONFIG_LISTENER, HeaderMap::new(), Vec::new()))
            .await
            .unwrap();
        let RpcReply::Stream(mut sub) = reply else {
            panic!("expected a stream");
        };

        let mut next = (*h.config.get()).clone();
        next.main.env = "production".to_string();
        h.config.replace(next);

        sub.changes.changed().await.unwrap();
        assert_eq!(sub.changes.borrow().main.env, "production");
    }
}
