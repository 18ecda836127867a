//! Pipeline composition: wraps the router with every interceptor.

use std::sync::Arc;

use tower::util::BoxCloneSyncService;
use tower::ServiceBuilder;

use super::auth::AuthLayer;
use super::context::ContextLayer;
use super::load_shed::LoadShedLayer;
use super::method_tag::MethodTagLayer;
use super::metrics::MetricsLayer;
use super::sanitize::SanitizeLayer;
use super::timeout::TimeoutLayer;
use crate::security::TokenValidator;
use crate::service::call::{Call, RpcReply, Status};
use crate::service::config::ServiceConfig;
use crate::service::context::ContextBuilder;
use crate::service::router::RpcRouter;

/// The assembled, cloneable call pipeline.
pub type RpcPipeline = BoxCloneSyncService<Call, RpcReply, Status>;

/// Build the call pipeline around `router`.
///
/// Layer order (outermost to innermost):
/// 1. `SanitizeLayer` shapes every outcome for the wire
/// 2. `MethodTagLayer` records the method name
/// 3. `ContextLayer` builds the request context
/// 4. `AuthLayer` gates protected methods
/// 5. `LoadShedLayer` rejects when overloaded
/// 6. `TimeoutLayer` enforces the context deadline
/// 7. `MetricsLayer` records timing and outcome
#[must_use]
pub fn build_call_pipeline(
    router: RpcRouter,
    builder: Arc<ContextBuilder>,
    validator: Arc<dyn TokenValidator>,
    config: &ServiceConfig,
) -> RpcPipeline {
    let svc = ServiceBuilder::new()
        .layer(SanitizeLayer::new(Arc::clone(&builder)))
        .layer(MethodTagLayer)
        .layer(ContextLayer::new(builder, config.default_call_timeout))
        .layer(AuthLayer::new(validator, config.protected_methods.clone()))
        .layer(LoadShedLayer::new(config.max_concurrent_calls))
        .layer(TimeoutLayer::new(config.default_call_timeout))
        .layer(MetricsLayer)
        .service(router);
    BoxCloneSyncService::new(svc)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
