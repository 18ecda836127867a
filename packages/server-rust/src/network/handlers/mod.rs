//! axum handlers and the state they share.

pub mod health;
pub mod rpc;

pub use health::{health_handler, liveness_handler, readiness_handler};
pub use rpc::rpc_handler;

use std::sync::Arc;
use std::time::Instant;

use super::ShutdownController;
use crate::service::middleware::RpcPipeline;

/// Cloned into every handler; all fields are cheap handles.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: RpcPipeline,
    pub shutdown: Arc<ShutdownController>,
    pub start_time: Instant,
}
