//! The RPC service: call types, context construction, the interceptor
//! pipeline, routing, audit and the account operations.
//!
//! A call flows `Call -> SanitizeLayer -> ... -> RpcRouter -> handler` and
//! leaves as an [`RpcReply`].

pub mod audit;
pub mod call;
pub mod config;
pub mod context;
pub mod domain;
pub mod middleware;
pub mod router;

pub use audit::{AuditGuard, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use call::{Call, CallFuture, HandlerResult, ResponseData, RpcReply, Status};
pub use config::ServiceConfig;
pub use context::ContextBuilder;
pub use domain::Accounts;
pub use middleware::{build_call_pipeline, RpcPipeline};
pub use router::RpcRouter;
