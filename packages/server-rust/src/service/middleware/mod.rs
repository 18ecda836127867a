//! Tower middleware layers for the call pipeline.
//!
//! - [`sanitize`]: Shapes outcomes for the wire and logs full errors
//! - [`method_tag`]: Records the invoked method
//! - [`context`]: Builds the request context
//! - [`auth`]: Bearer-token gate for protected methods
//! - [`load_shed`]: Semaphore-based concurrency limiting
//! - [`timeout`]: Context deadline and cancellation
//! - [`metrics`]: Call timing and outcome via `tracing` spans
//! - [`pipeline`]: Composes all layers into a single service stack

pub mod auth;
pub mod context;
pub mod load_shed;
pub mod method_tag;
pub mod metrics;
pub mod pipeline;
pub mod sanitize;
pub mod timeout;

pub use auth::AuthLayer;
pub use context::ContextLayer;
pub use load_shed::LoadShedLayer;
pub use method_tag::MethodTagLayer;
pub use metrics::MetricsLayer;
pub use pipeline::{build_call_pipeline, RpcPipeline};
pub use sanitize::SanitizeLayer;
pub use timeout::TimeoutLayer;
