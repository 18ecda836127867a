//! Server lifecycle: `new()` wires state, `start()` binds, `serve()` runs
//! until the shutdown future resolves and then drains in-flight calls.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::handlers::{health_handler, liveness_handler, readiness_handler, rpc_handler, AppState};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;
use crate::service::middleware::RpcPipeline;

pub struct NetworkModule {
    config: NetworkConfig,
    pipeline: RpcPipeline,
    listener: Option<TcpListener>,
    shutdown: Arc<ShutdownController>,
    start_time: Instant,
}

impl NetworkModule {
    #[must_use]
    pub fn new(config: NetworkConfig, pipeline: RpcPipeline) -> Self {
        Self {
            config,
            pipeline,
            listener: None,
            shutdown: Arc::new(ShutdownController::new()),
            start_time: Instant::now(),
        }
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Routes:
    /// - `GET /health`, `GET /health/live`, `GET /health/ready`
    /// - `POST /rpc/{method}`
    pub fn build_router(&self) -> Router {
        let state = AppState {
            pipeline: self.pipeline.clone(),
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .route("/rpc/{method}", post(rpc_handler))
            .layer(DefaultBodyLimit::max(self.config.max_body_bytes))
            .layer(build_http_layers(&self.config))
            .with_state(state)
    }

    /// Binds the listener and returns the bound port.
    ///
    /// # Errors
    ///
    /// Fails if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let port = listener.local_addr()?.port();
        info!(host = %self.config.host, port, "listener bound");
        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves until `shutdown` resolves, then drains.
    ///
    /// # Errors
    ///
    /// Fails if [`NetworkModule::start`] was not called or on a fatal I/O
    /// error.
    pub async fn serve(mut self, shutdown: impl Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow::anyhow!("start() must be called before serve()"))?;
        let router = self.build_router();
        let ctrl = Arc::clone(&self.shutdown);

        ctrl.set_ready();
        info!("serving RPC over HTTP");

        let signal_ctrl = Arc::clone(&ctrl);
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                signal_ctrl.trigger_shutdown();
            })
            .await?;

        ctrl.trigger_shutdown();
        if ctrl.wait_for_drain(self.config.drain_timeout).await {
            info!("all calls drained");
        } else {
            warn!(in_flight = ctrl.in_flight_count(), "drain timeout expired");
        }
        Ok(())
    }
}
