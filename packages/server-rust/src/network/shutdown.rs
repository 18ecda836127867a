//! Health state and in-flight call tracking for graceful shutdown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::watch;

/// `Starting -> Ready -> Draining -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Starting,
    Ready,
    Draining,
    Stopped,
}

impl HealthState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

/// Shared by the server loop, the probes and every RPC handler.
#[derive(Debug)]
pub struct ShutdownController {
    signal: watch::Sender<bool>,
    in_flight: Arc<AtomicU64>,
    state: ArcSwap<HealthState>,
}

impl ShutdownController {
    #[must_use]
    pub fn new() -> Self {
        let (signal, _rx) = watch::channel(false);
        Self {
            signal,
            in_flight: Arc::new(AtomicU64::new(0)),
            state: ArcSwap::from_pointee(HealthState::Starting),
        }
    }

    pub fn set_ready(&self) {
        self.state.store(Arc::new(HealthState::Ready));
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.state.load()
    }

    /// Fires once [`ShutdownController::trigger_shutdown`] is called.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.signal.subscribe()
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.signal.borrow()
    }

    /// Moves to `Draining` and wakes every receiver. Idempotent.
    pub fn trigger_shutdown(&self) {
        self.state.store(Arc::new(HealthState::Draining));
        self.signal.send_replace(true);
    }

    /// Counts a call as in flight until the guard drops.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Waits for in-flight calls to finish. Returns `false` on timeout, in
    /// which case the state stays `Draining`.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.in_flight_count() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.state.store(Arc::new(HealthState::Stopped));
        true
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine() {
        let c = ShutdownController::new();
        assert_eq!(c.health_state(), HealthState::Starting);
        c.set_ready();
        assert_eq!(c.health_state(), HealthState::Ready);
        assert!(!c.is_shutting_down());
        c.trigger_shutdown();
        c.trigger_shutdown();
        assert_eq!(c.health_state(), HealthState::Draining);
        assert!(c.is_shutting_down());
    }

    #[test]
    fn guards_count_in_flight_calls() {
        let c = ShutdownController::new();
        let a = c.in_flight_guard();
        let b = c.in_flight_guard();
        assert_eq!(c.in_flight_count(), 2);
        drop(a);
        drop(b);
        assert_eq!(c.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn receivers_are_woken() {
        let c = ShutdownController::new();
        let mut rx = c.shutdown_receiver();
        c.trigger_shutdown();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn drain_waits_for_guards() {
        let c = Arc::new(ShutdownController::new());
        let guard = c.in_flight_guard();
        c.trigger_shutdown();
        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            drop(guard);
        });
        assert!(c.wait_for_drain(Duration::from_secs(2)).await);
        assert_eq!(c.health_state(), HealthState::Stopped);
        release.await.unwrap();
    }

    #[tokio::test]
    async fn drain_times_out_with_calls_outstanding() {
        let c = ShutdownController::new();
        let _guard = c.in_flight_guard();
        c.trigger_shutdown();
        assert!(!c.wait_for_drain(Duration::from_millis(30)).await);
        assert_eq!(c.health_state(), HealthState::Draining);
    }
}
