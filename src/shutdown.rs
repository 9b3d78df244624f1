//! Graceful shutdown handling for Harbor services.
//!
//! Every long-running loop (workers, monitor watcher, mover) selects on a
//! watch receiver handed out by the [`ShutdownCoordinator`]; the
//! [`ShutdownManager`] then drains registered services in reverse
//! registration order with a deadline.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

/// Maximum time to wait for graceful shutdown before force exit.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shutdown coordinator for managing graceful service termination.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    shutdown_watch: watch::Receiver<bool>,
    shutdown_watch_tx: Arc<watch::Sender<bool>>,
    is_shutting_down: Arc<AtomicBool>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_SHUTDOWN_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let (shutdown_watch_tx, shutdown_watch) = watch::channel(false);
        Self {
            shutdown_watch,
            shutdown_watch_tx: Arc::new(shutdown_watch_tx),
            is_shutting_down: Arc::new(AtomicBool::new(false)),
            timeout,
        }
    }

    /// A watch receiver that flips to `true` when shutdown begins. Loops
    /// select on `.changed()` alongside their work.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.shutdown_watch.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::SeqCst)
    }

    /// Initiate shutdown. Idempotent.
    pub fn shutdown(&self) {
        if self
            .is_shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!("Initiating graceful shutdown");
            let _ = self.shutdown_watch_tx.send(true);
        }
    }

    /// Wait for the shutdown signal (for use in select! macros).
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown_watch.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Signal handler for graceful shutdown.
pub struct SignalHandler {
    coordinator: ShutdownCoordinator,
}

impl SignalHandler {
    pub fn new(coordinator: ShutdownCoordinator) -> Self {
        Self { coordinator }
    }

    /// Install signal handlers and run the handler loop.
    /// Returns when a shutdown signal is received.
    #[cfg(unix)]
    pub async fn run(self) {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        self.coordinator.shutdown();
    }

    #[cfg(not(unix))]
    pub async fn run(self) {
        use tokio::signal::ctrl_c;

        ctrl_c().await.expect("Failed to install Ctrl+C handler");
        info!("Received Ctrl+C");
        self.coordinator.shutdown();
    }
}

/// A handle for a running service that can be gracefully shut down.
pub struct ServiceHandle {
    name: String,
    shutdown_fn: Option<Pin<Box<dyn Future<Output = ()> + Send>>>,
}

impl ServiceHandle {
    pub fn new<S, F>(name: S, shutdown_fn: F) -> Self
    where
        S: Into<String>,
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            name: name.into(),
            shutdown_fn: Some(Box::pin(shutdown_fn)),
        }
    }

    /// Create a handle that just logs shutdown.
    pub fn simple<S: Into<String>>(name: S) -> Self {
        let name = name.into();
        let name_clone = name.clone();
        Self {
            name,
            shutdown_fn: Some(Box::pin(async move {
                info!(service = %name_clone, "Service shutdown complete");
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn shutdown(&mut self) {
        if let Some(shutdown_fn) = self.shutdown_fn.take() {
            info!(service = %self.name, "Shutting down service");
            shutdown_fn.await;
        }
    }
}

/// Manager for coordinating shutdown of multiple services.
pub struct ShutdownManager {
    coordinator: ShutdownCoordinator,
    services: Vec<ServiceHandle>,
}

impl ShutdownManager {
    pub fn new(coordinator: ShutdownCoordinator) -> Self {
        Self {
            coordinator,
            services: Vec::new(),
        }
    }

    pub fn register(&mut self, handle: ServiceHandle) {
        info!(service = %handle.name(), "Registered service for managed shutdown");
        self.services.push(handle);
    }

    /// Wait for the shutdown signal, then drain services in reverse
    /// registration order within the coordinator's deadline.
    pub async fn run(mut self) {
        self.coordinator.wait_for_shutdown().await;

        info!(services = self.services.len(), "Shutdown initiated");

        let timeout = self.coordinator.timeout();
        let drain = async {
            while let Some(mut service) = self.services.pop() {
                service.shutdown().await;
            }
        };

        if tokio::time::timeout(timeout, drain).await.is_err() {
            error!("Shutdown timed out after {:?}", timeout);
        } else {
            info!("All services shut down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let coordinator = ShutdownCoordinator::new();
        assert!(!coordinator.is_shutting_down());

        coordinator.shutdown();
        coordinator.shutdown();
        assert!(coordinator.is_shutting_down());
    }

    #[tokio::test]
    async fn test_watch_flips_on_shutdown() {
        let coordinator = ShutdownCoordinator::new();
        let mut rx = coordinator.watch();
        assert!(!*rx.borrow());

        coordinator.shutdown();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn test_manager_drains_in_reverse_order() {
        let coordinator = ShutdownCoordinator::new();
        let mut manager = ShutdownManager::new(coordinator.clone());

        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for name in ["first", "second"] {
            let order = order.clone();
            manager.register(ServiceHandle::new(name, async move {
                order.lock().push(name);
            }));
        }

        coordinator.shutdown();
        tokio::time::timeout(Duration::from_millis(100), manager.run())
            .await
            .unwrap();

        assert_eq!(*order.lock(), vec!["second", "first"]);
    }
}
