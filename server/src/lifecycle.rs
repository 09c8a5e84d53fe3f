//! Application lifecycle and graceful shutdown.
//!
//! 1. **Startup**: spawn every consumer
//! 2. **Runtime**: consumers process messages until a shutdown signal
//! 3. **Shutdown**: broadcast the signal, then give each consumer the
//!    configured timeout to drain its lanes

use shipkafka_runtime::EventConsumer;
use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Running set of consumers.
pub struct Application {
    consumers: Vec<EventConsumer>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_timeout: Duration,
}

impl Application {
    /// Create an application from consumers subscribed to `shutdown_tx`.
    #[must_use]
    pub const fn new(
        consumers: Vec<EventConsumer>,
        shutdown_tx: broadcast::Sender<()>,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            consumers,
            shutdown_tx,
            shutdown_timeout,
        }
    }

    /// Run until Ctrl+C or SIGTERM.
    pub async fn run(self) {
        self.run_until(shutdown_signal()).await;
    }

    /// Run until `signal` completes, then shut down gracefully.
    pub async fn run_until(self, signal: impl Future<Output = ()>) {
        info!(consumer_count = self.consumers.len(), "Starting event consumers");
        let handles: Vec<_> = self
            .consumers
            .into_iter()
            .map(EventConsumer::spawn)
            .collect();

        signal.await;
        info!("Initiating graceful shutdown...");

        let _ = self.shutdown_tx.send(());

        for (idx, handle) in handles.into_iter().enumerate() {
            match tokio::time::timeout(self.shutdown_timeout, handle).await {
                Ok(Ok(())) => info!(consumer = idx, "Consumer stopped gracefully"),
                Ok(Err(e)) => warn!(consumer = idx, error = %e, "Consumer task failed"),
                Err(_) => warn!(consumer = idx, "Consumer shutdown timed out"),
            }
        }

        info!("Graceful shutdown complete");
    }
}

/// Wait for Ctrl+C or SIGTERM.
///
/// A handler that cannot be installed is logged and never fires.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal"),
        () = terminate => info!("Received SIGTERM signal"),
    }
}
