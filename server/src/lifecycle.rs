//! Application lifecycle management and graceful shutdown.
//!
//! An [`Application`] owns the HTTP listener, an optional metrics listener
//! and every background task of the process (consumer, registry sweeper,
//! registry client). When a shutdown signal is received (Ctrl+C or SIGTERM):
//!
//! 1. The HTTP server stops accepting new connections
//! 2. The shutdown signal is broadcast to all background tasks
//! 3. Each task gets the configured timeout to finish its current work
//! 4. Clean exit

use axum::Router;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Running application with all background tasks.
pub struct Application {
    listener: TcpListener,
    app: Router,
    metrics: Option<(TcpListener, Router)>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_timeout: Duration,
}

impl Application {
    /// Create a new application serving `app` on `listener`.
    ///
    /// Background tasks must subscribe to `shutdown_tx` before they are
    /// handed over with [`with_task`](Self::with_task).
    #[must_use]
    pub fn new(
        listener: TcpListener,
        app: Router,
        shutdown_tx: broadcast::Sender<()>,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            listener,
            app,
            metrics: None,
            tasks: Vec::new(),
            shutdown_tx,
            shutdown_timeout,
        }
    }

    /// Serve `router` (the Prometheus scrape endpoint) on a second listener.
    #[must_use]
    pub fn with_metrics(mut self, listener: TcpListener, router: Router) -> Self {
        self.metrics = Some((listener, router));
        self
    }

    /// Add a background task that stops on the shutdown broadcast.
    #[must_use]
    pub fn with_task(mut self, name: &'static str, handle: JoinHandle<()>) -> Self {
        self.tasks.push((name, handle));
        self
    }

    /// Run until a shutdown signal arrives, then stop everything.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP server fails.
    pub async fn run(self) -> std::io::Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `signal` completes, then stop everything.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP server fails.
    pub async fn run_until(
        mut self,
        signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        if let Some((listener, router)) = self.metrics.take() {
            let mut shutdown = self.shutdown_tx.subscribe();
            let handle = tokio::spawn(async move {
                let stopped = async move {
                    let _ = shutdown.recv().await;
                };
                if let Err(e) = axum::serve(listener, router)
                    .with_graceful_shutdown(stopped)
                    .await
                {
                    error!(error = %e, "Metrics server failed");
                }
            });
            self.tasks.push(("metrics", handle));
        }

        let address = self.listener.local_addr()?;
        info!(%address, "HTTP server listening for requests");
        let served = axum::serve(self.listener, self.app)
            .with_graceful_shutdown(signal)
            .await;

        info!("HTTP server stopped, initiating graceful shutdown...");
        let _ = self.shutdown_tx.send(());
        await_shutdown(self.tasks, self.shutdown_timeout).await;

        info!("Graceful shutdown complete");
        served
    }
}

/// Wait for all background tasks, giving each `timeout` to finish.
async fn await_shutdown(tasks: Vec<(&'static str, JoinHandle<()>)>, timeout: Duration) {
    for (name, handle) in tasks {
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => info!(task = name, "Task stopped gracefully"),
            Ok(Err(e)) => warn!(task = name, error = %e, "Task failed"),
            Err(_) => warn!(task = name, "Task shutdown timed out"),
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// A handler that cannot be installed never fires; the other one still does.
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
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::routing::get;

    #[tokio::test]
    async fn tasks_stop_on_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (shutdown_tx, _) = broadcast::channel(1);

        let mut rx = shutdown_tx.subscribe();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let task = tokio::spawn(async move {
            let _ = rx.recv().await;
            let _ = done_tx.send(());
        });

        let app = Application::new(
            listener,
            Router::new().route("/", get(|| async { "ok" })),
            shutdown_tx,
            Duration::from_secs(1),
        )
        .with_task("waiter", task);

        app.run_until(async {}).await.unwrap();
        assert!(done_rx.await.is_ok());
    }
}
