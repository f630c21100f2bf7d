//! Server lifecycle management
//!
//! Starts the HTTP/WebSocket server and the idle sweeper, then tears both
//! down in order on SIGINT or SIGTERM.

use anyhow::Context;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use gramera_core::Config;
use gramera_presence::{spawn_idle_sweeper, PresenceHub};

pub struct GrameraServer {
    config: Config,
    hub: Arc<PresenceHub>,
}

impl GrameraServer {
    pub const fn new(config: Config, hub: Arc<PresenceHub>) -> Self {
        Self { config, hub }
    }

    /// Start all components and wait for shutdown signal
    pub async fn start(self) -> anyhow::Result<()> {
        info!("Starting Gramera server...");

        let shutdown = CancellationToken::new();

        let mut http_handle = self.start_http_server(shutdown.clone()).await?;

        let sweeper = self.config.presence.idle_timeout().map(|idle_timeout| {
            spawn_idle_sweeper(
                self.hub.clone(),
                idle_timeout,
                self.config.presence.sweep_interval(),
                shutdown.clone(),
            )
        });
        if sweeper.is_none() {
            info!("Idle eviction disabled");
        }

        info!("All components started successfully");

        // Wait for either the server to stop or a shutdown signal
        let stopped_early = tokio::select! {
            _ = &mut http_handle => {
                error!("HTTP server stopped unexpectedly");
                true
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
                false
            }
        };

        // Signal all components to shut down
        shutdown.cancel();

        self.shutdown((!stopped_early).then_some(http_handle), sweeper)
            .await;

        Ok(())
    }

    /// Gracefully shut down all components
    async fn shutdown(&self, http_handle: Option<JoinHandle<()>>, sweeper: Option<JoinHandle<()>>) {
        info!("Shutting down Gramera server...");

        // 1. Close every session so each transport loop ends and flushes
        let closed = self.hub.lifecycle().close_all();
        if closed > 0 {
            info!("Closed {} open session(s)", closed);
        }

        // 2. Wait for in-flight HTTP connections to drain (with timeout)
        if let Some(mut handle) = http_handle {
            let drain_timeout = self.config.presence.shutdown_drain();
            info!(
                "Waiting up to {}s for connections to drain...",
                drain_timeout.as_secs()
            );
            if tokio::time::timeout(drain_timeout, &mut handle).await.is_err() {
                warn!("Drain timeout reached, proceeding with shutdown");
                handle.abort();
            }
        }

        // 3. Stop the sweeper
        if let Some(handle) = sweeper {
            let _ = handle.await;
        }

        info!("Gramera server shut down");
    }

    /// Bind the listener and start the HTTP server with graceful shutdown support
    async fn start_http_server(&self, shutdown: CancellationToken) -> anyhow::Result<JoinHandle<()>> {
        let http_address = self.config.http_address();
        let http_router = gramera_api::create_router(self.hub.clone(), &self.config.server)
            .context("Failed to build HTTP router")?;

        let listener = tokio::net::TcpListener::bind(&http_address)
            .await
            .with_context(|| format!("Failed to bind HTTP address {http_address}"))?;

        info!("HTTP server listening on {}", http_address);

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, http_router)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                error!("HTTP server error: {}", e);
            }

            info!("HTTP server shut down gracefully");
        });

        Ok(handle)
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
