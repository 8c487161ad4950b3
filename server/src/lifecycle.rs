//! Application lifecycle management and graceful shutdown.
//!
//! 1. **Startup**: install metrics, connect the bus, start the hub
//! 2. **Runtime**: serve HTTP while the hub relays updates
//! 3. **Shutdown**: on Ctrl+C or SIGTERM, end every SSE stream, drain the
//!    HTTP server, then stop ingestion
//!
//! SSE responses never finish on their own, so subscriptions are closed as
//! soon as the signal fires. Otherwise the graceful drain would wait on
//! every connected browser.
//!
//! # Example
//!
//! ```rust,ignore
//! let app = Application::build(Config::from_env()).await?;
//! app.run().await?;
//! ```

use crate::config::Config;
use anyhow::Context;
use availability_relay_core::MessageBus;
use availability_relay_redis::RedisBus;
use availability_relay_runtime::metrics::MetricsExporter;
use availability_relay_runtime::{BroadcastHub, IngestTask};
use availability_relay_web::{AppState, RouterOptions, relay_router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Running relay: bound listener, router and started hub.
pub struct Application {
    listener: TcpListener,
    router: axum::Router,
    hub: BroadcastHub,
    ingest: IngestTask,
}

impl Application {
    /// Build the production application from configuration.
    ///
    /// The Redis publisher connects lazily, so startup succeeds while Redis
    /// is down; the hub then works through its reconnect budget.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - the metrics recorder cannot be installed
    /// - the Redis URL is invalid
    /// - the listener cannot bind
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let mut metrics = MetricsExporter::new();
        if config.metrics_enabled {
            metrics
                .install()
                .context("failed to install Prometheus recorder")?;
        }

        info!(redis = %config.redis.url, "Creating Redis bus");
        let bus = RedisBus::builder()
            .url(config.redis.url.clone())
            .connect_timeout(config.redis_connect_timeout())
            .build()
            .context("invalid Redis configuration")?;

        let listener = TcpListener::bind(config.bind_address())
            .await
            .with_context(|| format!("failed to bind {}", config.bind_address()))?;

        Self::with_bus(Arc::new(bus), listener, &config, metrics)
    }

    /// Assemble the application over any bus and an already-bound listener.
    ///
    /// # Errors
    ///
    /// Returns error if the hub cannot be started.
    pub fn with_bus(
        bus: Arc<dyn MessageBus>,
        listener: TcpListener,
        config: &Config,
        metrics: MetricsExporter,
    ) -> anyhow::Result<Self> {
        let hub = BroadcastHub::new(bus, config.hub_config());
        let ingest = hub.start().context("failed to start broadcast hub")?;

        let state = AppState::new(hub.clone()).with_metrics(metrics);
        let router = relay_router(
            state,
            RouterOptions {
                allow_any_origin: config.server.allow_any_origin,
            },
        );

        Ok(Self {
            listener,
            router,
            hub,
            ingest,
        })
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns error if the socket address cannot be read.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// The application's hub.
    #[must_use]
    pub const fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    /// Run until Ctrl+C or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP server fails.
    pub async fn run(self) -> anyhow::Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `signal` completes.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP server fails.
    pub async fn run_until(
        self,
        signal: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let Self {
            listener,
            router,
            hub,
            ingest,
        } = self;

        info!(
            address = %listener.local_addr().context("listener has no local address")?,
            channel = %hub.channel(),
            "HTTP server listening"
        );

        let closer = hub.clone();
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                signal.await;
                info!(
                    subscribers = closer.subscriber_count(),
                    "Shutdown signal received, closing availability streams"
                );
                closer.close_subscriptions();
            })
            .await;

        info!("HTTP server stopped, stopping ingestion");
        ingest.shutdown().await;

        let stats = hub.stats();
        info!(
            received = stats.received,
            delivered = stats.delivered,
            decode_errors = stats.decode_errors,
            overflow_drops = stats.overflow_drops,
            reconnect_attempts = stats.reconnect_attempts,
            "Graceful shutdown complete"
        );

        served.context("HTTP server failed")
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// If a handler cannot be installed, that signal is never observed.
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
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
