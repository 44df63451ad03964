//! Hook API Server
//!
//! Serves the sync hooks over HTTP until asked to shut down.

use crate::controlplane::metrics::Metrics;
use crate::controlplane::reconcile::HookContext;
use crate::error::{Error, Result};
use std::net::SocketAddr;
use tokio::sync::broadcast;
use tracing::info;

use super::rest::RestRouter;

// =============================================================================
// Server Configuration
// =============================================================================

/// Default hook listener
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Configuration for the API server
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Hook API bind address
    pub listen_addr: SocketAddr,
}

impl ApiServerConfig {
    pub fn parse(listen_addr: &str) -> Result<Self> {
        let listen_addr = listen_addr
            .parse()
            .map_err(|e| Error::Configuration(format!("invalid listen address {}: {}", listen_addr, e)))?;
        Ok(Self { listen_addr })
    }
}

// =============================================================================
// API Server
// =============================================================================

/// HTTP server answering sync hooks
pub struct ApiServer {
    config: ApiServerConfig,
    ctx: HookContext,
    metrics: Metrics,
    shutdown_tx: broadcast::Sender<()>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, ctx: HookContext, metrics: Metrics) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            ctx,
            metrics,
            shutdown_tx,
        }
    }

    /// Serve until [`ApiServer::shutdown`] is called
    pub async fn run(&self) -> Result<()> {
        let addr = self.config.listen_addr;
        let app = RestRouter::new(self.ctx.clone(), self.metrics.clone()).build();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Internal(format!("failed to bind hook server: {}", e)))?;
        info!(%addr, "hook API listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("hook server shutting down");
            })
            .await
            .map_err(|e| Error::Internal(format!("hook server error: {}", e)))?;

        Ok(())
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Handle that can trigger shutdown from another task
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_config() {
        let config = ApiServerConfig::parse(DEFAULT_LISTEN_ADDR).unwrap();
        assert_eq!(config.listen_addr.port(), 8080);
        assert_matches!(
            ApiServerConfig::parse("not an address"),
            Err(Error::Configuration(_))
        );
    }
}
