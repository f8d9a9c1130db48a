//! HTTP server lifecycle.

use super::handlers::RpcState;
use super::routes::create_router;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum RpcServerError {
    #[error("failed to bind to address: {0}")]
    Bind(#[from] std::io::Error),
}

/// Configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub listen_addr: SocketAddr,
}

/// Handle for controlling a running server.
pub struct RpcServerHandle {
    task: JoinHandle<()>,
    local_addr: SocketAddr,
}

impl RpcServerHandle {
    /// The bound address (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Abort the server task.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Abort and wait for the task to finish, releasing every resource the
    /// router held (storage handles included).
    pub async fn shutdown(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

/// The replica's HTTP server.
pub struct RpcServer {
    config: RpcServerConfig,
    state: RpcState,
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, state: RpcState) -> Self {
        Self { config, state }
    }

    /// Bind and serve in the background.
    pub async fn start(self) -> Result<RpcServerHandle, RpcServerError> {
        let listener = tokio::net::TcpListener::bind(self.config.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "HTTP server listening");

        let router = create_router(self.state);
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!(error = ?e, "HTTP server error");
            }
        });

        Ok(RpcServerHandle { task, local_addr })
    }
}
