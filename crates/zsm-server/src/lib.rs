//! ZSM gatekeeper.
//!
//! The gatekeeper:
//! 1. Challenges every new connection and admits it only if the response
//!    is signed by the key it claims
//! 2. Checks every message packet's signature against its sender field, and
//!    that the sender is the connection's authenticated user
//! 3. Forwards the unchanged frame to the recipient's connection
//!
//! It never holds a message key and never decrypts traffic.

#![forbid(unsafe_code)]

pub mod connection;
pub mod registry;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use zsm_common::ServerConfig;

pub use connection::{check_message, ConnectionError, RoutedFrame};
pub use registry::{ClientHandle, ClientRegistry, RegistryError};

/// State shared by all connection tasks.
#[derive(Debug)]
pub struct ServerState {
    pub config: ServerConfig,
    pub registry: RwLock<ClientRegistry>,
}

impl ServerState {
    pub fn new(config: ServerConfig) -> Self {
        let registry = RwLock::new(ClientRegistry::new(config.max_clients));
        Self { config, registry }
    }

    pub async fn client_count(&self) -> usize {
        self.registry.read().await.len()
    }
}

/// A bound gatekeeper, ready to accept connections.
pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
}

impl Server {
    /// Bind to `config.listen`.
    pub async fn bind(config: ServerConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(&config.listen).await?;
        info!("gatekeeper listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            state: Arc::new(ServerState::new(config)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> Arc<ServerState> {
        self.state.clone()
    }

    /// Accept connections forever.
    pub async fn run(self) -> std::io::Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` completes.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> std::io::Result<()> {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    let (stream, peer) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("accept failed: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("set_nodelay failed for {}: {}", peer, e);
                    }

                    let state = self.state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = connection::handle(stream, peer, state).await {
                            debug!("connection {} ended: {}", peer, e);
                        }
                    });
                }
                _ = &mut shutdown => {
                    info!("gatekeeper shutting down");
                    return Ok(());
                }
            }
        }
    }
}
