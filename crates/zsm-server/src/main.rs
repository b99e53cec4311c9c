#![forbid(unsafe_code)]

//! ZSM gatekeeper binary.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use zsm_common::config::load_json;
use zsm_common::ServerConfig;
use zsm_server::Server;

#[derive(Parser, Debug)]
#[command(name = "zsm-server")]
#[command(about = "ZSM gatekeeper - authenticates clients and routes encrypted messages")]
#[command(version)]
struct Args {
    /// JSON configuration file
    #[arg(long, env = "ZSM_SERVER_CONFIG")]
    config: Option<PathBuf>,

    /// TCP listen address (overrides the config file)
    #[arg(long, env = "ZSM_LISTEN")]
    listen: Option<String>,

    /// Maximum simultaneously authenticated clients
    #[arg(long, env = "ZSM_MAX_CLIENTS")]
    max_clients: Option<usize>,

    /// Seconds a connection gets to answer the challenge
    #[arg(long, env = "ZSM_HANDSHAKE_TIMEOUT")]
    handshake_timeout: Option<u64>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn server_config(&self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => load_json::<ServerConfig>(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ServerConfig::default(),
        };

        if let Some(listen) = &self.listen {
            config.listen = listen.clone();
        }
        if let Some(max_clients) = self.max_clients {
            config.max_clients = max_clients;
        }
        if let Some(secs) = self.handshake_timeout {
            config.handshake_timeout_secs = secs;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    zsm_common::init_tracing_with_default(&args.log_level);

    info!("Starting zsm-server v{}", env!("CARGO_PKG_VERSION"));

    let config = args.server_config()?;
    let server = Server::bind(config.clone())
        .await
        .with_context(|| format!("binding {}", config.listen))?;

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
