//! ZSM CLI tools: key generation, identity display, interactive chat.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use zsm_common::config::load_json;
use zsm_common::ClientConfig;
use zsm_crypto::{DecryptedMessage, IdentityKeypair, SessionEvent, UserId};

#[derive(Parser, Debug)]
#[command(name = "zsm")]
#[command(about = "ZSM secure messaging tools")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a new Ed25519 identity keypair
    Keygen {
        /// Output file path (without extension)
        #[arg(short, long, default_value = "zsm")]
        output: String,
    },

    /// Show the user ID of a public key file
    ShowId {
        /// Public key file path
        #[arg(short, long)]
        key: PathBuf,
    },

    /// Authenticate to a gatekeeper and chat with one user
    Chat {
        /// Gatekeeper address (host:port)
        #[arg(short, long, env = "ZSM_SERVER")]
        server: Option<String>,

        /// Secret key file
        #[arg(short, long, env = "ZSM_KEY")]
        key: PathBuf,

        /// Recipient user ID (64 hex characters)
        #[arg(short, long)]
        to: String,

        /// JSON client configuration
        #[arg(long, env = "ZSM_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<()> {
    zsm_common::init_tracing_with_default("warn");

    let args = Args::parse();

    match args.command {
        Command::Keygen { output } => {
            println!("Generating Ed25519 keypair...");

            let keypair = IdentityKeypair::generate();
            let user_id = keypair.user_id();

            let private_path = format!("{}.key", output);
            let public_path = format!("{}.pub", output);

            keypair.save(&private_path, &public_path)?;

            println!("Private key: {}", private_path);
            println!("Public key:  {}", public_path);
            println!("User ID:     {}", user_id);
        }
        Command::ShowId { key } => {
            let public = IdentityKeypair::load_public(&key)
                .with_context(|| format!("reading {}", key.display()))?;
            println!("{}", public.user_id());
        }
        Command::Chat {
            server,
            key,
            to,
            config,
        } => {
            let mut client_config = match config {
                Some(path) => load_json::<ClientConfig>(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => ClientConfig::default(),
            };
            if let Some(server) = server {
                client_config.server_addr = server;
            }
            client_config.validate()?;

            let identity = IdentityKeypair::load(&key)
                .with_context(|| format!("reading {}", key.display()))?;
            let recipient = UserId::parse(&to).context("invalid recipient user ID")?;

            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            rt.block_on(chat(client_config, Arc::new(identity), recipient))?;
        }
        Command::Version => {
            println!("zsm {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

async fn chat(config: ClientConfig, identity: Arc<IdentityKeypair>, recipient: UserId) -> Result<()> {
    println!("Connecting to {}...", config.server_addr);
    let mut conn = zsm_client::connect(&config, identity)
        .await
        .context("could not join the gatekeeper")?;

    println!("Authenticated as {}", conn.user_id());
    println!("Chatting with {} (Ctrl-D to quit)", recipient);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let text = line.trim_end();
                if text.is_empty() {
                    continue;
                }
                conn.send_text(&recipient, text).await?;
            }
            event = conn.next_event() => match event {
                Ok(SessionEvent::Message(message)) => print_message(&message),
                Ok(SessionEvent::Status(status)) => println!("! gatekeeper: {}", status),
                Ok(_) => {}
                Err(e) if !e.is_fatal() => eprintln!("! dropped packet: {}", e),
                Err(e) => return Err(e.into()),
            },
        }
    }

    conn.shutdown().await?;
    Ok(())
}

fn print_message(message: &DecryptedMessage) {
    let time = message
        .sent_at()
        .map(|at| at.with_timezone(&chrono::Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "??:??:??".to_string());
    println!("[{}] {}: {}", time, message.sender.short(), message.text);
}
