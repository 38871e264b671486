//! Leash server daemon
//!
//! Serves the RPC interface for the browser terminal and saves users and
//! sessions on shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use leash_core::config::{self, ServerConfig};
use leash_core::password::HashScheme;
use leash_core::persist::JsonFileStore;
use leash_server::rpc::RpcServer;
use leash_server::session::{run_idle_cleanup, CLEANUP_INTERVAL};
use leash_server::ServerState;

#[derive(Parser)]
#[command(name = "leash-server")]
#[command(about = "Leash browser shell backend")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Bind address (overrides config)
    #[arg(short, long)]
    bind: Option<String>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the RPC server (default)
    Serve,

    /// Print the stored form of a password, for editing the state file by hand
    HashPassword {
        password: String,

        /// Hash scheme (sha1, sha256, sha512, h); defaults to the configured one
        #[arg(long)]
        scheme: Option<HashScheme>,
    },

    /// Write a configuration file with every default spelled out
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match args.command.unwrap_or(Command::Serve) {
        Command::HashPassword { password, scheme } => {
            let scheme = match scheme {
                Some(scheme) => scheme,
                None => load_config(args.config.as_ref())?.password_scheme,
            };
            println!("{}", scheme.hash(&password));
            Ok(())
        }
        Command::InitConfig { force } => init_config(args.config, force),
        Command::Serve => serve(load_config(args.config.as_ref())?, args.bind).await,
    }
}

fn init_config(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = path.unwrap_or_else(config::default_config_path);
    if path.exists() && !force {
        anyhow::bail!("Config file already exists: {:?} (use --force to overwrite)", path);
    }
    config::save_config(&path, &ServerConfig::default())
        .with_context(|| format!("Failed to write config file: {:?}", path))?;
    println!("Created configuration file: {:?}", path);
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<ServerConfig> {
    if let Some(config_path) = path {
        return config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path));
    }

    let default_path = config::default_config_path();
    if default_path.exists() {
        Ok(config::load_config(&default_path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
            ServerConfig::default()
        }))
    } else {
        tracing::info!("Using default configuration");
        Ok(ServerConfig::default())
    }
}

async fn serve(config: ServerConfig, bind: Option<String>) -> Result<()> {
    tracing::info!("Leash server starting...");

    let bind_addr = bind.unwrap_or_else(|| config.bind_address.clone());
    let persistence = Arc::new(JsonFileStore::new(&config.state_file));
    let state_file = config.state_file.clone();

    let state = Arc::new(
        ServerState::load(config, persistence)
            .with_context(|| format!("Failed to load state from {:?}", state_file))?,
    );
    if !state.installed() {
        tracing::warn!("No root account yet; the first client must call configure");
    }

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let cleanup = tokio::spawn(run_idle_cleanup(
        Arc::clone(&state.sessions),
        CLEANUP_INTERVAL,
        cancel.clone(),
    ));

    let server = RpcServer::new(bind_addr, Arc::clone(&state)).with_shutdown_token(cancel.clone());
    let result = server.run().await;

    cancel.cancel();
    if let Err(e) = cleanup.await {
        tracing::warn!("Cleanup task ended abnormally: {}", e);
    }

    state
        .flush()
        .await
        .with_context(|| format!("Failed to save state to {:?}", state_file))?;
    result?;

    tracing::info!("Leash server shutdown complete");
    Ok(())
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel.cancel();
    });
}
