//! Binary entrypoint: argument parsing, logging setup, and dispatch.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use emberagent::bootstrap;
use emberagent::channels::repl::ReplChannel;
use emberagent::channels::web::server::{GatewayState, start_server};
use emberagent::cli::config::{ConfigSubcommand, run_config_command};
use emberagent::cli::doctor::run_doctor_command;
use emberagent::config::Config;

#[derive(Parser)]
#[command(name = "emberagent")]
#[command(version)]
#[command(about = "Attestation-gated conversational DeFi agent for the Flare network")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "EMBERAGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Log as JSON lines instead of human-readable text
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve,
    /// Chat with the agent in this terminal
    Repl {
        /// Send one message, print the reply, and exit
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Run health diagnostics
    Doctor {
        /// Exit non-zero when any check fails
        #[arg(long)]
        strict: bool,
    },
    /// Inspect and edit the config file
    Config {
        #[command(subcommand)]
        command: ConfigSubcommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Env files first so a RUST_LOG set there reaches the subscriber.
    let _ = dotenvy::dotenv();
    bootstrap::load_emberagent_env();
    init_tracing(cli.log_json);

    match cli.command {
        Commands::Serve => serve(cli.config.as_deref()).await,
        Commands::Repl { message } => repl(cli.config.as_deref(), message).await,
        Commands::Doctor { strict } => run_doctor_command(cli.config.as_deref(), strict).await,
        Commands::Config { command } => run_config_command(command, cli.config.as_deref()),
    }
}

/// Logs go to stderr so the REPL owns stdout.
fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "emberagent=info,tower_http=warn".into());
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn serve(config_path: Option<&Path>) -> Result<()> {
    let config = Config::load_with_toml(config_path)?;
    let agent = Arc::new(bootstrap::build_agent(&config)?);

    let addr: SocketAddr = format!("{}:{}", config.gateway.host, config.gateway.port)
        .parse()
        .map_err(|e| {
            anyhow::anyhow!(
                "invalid gateway address {}:{}: {e}",
                config.gateway.host,
                config.gateway.port
            )
        })?;

    let state = Arc::new(GatewayState::new(agent));
    let bound = start_server(
        addr,
        state.clone(),
        config.gateway.auth_token.clone(),
        &config.gateway.cors_origins,
    )
    .await?;
    tracing::info!(address = %bound, "web gateway listening");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    state.trigger_shutdown().await;
    Ok(())
}

async fn repl(config_path: Option<&Path>, message: Option<String>) -> Result<()> {
    let config = Config::load_with_toml(config_path)?;
    let agent = bootstrap::build_agent(&config)?;
    let channel = match message {
        Some(message) => ReplChannel::with_message(message),
        None => ReplChannel::new(),
    };
    channel.run(&agent).await?;
    Ok(())
}
