mod config;
mod error;
mod forward;
mod keepalive;
mod platform;
mod prompt;
mod runner;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{process_env, resolve_backend, ConfigStore};
use crate::prompt::{Headless, Terminal};
use crate::runner::Mode;

#[derive(Parser)]
#[command(name = "tg-forwarder", version, about = "Forward Telegram messages between chats")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the config file
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Path to the Telegram session file
    #[arg(long, global = true, default_value = "telegram_forwarder.session")]
    session: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive menu (default)
    Menu,
    /// Configure forwarding and exit
    Setup,
    /// List every chat the account can see
    ListChats,
    /// Start forwarding with the saved configuration
    Start,
    /// Run headless with a keep-alive server, restarting on failures
    Run {
        /// Keep-alive port (defaults to $PORT, then 8080)
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tg_forwarder=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    info!("Loading configuration from: {}", cli.config.display());
    let mut store = ConfigStore::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    let mode = match cli.command.unwrap_or(Commands::Menu) {
        Commands::Run { port } => {
            let backend = resolve_backend(&mut store, &process_env, &mut Headless)
                .context("Headless mode needs complete credentials in the environment or config")?;
            let forwarding = store.forwarding()?;
            let login = runner::login_for(&backend, &process_env);

            keepalive::spawn(keepalive::port_from(port, &process_env));
            info!("Starting forwarder in headless mode");
            runner::run_forever(
                &backend,
                &cli.session,
                &login,
                &mut Headless,
                &forwarding,
            )
            .await?;
            return Ok(());
        }
        Commands::Menu => Mode::Menu,
        Commands::Setup => Mode::Setup,
        Commands::ListChats => Mode::ListChats,
        Commands::Start => Mode::Start,
    };

    let backend = resolve_backend(&mut store, &process_env, &mut Terminal)?;
    let login = runner::login_for(&backend, &process_env);
    runner::run_interactive(
        mode,
        &backend,
        &cli.session,
        &mut store,
        &login,
        &mut Terminal,
    )
    .await
}
