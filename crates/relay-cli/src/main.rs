//! relay: a command line front end for the relay provider manager.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use relay_core::ConfigStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose || std::env::var_os("RUST_LOG").is_some() {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "relay=debug,relay_core=debug,relay_provider=debug".into());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let store = match cli.config {
        Some(ref path) => ConfigStore::with_path(path),
        None => ConfigStore::new(),
    };

    match cli.command {
        Commands::Chat {
            ref prompt,
            ref system,
            temperature,
            json,
        } => {
            let manager = commands::load_manager(&store, cli.provider.as_deref()).await?;
            let request = commands::build_request(
                prompt,
                system.as_deref(),
                cli.model.as_deref(),
                temperature,
            );
            commands::chat::run(&manager, request, json).await?;
        }
        Commands::Stream {
            ref prompt,
            ref system,
            temperature,
        } => {
            let manager = commands::load_manager(&store, cli.provider.as_deref()).await?;
            let request = commands::build_request(
                prompt,
                system.as_deref(),
                cli.model.as_deref(),
                temperature,
            );
            commands::stream::run(&manager, request).await?;
        }
        Commands::Status => {
            let manager = commands::load_manager(&store, cli.provider.as_deref()).await?;
            commands::status::run(&manager).await;
        }
        Commands::Models => {
            let manager = commands::load_manager(&store, cli.provider.as_deref()).await?;
            commands::models::run(&manager).await;
        }
        Commands::Init { force } => {
            commands::init(&store, force)?;
        }
    }

    Ok(())
}
