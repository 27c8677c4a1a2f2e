//! CLI argument and command definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "relay", version, about = "Talk to local and hosted LLM backends")]
pub struct Cli {
    /// Config file (defaults to ~/.relay/config.json).
    #[arg(long, env = "RELAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Provider id to use instead of the configured active provider.
    #[arg(long, global = true)]
    pub provider: Option<String>,

    /// Model to use (defaults to the provider's default model).
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send one prompt and print the full answer.
    Chat {
        /// The prompt to send.
        prompt: String,

        /// System prompt prepended to the conversation.
        #[arg(long)]
        system: Option<String>,

        /// Sampling temperature.
        #[arg(long)]
        temperature: Option<f32>,

        /// Print the response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Send one prompt and print the answer as it arrives.
    Stream {
        /// The prompt to send.
        prompt: String,

        /// System prompt prepended to the conversation.
        #[arg(long)]
        system: Option<String>,

        /// Sampling temperature.
        #[arg(long)]
        temperature: Option<f32>,
    },

    /// Show the health of every configured provider.
    Status,

    /// List the models each provider serves.
    Models,

    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}
