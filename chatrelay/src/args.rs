use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// Chat completion relay
#[derive(Debug, Parser)]
#[command(name = "chatrelay", about = "Streaming chat completion relay for an OpenAI-compatible upstream")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "chatrelay.toml", env = "CHATRELAY_CONFIG")]
    pub config: PathBuf,

    /// Override the listen address
    #[arg(long, env = "CHATRELAY_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Override the log filter (`RUST_LOG` still takes precedence)
    #[arg(long, env = "CHATRELAY_LOG")]
    pub log: Option<String>,
}
