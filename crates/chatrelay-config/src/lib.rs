#![allow(clippy::must_use_candidate)]

pub mod application;
pub mod cors;
mod env;
pub mod health;
mod loader;
pub mod server;
pub mod telemetry;
pub mod upstream;

use serde::Deserialize;

pub use application::*;
pub use cors::*;
pub use health::*;
pub use server::*;
pub use telemetry::*;
pub use upstream::*;

/// Top-level chatrelay configuration
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Upstream completion service
    pub upstream: UpstreamConfig,
    /// Logging configuration
    #[serde(default)]
    pub telemetry: Option<TelemetryConfig>,
    /// Identity reported upstream as the requesting `user`
    #[serde(default = "default_site_name")]
    pub site_name: String,
    /// Applications allowed to call the open API
    #[serde(default)]
    pub applications: Vec<ApplicationConfig>,
}

fn default_site_name() -> String {
    "chatrelay".to_owned()
}
