//! Programmatic configuration builder for integration tests

use std::net::SocketAddr;

use chatrelay_config::{ApplicationConfig, Config, HealthConfig, ServerConfig, UpstreamConfig};
use secrecy::SecretString;

/// App key of the application every builder starts with
pub const APP_KEY: &str = "app-key-demo";

/// Secondary key of the default application
pub const API_KEY: &str = "sk-demo";

/// Builder for constructing test configurations
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Minimal config pointed at `upstream_url` with one enabled application
    pub fn new(upstream_url: &str) -> Self {
        let mut upstream = UpstreamConfig::new(SecretString::from("sk-upstream-test"));
        upstream.base_url = upstream_url.parse().expect("valid URL");

        Self {
            config: Config {
                server: ServerConfig {
                    listen_address: Some(SocketAddr::from(([127, 0, 0, 1], 0))),
                    health: HealthConfig {
                        enabled: true,
                        ..HealthConfig::default()
                    },
                    ..ServerConfig::default()
                },
                upstream,
                telemetry: None,
                site_name: "chatrelay-test".to_owned(),
                applications: vec![application("demo", APP_KEY, Some(API_KEY))],
            },
        }
    }

    /// Register another application
    pub fn with_application(mut self, app: ApplicationConfig) -> Self {
        self.config.applications.push(app);
        self
    }

    /// Reject over-long history for the default application
    pub fn with_fix_long_message(mut self) -> Self {
        self.config.applications[0].fix_long_message = true;
        self
    }

    /// Disable health endpoint
    pub fn without_health(mut self) -> Self {
        self.config.server.health.enabled = false;
        self
    }

    /// Build the final config
    pub fn build(self) -> Config {
        self.config
    }
}

/// An enabled application with the given keys
pub fn application(name: &str, app_key: &str, api_key: Option<&str>) -> ApplicationConfig {
    ApplicationConfig {
        name: name.to_owned(),
        app_key: SecretString::from(app_key),
        api_key: api_key.map(SecretString::from),
        enabled: true,
        fix_long_message: false,
    }
}
