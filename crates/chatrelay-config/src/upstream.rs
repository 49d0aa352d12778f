use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// Upstream chat completion service
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Bearer credential sent with every upstream request
    pub api_key: SecretString,
    /// Base address; `/v1/chat/completions` is appended
    #[serde(default = "default_base_url")]
    pub base_url: Url,
    /// Model used when a request does not name one
    #[serde(default = "default_model")]
    pub model: String,
    /// Optional HTTP(S) or SOCKS5 proxy for upstream traffic
    #[serde(default)]
    pub proxy: Option<Url>,
    /// Request timeout (e.g. "20m", "90s")
    #[serde(default = "default_timeout")]
    pub timeout: String,
}

impl UpstreamConfig {
    /// Build a config with defaults for everything but the credential
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            base_url: default_base_url(),
            model: default_model(),
            proxy: None,
            timeout: default_timeout(),
        }
    }

    /// Parsed request timeout
    ///
    /// # Errors
    ///
    /// Returns an error if the timeout string is not a valid duration
    pub fn timeout(&self) -> anyhow::Result<Duration> {
        duration_str::parse(&self.timeout)
            .map_err(|e| anyhow::anyhow!("invalid upstream timeout '{}': {e}", self.timeout))
    }
}

fn default_base_url() -> Url {
    Url::parse("https://api.openai.com").expect("valid default URL")
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_owned()
}

fn default_timeout() -> String {
    "20m".to_owned()
}
