use std::collections::{HashMap, HashSet};
use std::path::Path;

use secrecy::ExposeSecret;

use crate::Config;

/// Proxy schemes `reqwest` can route upstream traffic through
const PROXY_SCHEMES: &[&str] = &["http", "https", "socks5", "socks5h"];

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Reads the file, expands `{{ env.VAR }}` placeholders, then
    /// deserializes and validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, environment variable
    /// expansion fails, TOML parsing fails, or validation fails
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

        Self::from_toml(&raw)
    }

    /// Parse and validate configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns an error if expansion, parsing, or validation fails
    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        let expanded =
            crate::env::expand_env(raw).map_err(|e| anyhow::anyhow!("config variable expansion failed: {e}"))?;

        let config: Self = toml::from_str(&expanded).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate that the configuration is internally consistent
    ///
    /// # Errors
    ///
    /// Returns an error if upstream settings are incomplete or
    /// application entries are invalid
    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_upstream()?;
        self.validate_applications()?;
        Ok(())
    }

    /// The upstream must be fully usable before any request is accepted
    fn validate_upstream(&self) -> anyhow::Result<()> {
        let upstream = &self.upstream;

        if upstream.api_key.expose_secret().trim().is_empty() {
            anyhow::bail!("upstream.api_key must not be empty");
        }

        if upstream.model.trim().is_empty() {
            anyhow::bail!("upstream.model must not be empty");
        }

        if upstream.timeout()?.is_zero() {
            anyhow::bail!("upstream.timeout must be greater than zero");
        }

        if let Some(ref proxy) = upstream.proxy
            && !PROXY_SCHEMES.contains(&proxy.scheme())
        {
            anyhow::bail!("unsupported upstream.proxy scheme '{}'", proxy.scheme());
        }

        Ok(())
    }

    /// Every credential must resolve to exactly one application
    fn validate_applications(&self) -> anyhow::Result<()> {
        let mut names = HashSet::new();
        let mut owners: HashMap<&str, &str> = HashMap::new();

        for app in &self.applications {
            if !names.insert(app.name.as_str()) {
                anyhow::bail!("duplicate application name '{}'", app.name);
            }

            if app.app_key.expose_secret().is_empty() {
                anyhow::bail!("application '{}' has an empty app_key", app.name);
            }

            let api_key = app.api_key.as_ref().map(ExposeSecret::expose_secret);
            for key in std::iter::once(app.app_key.expose_secret()).chain(api_key) {
                if key.is_empty() {
                    continue;
                }

                // the secret itself never reaches the error message
                if let Some(owner) = owners.insert(key, app.name.as_str())
                    && owner != app.name
                {
                    anyhow::bail!("application '{}' reuses a credential of application '{owner}'", app.name);
                }
            }
        }

        Ok(())
    }
}
