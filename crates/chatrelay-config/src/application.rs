use secrecy::SecretString;
use serde::Deserialize;

/// Application (tenant) permitted to use the open API
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApplicationConfig {
    /// Unique display name
    pub name: String,
    /// Primary credential
    pub app_key: SecretString,
    /// Secondary `sk-` style credential
    #[serde(default)]
    pub api_key: Option<SecretString>,
    /// Disabled applications are rejected at authentication
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Fail instead of silently dropping history that exceeds the context budget
    #[serde(default)]
    pub fix_long_message: bool,
}

#[allow(clippy::missing_const_for_fn)]
fn default_enabled() -> bool {
    true
}
