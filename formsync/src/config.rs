use serde::Deserialize;
use std::fs::File;

#[derive(Deserialize, Debug)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 3000,
        }
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct BrevoConfig {
    #[serde(default)]
    pub global_api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Redirect for double opt-in confirmations when a form sets none.
    #[serde(default)]
    pub default_redirect_url: String,
}

fn default_base_url() -> String {
    "https://api.brevo.com".into()
}

#[derive(Deserialize, Debug)]
pub struct RecordsConfig {
    /// Directory holding the persisted configuration records.
    pub path: String,
}

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(default)]
    pub listener: Listener,
    pub brevo: BrevoConfig,
    pub records: RecordsConfig,
    /// File holding the schema version and migration flags.
    #[serde(default = "default_state_file")]
    pub state_file: String,
    /// Shared secret for the admin endpoints; unset disables them.
    #[serde(default)]
    pub admin_key: Option<String>,
}

fn default_state_file() -> String {
    "formsync-state.json".into()
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
}
