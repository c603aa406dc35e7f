use std::path::PathBuf;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::explorer::DEFAULT_EXPLORER_API_URL;
use crate::subscriptions::DEFAULT_LOG_BUFFER;

const DEFAULT_CONFIG_FILE: &str = "config";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub node: NodeConfig,
    #[serde(default)]
    pub explorer: ExplorerConfig,
    #[serde(default)]
    pub query: QueryConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub service: ServiceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NodeConfig {
    pub ws_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExplorerConfig {
    #[serde(default = "default_explorer_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            api_url: default_explorer_api_url(),
            api_key: String::new(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

/// Contract and block range to index. A block bound of 0 means unbounded.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct QueryConfig {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub from_block: u64,
    #[serde(default)]
    pub to_block: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// SQL file applied at startup, e.g. `./init.sql`.
    pub schema_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_buffer")]
    pub log_buffer: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_buffer: default_log_buffer(),
        }
    }
}

fn default_explorer_api_url() -> String {
    DEFAULT_EXPLORER_API_URL.to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_connections() -> usize {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_buffer() -> usize {
    DEFAULT_LOG_BUFFER
}

impl Config {
    /// Load `config.toml` (or `path`), then `INDEXER_*` environment variables on top.
    ///
    /// Nested keys use `__`, e.g. `INDEXER_EXPLORER__API_KEY`. Call [`Config::validate`] once
    /// command line overrides are applied.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let file = match path {
            Some(path) => config::File::with_name(path),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config_builder = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("INDEXER")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        Ok(config_builder.try_deserialize()?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.ws_url.trim().is_empty() {
            return Err(ConfigError::Invalid("node.ws_url is empty".to_string()));
        }
        if self.service.log_buffer == 0 {
            return Err(ConfigError::Invalid("service.log_buffer must be positive".to_string()));
        }
        if let (Some(from), Some(to)) = self.block_range() {
            if from > to {
                return Err(ConfigError::Invalid(format!(
                    "query.from_block ({from}) is after query.to_block ({to})"
                )));
            }
        }
        Ok(())
    }

    /// Historical scan bounds, `None` where the configured bound is 0.
    pub fn block_range(&self) -> (Option<u64>, Option<u64>) {
        let bound = |b: u64| (b > 0).then_some(b);
        (bound(self.query.from_block), bound(self.query.to_block))
    }
}
