use serde::Deserialize;
use std::env;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Upper bound imposed by the indexing provider on files per batch request.
pub const MAX_ATTACH_BATCH_SIZE: usize = 100;

const DEFAULT_DATABASE_URL: &str = "sqlite://knowledge-sync.db";
const DEFAULT_EXPIRATION_DAYS: u32 = 30;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the knowledge sync service.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base URL of the indexing provider (vector stores and files).
    pub provider_url: String,
    /// Optional bearer token for the indexing provider.
    pub provider_api_key: Option<String>,
    /// Base URL of the agent runtime; defaults to the provider URL.
    pub agent_runtime_url: String,
    /// Optional bearer token for the agent runtime; defaults to the provider key.
    pub agent_runtime_api_key: Option<String>,
    /// Connection string for the metadata store.
    pub database_url: String,
    /// Days of inactivity after which the provider expires an index.
    pub index_expiration_days: u32,
    /// Maximum number of files submitted in one attach batch.
    pub attach_batch_size: usize,
    /// Delay between two status polls of an attach batch.
    pub attach_poll_interval_ms: u64,
    /// Optional deadline for a single attach batch to complete.
    pub attach_poll_timeout_secs: Option<u64>,
    /// Per-request timeout applied to every outbound HTTP call.
    pub request_timeout_secs: u64,
    /// Number of knowledge sources migrated concurrently.
    pub migration_concurrency: usize,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let provider_url = load_env("INDEX_PROVIDER_URL")?;
        let provider_api_key = load_env_optional("INDEX_PROVIDER_API_KEY");
        let attach_batch_size = parse_optional::<usize>("ATTACH_BATCH_SIZE")?
            .unwrap_or(MAX_ATTACH_BATCH_SIZE)
            .clamp(1, MAX_ATTACH_BATCH_SIZE);

        Ok(Self {
            agent_runtime_url: load_env_optional("AGENT_RUNTIME_URL")
                .unwrap_or_else(|| provider_url.clone()),
            agent_runtime_api_key: load_env_optional("AGENT_RUNTIME_API_KEY")
                .or_else(|| provider_api_key.clone()),
            provider_url,
            provider_api_key,
            database_url: load_env_optional("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            index_expiration_days: parse_optional("INDEX_EXPIRATION_DAYS")?
                .unwrap_or(DEFAULT_EXPIRATION_DAYS),
            attach_batch_size,
            attach_poll_interval_ms: parse_optional("ATTACH_POLL_INTERVAL_MS")?
                .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            attach_poll_timeout_secs: parse_optional("ATTACH_POLL_TIMEOUT_SECS")?,
            request_timeout_secs: parse_optional("PROVIDER_REQUEST_TIMEOUT_SECS")?
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            migration_concurrency: parse_optional::<usize>("MIGRATION_CONCURRENCY")?
                .unwrap_or(1)
                .max(1),
            server_port: parse_optional("SERVER_PORT")?,
        })
    }

    /// Per-request timeout for outbound HTTP clients.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    load_env_optional(key).ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_optional<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        provider_url = %config.provider_url,
        agent_runtime_url = %config.agent_runtime_url,
        database_url = %config.database_url,
        attach_batch_size = config.attach_batch_size,
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}
