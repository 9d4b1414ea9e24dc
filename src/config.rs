//! Configuration
//!
//! Resolution order per option: CLI flag (with its PRISM_* env fallback) →
//! ~/.prism/config.toml → built-in default. The same option bag is used for
//! both layers, so merging is a single pass.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::orchestrator::EngineSettings;

/// Fully resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Where the analyzer backend is served.
    pub analyzer_endpoint: String,
    pub analyzer_api_key: Option<String>,
    /// Model name sent in analyzer requests.
    pub analyzer_model: String,
    /// URI of the memory backing store.
    pub store_uri: String,
    /// K: thread-history entries rendered into prompts.
    pub history_context_limit: usize,
    pub analyzer_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    /// Entries checked for the duplicate-answer tag, per thread.
    pub duplicate_window: usize,
    pub listen_address: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            analyzer_endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            analyzer_api_key: None,
            analyzer_model: "gpt-5.2".to_string(),
            store_uri: "sqlite://prism.db".to_string(),
            history_context_limit: 10,
            analyzer_timeout_ms: 45_000,
            request_timeout_ms: 180_000,
            retry_max_attempts: 3,
            retry_base_delay_ms: 250,
            duplicate_window: 5,
            listen_address: "0.0.0.0:2024".to_string(),
        }
    }
}

impl Config {
    /// Merge override layers: `overrides` (CLI/env) wins over `file`, which
    /// wins over the defaults.
    pub fn resolve(overrides: ConfigOptions, file: ConfigOptions) -> Self {
        let defaults = Config::default();
        Self {
            analyzer_endpoint: overrides
                .analyzer_endpoint
                .or(file.analyzer_endpoint)
                .unwrap_or(defaults.analyzer_endpoint),
            analyzer_api_key: overrides.analyzer_api_key.or(file.analyzer_api_key),
            analyzer_model: overrides
                .analyzer_model
                .or(file.analyzer_model)
                .unwrap_or(defaults.analyzer_model),
            store_uri: overrides
                .store_uri
                .or(file.store_uri)
                .unwrap_or(defaults.store_uri),
            history_context_limit: overrides
                .history_context_limit
                .or(file.history_context_limit)
                .unwrap_or(defaults.history_context_limit),
            analyzer_timeout_ms: overrides
                .analyzer_timeout_ms
                .or(file.analyzer_timeout_ms)
                .unwrap_or(defaults.analyzer_timeout_ms),
            request_timeout_ms: overrides
                .request_timeout_ms
                .or(file.request_timeout_ms)
                .unwrap_or(defaults.request_timeout_ms),
            retry_max_attempts: overrides
                .retry_max_attempts
                .or(file.retry_max_attempts)
                .unwrap_or(defaults.retry_max_attempts),
            retry_base_delay_ms: overrides
                .retry_base_delay_ms
                .or(file.retry_base_delay_ms)
                .unwrap_or(defaults.retry_base_delay_ms),
            duplicate_window: overrides
                .duplicate_window
                .or(file.duplicate_window)
                .unwrap_or(defaults.duplicate_window),
            listen_address: overrides
                .listen_address
                .or(file.listen_address)
                .unwrap_or(defaults.listen_address),
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            history_context_limit: self.history_context_limit,
            analyzer_timeout: Duration::from_millis(self.analyzer_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            retry_max_attempts: self.retry_max_attempts,
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }
}

/// One layer of optional settings: the config file shape, and also the bag
/// the CLI layer is converted into.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigOptions {
    pub analyzer_endpoint: Option<String>,
    pub analyzer_api_key: Option<String>,
    pub analyzer_model: Option<String>,
    pub store_uri: Option<String>,
    pub history_context_limit: Option<usize>,
    pub analyzer_timeout_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub retry_max_attempts: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,
    pub duplicate_window: Option<usize>,
    pub listen_address: Option<String>,
}

impl ConfigOptions {
    /// Load the optional config file from ~/.prism/config.toml
    pub fn load_file() -> Self {
        let path = config_path();
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(options) => options,
                Err(e) => {
                    eprintln!("Warning: Failed to parse {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}

/// Get the config file path
pub fn config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".prism")
        .join("config.toml")
}
