use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use thiserror::Error;

use crate::chain::RetryPolicy;
use crate::money::MAX_DECIMALS;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Missing required configuration: {0}")]
    Missing(&'static str),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub chain: ChainConfig,
    pub token: TokenConfig,
    #[serde(default)]
    pub hot_wallet: HotWalletConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "settlement.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChainConfig {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_true")]
    pub retry_jitter: bool,
    #[serde(default = "default_min_confirmations")]
    pub min_confirmations: u64,
    /// Result limit passed to the transfer query
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
}

/// The token this deployment settles. Decimals drive every raw <-> ledger conversion.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TokenConfig {
    #[serde(default = "default_token_symbol")]
    pub symbol: String,
    #[serde(default)]
    pub contract: String,
    #[serde(default = "default_decimals")]
    pub decimals: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct HotWalletConfig {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub signer_url: String,
    #[serde(default)]
    pub signer_api_key: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ScannerConfig {
    pub enabled: bool,
    pub poll_interval_ms: u64,
    pub batch_size: u32,
    pub concurrency: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 15_000,
            batch_size: 50,
            concurrency: 5,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DispatcherConfig {
    pub enabled: bool,
    pub poll_interval_ms: u64,
    pub batch_size: u32,
    pub concurrency: usize,
    pub min_withdrawal: Decimal,
    pub max_withdrawal: Decimal,
    pub stale_job_timeout_secs: u64,
    pub stale_sweep_interval_ms: u64,
    /// Claims allowed per owner inside `owner_window_secs`; 0 disables the limit
    pub owner_max_claims: u32,
    pub owner_window_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 10_000,
            batch_size: 50,
            concurrency: 3,
            min_withdrawal: Decimal::ONE,
            max_withdrawal: Decimal::from(1_000_000u32),
            stale_job_timeout_secs: 600,
            stale_sweep_interval_ms: 60_000,
            owner_max_claims: 0,
            owner_window_secs: 3600,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WorkerConfig {
    /// Stable id; derived from type, host and pid when unset
    #[serde(default)]
    pub id: Option<String>,
    pub worker_type: String,
    pub heartbeat_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            id: None,
            worker_type: "settlement".to_string(),
            heartbeat_interval_ms: 30_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
        }
    }
}

fn default_max_connections() -> u32 {
    20
}
fn default_acquire_timeout_secs() -> u64 {
    5
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    1_000
}
fn default_true() -> bool {
    true
}
fn default_min_confirmations() -> u64 {
    19
}
fn default_page_limit() -> u32 {
    50
}
fn default_token_symbol() -> String {
    "USDT".to_string()
}
fn default_decimals() -> u32 {
    6
}

const REDACTED: &str = "***";

impl AppConfig {
    /// Load `config/{env}.yaml`
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        Self::from_file(&format!("config/{}.yaml", env))
    }

    /// Load from a YAML file, apply environment overrides and validate
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        let mut config = Self::from_yaml(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Secrets may come from the environment instead of the file
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("SETTLEMENT_DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(key) = std::env::var("SETTLEMENT_CHAIN_API_KEY") {
            self.chain.api_key = key;
        }
        if let Ok(key) = std::env::var("SETTLEMENT_SIGNER_API_KEY") {
            self.hot_wallet.signer_api_key = key;
        }
    }

    /// Startup validation. Any error here aborts the process.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Missing("database.url"));
        }
        if self.chain.endpoint.trim().is_empty() {
            return Err(ConfigError::Missing("chain.endpoint"));
        }
        if self.token.contract.trim().is_empty() {
            return Err(ConfigError::Missing("token.contract"));
        }
        if self.token.decimals > MAX_DECIMALS {
            return Err(ConfigError::Invalid(format!(
                "token.decimals {} exceeds {}",
                self.token.decimals, MAX_DECIMALS
            )));
        }
        if self.chain.max_retries == 0 {
            return Err(ConfigError::Invalid("chain.max_retries must be >= 1".into()));
        }
        if self.chain.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "chain.request_timeout_ms must be > 0".into(),
            ));
        }
        if self.worker.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "worker.heartbeat_interval_ms must be > 0".into(),
            ));
        }

        if self.scanner.enabled
            && (self.scanner.poll_interval_ms == 0
                || self.scanner.batch_size == 0
                || self.scanner.concurrency == 0)
        {
            return Err(ConfigError::Invalid(
                "scanner interval, batch_size and concurrency must be > 0".into(),
            ));
        }

        if self.dispatcher.enabled {
            if self.hot_wallet.address.trim().is_empty() {
                return Err(ConfigError::Missing("hot_wallet.address"));
            }
            if self.hot_wallet.signer_url.trim().is_empty() {
                return Err(ConfigError::Missing("hot_wallet.signer_url"));
            }
            let d = &self.dispatcher;
            if d.poll_interval_ms == 0
                || d.batch_size == 0
                || d.concurrency == 0
                || d.stale_sweep_interval_ms == 0
                || d.stale_job_timeout_secs == 0
            {
                return Err(ConfigError::Invalid(
                    "dispatcher intervals, batch_size and concurrency must be > 0".into(),
                ));
            }
            if d.min_withdrawal <= Decimal::ZERO || d.min_withdrawal > d.max_withdrawal {
                return Err(ConfigError::Invalid(format!(
                    "withdrawal bounds [{}, {}] are not a positive range",
                    d.min_withdrawal, d.max_withdrawal
                )));
            }
        }

        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.chain.max_retries,
            Duration::from_millis(self.chain.retry_base_delay_ms),
        )
        .with_jitter(self.chain.retry_jitter)
    }

    /// Copy with secrets replaced, suitable for the worker registry row
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.database.url = REDACTED.to_string();
        if !copy.chain.api_key.is_empty() {
            copy.chain.api_key = REDACTED.to_string();
        }
        if !copy.hot_wallet.signer_api_key.is_empty() {
            copy.hot_wallet.signer_api_key = REDACTED.to_string();
        }
        copy
    }

    pub fn effective_json(&self) -> serde_json::Value {
        serde_json::to_value(self.redacted()).unwrap_or(serde_json::Value::Null)
    }
}
