//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod storage;

pub use storage::{MongodbConfig, StorageConfig, StorageType};

use std::time::Duration;

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "LEDGERSYNC_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "LEDGERSYNC";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "LEDGERSYNC_LOG";
/// Legacy environment variable carrying the recharge signing key.
pub const RECHARGE_SECRET_ENV_VAR: &str = "RECHARGE_SECRET_KEY";
/// Signing key used when none is configured. Never acceptable in production.
pub const DEFAULT_RECHARGE_SECRET: &str = "your-secret-key-change-in-production";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Ledger call timeouts.
    pub ledger: LedgerConfig,
    /// Projection store configuration.
    pub storage: StorageConfig,
    /// Event dispatcher configuration.
    pub dispatcher: DispatcherConfig,
    /// Recharge workflow configuration.
    pub recharge: RechargeConfig,
    /// Periodic reconciliation.
    pub reconcile: ReconcileConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    /// 5. `RECHARGE_SECRET_KEY`, when no signing key was set above
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Config = config.try_deserialize()?;
        config.apply_legacy_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Fill settings still unset from legacy environment variables.
    pub fn apply_legacy_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.recharge.secret_key.is_none() {
            self.recharge.secret_key = lookup(RECHARGE_SECRET_ENV_VAR).filter(|k| !k.is_empty());
        }
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        let mut config = Self::default();
        config.recharge.secret_key = Some("test-secret".to_string());
        config
    }
}

/// Timeouts applied to every ledger call.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Read-only evaluate timeout in milliseconds.
    pub evaluate_timeout_ms: u64,
    /// Submit timeout in milliseconds. Covers commit latency.
    pub submit_timeout_ms: u64,
}

impl LedgerConfig {
    pub fn evaluate_timeout(&self) -> Duration {
        Duration::from_millis(self.evaluate_timeout_ms)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            evaluate_timeout_ms: 5_000,
            submit_timeout_ms: 30_000,
        }
    }
}

/// Event dispatcher configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Name checkpoints are stored under.
    pub handler_name: String,
    /// Explicit start block. Overrides the stored checkpoint.
    pub start_block: Option<u64>,
    /// Only these event names are processed. Empty processes everything.
    pub event_filter: Vec<String>,
    /// Restart attempts after a subscription failure before giving up.
    pub max_restarts: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            handler_name: "projection-sync".to_string(),
            start_block: None,
            event_filter: Vec::new(),
            max_restarts: 10,
        }
    }
}

/// Recharge workflow configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RechargeConfig {
    /// Shared secret for request signatures.
    pub secret_key: Option<String>,
    /// Oldest accepted request timestamp, in seconds.
    pub max_age_secs: i64,
    /// Tokens credited per recharge.
    pub package_amount: i64,
}

impl RechargeConfig {
    /// Configured signing key, or the built-in fallback.
    pub fn signing_key(&self) -> &str {
        match self.secret_key.as_deref() {
            Some(key) => key,
            None => {
                tracing::warn!(
                    "No recharge secret key configured, using the built-in default; set {}",
                    RECHARGE_SECRET_ENV_VAR
                );
                DEFAULT_RECHARGE_SECRET
            }
        }
    }
}

impl Default for RechargeConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            max_age_secs: 300,
            package_amount: 150,
        }
    }
}

/// Periodic ledger/projection reconciliation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
        }
    }
}
