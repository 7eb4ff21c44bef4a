//! Application configuration management.

use std::time::Duration;

use serde::Deserialize;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// General application settings.
    #[serde(default)]
    pub app: AppSettings,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Lock manager configuration.
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
}

/// General application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    /// Deployment environment name (`development`, `production`, ...).
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_environment() -> String {
    "development".to_string()
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            environment: default_environment(),
        }
    }
}

impl AppSettings {
    /// Returns true when running in production.
    #[must_use]
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

/// Lock manager configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ConcurrencyConfig {
    /// Age after which a held lock is considered abandoned.
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_secs: u64,
    /// Interval of the background sweep of expired locks.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_lock_timeout() -> u64 {
    300 // 5 minutes
}

fn default_sweep_interval() -> u64 {
    300 // 5 minutes
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            lock_timeout_secs: default_lock_timeout(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl ConcurrencyConfig {
    /// Lock timeout as a `Duration`.
    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    /// Sweep interval as a `Duration`.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl AppConfig {
    /// Loads configuration from environment and config files.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(config::Environment::with_prefix("BURSAR").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}
