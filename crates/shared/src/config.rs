//! Application configuration management.

use serde::Deserialize;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Approval engine behaviour.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
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

/// Approval engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Kind tag attached to approval reminders; used again when clearing them.
    #[serde(default = "default_reminder_kind")]
    pub reminder_kind: String,
    /// Reason stored when a rejection is made without one.
    #[serde(default = "default_rejection_reason")]
    pub default_rejection_reason: String,
    /// Refuse rejections that carry no reason.
    #[serde(default)]
    pub require_rejection_reason: bool,
}

fn default_reminder_kind() -> String {
    "approval_todo".to_string()
}

fn default_rejection_reason() -> String {
    "Rejected by user.".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reminder_kind: default_reminder_kind(),
            default_rejection_reason: default_rejection_reason(),
            require_rejection_reason: false,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Emit JSON lines instead of human readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_filter() -> String {
    "checkpoint=debug,sea_orm=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from environment and config files.
    ///
    /// Sources, later ones winning: `config/default`, `config/{RUN_MODE}`,
    /// then `CHECKPOINT__SECTION__KEY` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(config::Environment::with_prefix("CHECKPOINT").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}
