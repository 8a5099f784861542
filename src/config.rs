//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;
use std::str::FromStr;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub event_bus: EventBusConfig,
    pub logging: LoggingConfig,
    pub gateway: GatewayConfig,
    pub outbox: OutboxConfig,
    pub overdue: OverdueConfig,
    /// Run against the in-memory store and bus; no database or Redis needed.
    pub skip_externals: bool,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64, // seconds
}

/// Lifecycle event bus configuration
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Without a URL events are delivered to the in-memory bus.
    pub redis_url: Option<String>,
    pub stream_prefix: String,
    pub stream_max_len: usize,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Credentials and endpoint of one payment channel
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub base_url: String,
    pub api_key: String,
    pub webhook_secret: Option<String>,
    pub max_retries: u32,
}

/// Payment gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub timeout_secs: u64,
    pub bank_transfer: Option<ChannelConfig>,
    pub mobile_money: Option<ChannelConfig>,
}

/// Outbox publisher configuration
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    pub poll_interval_secs: u64,
    pub batch_size: usize,
    pub max_attempts: i32,
}

/// Overdue sweep configuration
#[derive(Debug, Clone)]
pub struct OverdueConfig {
    pub scan_interval_secs: u64,
    pub batch_size: usize,
}

fn parse_var<T: FromStr>(name: &str, default: &str) -> Result<T, ConfigError> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name.to_string()))
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        let skip_externals: bool = parse_var("SKIP_EXTERNALS", "false")?;

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env(skip_externals)?,
            event_bus: EventBusConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            gateway: GatewayConfig::from_env()?,
            outbox: OutboxConfig::from_env()?,
            overdue: OverdueConfig::from_env()?,
            skip_externals,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if !self.skip_externals {
            self.database.validate()?;
        }
        self.event_bus.validate()?;
        self.logging.validate()?;
        self.gateway.validate()?;
        self.outbox.validate()?;
        self.overdue.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_var("SERVER_PORT", "8000")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env(skip_externals: bool) -> Result<Self, ConfigError> {
        let url = match env::var("DATABASE_URL") {
            Ok(url) => url,
            Err(_) if skip_externals => String::new(),
            Err(_) => return Err(ConfigError::MissingVariable("DATABASE_URL".to_string())),
        };

        Ok(DatabaseConfig {
            url,
            max_connections: parse_var("DB_MAX_CONNECTIONS", "20")?,
            min_connections: parse_var("DB_MIN_CONNECTIONS", "2")?,
            connection_timeout: parse_var("DB_CONNECTION_TIMEOUT", "30")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl EventBusConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(EventBusConfig {
            redis_url: optional_var("REDIS_URL"),
            stream_prefix: env::var("EVENT_STREAM_PREFIX")
                .unwrap_or_else(|_| "loan-events".to_string()),
            stream_max_len: parse_var("EVENT_STREAM_MAX_LEN", "100000")?,
            max_connections: parse_var("REDIS_MAX_CONNECTIONS", "10")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.redis_url {
            // Basic validation of Redis URL format
            if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                return Err(ConfigError::InvalidValue(
                    "REDIS_URL must start with redis:// or rediss://".to_string(),
                ));
            }
        }

        if self.stream_prefix.is_empty() {
            return Err(ConfigError::InvalidValue("EVENT_STREAM_PREFIX".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("REDIS_MAX_CONNECTIONS".to_string()));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl ChannelConfig {
    /// Reads `{prefix}_BASE_URL`, `{prefix}_API_KEY`, `{prefix}_WEBHOOK_SECRET`
    /// and `{prefix}_MAX_RETRIES`. The channel is disabled when no base URL is set.
    pub fn from_env(prefix: &str) -> Result<Option<Self>, ConfigError> {
        let base_url = match optional_var(&format!("{}_BASE_URL", prefix)) {
            Some(url) => url,
            None => return Ok(None),
        };
        let api_key_var = format!("{}_API_KEY", prefix);
        let api_key =
            optional_var(&api_key_var).ok_or(ConfigError::MissingVariable(api_key_var))?;

        Ok(Some(ChannelConfig {
            base_url,
            api_key,
            webhook_secret: optional_var(&format!("{}_WEBHOOK_SECRET", prefix)),
            max_retries: parse_var(&format!("{}_MAX_RETRIES", prefix), "2")?,
        }))
    }

    pub fn validate(&self, prefix: &str) -> Result<(), ConfigError> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(format!(
                "{}_BASE_URL must be a valid URL",
                prefix
            )));
        }

        Ok(())
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(GatewayConfig {
            timeout_secs: parse_var("GATEWAY_TIMEOUT_SECS", "30")?,
            bank_transfer: ChannelConfig::from_env("BANK_TRANSFER")?,
            mobile_money: ChannelConfig::from_env("MOBILE_MONEY")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue("GATEWAY_TIMEOUT_SECS".to_string()));
        }

        if let Some(channel) = &self.bank_transfer {
            channel.validate("BANK_TRANSFER")?;
        }
        if let Some(channel) = &self.mobile_money {
            channel.validate("MOBILE_MONEY")?;
        }

        Ok(())
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            bank_transfer: None,
            mobile_money: None,
        }
    }
}

impl OutboxConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(OutboxConfig {
            poll_interval_secs: parse_var("OUTBOX_POLL_INTERVAL_SECS", "5")?,
            batch_size: parse_var("OUTBOX_BATCH_SIZE", "100")?,
            max_attempts: parse_var("OUTBOX_MAX_ATTEMPTS", "10")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "OUTBOX_POLL_INTERVAL_SECS".to_string(),
            ));
        }

        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue("OUTBOX_BATCH_SIZE".to_string()));
        }

        if self.max_attempts <= 0 {
            return Err(ConfigError::InvalidValue("OUTBOX_MAX_ATTEMPTS".to_string()));
        }

        Ok(())
    }
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            batch_size: 100,
            max_attempts: 10,
        }
    }
}

impl OverdueConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(OverdueConfig {
            scan_interval_secs: parse_var("OVERDUE_SCAN_INTERVAL_SECS", "3600")?,
            batch_size: parse_var("OVERDUE_BATCH_SIZE", "500")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "OVERDUE_SCAN_INTERVAL_SECS".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for OverdueConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 3600,
            batch_size: 500,
        }
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),
}
