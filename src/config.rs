//! Application configuration module
//! Loads settings from the environment (and `.env` when present) and validates them.

use crate::payments::providers::ClickPesaConfig;
use std::env;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: String,
    /// Run against the in-memory ledger instead of Postgres
    pub skip_externals: bool,
    pub server: ServerConfig,
    pub database: Option<DatabaseConfig>,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
    pub clickpesa: ClickPesaConfig,
    pub supabase: SupabaseConfig,
    pub payment: PaymentConfig,
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
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
    pub run_migrations: bool,
}

/// Shared credential store; unset means tokens stay in-process
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub redis_url: Option<String>,
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

/// Identity service used to resolve bearer tokens
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub anon_key: String,
}

/// Payment defaults and client-side polling budget
#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub default_currency: String,
    pub country_prefix: String,
    pub poll_interval_secs: u64,
    pub poll_max_attempts: u32,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            default_currency: "TZS".to_string(),
            country_prefix: "255".to_string(),
            poll_interval_secs: 5,
            poll_max_attempts: 24,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        let skip_externals = parse_bool("SKIP_EXTERNALS", false)?;
        let database = if skip_externals {
            None
        } else {
            Some(DatabaseConfig::from_env()?)
        };

        Ok(AppConfig {
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            skip_externals,
            server: ServerConfig::from_env()?,
            database,
            cache: CacheConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            clickpesa: ClickPesaConfig::from_env(),
            supabase: SupabaseConfig::from_env(),
            payment: PaymentConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        self.cache.validate()?;
        self.logging.validate()?;
        self.payment.validate()?;
        if !self.skip_externals {
            self.supabase.validate()?;
        }

        Ok(())
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".to_string()))?,
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
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()))?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MIN_CONNECTIONS".to_string()))?,
            connection_timeout: env::var("DB_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_CONNECTION_TIMEOUT".to_string()))?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
            run_migrations: parse_bool("RUN_MIGRATIONS", false)?,
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

impl CacheConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(CacheConfig {
            redis_url: env::var("REDIS_URL").ok().filter(|v| !v.trim().is_empty()),
            max_connections: env::var("CACHE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("CACHE_MAX_CONNECTIONS".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.redis_url {
            if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                return Err(ConfigError::InvalidValue(
                    "REDIS_URL must start with redis:// or rediss://".to_string(),
                ));
            }
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

impl SupabaseConfig {
    pub fn from_env() -> Self {
        SupabaseConfig {
            url: env::var("SUPABASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_default(),
            anon_key: env::var("SUPABASE_ANON_KEY").unwrap_or_default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::MissingVariable("SUPABASE_URL".to_string()));
        }
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "SUPABASE_URL must be a valid URL".to_string(),
            ));
        }
        if self.anon_key.is_empty() {
            return Err(ConfigError::MissingVariable(
                "SUPABASE_ANON_KEY".to_string(),
            ));
        }

        Ok(())
    }
}

impl PaymentConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(PaymentConfig {
            default_currency: env::var("PAYMENT_DEFAULT_CURRENCY")
                .unwrap_or(defaults.default_currency),
            country_prefix: env::var("PAYMENT_COUNTRY_PREFIX").unwrap_or(defaults.country_prefix),
            poll_interval_secs: env::var("PAYMENT_POLL_INTERVAL_SECS")
                .unwrap_or_else(|_| defaults.poll_interval_secs.to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PAYMENT_POLL_INTERVAL_SECS".to_string()))?,
            poll_max_attempts: env::var("PAYMENT_POLL_MAX_ATTEMPTS")
                .unwrap_or_else(|_| defaults.poll_max_attempts.to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PAYMENT_POLL_MAX_ATTEMPTS".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_currency.trim().len() != 3 {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_DEFAULT_CURRENCY must be a 3-letter code".to_string(),
            ));
        }
        if self.country_prefix.is_empty() || !self.country_prefix.chars().all(|c| c.is_ascii_digit())
        {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_COUNTRY_PREFIX must be digits".to_string(),
            ));
        }
        if self.poll_interval_secs == 0 || self.poll_max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "poll interval and attempt ceiling must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_bool(key: &str, default: bool) -> Result<bool, ConfigError> {
    match env::var(key) {
        Ok(v) => match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" | "" => Ok(false),
            _ => Err(ConfigError::InvalidValue(key.to_string())),
        },
        Err(_) => Ok(default),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
