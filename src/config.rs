//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
    pub gateway: GatewayConfig,
    pub erp: ErpConfig,
    pub workers: WorkerConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Client-visible origin the return handler redirects to
    pub frontend_url: String,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Redis configuration (job broker backend)
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub redis_url: String,
    pub max_connections: u32,
    pub key_prefix: String,
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

/// Card gateway credentials and endpoints
#[derive(Clone)]
pub struct GatewayConfig {
    pub register_url: String,
    pub acknowledge_url: String,
    pub merchant_id: String,
    pub password: String,
    pub currency: String,
    pub language: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

/// ERP OData endpoints and credentials
#[derive(Clone)]
pub struct ErpConfig {
    pub pending_amount_base_url: String,
    pub posting_base_url: String,
    pub username: String,
    pub password: String,
    pub timeout_secs: u64,
}

/// Worker pool and retry policy settings
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub ack_concurrency: usize,
    pub erp_concurrency: usize,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub job_timeout: Duration,
    pub dequeue_wait: Duration,
}

// Credentials must never reach the logs, so the Debug impls below redact them.
impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("register_url", &self.register_url)
            .field("acknowledge_url", &self.acknowledge_url)
            .field("merchant_id", &self.merchant_id)
            .field("password", &"***")
            .field("currency", &self.currency)
            .field("language", &self.language)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl std::fmt::Debug for ErpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErpConfig")
            .field("pending_amount_base_url", &self.pending_amount_base_url)
            .field("posting_base_url", &self.posting_base_url)
            .field("username", &self.username)
            .field("password", &"***")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            cache: CacheConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            gateway: GatewayConfig::from_env()?,
            erp: ErpConfig::from_env()?,
            workers: WorkerConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.cache.validate()?;
        self.logging.validate()?;
        self.gateway.validate()?;
        self.erp.validate()?;
        self.workers.validate()?;

        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: &str) -> Result<T, ConfigError> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name.to_string()))
}

fn require_http_url(name: &str, value: &str) -> Result<(), ConfigError> {
    if !value.starts_with("http://") && !value.starts_with("https://") {
        return Err(ConfigError::InvalidValue(format!(
            "{} must be a valid URL",
            name
        )));
    }
    Ok(())
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_var("PORT", "3000")?,
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:8081".to_string()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue("PORT cannot be 0".to_string()));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue("HOST cannot be empty".to_string()));
        }

        require_http_url("FRONTEND_URL", &self.frontend_url)
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: parse_var("DB_MAX_CONNECTIONS", "20")?,
            min_connections: parse_var("DB_MIN_CONNECTIONS", "5")?,
            connection_timeout: parse_var("DB_CONNECTION_TIMEOUT", "30")?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
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
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            max_connections: parse_var("REDIS_MAX_CONNECTIONS", "10")?,
            key_prefix: env::var("QUEUE_KEY_PREFIX").unwrap_or_else(|_| "settlement".to_string()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redis_url.is_empty() {
            return Err(ConfigError::InvalidValue("REDIS_URL".to_string()));
        }

        if !self.redis_url.starts_with("redis://") && !self.redis_url.starts_with("rediss://") {
            return Err(ConfigError::InvalidValue(
                "REDIS_URL must start with redis:// or rediss://".to_string(),
            ));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue(
                "REDIS_MAX_CONNECTIONS".to_string(),
            ));
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

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(GatewayConfig {
            register_url: env::var("GATEWAY_REGISTER_URL").unwrap_or_else(|_| {
                "https://test2.satim.dz/payment/rest/register.do".to_string()
            }),
            acknowledge_url: env::var("GATEWAY_ACK_URL").unwrap_or_else(|_| {
                "https://test2.satim.dz/payment/rest/public/acknowledgeTransaction.do".to_string()
            }),
            merchant_id: env::var("GATEWAY_MERCHANT_ID")
                .map_err(|_| ConfigError::MissingVariable("GATEWAY_MERCHANT_ID".to_string()))?,
            password: env::var("GATEWAY_PASSWORD")
                .map_err(|_| ConfigError::MissingVariable("GATEWAY_PASSWORD".to_string()))?,
            currency: env::var("GATEWAY_CURRENCY").unwrap_or_else(|_| "012".to_string()),
            language: env::var("GATEWAY_LANGUAGE").unwrap_or_else(|_| "FR".to_string()),
            timeout_secs: parse_var("GATEWAY_TIMEOUT_SECS", "15")?,
            max_retries: parse_var("GATEWAY_MAX_RETRIES", "0")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_http_url("GATEWAY_REGISTER_URL", &self.register_url)?;
        require_http_url("GATEWAY_ACK_URL", &self.acknowledge_url)?;

        if self.merchant_id.is_empty() {
            return Err(ConfigError::InvalidValue("GATEWAY_MERCHANT_ID".to_string()));
        }

        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue("GATEWAY_TIMEOUT_SECS".to_string()));
        }

        Ok(())
    }
}

impl ErpConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ErpConfig {
            pending_amount_base_url: env::var("ERP_PENDING_BASE_URL")
                .map_err(|_| ConfigError::MissingVariable("ERP_PENDING_BASE_URL".to_string()))?,
            posting_base_url: env::var("ERP_POSTING_BASE_URL")
                .map_err(|_| ConfigError::MissingVariable("ERP_POSTING_BASE_URL".to_string()))?,
            username: env::var("ERP_USER").unwrap_or_default(),
            password: env::var("ERP_PASSWORD").unwrap_or_default(),
            timeout_secs: parse_var("ERP_TIMEOUT_SECS", "15")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_http_url("ERP_PENDING_BASE_URL", &self.pending_amount_base_url)?;
        require_http_url("ERP_POSTING_BASE_URL", &self.posting_base_url)?;

        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue("ERP_TIMEOUT_SECS".to_string()));
        }

        Ok(())
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            ack_concurrency: 2,
            erp_concurrency: 2,
            max_attempts: 5,
            backoff_base: Duration::from_secs(60),
            backoff_max: Duration::from_secs(3600),
            job_timeout: Duration::from_secs(60),
            dequeue_wait: Duration::from_secs(5),
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(WorkerConfig {
            ack_concurrency: parse_var(
                "ACK_WORKER_CONCURRENCY",
                &defaults.ack_concurrency.to_string(),
            )?,
            erp_concurrency: parse_var(
                "ERP_WORKER_CONCURRENCY",
                &defaults.erp_concurrency.to_string(),
            )?,
            max_attempts: parse_var("JOB_MAX_ATTEMPTS", &defaults.max_attempts.to_string())?,
            backoff_base: Duration::from_secs(parse_var(
                "JOB_BACKOFF_BASE_SECS",
                &defaults.backoff_base.as_secs().to_string(),
            )?),
            backoff_max: Duration::from_secs(parse_var(
                "JOB_BACKOFF_MAX_SECS",
                &defaults.backoff_max.as_secs().to_string(),
            )?),
            job_timeout: Duration::from_secs(parse_var(
                "JOB_TIMEOUT_SECS",
                &defaults.job_timeout.as_secs().to_string(),
            )?),
            dequeue_wait: defaults.dequeue_wait,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ack_concurrency == 0 || self.erp_concurrency == 0 {
            return Err(ConfigError::InvalidValue(
                "worker concurrency must be at least 1".to_string(),
            ));
        }

        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue("JOB_MAX_ATTEMPTS".to_string()));
        }

        if self.backoff_base > self.backoff_max {
            return Err(ConfigError::InvalidValue(
                "JOB_BACKOFF_BASE_SECS must be <= JOB_BACKOFF_MAX_SECS".to_string(),
            ));
        }

        Ok(())
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
