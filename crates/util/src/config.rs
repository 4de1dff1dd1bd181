use std::{env, fmt, net::SocketAddr, time::Duration};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

const DEFAULT_DATABASE_URL: &str = "sqlite://feedback.db?mode=rwc";
const DEFAULT_DIRECTORY_BASE_URL: &str = "http://127.0.0.1:9000/";

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Retry policy for ledger appends, exposed through configuration so the
/// attempt budget can be tuned per deployment.
#[derive(Debug, Clone, Copy)]
pub struct LedgerSettings {
    pub max_attempts: u32,
    pub backoff: Duration,
}

/// Cadence and delivery limits for the follow-up queue worker.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub poll_interval: Duration,
    pub batch_size: i64,
    pub lease: Duration,
    pub max_deliveries: i64,
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    pub directory_base_url: String,
    pub directory_timeout: Duration,
    pub ledger: LedgerSettings,
    pub worker: WorkerSettings,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;

        let bind_value = env::var("APP_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_value.parse().map_err(ConfigError::BindAddress)?;

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());
        let directory_base_url = env::var("DIRECTORY_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_DIRECTORY_BASE_URL.to_string());

        Ok(Self {
            bind_addr,
            environment,
            database_url,
            directory_base_url,
            directory_timeout: Duration::from_millis(env_u64("DIRECTORY_TIMEOUT_MS", 5_000)?),
            ledger: LedgerSettings {
                max_attempts: env_u64("LEDGER_MAX_ATTEMPTS", 5)? as u32,
                backoff: Duration::from_millis(env_u64("LEDGER_BACKOFF_MS", 25)?),
            },
            worker: WorkerSettings {
                poll_interval: Duration::from_millis(env_u64("FOLLOWUP_POLL_INTERVAL_MS", 1_000)?),
                batch_size: env_u64("FOLLOWUP_BATCH_SIZE", 16)? as i64,
                lease: Duration::from_secs(env_u64("FOLLOWUP_LEASE_SECS", 30)?),
                max_deliveries: env_u64("FOLLOWUP_MAX_DELIVERIES", 5)? as i64,
            },
        })
    }
}

fn env_u64(key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { key, value }),
        Err(_) => Ok(default),
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    InvalidNumber { key: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::InvalidNumber { key, value } => {
                write!(f, "{key} must be a non-negative integer (got {value})")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
