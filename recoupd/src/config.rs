//! Daemon configuration.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::error::{DaemonError, DaemonResult};
use std::env;
use std::time::Duration;

// =============================================================================
// Configuration
// =============================================================================

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// API server configuration
    pub api: ApiConfig,

    /// Collection pipeline configuration
    pub collection: CollectionConfig,

    /// Environment (test, development, production)
    pub environment: Environment,
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
}

/// Collection pipeline configuration.
#[derive(Debug, Clone)]
pub struct CollectionConfig {
    /// Deadline for one upstream balance fetch (default: 240s)
    pub balance_timeout: Duration,
    /// Freshness window for cached balance snapshots (default: 300s)
    pub cache_freshness: Duration,
    /// Flow-control ceiling: max concurrently handled due-collection
    /// messages (default: 10)
    pub max_in_flight: usize,
    /// Internal message bus buffer capacity
    pub bus_capacity: usize,
}

/// Environment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Test environment (uses stubs)
    Test,
    /// Development environment
    Development,
    /// Production environment
    Production,
}

impl Environment {
    /// Whether stub upstreams and the in-memory store may be wired.
    /// Production requires real adapters.
    pub fn allows_stub_wiring(&self) -> bool {
        !matches!(self, Environment::Production)
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> DaemonResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        let environment = Self::load_environment()?;
        let api = Self::load_api_config()?;
        let collection = Self::load_collection_config()?;

        Ok(Self {
            api,
            collection,
            environment,
        })
    }

    /// Create test configuration.
    pub fn test() -> Self {
        Self {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
            },
            collection: CollectionConfig {
                balance_timeout: Duration::from_millis(250),
                cache_freshness: Duration::from_secs(300),
                max_in_flight: 4,
                bus_capacity: 100,
            },
            environment: Environment::Test,
        }
    }

    fn load_environment() -> DaemonResult<Environment> {
        let env_str = env::var("RECOUP_ENV").unwrap_or_else(|_| "development".to_string());

        match env_str.to_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(DaemonError::Config(format!(
                "Invalid RECOUP_ENV: {}. Expected: test, development, production",
                other
            ))),
        }
    }

    fn load_api_config() -> DaemonResult<ApiConfig> {
        let host = env::var("RECOUP_API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port_str = env::var("RECOUP_API_PORT").unwrap_or_else(|_| "8080".to_string());

        let port = port_str
            .parse::<u16>()
            .map_err(|_| DaemonError::Config(format!("Invalid RECOUP_API_PORT: {}", port_str)))?;

        Ok(ApiConfig { host, port })
    }

    fn load_collection_config() -> DaemonResult<CollectionConfig> {
        let balance_timeout =
            Duration::from_secs(Self::load_u64_env("RECOUP_BALANCE_TIMEOUT_SECS", 240)?);
        let cache_freshness =
            Duration::from_secs(Self::load_u64_env("RECOUP_CACHE_FRESHNESS_SECS", 300)?);
        let max_in_flight = Self::load_u64_env("RECOUP_MAX_IN_FLIGHT", 10)? as usize;
        let bus_capacity = Self::load_u64_env("RECOUP_BUS_CAPACITY", 1000)? as usize;

        if max_in_flight == 0 {
            return Err(DaemonError::Config(
                "RECOUP_MAX_IN_FLIGHT must be at least 1".to_string(),
            ));
        }

        Ok(CollectionConfig {
            balance_timeout,
            cache_freshness,
            max_in_flight,
            bus_capacity,
        })
    }

    fn load_u64_env(key: &str, default: u64) -> DaemonResult<u64> {
        match env::var(key) {
            Ok(val) => val
                .parse::<u64>()
                .map_err(|_| DaemonError::Config(format!("Invalid {} value: {}", key, val))),
            Err(_) => Ok(default),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            collection: CollectionConfig {
                balance_timeout: Duration::from_secs(240),
                cache_freshness: Duration::from_secs(300),
                max_in_flight: 10,
                bus_capacity: 1000,
            },
            environment: Environment::Development,
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Test => write!(f, "test"),
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
