//! Environment-driven service configuration.
//!
//! Every service reads the same variables; the defaults suit a local
//! Redpanda on `localhost:9092` with all services on one host.
//!
//! | Variable | Default |
//! |---|---|
//! | `LOG_LEVEL` | `info` (`RUST_LOG` wins when set) |
//! | `HTTP_ADDR` | gateway `0.0.0.0:8080`, order `0.0.0.0:8081`, payment `0.0.0.0:8082` |
//! | `GRPC_ADDR` | `0.0.0.0:9090` (payment only) |
//! | `METRICS_ADDR` | unset (no exporter) |
//! | `KAFKA_BROKERS` | `localhost:9092` |
//! | `KAFKA_TOPIC` | `payments` |
//! | `KAFKA_GROUP_ID` | `<service>-service` |
//! | `JAEGER_ENDPOINT` | unset (no trace export) |
//! | `CATALOG_PATH` | unset (built-in catalog) |
//! | `ORDER_URL` | `http://localhost:8081` |
//! | `PAYMENT_URL` | `http://localhost:9090` |
//! | `REQUEST_TIMEOUT_SECS` | `10` |
//!
//! # Example
//!
//! ```no_run
//! use tracemesh_services::ServiceConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServiceConfig::from_env("payment")?;
//! println!("Consuming {} as {}", config.kafka_topic, config.kafka_group_id);
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracemesh_core::ServiceCatalog;

/// Configuration error
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A variable is set to a value that cannot be parsed.
    #[error("Invalid value for {var}: {reason}")]
    Invalid {
        /// Variable name.
        var: &'static str,
        /// Parse failure.
        reason: String,
    },

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    Validation(String),

    /// The service catalog could not be loaded.
    #[error("Failed to load catalog {path}: {reason}")]
    Catalog {
        /// Catalog file.
        path: PathBuf,
        /// Read or parse failure.
        reason: String,
    },
}

/// Configuration shared by the gateway, order and payment services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Service name, used for logs, metrics and traces.
    pub service: String,
    /// Default log filter.
    pub log_level: String,
    /// HTTP listen address.
    pub http_addr: SocketAddr,
    /// gRPC listen address; the port matches the default `PAYMENT_URL`.
    pub grpc_addr: SocketAddr,
    /// Prometheus exporter address.
    pub metrics_addr: Option<SocketAddr>,
    /// Comma-separated broker list.
    pub kafka_brokers: String,
    /// Topic carrying payment events.
    pub kafka_topic: String,
    /// Consumer group of this service.
    pub kafka_group_id: String,
    /// Jaeger agent endpoint, e.g. `localhost:6831`.
    pub jaeger_endpoint: Option<String>,
    /// TOML catalog replacing the built-in one.
    pub catalog_path: Option<PathBuf>,
    /// Order service base URL for the built-in catalog.
    pub order_url: String,
    /// Payment service base URL for the built-in catalog.
    pub payment_url: String,
    /// Timeout for outgoing REST and RPC calls and broker acknowledgements.
    pub request_timeout: Duration,
}

impl ServiceConfig {
    /// Load configuration for `service` from the process environment.
    ///
    /// # Errors
    ///
    /// Returns error if a variable cannot be parsed or the result is invalid.
    pub fn from_env(service: &str) -> Result<Self, ConfigError> {
        Self::from_lookup(service, |var| std::env::var(var).ok())
    }

    /// Load configuration for `service`, reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns error if a variable cannot be parsed or the result is invalid.
    pub fn from_lookup<F>(service: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |var: &str, default: &str| lookup(var).unwrap_or_else(|| default.to_string());

        let default_http = match service {
            "gateway" => "0.0.0.0:8080",
            "order" => "0.0.0.0:8081",
            _ => "0.0.0.0:8082",
        };
        let config = Self {
            service: service.to_string(),
            log_level: text("LOG_LEVEL", "info"),
            http_addr: parse("HTTP_ADDR", &text("HTTP_ADDR", default_http))?,
            grpc_addr: parse("GRPC_ADDR", &text("GRPC_ADDR", "0.0.0.0:9090"))?,
            metrics_addr: lookup("METRICS_ADDR")
                .map(|addr| parse("METRICS_ADDR", &addr))
                .transpose()?,
            kafka_brokers: text("KAFKA_BROKERS", "localhost:9092"),
            kafka_topic: text("KAFKA_TOPIC", "payments"),
            kafka_group_id: text("KAFKA_GROUP_ID", &format!("{service}-service")),
            jaeger_endpoint: lookup("JAEGER_ENDPOINT").filter(|s| !s.is_empty()),
            catalog_path: lookup("CATALOG_PATH").filter(|s| !s.is_empty()).map(PathBuf::from),
            order_url: text("ORDER_URL", "http://localhost:8081"),
            payment_url: text("PAYMENT_URL", "http://localhost:9090"),
            request_timeout: Duration::from_secs(parse(
                "REQUEST_TIMEOUT_SECS",
                &text("REQUEST_TIMEOUT_SECS", "10"),
            )?),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if any value is unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::Validation(format!(
                "invalid log_level: {}. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }
        if self.kafka_brokers.trim().is_empty() {
            return Err(ConfigError::Validation("kafka_brokers cannot be empty".to_string()));
        }
        if self.kafka_topic.trim().is_empty() {
            return Err(ConfigError::Validation("kafka_topic cannot be empty".to_string()));
        }
        if self.kafka_group_id.trim().is_empty() {
            return Err(ConfigError::Validation("kafka_group_id cannot be empty".to_string()));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Validation("request_timeout must be > 0".to_string()));
        }
        Ok(())
    }

    /// Load the catalog from `catalog_path`, if set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Catalog`] if the file cannot be read or parsed.
    pub fn load_catalog(&self) -> Result<Option<ServiceCatalog>, ConfigError> {
        let Some(path) = &self.catalog_path else {
            return Ok(None);
        };
        let catalog_error = |reason: String| ConfigError::Catalog {
            path: path.clone(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| catalog_error(e.to_string()))?;
        let catalog = toml::from_str(&text).map_err(|e| catalog_error(e.to_string()))?;
        tracing::info!(path = %path.display(), "Service catalog loaded");
        Ok(Some(catalog))
    }
}

fn parse<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        reason: format!("{value:?}: {e}"),
    })
}
