//! Configuration management for the server.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Up to two positional arguments override the registration path and the
//! access delay.

use ems_core::EngineConfig;
use ems_core::config::DEFAULT_MAX_SEATS_PER_RESERVE;
use ems_runtime::ServerConfig;
use ems_runtime::server::DEFAULT_MAX_SESSIONS;
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors in the command line or environment.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// Too many positional arguments
    #[error("Usage: ems-server [registration_path] [access_delay_us]")]
    Usage,

    /// A value is present but unusable
    #[error("Invalid {name}: {value}")]
    Invalid {
        /// Setting name
        name: &'static str,
        /// Offending value
        value: String,
    },
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Path of the registration socket
    pub registration_path: PathBuf,
    /// Maximum concurrent sessions
    pub max_sessions: usize,
    /// Maximum seats per reserve request
    pub max_seats_per_reserve: usize,
    /// Delay awaited on every event lookup and seat access, in microseconds
    pub access_delay_us: u64,
    /// Prometheus exporter address; no exporter when unset
    pub metrics_addr: Option<SocketAddr>,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
}

impl Config {
    /// Load configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            registration_path: lookup("EMS_REGISTRATION_PATH")
                .map_or_else(|| PathBuf::from("/tmp/ems.sock"), PathBuf::from),
            max_sessions: lookup("EMS_MAX_SESSIONS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_SESSIONS),
            max_seats_per_reserve: lookup("EMS_MAX_SEATS_PER_RESERVE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_SEATS_PER_RESERVE),
            access_delay_us: lookup("EMS_ACCESS_DELAY_US")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            metrics_addr: lookup("EMS_METRICS_ADDR").and_then(|s| s.parse().ok()),
            shutdown_timeout: lookup("EMS_SHUTDOWN_TIMEOUT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
        }
    }

    /// Apply positional arguments: `[registration_path] [access_delay_us]`.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Usage`] for more than two arguments
    /// - [`ConfigError::Invalid`] for a delay that is not a number
    pub fn with_args<I>(mut self, args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        if let Some(path) = args.next() {
            self.registration_path = PathBuf::from(path);
        }
        if let Some(delay) = args.next() {
            self.access_delay_us = delay.parse().map_err(|_| ConfigError::Invalid {
                name: "access delay",
                value: delay,
            })?;
        }
        if args.next().is_some() {
            return Err(ConfigError::Usage);
        }
        self.validate()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.max_sessions == 0 {
            return Err(ConfigError::Invalid {
                name: "EMS_MAX_SESSIONS",
                value: "0".to_string(),
            });
        }
        if self.max_seats_per_reserve == 0 {
            return Err(ConfigError::Invalid {
                name: "EMS_MAX_SEATS_PER_RESERVE",
                value: "0".to_string(),
            });
        }
        Ok(self)
    }

    /// Runtime configuration for [`Server::start`](ems_runtime::Server::start)
    #[must_use]
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::default()
            .with_max_sessions(self.max_sessions)
            .with_engine(EngineConfig::new(
                Duration::from_micros(self.access_delay_us),
                self.max_seats_per_reserve,
            ))
    }

    /// Graceful shutdown timeout
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }
}
