//! Controller settings read from the environment
//!
//! - `VERSIO_HEALTH_PORT`: port of the health and metrics server (default: 8080)
//! - `VERSIO_WATCH_NAMESPACE`: only watch this namespace (default: all)
//! - `VERSIO_CONCURRENCY`: configs reconciled in parallel (default: 4)
//! - `VERSIO_MAX_RETRIES`: failed passes before a key is dropped (default: 15)

use crate::controller::requeue::DEFAULT_MAX_RETRIES;
use thiserror::Error;

pub const DEFAULT_HEALTH_PORT: u16 = 8080;
pub const DEFAULT_CONCURRENCY: u16 = 4;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub health_port: u16,
    pub watch_namespace: Option<String>,
    pub concurrency: u16,
    pub max_retries: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            health_port: DEFAULT_HEALTH_PORT,
            watch_namespace: None,
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl ControllerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the config from any variable source; unset or empty means default
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            health_port: parse_or("VERSIO_HEALTH_PORT", get("VERSIO_HEALTH_PORT"), defaults.health_port)?,
            watch_namespace: get("VERSIO_WATCH_NAMESPACE"),
            concurrency: parse_or("VERSIO_CONCURRENCY", get("VERSIO_CONCURRENCY"), defaults.concurrency)?,
            max_retries: parse_or("VERSIO_MAX_RETRIES", get("VERSIO_MAX_RETRIES"), defaults.max_retries)?,
        })
    }
}

fn parse_or<T>(name: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
            value,
        }),
    }
}
