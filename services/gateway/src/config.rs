//! Process configuration from the environment
//!
//! | Variable           | Default        | Meaning                          |
//! |--------------------|----------------|----------------------------------|
//! | `STONKS_BIND`      | `0.0.0.0:8080` | Listen address                   |
//! | `STONKS_DATA_DIR`  | unset          | JSON-lines store, memory if unset |
//! | `STONKS_PORTFOLIO` | unset          | Holdings document                |
//! | `STONKS_SIMULATE`  | `false`        | Run the random-walk feed         |

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid STONKS_BIND {value:?}: {source}")]
    InvalidBind {
        value: String,
        source: std::net::AddrParseError,
    },

    #[error("invalid boolean for {name}: {value:?}")]
    InvalidFlag { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub bind: SocketAddr,
    pub data_dir: Option<PathBuf>,
    pub portfolio: Option<PathBuf>,
    pub simulate: bool,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind = match lookup("STONKS_BIND") {
            Some(value) => value
                .parse()
                .map_err(|source| ConfigError::InvalidBind { value, source })?,
            None => SocketAddr::from(([0, 0, 0, 0], 8080)),
        };
        let simulate = match lookup("STONKS_SIMULATE") {
            Some(value) => parse_flag("STONKS_SIMULATE", value)?,
            None => false,
        };

        Ok(Self {
            bind,
            data_dir: lookup("STONKS_DATA_DIR").map(PathBuf::from),
            portfolio: lookup("STONKS_PORTFOLIO").map(PathBuf::from),
            simulate,
        })
    }
}

fn parse_flag(name: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidFlag { name, value }),
    }
}
