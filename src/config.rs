//! Gateway configuration, loaded once at startup from a YAML file.
//!
//! Every field has a deployment-sensible default, so a missing config file is
//! not an error: the gateway then talks to `localhost:502`, slave 1, with all
//! nine Modbus functions enabled.

use crate::protocol::SupportedFunctionSet;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cannot parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid device address {0}:{1}")]
    InvalidAddress(String, u16),
}

/// The Modbus device this gateway instance talks to, and the functions the
/// operator has declared supported for it.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ModbusConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_slave")]
    pub slave: u8,
    #[serde(default = "default_connection_timeout", with = "humantime_serde")]
    pub connection_timeout: Duration,
    #[serde(default)]
    pub functions_supported: SupportedFunctionSet,
}

fn default_host() -> String {
    String::from("localhost")
}

fn default_port() -> u16 {
    502
}

fn default_slave() -> u8 {
    1
}

fn default_connection_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            slave: default_slave(),
            connection_timeout: default_connection_timeout(),
            functions_supported: SupportedFunctionSet::default(),
        }
    }
}

impl ModbusConfig {
    /// Resolves `host:port` to a socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr, Error> {
        use std::net::ToSocketAddrs;
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::InvalidAddress(self.host.clone(), self.port))
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default)]
    pub modbus: ModbusConfig,
}

impl GatewayConfig {
    /// Loads the configuration from a YAML file; a missing file yields the
    /// full defaults.
    pub fn load(path: &Path) -> Result<Self, Error> {
        match std::fs::File::open(path) {
            Ok(file) => Ok(serde_yaml::from_reader(&file)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("Config file {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(err) => Err(err.into()),
        }
    }
}
