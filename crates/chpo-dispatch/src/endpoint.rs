//! Where the coordinator listens.

use serde::{Deserialize, Serialize};

use chpo_types::{config_error, HpoResult};

/// Environment variable overriding the coordinator address (`host:port`).
pub const COORDINATOR_ADDR_ENV: &str = "CHPO_COORDINATOR_ADDR";

/// Coordinator bind address. Port 0 asks the OS for a free port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
        }
    }
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Parse a `host:port` string.
    pub fn parse(addr: &str) -> HpoResult<Self> {
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| config_error!("coordinator address {addr:?} is not host:port"))?;
        let port = port
            .parse::<u16>()
            .map_err(|e| config_error!("invalid port in {addr:?}: {e}"))?;
        if host.is_empty() {
            return Err(config_error!("coordinator address {addr:?} has no host"));
        }
        Ok(Self::new(host.trim_matches(|c| c == '[' || c == ']'), port))
    }

    /// The default endpoint, or the one named by `CHPO_COORDINATOR_ADDR`.
    pub fn from_env() -> HpoResult<Self> {
        match std::env::var(COORDINATOR_ADDR_ENV) {
            Ok(addr) => Self::parse(&addr),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn address(&self) -> String {
        match self.host.parse::<std::net::Ipv6Addr>() {
            Ok(_) => format!("[{}]:{}", self.host, self.port),
            Err(_) => format!("{}:{}", self.host, self.port),
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.address())
    }
}
