//! Metrics endpoint configuration.

use crate::error::{ExporterError, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

/// Where the metrics endpoint listens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebConfig {
    /// Interface address; `0.0.0.0` listens everywhere
    pub host: String,
    /// TCP port scrapers connect to
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self::new("0.0.0.0", crate::DEFAULT_PORT)
    }
}

impl WebConfig {
    /// Create a configuration for the given host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Set the host the endpoint binds to.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port scrapers connect to.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// `host:port`, as given.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Resolve the listen address. The host must be an IP literal.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self.host.trim_matches(['[', ']']).parse().map_err(|e| {
            ExporterError::config_error(format!("Invalid bind host '{}': {}", self.host, e))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}
