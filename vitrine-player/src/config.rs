//! vitrine-player runtime configuration
//!
//! The TOML bootstrap config with command-line overrides applied on top.

use crate::error::{Error, Result};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use vitrine_common::config::TomlConfig;

/// Values given on the command line (or via their environment variables)
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub port: Option<u16>,
    pub bind_address: Option<String>,
    pub media_root: Option<PathBuf>,
}

/// Resolved service configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub toml: TomlConfig,
}

impl Config {
    pub fn new(mut toml: TomlConfig, overrides: Overrides) -> Self {
        if let Some(port) = overrides.port {
            toml.server.port = port;
        }
        if let Some(bind) = overrides.bind_address {
            toml.server.bind_address = bind;
        }
        if let Some(root) = overrides.media_root {
            // An explicit root replaces the candidate search
            toml.media.roots = vec![root];
        }
        Self { toml }
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self.toml.server.bind_address.parse().map_err(|e| {
            Error::Config(format!(
                "invalid bind address {}: {}",
                self.toml.server.bind_address, e
            ))
        })?;
        Ok(SocketAddr::new(ip, self.toml.server.port))
    }
}
