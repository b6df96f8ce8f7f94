//! Launch handshake between host and plugin.
//!
//! The host passes the magic cookie and its application protocol version to
//! the child through the environment. A compatible plugin answers with one
//! line on stdout:
//!
//! ```text
//! CORE-VERSION|APP-VERSION|NETWORK|ADDRESS|plugsql
//! ```
//!
//! where `NETWORK` is `tcp` or `unix`. Anything written to stdout after that
//! line is treated as log output.

use plugsql_core::{PlugsqlError, Result};
use serde::Deserialize;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Version of the framing and handshake line. Bumped when the value set or
/// the frame layout changes.
pub const CORE_PROTOCOL_VERSION: u32 = 1;

pub const PROTOCOL_NAME: &str = "plugsql";

/// Environment variable carrying the host's application protocol version.
pub const PROTOCOL_VERSION_ENV: &str = "PLUGSQL_PROTOCOL_VERSION";

pub const DEFAULT_COOKIE_KEY: &str = "PLUGSQL_MAGIC_COOKIE";
pub const DEFAULT_COOKIE_VALUE: &str = "3b1c9e4c-plugsql-driver";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    pub protocol_version: u32,
    pub magic_cookie_key: String,
    pub magic_cookie_value: String,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            protocol_version: 1,
            magic_cookie_key: DEFAULT_COOKIE_KEY.to_string(),
            magic_cookie_value: DEFAULT_COOKIE_VALUE.to_string(),
        }
    }
}

impl HandshakeConfig {
    /// Environment pairs the host must set on the child.
    pub fn env(&self) -> [(String, String); 2] {
        [
            (
                self.magic_cookie_key.clone(),
                self.magic_cookie_value.clone(),
            ),
            (
                PROTOCOL_VERSION_ENV.to_string(),
                self.protocol_version.to_string(),
            ),
        ]
    }

    /// Plugin side: confirms the process was launched by a compatible host.
    pub fn verify_env<F>(&self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        match lookup(&self.magic_cookie_key) {
            Some(value) if value == self.magic_cookie_value => {}
            _ => {
                return Err(PlugsqlError::HandshakeFailed(
                    "magic cookie mismatch: this binary is a plugsql plugin and is not meant to be executed directly".into(),
                ))
            }
        }
        let version = lookup(PROTOCOL_VERSION_ENV).ok_or_else(|| {
            PlugsqlError::HandshakeFailed(format!("{PROTOCOL_VERSION_ENV} not set"))
        })?;
        let version: u32 = version.trim().parse().map_err(|_| {
            PlugsqlError::HandshakeFailed(format!("invalid protocol version: {version}"))
        })?;
        if version != self.protocol_version {
            return Err(PlugsqlError::HandshakeFailed(format!(
                "host speaks protocol version {version}, plugin speaks {}",
                self.protocol_version
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeLine {
    pub core_version: u32,
    pub app_version: u32,
    pub endpoint: Endpoint,
}

impl HandshakeLine {
    pub fn render(&self) -> String {
        let (network, address) = match &self.endpoint {
            Endpoint::Tcp(addr) => ("tcp", addr.to_string()),
            Endpoint::Unix(path) => ("unix", path.display().to_string()),
        };
        format!(
            "{}|{}|{}|{}|{}",
            self.core_version, self.app_version, network, address, PROTOCOL_NAME
        )
    }

    pub fn parse(line: &str) -> Result<Self> {
        // the address is the only field allowed to contain '|'
        let mut head = line.trim().splitn(4, '|');
        let (Some(core), Some(app), Some(network), Some(rest)) =
            (head.next(), head.next(), head.next(), head.next())
        else {
            return Err(malformed(line));
        };
        let Some((address, protocol)) = rest.rsplit_once('|') else {
            return Err(malformed(line));
        };
        let core_version = core.parse().map_err(|_| malformed(line))?;
        let app_version = app.parse().map_err(|_| malformed(line))?;
        let endpoint = match network {
            "tcp" => Endpoint::Tcp(address.parse().map_err(|_| malformed(line))?),
            "unix" => Endpoint::Unix(PathBuf::from(address)),
            other => {
                return Err(PlugsqlError::HandshakeFailed(format!(
                    "unsupported network type: {other}"
                )))
            }
        };
        if protocol != PROTOCOL_NAME {
            return Err(PlugsqlError::HandshakeFailed(format!(
                "unsupported protocol: {protocol}"
            )));
        }
        Ok(Self {
            core_version,
            app_version,
            endpoint,
        })
    }

    /// Host side: checks the versions the plugin reported.
    pub fn check(&self, config: &HandshakeConfig) -> Result<()> {
        if self.core_version != CORE_PROTOCOL_VERSION {
            return Err(PlugsqlError::HandshakeFailed(format!(
                "plugin core protocol version {} is incompatible with {}",
                self.core_version, CORE_PROTOCOL_VERSION
            )));
        }
        if self.app_version != config.protocol_version {
            return Err(PlugsqlError::HandshakeFailed(format!(
                "plugin protocol version {} does not match {}",
                self.app_version, config.protocol_version
            )));
        }
        Ok(())
    }
}

fn malformed(line: &str) -> PlugsqlError {
    PlugsqlError::HandshakeFailed(format!("malformed handshake line: {line:?}"))
}
