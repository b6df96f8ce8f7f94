use plugsql_core::{PlugsqlError, Result};
use plugsql_protocol::HandshakeConfig;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

pub const DEFAULT_PREFIX: &str = "plugsql-plugin-";

/// Everything needed to launch and talk to one plugin. Fixed once a
/// [`crate::Driver`] has been built from it.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DriverConfig {
    pub name: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub handshake: HandshakeConfig,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
    #[serde(default)]
    pub call_timeout_ms: Option<u64>,
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_stop_grace_ms() -> u64 {
    2_000
}

impl DriverConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: default_prefix(),
            args: Vec::new(),
            env: BTreeMap::new(),
            handshake: HandshakeConfig::default(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            stop_grace_ms: default_stop_grace_ms(),
            call_timeout_ms: None,
        }
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn handshake(mut self, handshake: HandshakeConfig) -> Self {
        self.handshake = handshake;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace_ms = grace.as_millis() as u64;
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Executable to launch: prefix followed by the logical driver name.
    pub fn executable(&self) -> String {
        format!("{}{}", self.prefix, self.name)
    }

    pub fn handshake_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn stop_grace_duration(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn call_timeout_duration(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }

    pub fn from_path(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: DriverConfig = toml::from_str(&contents)
            .map_err(|e| PlugsqlError::Config(format!("{path}: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(PlugsqlError::Config("driver name is empty".into()));
        }
        if self
            .name
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_whitespace())
        {
            return Err(PlugsqlError::Config(format!(
                "driver name {:?} must not contain path separators or whitespace",
                self.name
            )));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(PlugsqlError::Config(
                "handshake_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.handshake.magic_cookie_key.is_empty() {
            return Err(PlugsqlError::Config("magic_cookie_key is empty".into()));
        }
        if self.call_timeout_ms == Some(0) {
            return Err(PlugsqlError::Config(
                "call_timeout_ms must be greater than zero when set".into(),
            ));
        }
        Ok(())
    }
}
