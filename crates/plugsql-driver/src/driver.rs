use crate::config::DriverConfig;
use crate::conn::Connection;
use crate::session::Session;
use crate::supervisor::PluginProcess;
use plugsql_core::{PlugsqlError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// The plugin is launched on the first `connect` and relaunched if it has
/// exited since.
#[derive(Debug)]
pub struct Driver {
    config: Arc<DriverConfig>,
    process: Mutex<Option<PluginProcess>>,
    closed: AtomicBool,
}

impl Driver {
    pub fn new(config: DriverConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            process: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Opens a connection on its own channel, launching the plugin first if
    /// it is not running.
    pub async fn connect(&self) -> Result<Connection> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PlugsqlError::DriverClosed);
        }
        let mut process = self.process.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(PlugsqlError::DriverClosed);
        }

        let running = match process.as_mut() {
            Some(plugin) => plugin.is_running(),
            None => false,
        };
        if !running {
            if process.is_some() {
                warn!(plugin = %self.config.name, "plugin is not running, restarting");
            }
            *process = Some(PluginProcess::start(&self.config).await?);
        }

        let Some(plugin) = process.as_ref() else {
            return Err(PlugsqlError::DriverClosed);
        };
        let session = Session::dial(plugin.endpoint(), self.config.call_timeout_duration()).await?;
        let conn = Connection::new(self.config.name.clone(), session);
        info!(
            plugin = %self.config.name,
            pid = plugin.pid(),
            conn_id = %conn.id(),
            "connection opened"
        );
        Ok(conn)
    }

    /// Opens a connection, pings over it and closes it.
    pub async fn ping(&self) -> Result<()> {
        let conn = self.connect().await?;
        let outcome = conn.ping().await;
        let closed = conn.close().await;
        outcome.and(closed)
    }

    pub async fn is_running(&self) -> bool {
        match self.process.lock().await.as_mut() {
            Some(plugin) => plugin.is_running(),
            None => false,
        }
    }

    pub async fn pid(&self) -> Option<u32> {
        self.process.lock().await.as_ref().and_then(PluginProcess::pid)
    }

    /// Terminates the plugin process. Idempotent; later `connect` calls
    /// fail with [`PlugsqlError::DriverClosed`].
    pub async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        let mut process = self.process.lock().await;
        match process.take() {
            Some(mut plugin) => {
                info!(plugin = %self.config.name, pid = plugin.pid(), "stopping plugin");
                plugin.stop(self.config.stop_grace_duration()).await
            }
            None => Ok(()),
        }
    }
}
