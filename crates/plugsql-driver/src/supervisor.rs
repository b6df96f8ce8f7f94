use crate::config::DriverConfig;
use metrics::counter;
use plugsql_core::{PlugsqlError, Result};
use plugsql_protocol::{Endpoint, HandshakeLine};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, error, info, trace, warn, Level};

#[derive(Debug)]
pub struct PluginProcess {
    name: String,
    pid: Option<u32>,
    endpoint: Endpoint,
    child: Option<Child>,
}

impl PluginProcess {
    /// On any failure the child is killed and reaped before returning.
    pub async fn start(config: &DriverConfig) -> Result<Self> {
        let executable = config.executable();
        let mut cmd = Command::new(&executable);
        cmd.args(&config.args)
            .envs(&config.env)
            .envs(config.handshake.env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| PlugsqlError::PluginNotFound {
            path: executable.clone(),
            source,
        })?;
        let pid = child.id();
        counter!("plugsql_plugin_start_total").increment(1);
        debug!(plugin = %config.name, pid, executable = %executable, "plugin spawned");

        if let Some(stderr) = child.stderr.take() {
            let lines = BufReader::new(stderr).lines();
            tokio::spawn(forward_output(config.name.clone(), "stderr", lines));
        }

        let Some(stdout) = child.stdout.take() else {
            abort(&mut child).await;
            return Err(PlugsqlError::HandshakeFailed("plugin stdout unavailable".into()));
        };
        let mut stdout = BufReader::new(stdout).lines();

        let timeout = config.handshake_timeout_duration();
        let line = match read_handshake(&mut stdout, timeout).await {
            Ok(line) => line,
            Err(err) => {
                let status = abort(&mut child).await;
                return Err(match (err, status) {
                    (PlugsqlError::HandshakeFailed(msg), Some(status)) => {
                        PlugsqlError::HandshakeFailed(format!("{msg} ({status})"))
                    }
                    (err, _) => err,
                });
            }
        };

        let handshake = match HandshakeLine::parse(&line).and_then(|h| {
            h.check(&config.handshake)?;
            Ok(h)
        }) {
            Ok(handshake) => handshake,
            Err(err) => {
                abort(&mut child).await;
                return Err(err);
            }
        };

        tokio::spawn(forward_output(config.name.clone(), "stdout", stdout));
        info!(plugin = %config.name, pid, endpoint = %handshake.endpoint, "plugin ready");
        Ok(Self {
            name: config.name.clone(),
            pid,
            endpoint: handshake.endpoint,
            child: Some(child),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reports whether the child is still running, reaping it if it exited.
    pub fn is_running(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                warn!(plugin = %self.name, pid = self.pid, %status, "plugin exited");
                self.child = None;
                false
            }
            Err(err) => {
                warn!(plugin = %self.name, pid = self.pid, "failed to poll plugin: {err}");
                false
            }
        }
    }

    /// Asks the plugin to terminate, waits up to `grace`, then kills it.
    /// Safe to call more than once.
    pub async fn stop(&mut self, grace: Duration) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        if let Ok(Some(status)) = child.try_wait() {
            debug!(plugin = %self.name, pid = self.pid, %status, "plugin already exited");
            return Ok(());
        }

        terminate(&child);
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                info!(plugin = %self.name, pid = self.pid, %status, "plugin stopped");
                Ok(())
            }
            Ok(Err(err)) => Err(err.into()),
            Err(_) => {
                warn!(
                    plugin = %self.name,
                    pid = self.pid,
                    ?grace,
                    "plugin ignored termination, killing"
                );
                child.kill().await?;
                Ok(())
            }
        }
    }
}

async fn read_handshake(
    stdout: &mut Lines<BufReader<ChildStdout>>,
    timeout: Duration,
) -> Result<String> {
    match tokio::time::timeout(timeout, next_nonempty_line(stdout)).await {
        Err(_) => Err(PlugsqlError::HandshakeTimeout(timeout)),
        Ok(Err(err)) => Err(PlugsqlError::HandshakeFailed(format!(
            "reading handshake: {err}"
        ))),
        Ok(Ok(None)) => Err(PlugsqlError::HandshakeFailed(
            "plugin exited before completing handshake".into(),
        )),
        Ok(Ok(Some(line))) => Ok(line),
    }
}

async fn next_nonempty_line(
    stdout: &mut Lines<BufReader<ChildStdout>>,
) -> std::io::Result<Option<String>> {
    while let Some(line) = stdout.next_line().await? {
        if !line.trim().is_empty() {
            return Ok(Some(line));
        }
    }
    Ok(None)
}

async fn abort(child: &mut Child) -> Option<ExitStatus> {
    if let Ok(Some(status)) = child.try_wait() {
        return Some(status);
    }
    if let Err(err) = child.kill().await {
        warn!("failed to kill plugin: {err}");
    }
    child.wait().await.ok()
}

#[cfg(unix)]
fn terminate(child: &Child) {
    if let Some(pid) = child.id() {
        // SAFETY: plain signal delivery to a pid we own and have not reaped.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn terminate(_child: &Child) {}

pub(crate) async fn forward_output<R: AsyncRead + Unpin>(
    plugin: String,
    stream: &'static str,
    mut lines: Lines<BufReader<R>>,
) {
    while let Ok(Some(line)) = lines.next_line().await {
        let level = plugin_level(&line).unwrap_or(Level::INFO);
        if level == Level::ERROR {
            error!(target: "plugsql::plugin", plugin = %plugin, stream, "{line}");
        } else if level == Level::WARN {
            warn!(target: "plugsql::plugin", plugin = %plugin, stream, "{line}");
        } else if level == Level::DEBUG {
            debug!(target: "plugsql::plugin", plugin = %plugin, stream, "{line}");
        } else if level == Level::TRACE {
            trace!(target: "plugsql::plugin", plugin = %plugin, stream, "{line}");
        } else {
            info!(target: "plugsql::plugin", plugin = %plugin, stream, "{line}");
        }
    }
}

/// Level token of a formatted log line, e.g. `2024-05-01T10:00:00Z  WARN app: msg`.
pub(crate) fn plugin_level(line: &str) -> Option<Level> {
    line.split_whitespace()
        .take(3)
        .find_map(|token| match token.trim_matches(|c| c == '[' || c == ']' || c == ':') {
            "ERROR" => Some(Level::ERROR),
            "WARN" | "WARNING" => Some(Level::WARN),
            "INFO" => Some(Level::INFO),
            "DEBUG" => Some(Level::DEBUG),
            "TRACE" => Some(Level::TRACE),
            _ => None,
        })
}
