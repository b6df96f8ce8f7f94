use crate::service::DriverService;
use plugsql_protocol::frame::{read_host_message, write_plugin_message};
use plugsql_protocol::{
    Endpoint, HandshakeConfig, HandshakeLine, HostMessage, PluginMessage, CORE_PROTOCOL_VERSION,
};
use std::future::Future;
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub handshake: HandshakeConfig,
    /// Where to listen. A TCP port of 0 picks a free port.
    pub endpoint: Endpoint,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            handshake: HandshakeConfig::default(),
            endpoint: Endpoint::Tcp(SocketAddr::from(([127, 0, 0, 1], 0))),
        }
    }
}

trait PluginStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> PluginStream for T {}

enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(tokio::net::UnixListener, PathBuf),
}

impl Listener {
    async fn bind(endpoint: &Endpoint) -> anyhow::Result<Self> {
        match endpoint {
            Endpoint::Tcp(addr) => Ok(Listener::Tcp(TcpListener::bind(addr).await?)),
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                let listener = tokio::net::UnixListener::bind(path)?;
                Ok(Listener::Unix(listener, path.clone()))
            }
            #[cfg(not(unix))]
            Endpoint::Unix(path) => {
                anyhow::bail!("unix sockets are not supported here: {}", path.display())
            }
        }
    }

    fn endpoint(&self) -> anyhow::Result<Endpoint> {
        match self {
            Listener::Tcp(listener) => Ok(Endpoint::Tcp(listener.local_addr()?)),
            #[cfg(unix)]
            Listener::Unix(_, path) => Ok(Endpoint::Unix(path.clone())),
        }
    }

    async fn accept(&self) -> std::io::Result<Box<dyn PluginStream>> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                stream.set_nodelay(true)?;
                debug!(%peer, "host connected");
                Ok(Box::new(stream))
            }
            #[cfg(unix)]
            Listener::Unix(listener, _) => {
                let (stream, _) = listener.accept().await?;
                debug!("host connected");
                Ok(Box::new(stream))
            }
        }
    }

    fn cleanup(&self) {
        #[cfg(unix)]
        if let Listener::Unix(_, path) = self {
            if let Err(err) = std::fs::remove_file(path) {
                warn!(path = %path.display(), "failed to remove socket: {err}");
            }
        }
    }
}

/// Runs until SIGTERM or Ctrl-C. Nothing else may write to stdout before the
/// handshake line.
pub async fn serve<S>(config: ServeConfig, service: S) -> anyhow::Result<()>
where
    S: DriverService + 'static,
{
    serve_with_shutdown(config, service, shutdown_signal()).await
}

/// Like [`serve`], but stops accepting when `shutdown` completes instead of
/// on a signal.
pub async fn serve_with_shutdown<S, F>(
    config: ServeConfig,
    service: S,
    shutdown: F,
) -> anyhow::Result<()>
where
    S: DriverService + 'static,
    F: Future<Output = ()>,
{
    config
        .handshake
        .verify_env(|key| std::env::var(key).ok())?;

    let listener = Listener::bind(&config.endpoint).await?;
    let endpoint = listener.endpoint()?;
    announce(&HandshakeLine {
        core_version: CORE_PROTOCOL_VERSION,
        app_version: config.handshake.protocol_version,
        endpoint: endpoint.clone(),
    })?;
    info!(%endpoint, "plugin listening");

    let service: Arc<dyn DriverService> = Arc::new(service);
    tokio::pin!(shutdown);
    let outcome = loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested");
                break Ok(());
            }
            accepted = listener.accept() => {
                let stream = match accepted {
                    Ok(stream) => stream,
                    Err(err) => break Err(err.into()),
                };
                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    if let Err(err) = serve_connection(stream, service).await {
                        warn!("connection ended with error: {err:#}");
                    }
                });
            }
        }
    };
    listener.cleanup();
    outcome
}

fn announce(line: &HandshakeLine) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", line.render())?;
    stdout.flush()?;
    Ok(())
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

pub async fn serve_connection<S>(mut stream: S, service: Arc<dyn DriverService>) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(msg) = read_host_message(&mut stream).await? {
        let reply = dispatch(service.as_ref(), msg).await;
        write_plugin_message(&mut stream, &reply).await?;
    }
    debug!("host disconnected");
    Ok(())
}

async fn dispatch(service: &dyn DriverService, msg: HostMessage) -> PluginMessage {
    let outcome = match msg {
        HostMessage::Query(request) => service.query(request).await.map(PluginMessage::Response),
        HostMessage::CommitOrRollback(ctx) => service
            .commit_or_rollback(ctx)
            .await
            .map(PluginMessage::Txn),
        HostMessage::Ping => service.ping().await.map(|()| PluginMessage::Pong),
    };
    outcome.unwrap_or_else(|err| {
        warn!("request failed: {err:#}");
        PluginMessage::Error {
            message: format!("{err:#}"),
        }
    })
}
