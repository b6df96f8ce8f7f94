use metrics::counter;
use plugsql_core::{PlugsqlError, Result, TxnContext};
use plugsql_protocol::frame::{read_plugin_message, write_host_message};
use plugsql_protocol::{Endpoint, HostMessage, PluginMessage, Request, Response};
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

pub trait PluginIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> PluginIo for T {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelState {
    Ready,
    InFlight,
    Closed,
}

/// Never pipelines: one frame out, one reply in.
pub struct Session {
    stream: Box<dyn PluginIo>,
    call_timeout: Option<Duration>,
    state: ChannelState,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("call_timeout", &self.call_timeout)
            .field("state", &self.state)
            .finish()
    }
}

impl Session {
    pub fn new(stream: impl PluginIo + 'static, call_timeout: Option<Duration>) -> Self {
        Self {
            stream: Box::new(stream),
            call_timeout,
            state: ChannelState::Ready,
        }
    }

    pub async fn dial(endpoint: &Endpoint, call_timeout: Option<Duration>) -> Result<Self> {
        match endpoint {
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr).await?;
                stream.set_nodelay(true)?;
                debug!(%endpoint, "session dialed");
                Ok(Self::new(stream, call_timeout))
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                let stream = tokio::net::UnixStream::connect(path).await?;
                debug!(%endpoint, "session dialed");
                Ok(Self::new(stream, call_timeout))
            }
            #[cfg(not(unix))]
            Endpoint::Unix(_) => Err(PlugsqlError::Protocol(
                "unix socket endpoints are not supported on this platform".into(),
            )),
        }
    }

    pub fn set_call_timeout(&mut self, call_timeout: Option<Duration>) {
        self.call_timeout = call_timeout;
    }

    pub fn is_closed(&self) -> bool {
        self.state == ChannelState::Closed
    }

    pub async fn call(&mut self, request: Request) -> Result<Response> {
        match self.round_trip(HostMessage::Query(request)).await? {
            PluginMessage::Response(response) => Ok(response),
            other => Err(self.unexpected("response", &other)),
        }
    }

    pub async fn call_txn_control(&mut self, ctx: TxnContext) -> Result<TxnContext> {
        match self.round_trip(HostMessage::CommitOrRollback(ctx)).await? {
            PluginMessage::Txn(ctx) => Ok(ctx),
            other => Err(self.unexpected("txn", &other)),
        }
    }

    pub async fn ping(&mut self) -> Result<()> {
        match self.round_trip(HostMessage::Ping).await? {
            PluginMessage::Pong => Ok(()),
            other => Err(self.unexpected("pong", &other)),
        }
    }

    pub async fn close(&mut self) -> Result<()> {
        if self.state == ChannelState::Closed {
            return Ok(());
        }
        self.state = ChannelState::Closed;
        match self.stream.shutdown().await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn round_trip(&mut self, msg: HostMessage) -> Result<PluginMessage> {
        match self.state {
            ChannelState::Ready => {}
            ChannelState::Closed => return Err(PlugsqlError::ChannelClosed),
            ChannelState::InFlight => {
                // A previous call was dropped between write and read; its
                // reply may still arrive, so the stream is out of step.
                warn!("previous call was cancelled mid-flight, closing channel");
                self.state = ChannelState::Closed;
                return Err(PlugsqlError::ChannelClosed);
            }
        }

        counter!("plugsql_rpc_total").increment(1);
        self.state = ChannelState::InFlight;
        let call_timeout = self.call_timeout;
        let exchange = exchange(&mut self.stream, &msg);
        let result = match call_timeout {
            Some(limit) => match tokio::time::timeout(limit, exchange).await {
                Ok(result) => result,
                Err(_) => Err(PlugsqlError::DeadlineExceeded(limit)),
            },
            None => exchange.await,
        };

        match result {
            Ok(PluginMessage::Error { message }) => {
                self.state = ChannelState::Ready;
                counter!("plugsql_rpc_error_total").increment(1);
                Err(PlugsqlError::Remote(message))
            }
            Ok(reply) => {
                self.state = ChannelState::Ready;
                Ok(reply)
            }
            Err(err) => {
                self.state = ChannelState::Closed;
                counter!("plugsql_rpc_error_total").increment(1);
                Err(err)
            }
        }
    }

    fn unexpected(&mut self, expected: &str, got: &PluginMessage) -> PlugsqlError {
        self.state = ChannelState::Closed;
        let got = match got {
            PluginMessage::Response(_) => "response",
            PluginMessage::Txn(_) => "txn",
            PluginMessage::Pong => "pong",
            PluginMessage::Error { .. } => "error",
        };
        PlugsqlError::Protocol(format!("expected {expected} frame, got {got}"))
    }
}

async fn exchange(stream: &mut Box<dyn PluginIo>, msg: &HostMessage) -> Result<PluginMessage> {
    write_host_message(stream, msg).await?;
    read_plugin_message(stream)
        .await?
        .ok_or(PlugsqlError::ChannelClosed)
}
