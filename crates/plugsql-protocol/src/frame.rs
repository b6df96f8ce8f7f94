use crate::messages::{ErrorBody, HostMessage, PluginMessage, Request, Response};
use bytes::{BufMut, BytesMut};
use plugsql_core::{PlugsqlError, Result, TxnContext};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const TAG_QUERY: u8 = b'Q';
const TAG_COMMIT_OR_ROLLBACK: u8 = b'C';
const TAG_PING: u8 = b'P';
const TAG_RESPONSE: u8 = b'R';
const TAG_TXN: u8 = b'T';
const TAG_PONG: u8 = b'O';
const TAG_ERROR: u8 = b'E';

pub fn encode_host_message(msg: &HostMessage) -> Result<BytesMut> {
    match msg {
        HostMessage::Query(req) => encode_frame(TAG_QUERY, Some(req)),
        HostMessage::CommitOrRollback(ctx) => encode_frame(TAG_COMMIT_OR_ROLLBACK, Some(ctx)),
        HostMessage::Ping => encode_frame::<()>(TAG_PING, None),
    }
}

pub fn encode_plugin_message(msg: &PluginMessage) -> Result<BytesMut> {
    match msg {
        PluginMessage::Response(resp) => encode_frame(TAG_RESPONSE, Some(resp)),
        PluginMessage::Txn(ctx) => encode_frame(TAG_TXN, Some(ctx)),
        PluginMessage::Pong => encode_frame::<()>(TAG_PONG, None),
        PluginMessage::Error { message } => encode_frame(
            TAG_ERROR,
            Some(&ErrorBody {
                message: message.clone(),
            }),
        ),
    }
}

pub fn decode_host_message(tag: u8, payload: &[u8]) -> Result<HostMessage> {
    match tag {
        TAG_QUERY => Ok(HostMessage::Query(decode_payload::<Request>(payload)?)),
        TAG_COMMIT_OR_ROLLBACK => Ok(HostMessage::CommitOrRollback(decode_payload::<
            TxnContext,
        >(payload)?)),
        TAG_PING => Ok(HostMessage::Ping),
        other => Err(unknown_tag(other)),
    }
}

pub fn decode_plugin_message(tag: u8, payload: &[u8]) -> Result<PluginMessage> {
    match tag {
        TAG_RESPONSE => Ok(PluginMessage::Response(decode_payload::<Response>(payload)?)),
        TAG_TXN => Ok(PluginMessage::Txn(decode_payload::<TxnContext>(payload)?)),
        TAG_PONG => Ok(PluginMessage::Pong),
        TAG_ERROR => {
            let body = decode_payload::<ErrorBody>(payload)?;
            Ok(PluginMessage::Error {
                message: body.message,
            })
        }
        other => Err(unknown_tag(other)),
    }
}

pub async fn write_host_message<S: AsyncWrite + Unpin>(
    stream: &mut S,
    msg: &HostMessage,
) -> Result<()> {
    let buf = encode_host_message(msg)?;
    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}

pub async fn write_plugin_message<S: AsyncWrite + Unpin>(
    stream: &mut S,
    msg: &PluginMessage,
) -> Result<()> {
    let buf = encode_plugin_message(msg)?;
    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}

/// Reads the next host frame. `Ok(None)` means the peer closed the stream
/// cleanly between frames.
pub async fn read_host_message<S: AsyncRead + Unpin>(
    stream: &mut S,
) -> Result<Option<HostMessage>> {
    match read_frame(stream).await? {
        Some((tag, payload)) => decode_host_message(tag, &payload).map(Some),
        None => Ok(None),
    }
}

pub async fn read_plugin_message<S: AsyncRead + Unpin>(
    stream: &mut S,
) -> Result<Option<PluginMessage>> {
    match read_frame(stream).await? {
        Some((tag, payload)) => decode_plugin_message(tag, &payload).map(Some),
        None => Ok(None),
    }
}

async fn read_frame<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Option<(u8, Vec<u8>)>> {
    let tag = match stream.read_u8().await {
        Ok(tag) => tag,
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let len = stream.read_u32().await? as usize;
    if len > MAX_FRAME_SIZE {
        return Err(PlugsqlError::Protocol(format!(
            "frame of {len} bytes exceeds limit of {MAX_FRAME_SIZE}"
        )));
    }
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok(Some((tag, payload)))
}

fn encode_frame<T: Serialize>(tag: u8, body: Option<&T>) -> Result<BytesMut> {
    let payload = match body {
        Some(body) => rmp_serde::to_vec_named(body)
            .map_err(|e| PlugsqlError::Protocol(format!("serialization failed: {e}")))?,
        None => Vec::new(),
    };
    if payload.len() > MAX_FRAME_SIZE {
        return Err(PlugsqlError::Protocol(format!(
            "frame of {} bytes exceeds limit of {MAX_FRAME_SIZE}",
            payload.len()
        )));
    }
    let mut buf = BytesMut::with_capacity(5 + payload.len());
    buf.put_u8(tag);
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);
    Ok(buf)
}

fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    rmp_serde::from_slice(payload)
        .map_err(|e| PlugsqlError::Protocol(format!("deserialization failed: {e}")))
}

fn unknown_tag(tag: u8) -> PlugsqlError {
    PlugsqlError::Protocol(format!("unknown frame tag: {:?}", tag as char))
}
