pub mod codec;
pub mod frame;
pub mod handshake;
pub mod messages;

pub use frame::{
    read_host_message, read_plugin_message, write_host_message, write_plugin_message,
    MAX_FRAME_SIZE,
};
pub use handshake::{Endpoint, HandshakeConfig, HandshakeLine, CORE_PROTOCOL_VERSION};
pub use messages::{
    HostMessage, PluginMessage, QueryResult, Request, Response, WireColumn, WireNamedValue,
    WireRow, WireTimestamp, WireValue,
};

#[cfg(test)]
mod tests;
