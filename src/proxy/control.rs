//! JSON-lines control protocol between the manager and the proxy process.
//!
//! The manager writes [`ControlRequest`]s to the proxy's stdin and reads
//! [`ControlEvent`]s from its stdout, one JSON object per line.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Messages sent by the manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ControlRequest {
    /// Replace the domain lists. Acknowledged with the same generation.
    #[serde(rename_all = "camelCase")]
    Update {
        generation: u64,
        allowed_domains: Vec<String>,
        denied_domains: Vec<String>,
    },
    /// Stop listening and exit.
    Shutdown,
}

/// Messages emitted by the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ControlEvent {
    /// Listeners are bound and accepting.
    #[serde(rename_all = "camelCase")]
    Ready {
        pid: u32,
        http_addr: SocketAddr,
        socks_addr: SocketAddr,
    },
    /// An update is in effect for all later connection attempts.
    Ack { generation: u64 },
    /// A request could not be understood.
    Error { message: String },
}

/// Encode a message as one protocol line, newline included.
pub fn encode_line<T: Serialize>(message: &T) -> serde_json::Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}
