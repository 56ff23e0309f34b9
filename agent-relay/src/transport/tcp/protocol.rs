/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

//! Wire protocol for the TCP transport.
//!
//! Every frame carries one agent message, length-prefixed with a fixed header.
//!
//! # Wire Format
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ Frame Length (4 bytes, big-endian u32, excludes header)       │
//! ├───────────────────────────────────────────────────────────────┤
//! │ Protocol Version (1 byte, currently 0x01)                     │
//! ├───────────────────────────────────────────────────────────────┤
//! │ Frame Type (1 byte)                                           │
//! │   0x01 = Message                                              │
//! │   0x02 = Undeliverable notice                                 │
//! ├───────────────────────────────────────────────────────────────┤
//! │ Payload (JSON: {"from": url, "to": id-or-url, "message": ..}) │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! A `Message` frame's `to` is the bare id of an agent bound on the receiving
//! listener and its `from` is the sender's full `tcp://host:port/id` URL. When
//! the target is unknown the listener answers on the same socket with an
//! `Undeliverable` frame whose `to` is the original sender URL.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::message::TransportError;

/// Protocol version byte.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Frame type: agent message.
pub const FRAME_MESSAGE: u8 = 0x01;

/// Frame type: notice that a message could not be delivered.
pub const FRAME_UNDELIVERABLE: u8 = 0x02;

/// Frame header size: 4 bytes length + 1 byte version + 1 byte frame type.
pub const HEADER_SIZE: usize = 6;

/// Maximum frame size (16 MiB hard limit).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// URL scheme of TCP agent addresses.
pub const SCHEME: &str = "tcp://";

/// Payload of a frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Full URL of the sending agent.
    pub from: String,
    /// Target agent (bare id on `Message` frames, full URL on notices).
    pub to: String,
    /// The message itself.
    pub message: Value,
}

/// Builds the message carried by an `Undeliverable` frame.
///
/// The notice is shaped like an RPC reply so a waiting requester fails with
/// `"Agent not found: <id>"`. It only carries the original `id` when the
/// undelivered message was a request.
#[must_use]
pub fn undeliverable_notice(target: &str, message: &Value) -> Value {
    let id = if message.get("method").is_some() {
        message.get("id").cloned().unwrap_or(Value::Null)
    } else {
        Value::Null
    };
    json!({
        "id": id,
        "error": TransportError::AgentNotFound(target.to_string()).to_string(),
    })
}

/// A parsed TCP agent address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TcpAddress<'a> {
    /// A bare agent id, resolved on the sending transport itself.
    Local(&'a str),
    /// `tcp://host:port/agent`.
    Remote {
        /// `host:port` of the listener.
        host: &'a str,
        /// Agent id on that listener.
        agent: &'a str,
    },
}

impl<'a> TcpAddress<'a> {
    /// Parses `address`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Protocol`] for a `tcp://` URL without an agent path.
    pub fn parse(address: &'a str) -> Result<Self, TransportError> {
        let Some(rest) = address.strip_prefix(SCHEME) else {
            return Ok(Self::Local(address));
        };
        match rest.split_once('/') {
            Some((host, agent)) if !host.is_empty() && !agent.is_empty() => {
                Ok(Self::Remote { host, agent })
            }
            _ => Err(TransportError::Protocol(format!(
                "Malformed address \"{address}\", expected tcp://host:port/agent"
            ))),
        }
    }
}

fn read_error(e: &std::io::Error) -> TransportError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        TransportError::Closed
    } else {
        TransportError::Io(e.to_string())
    }
}

/// Read a frame header; returns `(payload_length, frame_type)`.
async fn read_header<R>(reader: &mut R) -> Result<(u32, u8), TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header).await.map_err(|e| read_error(&e))?;

    let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let version = header[4];
    let frame_type = header[5];

    if version != PROTOCOL_VERSION {
        return Err(TransportError::Protocol(format!(
            "Unsupported protocol version: {version}, expected {PROTOCOL_VERSION}"
        )));
    }
    if !matches!(frame_type, FRAME_MESSAGE | FRAME_UNDELIVERABLE) {
        return Err(TransportError::Protocol(format!(
            "Unknown frame type: {frame_type:#04x}"
        )));
    }

    Ok((length, frame_type))
}

/// Read a complete frame from the stream.
///
/// # Errors
///
/// [`TransportError::Closed`] when the peer closed the stream,
/// [`TransportError::Protocol`] for a bad header or an oversized frame.
pub async fn read_frame<R>(reader: &mut R, max_size: usize) -> Result<(u8, Vec<u8>), TransportError>
where
    R: AsyncRead + Unpin,
{
    let (length, frame_type) = read_header(reader).await?;
    let length = length as usize;

    let limit = max_size.min(MAX_FRAME_SIZE);
    if length > limit {
        return Err(TransportError::Protocol(format!(
            "Frame size {length} exceeds maximum {limit}"
        )));
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await.map_err(|e| read_error(&e))?;
    Ok((frame_type, payload))
}

/// Write one frame and flush.
///
/// # Errors
///
/// [`TransportError::Protocol`] if the payload exceeds the hard size limit,
/// [`TransportError::Io`] if the socket write fails.
pub async fn write_frame<W>(writer: &mut W, frame_type: u8, payload: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_SIZE {
        return Err(TransportError::Protocol(format!(
            "Frame size {} exceeds hard limit {MAX_FRAME_SIZE}",
            payload.len()
        )));
    }
    let length = u32::try_from(payload.len())
        .map_err(|_| TransportError::Protocol("Payload too large for u32".to_string()))?;

    let mut header = [0u8; HEADER_SIZE];
    header[..4].copy_from_slice(&length.to_be_bytes());
    header[4] = PROTOCOL_VERSION;
    header[5] = frame_type;

    writer.write_all(&header).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a frame and decode its payload.
///
/// # Errors
///
/// Everything [`read_frame`] returns, plus [`TransportError::Serialization`]
/// for a payload that is not a valid [`Frame`].
pub async fn read_message<R>(reader: &mut R, max_size: usize) -> Result<(u8, Frame), TransportError>
where
    R: AsyncRead + Unpin,
{
    let (frame_type, payload) = read_frame(reader, max_size).await?;
    let frame = serde_json::from_slice(&payload)?;
    Ok((frame_type, frame))
}

/// Encode `frame` and write it.
///
/// # Errors
///
/// Everything [`write_frame`] returns, plus [`TransportError::Serialization`].
pub async fn write_message<W>(writer: &mut W, frame_type: u8, frame: &Frame) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(frame)?;
    write_frame(writer, frame_type, &payload).await
}
