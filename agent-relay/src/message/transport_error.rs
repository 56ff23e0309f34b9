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

/// Represents errors raised by the transport registry, the transport manager,
/// and concrete transport implementations.
///
/// Registry and lookup failures (`RegistrationConflict`, `UnknownType`,
/// `NotFound`) are returned synchronously from the call that triggered them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// A transport type with this name is already registered.
    RegistrationConflict(String),

    /// No transport type with this name is registered.
    UnknownType(String),

    /// No live transport instance carries this id.
    NotFound(String),

    /// The addressed agent is not reachable through this transport.
    AgentNotFound(String),

    /// The agent holds no connection able to reach the given address.
    NoConnection(String),

    /// The transport (or the connection) has been closed.
    Closed,

    /// A transport configuration record is invalid.
    InvalidConfig(String),

    /// Wire protocol violation (bad frame header, oversized frame, bad address).
    Protocol(String),

    /// Serialization or deserialization failure.
    Serialization(String),

    /// Socket or I/O error.
    Io(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RegistrationConflict(t) => write!(f, "Transport type \"{t}\" already exists"),
            Self::UnknownType(t) => write!(f, "Unknown type of transport \"{t}\""),
            Self::NotFound(id) => write!(f, "Transport with id \"{id}\" not found"),
            Self::AgentNotFound(a) => write!(f, "Agent not found: {a}"),
            Self::NoConnection(to) => write!(f, "No connection available for \"{to}\""),
            Self::Closed => write!(f, "Transport is closed"),
            Self::InvalidConfig(e) => write!(f, "Invalid transport configuration: {e}"),
            Self::Protocol(e) => write!(f, "Protocol error: {e}"),
            Self::Serialization(e) => write!(f, "Serialization error: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
