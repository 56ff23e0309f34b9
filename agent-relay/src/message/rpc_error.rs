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

use super::TransportError;

/// Represents failures of a request/reply exchange.
///
/// The `Display` output of the callee-side variants is exactly the string that
/// travels in the `error` field of a failure reply. Callers receive failures
/// reported by the remote agent as [`RpcError::Remote`], carrying the string
/// as it crossed the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// The request message is not a JSON object.
    MalformedMessage,

    /// A required envelope property is absent.
    MissingProperty(String),

    /// The target agent has no handler registered under this method name.
    MethodNotFound(String),

    /// The handler returned an error (or panicked) while executing.
    HandlerFailure(String),

    /// No reply arrived within the configured timeout.
    Timeout,

    /// The pending request was cancelled before a reply arrived.
    Cancelled,

    /// The agent has no RPC module loaded.
    NoRpcModule,

    /// The remote agent answered with a failure reply.
    Remote(String),

    /// The request could not be handed to the transport.
    Transport(TransportError),
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedMessage => write!(f, "TypeError: Message must be an object"),
            Self::MissingProperty(p) => write!(f, "Error: Property \"{p}\" expected"),
            Self::MethodNotFound(m) => write!(f, "Error: Cannot find function: {m}"),
            Self::HandlerFailure(e) => write!(f, "Error: {e}"),
            Self::Timeout => write!(f, "Error: Request timed out"),
            Self::Cancelled => write!(f, "Error: Request cancelled"),
            Self::NoRpcModule => write!(f, "Error: No RPC module loaded"),
            Self::Remote(e) => write!(f, "{e}"),
            Self::Transport(e) => write!(f, "Error: {e}"),
        }
    }
}

impl std::error::Error for RpcError {}

impl From<TransportError> for RpcError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}
