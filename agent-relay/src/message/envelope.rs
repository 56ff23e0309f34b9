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

//! RPC envelope types and classification of inbound messages.
//!
//! Every message an agent receives is either an application payload passed
//! through untouched, or an RPC envelope:
//!
//! ```json
//! { "jsonrpc": "2.0", "id": 7, "method": "add", "params": { "a": 1, "b": 3 } }
//! { "jsonrpc": "2.0", "id": 7, "result": 4 }
//! { "jsonrpc": "2.0", "id": 7, "error": "Error: Cannot find function: add" }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::RpcError;

/// Version marker attached to every outgoing envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// An outbound request envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Correlation id generated by the calling RPC module.
    pub id: Value,
    /// Name of the function to invoke on the target agent.
    pub method: String,
    /// Request payload handed to the function.
    pub params: Value,
}

impl RpcRequest {
    /// Converts the request into its wire representation.
    #[must_use]
    pub fn into_value(self) -> Value {
        json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": self.id,
            "method": self.method,
            "params": self.params,
        })
    }
}

/// A reply envelope, decoded into an explicit success or failure variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcReply {
    /// The handler ran and produced `result` (explicit `null` when it returned nothing).
    Success {
        /// Correlation id copied from the request.
        id: Value,
        /// The handler's return value.
        result: Value,
    },
    /// The request failed; `error` is the string representation that crossed the wire.
    Failure {
        /// Correlation id copied from the request.
        id: Value,
        /// Description of the failure.
        error: String,
    },
}

impl RpcReply {
    /// Creates a success reply.
    #[must_use]
    pub const fn success(id: Value, result: Value) -> Self {
        Self::Success { id, result }
    }

    /// Creates a failure reply carrying the display form of `error`.
    #[must_use]
    pub fn failure(id: Value, error: &RpcError) -> Self {
        Self::Failure {
            id,
            error: error.to_string(),
        }
    }

    /// Returns the correlation id of this reply.
    #[must_use]
    pub const fn id(&self) -> &Value {
        match self {
            Self::Success { id, .. } | Self::Failure { id, .. } => id,
        }
    }

    /// Converts the reply into its wire representation.
    ///
    /// A success reply always carries the `result` field, even when it is `null`.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::Success { id, result } => json!({
                "jsonrpc": JSONRPC_VERSION,
                "id": id,
                "result": result,
            }),
            Self::Failure { id, error } => json!({
                "jsonrpc": JSONRPC_VERSION,
                "id": id,
                "error": error,
            }),
        }
    }

    /// Converts the reply into the value a caller receives.
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self {
            Self::Success { result, .. } => Ok(result),
            Self::Failure { error, .. } => Err(RpcError::Remote(error)),
        }
    }
}

/// An inbound message recognised as RPC traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RpcInbound {
    /// A well-formed request.
    Request {
        id: Value,
        method: String,
        params: Value,
    },
    /// An RPC-shaped message that cannot be served; answered with `error`.
    Invalid { id: Value, error: RpcError },
    /// A reply to a request sent earlier.
    Reply(RpcReply),
}

/// Result of inspecting an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Classified {
    Rpc(RpcInbound),
    Raw(Value),
}

/// Decides whether `message` is RPC traffic.
///
/// Objects carrying `method` are requests. Objects carrying `result` or
/// `error` are replies when they have a non-null `id` or the `jsonrpc`
/// marker; replies are never answered, so a null-id reply is only discarded
/// by the RPC module. Marked objects carrying neither are requests missing
/// their method. Everything else is returned unchanged as a raw message.
pub(crate) fn classify(message: Value) -> Classified {
    let Value::Object(mut fields) = message else {
        return Classified::Raw(message);
    };

    let id = fields.get("id").cloned().unwrap_or(Value::Null);

    if let Some(method) = fields.remove("method") {
        let params = fields.remove("params").unwrap_or_else(|| json!({}));
        return Classified::Rpc(match method {
            Value::String(method) => RpcInbound::Request { id, method, params },
            _ => RpcInbound::Invalid {
                id,
                error: RpcError::MissingProperty("method".to_string()),
            },
        });
    }

    let marked = fields.get("jsonrpc").and_then(Value::as_str) == Some(JSONRPC_VERSION);
    let answered = fields.contains_key("result") || fields.contains_key("error");

    if answered && (marked || !id.is_null()) {
        return Classified::Rpc(RpcInbound::Reply(decode_reply(id, &mut fields)));
    }

    if marked {
        return Classified::Rpc(RpcInbound::Invalid {
            id,
            error: RpcError::MissingProperty("method".to_string()),
        });
    }

    Classified::Raw(Value::Object(fields))
}

fn decode_reply(id: Value, fields: &mut Map<String, Value>) -> RpcReply {
    match fields.remove("error") {
        Some(Value::Null) | None => RpcReply::Success {
            id,
            result: fields.remove("result").unwrap_or(Value::Null),
        },
        Some(Value::String(error)) => RpcReply::Failure { id, error },
        // Non-string errors keep their JSON text.
        Some(other) => RpcReply::Failure {
            id,
            error: other.to_string(),
        },
    }
}
