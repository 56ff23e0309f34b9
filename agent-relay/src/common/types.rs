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

//! Defines common type aliases for callbacks, handlers, and futures used
//! throughout `agent-relay`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::common::TransportConfig;
use crate::message::TransportError;
use crate::traits::Transport;

/// Address under which an agent is reachable (a bare id or a transport URL).
pub type AgentId = String;

/// A pinned, boxed, sendable future.
pub type FutureBox<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Callback a transport invokes for every inbound message: `receive(from, message)`.
///
/// Implementations must return quickly; agents only enqueue the message.
pub type ReceiveCallback = Arc<dyn Fn(AgentId, Value) + Send + Sync>;

/// Constructor stored in the process-wide transport type registry.
pub type TransportFactory =
    Arc<dyn Fn(TransportConfig) -> FutureBox<Result<Arc<dyn Transport>, TransportError>> + Send + Sync>;

/// A registered RPC function: `(params, from) -> result`.
pub type RpcHandler = Arc<dyn Fn(Value, AgentId) -> FutureBox<anyhow::Result<Value>> + Send + Sync>;

/// Handler for raw (non-RPC) messages: `(from, message)`.
pub type RawHandler = Arc<dyn Fn(&str, Value) + Send + Sync>;

/// Compares two transports by identity rather than by value.
pub(crate) fn same_transport(a: &Arc<dyn Transport>, b: &Arc<dyn Transport>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a).cast::<()>(),
        Arc::as_ptr(b).cast::<()>(),
    )
}
