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

use std::fmt::Debug;

use async_trait::async_trait;
use serde_json::Value;

use crate::message::TransportError;

/// A live binding of one agent id to one transport instance.
///
/// Delivery semantics are those of the owning transport: sends are
/// fire-and-forget and never wait for the receiver to process the message.
/// Failures the transport can detect (unknown target, closed transport, broken
/// socket) are returned from [`send`](Connection::send); failures detected
/// later are reported to the sender's receive callback as an error-shaped
/// message `{"id": ..., "error": "..."}`.
#[async_trait]
pub trait Connection: Send + Sync + Debug {
    /// Returns the id this connection was bound under.
    fn agent_id(&self) -> &str;

    /// Returns the type tag of the owning transport.
    fn transport_type(&self) -> &'static str;

    /// Returns the address peers use to reach this agent through this connection.
    fn address(&self) -> String;

    /// Hands `message` to the transport for delivery to `to`.
    ///
    /// # Errors
    ///
    /// * [`TransportError::Closed`] - The connection or its transport was closed.
    /// * [`TransportError::AgentNotFound`] - The transport knows `to` is unreachable.
    /// * Transport-specific I/O, protocol, or serialization errors.
    async fn send(&self, to: &str, message: Value) -> Result<(), TransportError>;

    /// Releases this binding. Other connections on the same transport keep working.
    async fn close(&self);
}
