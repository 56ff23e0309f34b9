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
use std::sync::Arc;

use async_trait::async_trait;

use crate::common::{ReceiveCallback, TransportConfig};
use crate::message::TransportError;
use crate::traits::Connection;

/// A pluggable communication channel shared by any number of agents.
///
/// Implementations wrap whatever mechanism actually moves bytes (in-process
/// maps, queues, brokers, sockets) behind one contract:
///
/// * `connect(agent_id, receive)` binds `agent_id` and returns the agent's
///   [`Connection`]. Inbound messages for `agent_id` are delivered by calling
///   `receive(from, message)`.
/// * Connecting the same id twice replaces the earlier receive callback and logs
///   a warning. Callbacks are never merged.
/// * `close()` releases all resources. Afterwards `connect` fails with
///   [`TransportError::Closed`] and every connection obtained earlier stops
///   working. Closing twice is a no-op.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Returns the instance id, if one was configured.
    fn id(&self) -> Option<&str>;

    /// Returns the type tag of the implementation (e.g. `"local"`).
    fn transport_type(&self) -> &'static str;

    /// Whether agents use this transport for bare addresses.
    fn is_default(&self) -> bool;

    /// Binds `agent_id` to this transport.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] if the transport has been closed, or a
    /// transport-specific error if the binding cannot be established.
    async fn connect(
        &self,
        agent_id: &str,
        receive: ReceiveCallback,
    ) -> Result<Arc<dyn Connection>, TransportError>;

    /// Tears the transport down. Idempotent.
    async fn close(&self);

    /// Whether `close` has been called.
    fn is_closed(&self) -> bool;
}

/// A transport that can be registered by name and constructed from configuration.
#[async_trait]
pub trait TransportType: Transport + Sized + 'static {
    /// The registry key of this transport type.
    const TYPE: &'static str;

    /// Builds an instance from a configuration record.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidConfig`] for unusable options, or any
    /// error raised while acquiring the underlying resources.
    async fn create(config: TransportConfig) -> Result<Self, TransportError>;
}
