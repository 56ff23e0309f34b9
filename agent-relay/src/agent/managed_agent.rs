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

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::dispatch::AgentCore;
use super::AgentState;
use crate::common::TransportManager;
use crate::message::{RpcError, TransportError};
use crate::module::{PatternModule, PendingRequest, RpcConfig, RpcModule};
use crate::traits::{Connection, Outbox, Transport};

/// A named endpoint sending and receiving messages over any number of transports.
///
/// Every connection feeds one inbox, drained in order by a single dispatch
/// task. Inbound messages go to the RPC module when one is loaded and the
/// message is RPC traffic, then to the pattern listeners, then to the raw
/// handler installed with [`on_message`](Self::on_message).
///
/// `Agent` is a cheap handle: clones refer to the same agent. When the last
/// handle is dropped the dispatch task stops and the agent's connections are
/// closed in the background.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<AgentInner>,
}

struct AgentInner {
    core: Arc<AgentCore>,
    cancel: CancellationToken,
}

impl Drop for AgentInner {
    fn drop(&mut self) {
        self.cancel.cancel();
        let slots = self.core.take_connections();
        if slots.is_empty() {
            return;
        }
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                for slot in slots {
                    slot.connection.close().await;
                }
            });
        }
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Creates an agent and starts its dispatch task.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let (core, inbox) = AgentCore::new(id.into());
        let cancel = CancellationToken::new();
        tokio::spawn(core.clone().wake(inbox, cancel.clone()));
        debug!(agent = %core.id, "Agent created");
        Self {
            inner: Arc::new(AgentInner { core, cancel }),
        }
    }

    /// The agent's id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.core.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> AgentState {
        self.inner.core.state()
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.core.connections.read().len()
    }

    /// Connects to `transport` under the agent's own id.
    ///
    /// Connecting to a transport this agent is already connected to replaces
    /// (and closes) the previous connection.
    ///
    /// # Errors
    ///
    /// Returns the [`TransportError`] raised by [`Transport::connect`].
    pub async fn connect(&self, transport: &Arc<dyn Transport>) -> Result<Arc<dyn Connection>, TransportError> {
        self.inner.core.connect(transport, self.id()).await
    }

    /// Connects to `transport` under a different id.
    ///
    /// # Errors
    ///
    /// Returns the [`TransportError`] raised by [`Transport::connect`].
    pub async fn connect_as(
        &self,
        transport: &Arc<dyn Transport>,
        agent_id: &str,
    ) -> Result<Arc<dyn Connection>, TransportError> {
        self.inner.core.connect(transport, agent_id).await
    }

    /// Connects to every transport held by `manager`, in order.
    ///
    /// # Errors
    ///
    /// Stops at the first transport that refuses the connection; connections
    /// already made are kept.
    #[instrument(skip(self, manager), fields(agent = %self.id()))]
    pub async fn connect_all(&self, manager: &TransportManager) -> Result<Vec<Arc<dyn Connection>>, TransportError> {
        let mut connections = Vec::new();
        for transport in manager.get_all() {
            connections.push(self.connect(&transport).await?);
        }
        Ok(connections)
    }

    /// Closes the connection to `transport`; returns whether there was one.
    ///
    /// The transport itself stays open.
    pub async fn disconnect(&self, transport: &Arc<dyn Transport>) -> bool {
        self.inner.core.disconnect(transport).await
    }

    /// Closes every connection of this agent.
    pub async fn disconnect_all(&self) {
        for slot in self.inner.core.take_connections() {
            slot.connection.close().await;
        }
        debug!(agent = %self.id(), "Disconnected from all transports");
    }

    /// Sends `message` to `to`.
    ///
    /// `to` is either a bare agent id (sent over the default connection: the
    /// first whose transport is marked default, else the first connected) or
    /// `scheme://rest`, where `scheme` names a connected transport by id (the
    /// transport receives `rest`) or by type (it receives the whole URL).
    ///
    /// # Errors
    ///
    /// [`TransportError::NoConnection`] if no connection matches `to`,
    /// otherwise whatever the connection's `send` reports.
    pub async fn send(&self, to: &str, message: Value) -> Result<(), TransportError> {
        self.inner.core.send(to, message).await
    }

    /// Sends an RPC request and waits for the reply.
    ///
    /// # Errors
    ///
    /// [`RpcError::NoRpcModule`] if no RPC module is loaded, otherwise see
    /// [`RpcModule::request`].
    pub async fn request(&self, to: &str, message: Value) -> Result<Value, RpcError> {
        let rpc = self.rpc().ok_or(RpcError::NoRpcModule)?;
        rpc.request(self.inner.core.as_ref(), to, message).await
    }

    /// Sends an RPC request without waiting; the handle carries its correlation id.
    ///
    /// # Errors
    ///
    /// As [`request`](Self::request), minus the reply outcomes.
    pub async fn send_request(&self, to: &str, message: Value) -> Result<PendingRequest, RpcError> {
        let rpc = self.rpc().ok_or(RpcError::NoRpcModule)?;
        rpc.send_request(self.inner.core.as_ref(), to, message).await
    }

    /// Installs the handler for raw messages, replacing any previous one.
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(&str, Value) + Send + Sync + 'static,
    {
        *self.inner.core.raw.write() = Some(Arc::new(handler));
    }

    /// Creates and loads a fresh RPC module.
    pub fn load_rpc(&self, config: RpcConfig) -> RpcModule {
        let rpc = RpcModule::new(config);
        self.set_rpc(Some(rpc.clone()));
        rpc
    }

    /// Loads `rpc` (or unloads with `None`); returns the module it replaced.
    pub fn set_rpc(&self, rpc: Option<RpcModule>) -> Option<RpcModule> {
        std::mem::replace(&mut *self.inner.core.rpc.write(), rpc)
    }

    /// The loaded RPC module.
    #[must_use]
    pub fn rpc(&self) -> Option<RpcModule> {
        self.inner.core.rpc.read().clone()
    }

    /// Creates and loads a fresh pattern module.
    pub fn load_patterns(&self) -> PatternModule {
        let patterns = PatternModule::new();
        *self.inner.core.patterns.write() = Some(patterns.clone());
        patterns
    }

    /// The loaded pattern module.
    #[must_use]
    pub fn patterns(&self) -> Option<PatternModule> {
        self.inner.core.patterns.read().clone()
    }
}

#[async_trait]
impl Outbox for Agent {
    async fn send(&self, to: &str, message: Value) -> Result<(), TransportError> {
        self.inner.core.send(to, message).await
    }
}
