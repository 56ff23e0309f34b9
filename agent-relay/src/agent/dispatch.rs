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

//! Inbound routing and outbound address resolution shared by every handle of one agent.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::AgentState;
use crate::common::{same_transport, AgentId, RawHandler, ReceiveCallback};
use crate::message::{classify, Classified, RpcInbound, RpcReply, TransportError};
use crate::module::{PatternModule, RpcModule};
use crate::traits::{Connection, Outbox, Transport};

/// One message taken off a connection, tagged with the connection it came through.
pub(crate) struct Inbound {
    via: u64,
    from: AgentId,
    message: Value,
}

pub(crate) struct ConnectionSlot {
    pub(crate) key: u64,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) connection: Arc<dyn Connection>,
}

pub(crate) struct AgentCore {
    pub(crate) id: AgentId,
    inbox: mpsc::UnboundedSender<Inbound>,
    pub(crate) connections: RwLock<Vec<ConnectionSlot>>,
    pub(crate) rpc: RwLock<Option<RpcModule>>,
    pub(crate) patterns: RwLock<Option<PatternModule>>,
    pub(crate) raw: RwLock<Option<RawHandler>>,
    ever_connected: AtomicBool,
    next_key: AtomicU64,
}

impl AgentCore {
    pub(crate) fn new(id: AgentId) -> (Arc<Self>, mpsc::UnboundedReceiver<Inbound>) {
        let (inbox, rx) = mpsc::unbounded_channel();
        let core = Arc::new(Self {
            id,
            inbox,
            connections: RwLock::new(Vec::new()),
            rpc: RwLock::new(None),
            patterns: RwLock::new(None),
            raw: RwLock::new(None),
            ever_connected: AtomicBool::new(false),
            next_key: AtomicU64::new(1),
        });
        (core, rx)
    }

    pub(crate) fn state(&self) -> AgentState {
        AgentState::from_counts(
            self.connections.read().len(),
            self.ever_connected.load(Ordering::Acquire),
        )
    }

    /// Builds the receive callback for a new connection; it only enqueues.
    fn receiver(&self, via: u64) -> ReceiveCallback {
        let inbox = self.inbox.clone();
        let agent = self.id.clone();
        Arc::new(move |from, message| {
            if inbox.send(Inbound { via, from, message }).is_err() {
                trace!(agent = %agent, "Inbox closed, dropping inbound message");
            }
        })
    }

    pub(crate) async fn connect(
        &self,
        transport: &Arc<dyn Transport>,
        agent_id: &str,
    ) -> Result<Arc<dyn Connection>, TransportError> {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        let connection = transport.connect(agent_id, self.receiver(key)).await?;
        let slot = ConnectionSlot {
            key,
            transport: transport.clone(),
            connection: connection.clone(),
        };

        let replaced = {
            let mut connections = self.connections.write();
            let previous = connections
                .iter()
                .position(|existing| same_transport(&existing.transport, transport))
                .map(|index| connections.remove(index));
            connections.push(slot);
            previous
        };
        self.ever_connected.store(true, Ordering::Release);

        if let Some(previous) = replaced {
            warn!(
                agent = %self.id,
                transport_type = transport.transport_type(),
                "Agent already connected to this transport, closing the previous connection"
            );
            previous.connection.close().await;
        }
        debug!(agent = %self.id, as_id = agent_id, transport_type = transport.transport_type(), "Connected");
        Ok(connection)
    }

    pub(crate) async fn disconnect(&self, transport: &Arc<dyn Transport>) -> bool {
        let removed = {
            let mut connections = self.connections.write();
            connections
                .iter()
                .position(|slot| same_transport(&slot.transport, transport))
                .map(|index| connections.remove(index))
        };
        match removed {
            Some(slot) => {
                slot.connection.close().await;
                debug!(agent = %self.id, transport_type = transport.transport_type(), "Disconnected");
                true
            }
            None => false,
        }
    }

    pub(crate) fn take_connections(&self) -> Vec<ConnectionSlot> {
        std::mem::take(&mut *self.connections.write())
    }

    /// Picks the connection for `to` and the address to hand to it.
    ///
    /// `scheme://rest` goes over the connection whose transport id is `scheme`
    /// (sending `rest`), else over the connection whose transport type is
    /// `scheme` (sending the whole URL). Bare ids use the default connection.
    fn resolve(&self, to: &str) -> Result<(Arc<dyn Connection>, String), TransportError> {
        let connections = self.connections.read();
        let slot = if let Some((scheme, rest)) = to.split_once("://") {
            if let Some(slot) = connections.iter().find(|s| s.transport.id() == Some(scheme)) {
                return Ok((slot.connection.clone(), rest.to_string()));
            }
            connections
                .iter()
                .find(|s| s.transport.transport_type() == scheme)
        } else {
            connections
                .iter()
                .find(|s| s.transport.is_default())
                .or_else(|| connections.first())
        };
        slot.map(|s| (s.connection.clone(), to.to_string()))
            .ok_or_else(|| TransportError::NoConnection(to.to_string()))
    }

    pub(crate) async fn send(&self, to: &str, message: Value) -> Result<(), TransportError> {
        let (connection, target) = self.resolve(to)?;
        trace!(agent = %self.id, to = %target, transport_type = connection.transport_type(), "Sending");
        connection.send(&target, message).await
    }

    /// Answers `to` over the connection the request arrived on.
    async fn reply(&self, via: u64, to: &str, message: Value) {
        let connection = self
            .connections
            .read()
            .iter()
            .find(|slot| slot.key == via)
            .map(|slot| slot.connection.clone());
        let sent = match connection {
            Some(connection) => connection.send(to, message).await,
            None => self.send(to, message).await,
        };
        if let Err(e) = sent {
            warn!(agent = %self.id, to, "Failed to send RPC reply: {}", e);
        }
    }

    /// Routes one inbound message: RPC traffic to the RPC module, then pattern
    /// listeners, then the raw handler.
    fn dispatch(self: &Arc<Self>, inbound: Inbound) {
        let Inbound { via, from, message } = inbound;
        let rpc = self.rpc.read().clone();
        let message = match rpc {
            Some(rpc) => match classify(message) {
                Classified::Rpc(traffic) => return self.dispatch_rpc(&rpc, via, from, traffic),
                Classified::Raw(message) => message,
            },
            None => message,
        };
        self.dispatch_raw(&from, message);
    }

    fn dispatch_rpc(self: &Arc<Self>, rpc: &RpcModule, via: u64, from: AgentId, traffic: RpcInbound) {
        match traffic {
            RpcInbound::Reply(reply) => {
                rpc.resolve(reply);
            }
            RpcInbound::Request { id, method, params } => {
                let core = self.clone();
                let rpc = rpc.clone();
                tokio::spawn(async move {
                    // A request without an id is a notification: run it, answer nothing.
                    let notification = id.is_null();
                    let reply = rpc.handle_request(id, &method, params, from.clone()).await;
                    if notification {
                        trace!(agent = %core.id, %from, %method, "Handled RPC notification");
                        return;
                    }
                    core.reply(via, &from, reply.into_value()).await;
                });
            }
            RpcInbound::Invalid { id, error } if id.is_null() => {
                debug!(agent = %self.id, %from, "Dropping invalid RPC envelope without an id: {}", error);
            }
            RpcInbound::Invalid { id, error } => {
                debug!(agent = %self.id, %from, "Rejecting invalid RPC request: {}", error);
                let core = self.clone();
                tokio::spawn(async move {
                    core.reply(via, &from, RpcReply::failure(id, &error).into_value()).await;
                });
            }
        }
    }

    fn dispatch_raw(&self, from: &str, message: Value) {
        let patterns = self.patterns.read().clone();
        let message = match patterns {
            Some(patterns) => match patterns.dispatch(from, message) {
                Ok(()) => return,
                Err(unmatched) => unmatched,
            },
            None => message,
        };
        let raw = self.raw.read().clone();
        match raw {
            Some(handler) => handler(from, message),
            None => debug!(agent = %self.id, from, "No handler for message, dropping it"),
        }
    }

    /// Drains the inbox until the last agent handle is dropped.
    pub(crate) async fn wake(self: Arc<Self>, mut inbox: mpsc::UnboundedReceiver<Inbound>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    trace!(agent = %self.id, "Dispatch loop cancelled");
                    break;
                }

                incoming = inbox.recv() => {
                    let Some(inbound) = incoming else { break; };
                    trace!(agent = %self.id, from = %inbound.from, "Inbound message");
                    self.dispatch(inbound);
                }
            }
        }
    }
}

#[async_trait]
impl Outbox for AgentCore {
    async fn send(&self, to: &str, message: Value) -> Result<(), TransportError> {
        Self::send(self, to, message).await
    }
}
