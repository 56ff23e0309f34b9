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
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use lazy_static::lazy_static;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use super::strip_scheme;
use crate::common::{ReceiveCallback, TransportConfig};
use crate::message::TransportError;
use crate::traits::{Connection, Transport, TransportType};

lazy_static! {
    /// Process-wide networks keyed by `network_id`.
    static ref NETWORKS: DashMap<String, Arc<Network>> = DashMap::new();
}

static NEXT_HOST: AtomicU64 = AtomicU64::new(1);

/// Route table shared by every host that joined a network.
///
/// A network stays registered while at least one host is joined to it.
#[derive(Default)]
struct Network {
    routes: DashMap<String, Route>,
    hosts: AtomicUsize,
}

#[derive(Clone)]
struct Route {
    host: u64,
    generation: u64,
    receive: ReceiveCallback,
    queue: mpsc::UnboundedSender<Delivery>,
}

struct Delivery {
    receive: ReceiveCallback,
    from: String,
    message: Value,
}

struct HostShared {
    host: u64,
    network_id: String,
    network: Arc<Network>,
    queue: mpsc::UnboundedSender<Delivery>,
    cancel: CancellationToken,
    generation: AtomicU64,
    left: AtomicBool,
}

impl HostShared {
    /// Removes this host's routes and leaves the network, once.
    ///
    /// The last host to leave unregisters the network.
    fn leave(&self) -> bool {
        if self.left.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.cancel.cancel();
        self.network.routes.retain(|_, route| route.host != self.host);
        self.network.hosts.fetch_sub(1, Ordering::AcqRel);
        let removed = NETWORKS.remove_if(&self.network_id, |_, network| {
            Arc::ptr_eq(network, &self.network) && network.hosts.load(Ordering::Acquire) == 0
        });
        if removed.is_some() {
            trace!(network_id = %self.network_id, "Last host left, network removed");
        }
        true
    }
}

/// In-process message bus spanning every transport joined to the same network.
///
/// Each transport instance is a *host* on its network. Agents connected to any
/// host of a network can address each other by bare id (or `"distribus://id"`).
/// Delivery is asynchronous: messages are queued to the receiving host and
/// drained by that host's delivery task, in send order per host.
///
/// Configuration options:
///
/// *   `network_id`: name of the network to join. Transports created without
///     one get a private network of their own.
pub struct DistribusTransport {
    id: Option<String>,
    is_default: bool,
    shared: Arc<HostShared>,
}

impl fmt::Debug for DistribusTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistribusTransport")
            .field("id", &self.id)
            .field("network_id", &self.shared.network_id)
            .field("host", &self.shared.host)
            .finish_non_exhaustive()
    }
}

impl DistribusTransport {
    /// Joins `network_id` as a new host.
    ///
    /// Spawns the host's delivery task, so this must be called within a Tokio runtime.
    #[must_use]
    pub fn join(network_id: impl Into<String>) -> Self {
        Self::build(None, false, Some(network_id.into()))
    }

    /// Network this host belongs to.
    #[must_use]
    pub fn network_id(&self) -> &str {
        &self.shared.network_id
    }

    /// Number of agents bound anywhere on this host's network.
    #[must_use]
    pub fn network_size(&self) -> usize {
        self.shared.network.routes.len()
    }

    fn build(id: Option<String>, is_default: bool, network_id: Option<String>) -> Self {
        let host = NEXT_HOST.fetch_add(1, Ordering::Relaxed);
        let network_id = network_id.unwrap_or_else(|| format!("private-{host}"));
        let network = {
            // Counted under the entry lock so a leaving host cannot remove it meanwhile.
            let entry = NETWORKS.entry(network_id.clone()).or_default();
            entry.hosts.fetch_add(1, Ordering::AcqRel);
            entry.clone()
        };
        let (queue, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        tokio::spawn(drain_deliveries(rx, cancel.clone()));
        debug!(host, network_id = %network_id, "Joined distribus network");
        Self {
            id,
            is_default,
            shared: Arc::new(HostShared {
                host,
                network_id,
                network,
                queue,
                cancel,
                generation: AtomicU64::new(0),
                left: AtomicBool::new(false),
            }),
        }
    }
}

impl Drop for DistribusTransport {
    fn drop(&mut self) {
        self.shared.leave();
    }
}

async fn drain_deliveries(mut rx: mpsc::UnboundedReceiver<Delivery>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            delivery = rx.recv() => match delivery {
                Some(Delivery { receive, from, message }) => receive(from, message),
                None => break,
            },
        }
    }
    trace!("Distribus delivery task stopped");
}

#[async_trait]
impl Transport for DistribusTransport {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn transport_type(&self) -> &'static str {
        Self::TYPE
    }

    fn is_default(&self) -> bool {
        self.is_default
    }

    #[instrument(skip(self, receive), fields(network_id = %self.shared.network_id))]
    async fn connect(
        &self,
        agent_id: &str,
        receive: ReceiveCallback,
    ) -> Result<Arc<dyn Connection>, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let shared = &self.shared;
        let generation = shared.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let route = Route {
            host: shared.host,
            generation,
            receive,
            queue: shared.queue.clone(),
        };
        if let Some(previous) = shared.network.routes.insert(agent_id.to_string(), route) {
            warn!(
                agent = agent_id,
                previous_host = previous.host,
                "Agent id already connected on this network, replacing its route"
            );
        }
        Ok(Arc::new(DistribusConnection {
            agent_id: agent_id.to_string(),
            generation,
            shared: shared.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) {
        let shared = &self.shared;
        if shared.leave() {
            debug!(host = shared.host, network_id = %shared.network_id, "Distribus host closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }
}

#[async_trait]
impl TransportType for DistribusTransport {
    const TYPE: &'static str = "distribus";

    async fn create(config: TransportConfig) -> Result<Self, TransportError> {
        let network_id = match config.options.get("network_id") {
            None | Some(Value::Null) => None,
            Some(Value::String(name)) => Some(name.clone()),
            Some(other) => {
                return Err(TransportError::InvalidConfig(format!(
                    "network_id must be a string, got {other}"
                )))
            }
        };
        Ok(Self::build(config.id, config.default, network_id))
    }
}

/// An agent's route on a distribus network.
pub struct DistribusConnection {
    agent_id: String,
    generation: u64,
    shared: Arc<HostShared>,
    closed: AtomicBool,
}

impl fmt::Debug for DistribusConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistribusConnection")
            .field("agent_id", &self.agent_id)
            .field("network_id", &self.shared.network_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connection for DistribusConnection {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn transport_type(&self) -> &'static str {
        DistribusTransport::TYPE
    }

    fn address(&self) -> String {
        format!("{}://{}", DistribusTransport::TYPE, self.agent_id)
    }

    async fn send(&self, to: &str, message: Value) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) || self.shared.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let target = strip_scheme(to, DistribusTransport::TYPE);
        let route = self
            .shared
            .network
            .routes
            .get(target)
            .map(|route| route.clone())
            .ok_or_else(|| TransportError::AgentNotFound(target.to_string()))?;
        trace!(from = %self.agent_id, to = target, host = route.host, "Distribus send");
        route
            .queue
            .send(Delivery {
                receive: route.receive,
                from: self.agent_id.clone(),
                message,
            })
            .map_err(|_| TransportError::AgentNotFound(target.to_string()))
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let host = self.shared.host;
            let generation = self.generation;
            self.shared.network.routes.remove_if(&self.agent_id, |_, route| {
                route.host == host && route.generation == generation
            });
        }
    }
}
