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

//! TCP transport.
//!
//! Each [`TcpTransport`] binds a listener; agents connected to it are
//! addressed as `tcp://<host>:<port>/<agent-id>`. Outbound sockets are opened
//! lazily per remote host and reused for later sends.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use super::bindings::AgentBindings;
use crate::common::{ReceiveCallback, TransportConfig, CONFIG};
use crate::message::TransportError;
use crate::traits::{Connection, Transport, TransportType};

// --- Public Re-exports ---
pub use listener::TcpStats;
pub use protocol::{Frame, TcpAddress};

// --- Submodules ---

/// Accept loop and read loops.
mod listener;
/// Frame layout and address parsing.
pub mod protocol;

/// Listen address used when the configuration names none.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:0";

/// Concurrent inbound sockets allowed when the configuration names no limit.
pub const DEFAULT_MAX_CONNECTIONS: usize = 256;

/// Cached outbound socket to one remote listener.
pub(crate) struct Peer {
    writer: Mutex<OwnedWriteHalf>,
}

/// State shared by the transport, its connections and its background tasks.
pub(crate) struct TcpShared {
    local_addr: SocketAddr,
    /// `host:port` remote peers use to reach this listener.
    advertised: String,
    bindings: AgentBindings,
    peers: DashMap<String, Arc<Peer>>,
    cancel: CancellationToken,
    stats: Arc<TcpStats>,
    max_frame_size: usize,
    connect_timeout: Duration,
}

impl TcpShared {
    fn url_for(&self, agent_id: &str) -> String {
        format!("{}{}/{agent_id}", protocol::SCHEME, self.advertised)
    }

    fn is_local_host(&self, host: &str) -> bool {
        host == self.advertised || host == self.local_addr.to_string()
    }

    /// Returns the cached socket to `host`, opening one if needed.
    async fn peer(self: &Arc<Self>, host: &str) -> Result<Arc<Peer>, TransportError> {
        if let Some(peer) = self.peers.get(host) {
            return Ok(peer.clone());
        }

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(host))
            .await
            .map_err(|_| TransportError::Io(format!("Timed out connecting to {host}")))?
            .map_err(|e| TransportError::Io(format!("Failed to connect to {host}: {e}")))?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        let peer = Arc::new(Peer {
            writer: Mutex::new(writer),
        });

        match self.peers.entry(host.to_string()) {
            Entry::Occupied(existing) => Ok(existing.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(peer.clone());
                debug!(%host, "Opened peer connection");
                tokio::spawn(listener::watch_peer(
                    self.clone(),
                    host.to_string(),
                    peer.clone(),
                    reader,
                ));
                Ok(peer)
            }
        }
    }

    fn forget_peer(&self, host: &str, peer: &Arc<Peer>) {
        self.peers.remove_if(host, |_, cached| Arc::ptr_eq(cached, peer));
    }

    async fn send(self: &Arc<Self>, from_agent: &str, to: &str, message: Value) -> Result<(), TransportError> {
        let (host, agent) = match TcpAddress::parse(to)? {
            TcpAddress::Local(agent) => {
                return self.bindings.deliver(&self.url_for(from_agent), agent, message)
            }
            TcpAddress::Remote { host, agent } if self.is_local_host(host) => {
                return self.bindings.deliver(&self.url_for(from_agent), agent, message)
            }
            TcpAddress::Remote { host, agent } => (host, agent),
        };

        let frame = Frame {
            from: self.url_for(from_agent),
            to: agent.to_string(),
            message,
        };
        let peer = self.peer(host).await?;
        let result = {
            let mut writer = peer.writer.lock().await;
            protocol::write_message(&mut *writer, protocol::FRAME_MESSAGE, &frame).await
        };
        match result {
            Ok(()) => {
                self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
                trace!(%host, to = agent, "Frame sent");
                Ok(())
            }
            Err(e) => {
                warn!(%host, "Write to peer failed, dropping cached connection: {}", e);
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                self.forget_peer(host, &peer);
                Err(e)
            }
        }
    }
}

/// Transport exchanging length-prefixed JSON frames over TCP.
///
/// Configuration options:
///
/// *   `address`: listen address (default `127.0.0.1:0`, an ephemeral port).
/// *   `advertise_address`: `host:port` placed in the `from` URL of outgoing
///     frames. A bare host reuses the bound port. Required when `address`
///     binds an unspecified IP such as `0.0.0.0`; defaults to the bound address.
/// *   `max_frame_size`: largest accepted frame payload in bytes
///     (default from `limits.max_frame_size`).
/// *   `connect_timeout_ms`: timeout for opening outbound sockets
///     (default from `limits.tcp_connect_timeout_ms`).
/// *   `max_connections`: concurrent inbound sockets (default 256).
///
/// A message for an agent the remote listener does not know is answered with
/// an undeliverable notice, which reaches the sender's receive callback as
/// `{"id": <request id or null>, "error": "Agent not found: <id>"}`.
pub struct TcpTransport {
    id: Option<String>,
    is_default: bool,
    shared: Arc<TcpShared>,
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("id", &self.id)
            .field("local_addr", &self.shared.local_addr)
            .field("bound_agents", &self.shared.bindings.len())
            .finish_non_exhaustive()
    }
}

impl TcpTransport {
    /// Binds a listener on `address` with default limits.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if the address cannot be bound, and
    /// [`TransportError::InvalidConfig`] for an unspecified IP, which needs an
    /// `advertise_address` (see [`create`](TransportType::create)).
    pub async fn bind(address: &str) -> Result<Self, TransportError> {
        Self::create(TransportConfig::new(Self::TYPE).with_option("address", address)).await
    }

    /// Address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    /// `host:port` remote peers use to reach this listener.
    #[must_use]
    pub fn advertised_address(&self) -> &str {
        &self.shared.advertised
    }

    /// URL under which `agent_id` is reachable through this transport.
    #[must_use]
    pub fn url_for(&self, agent_id: &str) -> String {
        self.shared.url_for(agent_id)
    }

    /// Counters of this transport.
    #[must_use]
    pub fn stats(&self) -> Arc<TcpStats> {
        self.shared.stats.clone()
    }

    /// Number of cached outbound sockets.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.shared.peers.len()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

fn usize_option(config: &TransportConfig, key: &str) -> Result<Option<usize>, TransportError> {
    match config.options.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => config
            .option_u64(key)
            .and_then(|n| usize::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| TransportError::InvalidConfig(format!("{key} must be a positive integer"))),
    }
}

/// Picks the `host:port` written into outgoing `from` URLs.
fn advertised_host(advertise: Option<&Value>, local_addr: SocketAddr) -> Result<String, TransportError> {
    match advertise {
        None | Some(Value::Null) if local_addr.ip().is_unspecified() => Err(TransportError::InvalidConfig(format!(
            "listener bound to {local_addr} needs advertise_address, peers cannot reply to an unspecified address"
        ))),
        None | Some(Value::Null) => Ok(local_addr.to_string()),
        Some(Value::String(host)) if host.is_empty() => {
            Err(TransportError::InvalidConfig("advertise_address must not be empty".to_string()))
        }
        Some(Value::String(host)) => Ok(match host.parse::<IpAddr>() {
            Ok(ip) => SocketAddr::new(ip, local_addr.port()).to_string(),
            Err(_) if host.contains(':') => host.clone(),
            Err(_) => format!("{host}:{}", local_addr.port()),
        }),
        Some(other) => Err(TransportError::InvalidConfig(format!(
            "advertise_address must be a string, got {other}"
        ))),
    }
}

#[async_trait]
impl TransportType for TcpTransport {
    const TYPE: &'static str = "tcp";

    #[instrument(skip(config), fields(id = ?config.id))]
    async fn create(config: TransportConfig) -> Result<Self, TransportError> {
        let address = match config.options.get("address") {
            None | Some(Value::Null) => DEFAULT_ADDRESS.to_string(),
            Some(Value::String(address)) => address.clone(),
            Some(other) => {
                return Err(TransportError::InvalidConfig(format!(
                    "address must be a string, got {other}"
                )))
            }
        };
        let max_frame_size = usize_option(&config, "max_frame_size")?.unwrap_or(CONFIG.limits.max_frame_size);
        let connect_timeout = match config.options.get("connect_timeout_ms") {
            None | Some(Value::Null) => CONFIG.limits.tcp_connect_timeout(),
            Some(_) => config.option_u64("connect_timeout_ms").map(Duration::from_millis).ok_or_else(|| {
                TransportError::InvalidConfig("connect_timeout_ms must be a positive integer".to_string())
            })?,
        };
        let max_connections = usize_option(&config, "max_connections")?.unwrap_or(DEFAULT_MAX_CONNECTIONS);

        let socket = TcpListener::bind(&address)
            .await
            .map_err(|e| TransportError::Io(format!("Failed to bind {address}: {e}")))?;
        let local_addr = socket.local_addr()?;
        let advertised = advertised_host(config.options.get("advertise_address"), local_addr)?;

        let shared = Arc::new(TcpShared {
            local_addr,
            advertised,
            bindings: AgentBindings::default(),
            peers: DashMap::new(),
            cancel: CancellationToken::new(),
            stats: Arc::new(TcpStats::default()),
            max_frame_size,
            connect_timeout,
        });
        tokio::spawn(listener::accept_loop(
            socket,
            shared.clone(),
            Arc::new(Semaphore::new(max_connections)),
        ));
        info!(%local_addr, advertised = %shared.advertised, "TCP transport listening");

        Ok(Self {
            id: config.id,
            is_default: config.default,
            shared,
        })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn transport_type(&self) -> &'static str {
        Self::TYPE
    }

    fn is_default(&self) -> bool {
        self.is_default
    }

    async fn connect(
        &self,
        agent_id: &str,
        receive: ReceiveCallback,
    ) -> Result<Arc<dyn Connection>, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let generation = self.shared.bindings.bind(Self::TYPE, agent_id, receive);
        Ok(Arc::new(TcpConnection {
            agent_id: agent_id.to_string(),
            generation,
            shared: self.shared.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) {
        let shared = &self.shared;
        if shared.cancel.is_cancelled() {
            return;
        }
        shared.cancel.cancel();
        shared.bindings.clear();
        shared.peers.clear();
        info!(local_addr = %shared.local_addr, "TCP transport closed");
    }

    fn is_closed(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }
}

/// An agent's binding to a [`TcpTransport`].
pub struct TcpConnection {
    agent_id: String,
    generation: u64,
    shared: Arc<TcpShared>,
    closed: AtomicBool,
}

impl fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpConnection")
            .field("agent_id", &self.agent_id)
            .field("local_addr", &self.shared.local_addr)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connection for TcpConnection {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn transport_type(&self) -> &'static str {
        TcpTransport::TYPE
    }

    fn address(&self) -> String {
        self.shared.url_for(&self.agent_id)
    }

    async fn send(&self, to: &str, message: Value) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) || self.shared.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.shared.send(&self.agent_id, to, message).await
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.shared.bindings.unbind(&self.agent_id, self.generation);
        }
    }
}
