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

//! Accept loop and per-socket read loops of the TCP transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, trace, warn};

use super::protocol::{
    read_message, undeliverable_notice, write_message, Frame, FRAME_MESSAGE, FRAME_UNDELIVERABLE,
};
use super::{Peer, TcpShared};
use crate::message::TransportError;

/// Counters for one TCP transport.
#[derive(Debug, Default)]
pub struct TcpStats {
    /// Total inbound sockets accepted.
    pub connections_accepted: AtomicUsize,
    /// Inbound sockets currently open.
    pub connections_active: AtomicUsize,
    /// Message frames written to peers.
    pub frames_sent: AtomicUsize,
    /// Message frames read from inbound sockets.
    pub frames_received: AtomicUsize,
    /// Inbound frames handed to a bound agent.
    pub frames_routed: AtomicUsize,
    /// Total errors encountered.
    pub errors: AtomicUsize,
}

impl TcpStats {
    /// Get the number of inbound sockets accepted.
    #[must_use]
    pub fn connections_accepted(&self) -> usize {
        self.connections_accepted.load(Ordering::Relaxed)
    }

    /// Get the number of inbound sockets currently open.
    #[must_use]
    pub fn connections_active(&self) -> usize {
        self.connections_active.load(Ordering::Relaxed)
    }

    /// Get the number of message frames written.
    #[must_use]
    pub fn frames_sent(&self) -> usize {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Get the number of message frames received.
    #[must_use]
    pub fn frames_received(&self) -> usize {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Get the number of frames delivered to an agent.
    #[must_use]
    pub fn frames_routed(&self) -> usize {
        self.frames_routed.load(Ordering::Relaxed)
    }

    /// Get the number of errors.
    #[must_use]
    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::Relaxed)
    }
}

/// Accepts inbound sockets until the transport is closed.
pub(super) async fn accept_loop(listener: TcpListener, shared: Arc<TcpShared>, permits: Arc<Semaphore>) {
    let stats = &shared.stats;
    loop {
        tokio::select! {
            biased;

            () = shared.cancel.cancelled() => {
                info!(address = %shared.local_addr, "TCP listener received shutdown signal");
                break;
            }

            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, remote)) => {
                        let Ok(permit) = permits.clone().try_acquire_owned() else {
                            warn!(%remote, "Maximum concurrent connections reached, rejecting connection");
                            stats.errors.fetch_add(1, Ordering::Relaxed);
                            continue;
                        };

                        let conn_id = stats.connections_accepted.fetch_add(1, Ordering::Relaxed) + 1;
                        stats.connections_active.fetch_add(1, Ordering::Relaxed);
                        trace!(%remote, "Accepted connection #{}", conn_id);

                        let shared = shared.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, conn_id, &shared).await;
                            shared.stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                            drop(permit);
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        stats.errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    }
}

/// Reads message frames from one inbound socket and routes them to bound agents.
async fn handle_connection(stream: TcpStream, conn_id: usize, shared: &TcpShared) {
    let (mut reader, mut writer) = stream.into_split();
    debug!("Connection #{} handler started", conn_id);

    loop {
        tokio::select! {
            biased;

            () = shared.cancel.cancelled() => {
                trace!("Connection #{} received shutdown signal", conn_id);
                break;
            }

            frame_result = read_message(&mut reader, shared.max_frame_size) => {
                match frame_result {
                    Ok((FRAME_MESSAGE, frame)) => {
                        shared.stats.frames_received.fetch_add(1, Ordering::Relaxed);
                        if let Err(e) = route_inbound(shared, &mut writer, frame).await {
                            error!("Connection #{} failed to send undeliverable notice: {}", conn_id, e);
                            shared.stats.errors.fetch_add(1, Ordering::Relaxed);
                            break;
                        }
                    }
                    Ok((frame_type, _)) => {
                        warn!("Connection #{} sent unexpected frame type {:#04x}", conn_id, frame_type);
                        shared.stats.errors.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TransportError::Closed) => {
                        debug!("Connection #{} closed by peer", conn_id);
                        break;
                    }
                    Err(e) => {
                        error!("Connection #{} read error: {}", conn_id, e);
                        shared.stats.errors.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                }
            }
        }
    }

    debug!("Connection #{} handler finished", conn_id);
}

async fn route_inbound(
    shared: &TcpShared,
    writer: &mut OwnedWriteHalf,
    frame: Frame,
) -> Result<(), TransportError> {
    if let Some(receive) = shared.bindings.lookup(&frame.to) {
        trace!(from = %frame.from, to = %frame.to, "Routing inbound frame");
        shared.stats.frames_routed.fetch_add(1, Ordering::Relaxed);
        receive(frame.from, frame.message);
        return Ok(());
    }

    warn!(from = %frame.from, to = %frame.to, "Inbound frame for unknown agent");
    shared.stats.errors.fetch_add(1, Ordering::Relaxed);
    let notice = Frame {
        from: shared.url_for(&frame.to),
        message: undeliverable_notice(&frame.to, &frame.message),
        to: frame.from,
    };
    write_message(writer, FRAME_UNDELIVERABLE, &notice).await
}

/// Reads undeliverable notices coming back on an outbound socket.
///
/// Removes the peer from the cache once the socket ends.
pub(super) async fn watch_peer(shared: Arc<TcpShared>, host: String, peer: Arc<Peer>, mut reader: OwnedReadHalf) {
    loop {
        tokio::select! {
            biased;

            () = shared.cancel.cancelled() => break,

            frame_result = read_message(&mut reader, shared.max_frame_size) => {
                match frame_result {
                    Ok((FRAME_UNDELIVERABLE, frame)) => {
                        let agent = frame.to.rsplit_once('/').map_or(frame.to.as_str(), |(_, agent)| agent);
                        match shared.bindings.lookup(agent) {
                            Some(receive) => receive(frame.from, frame.message),
                            None => debug!(agent, "Undeliverable notice for an agent no longer bound"),
                        }
                    }
                    Ok((frame_type, _)) => {
                        warn!(%host, "Peer sent unexpected frame type {:#04x}", frame_type);
                        shared.stats.errors.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TransportError::Closed) => {
                        debug!(%host, "Peer closed the connection");
                        break;
                    }
                    Err(e) => {
                        warn!(%host, "Peer read error: {}", e);
                        shared.stats.errors.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                }
            }
        }
    }
    shared.forget_peer(&host, &peer);
}
