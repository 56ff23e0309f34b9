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

//! Built-in transport implementations.
//!
//! *   [`LocalTransport`] (`"local"`): synchronous in-process delivery.
//! *   [`DistribusTransport`] (`"distribus"`): in-process bus spanning every
//!     transport that joined the same network, with queued delivery per host.
//! *   [`PubSubTransport`] (`"pubsub"`): broker-style fan-out over named channels.
//! *   [`TcpTransport`] (`"tcp"`): length-prefixed frames over TCP sockets.

// --- Public Re-exports ---
pub use distribus::{DistribusConnection, DistribusTransport};
pub use local::{LocalConnection, LocalTransport};
pub use pubsub::{PubSubConnection, PubSubTransport};
pub use tcp::{TcpConnection, TcpStats, TcpTransport};

// --- Submodules ---

/// Per-transport table of bound agent ids.
mod bindings;
/// Defines [`DistribusTransport`].
mod distribus;
/// Defines [`LocalTransport`].
mod local;
/// Defines [`PubSubTransport`].
mod pubsub;
/// Defines [`TcpTransport`] and its wire protocol.
pub mod tcp;

/// Returns `to` without a leading `<scheme>://`, if present.
pub(crate) fn strip_scheme<'a>(to: &'a str, scheme: &str) -> &'a str {
    to.strip_prefix(scheme)
        .and_then(|rest| rest.strip_prefix("://"))
        .unwrap_or(to)
}
