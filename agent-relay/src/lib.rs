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

#![forbid(unsafe_code)]
#![forbid(missing_docs)]

//! # Agent Relay
//!
//! Agents exchanging JSON messages over interchangeable transports, with
//! request/reply correlation layered on top of one-way delivery.
//!
//! ## Key Concepts
//!
//! - **Transports (`Transport`)**: Pluggable delivery mechanisms. Each hands
//!   out one `Connection` per agent id. Built in: `local`, `distribus`,
//!   `pubsub` and `tcp`.
//! - **Registry & Manager (`TransportManager`)**: A process-wide registry of
//!   transport types plus an ordered set of live transport instances built
//!   from configuration records.
//! - **Agents (`Agent`)**: Named endpoints. All inbound traffic funnels into a
//!   single dispatch task per agent.
//! - **RPC (`RpcModule`)**: Correlated requests with timeouts, cancellation
//!   and errors carried back across the wire.
//! - **Patterns (`PatternModule`)**: Listeners selecting raw messages by value
//!   or predicate.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use agent_relay::prelude::*;
//! use serde_json::json;
//!
//! let manager = TransportManager::new();
//! let local = manager.load(TransportConfig::new("local")).await?;
//!
//! let calc = Agent::new("calc");
//! calc.load_rpc(RpcConfig::default())
//!     .register_sync("add", |params, _from| Ok(params["a"].as_i64().unwrap_or(0) + params["b"].as_i64().unwrap_or(0)));
//! calc.connect(&local).await?;
//!
//! let client = Agent::new("client");
//! client.load_rpc(RpcConfig::default());
//! client.connect(&local).await?;
//!
//! let sum = client.request("calc", json!({"method": "add", "params": {"a": 1, "b": 3}})).await?;
//! assert_eq!(sum, json!(4));
//! ```

/// Agents and their dispatch loop.
pub(crate) mod agent;

/// Configuration, the transport registry, the transport manager and shared type aliases.
pub(crate) mod common;

/// Envelopes and error types.
pub(crate) mod message;

/// RPC and pattern modules.
pub(crate) mod module;

/// Core traits of the transport contract.
pub(crate) mod traits;

/// Built-in transports.
pub(crate) mod transport;

/// Built-in transport implementations.
pub mod transports {
    pub use crate::transport::{
        DistribusConnection, DistribusTransport, LocalConnection, LocalTransport, PubSubConnection,
        PubSubTransport, TcpConnection, TcpStats, TcpTransport,
    };

    /// Wire protocol of the TCP transport.
    pub mod tcp {
        pub use crate::transport::tcp::protocol::{
            read_frame, read_message, undeliverable_notice, write_frame, write_message, Frame,
            TcpAddress, FRAME_MESSAGE, FRAME_UNDELIVERABLE, HEADER_SIZE, MAX_FRAME_SIZE,
            PROTOCOL_VERSION, SCHEME,
        };
        pub use crate::transport::tcp::{DEFAULT_ADDRESS, DEFAULT_MAX_CONNECTIONS};
    }
}

/// A prelude module for conveniently importing the most commonly used items.
///
/// # Re-exports
///
/// ## External Crates
/// *   [`async_trait::async_trait`](https://docs.rs/async-trait/latest/async_trait/attr.async_trait.html):
///     needed to implement [`Transport`](crate::prelude::Transport) and
///     [`Connection`](crate::prelude::Connection).
///
/// ## Core Types
/// *   [`crate::agent::Agent`] and [`crate::agent::AgentState`].
/// *   [`crate::common::TransportManager`], [`crate::common::TransportSelector`],
///     [`crate::common::TransportConfig`], [`crate::common::RelayConfig`].
/// *   [`crate::module::RpcModule`], [`crate::module::RpcConfig`],
///     [`crate::module::PendingRequest`],
///     [`crate::module::PatternModule`], [`crate::module::Pattern`].
/// *   [`crate::message::RpcError`], [`crate::message::TransportError`],
///     [`crate::message::RpcReply`], [`crate::message::RpcRequest`].
/// *   The built-in transports.
///
/// ## Core Traits
/// *   [`crate::traits::Transport`], [`crate::traits::TransportType`],
///     [`crate::traits::Connection`], [`crate::traits::Outbox`].
pub mod prelude {
    pub use async_trait::async_trait;

    pub use crate::agent::{Agent, AgentState};
    pub use crate::common::{
        AgentId, FutureBox, LimitsConfig, RawHandler, ReceiveCallback, RelayConfig, RpcHandler,
        RpcSettings, TransportConfig, TransportFactory, TransportManager, TransportSelector, CONFIG,
    };
    pub use crate::message::{RpcError, RpcReply, RpcRequest, TransportError, JSONRPC_VERSION};
    pub use crate::module::{Pattern, PatternModule, PendingRequest, Predicate, RpcConfig, RpcModule};
    pub use crate::traits::{Connection, Outbox, Transport, TransportType};
    pub use crate::transport::{
        DistribusTransport, LocalTransport, PubSubTransport, TcpStats, TcpTransport,
    };
}
