//! Provides common types, configuration, and the transport manager.
//!
//! # Key Re-exported Components:
//!
//! *   [`TransportManager`]: Registry front-end and owner of live transport instances.
//! *   [`RelayConfig`] / [`TransportConfig`]: Configuration records and their XDG loader.
//! *   Type aliases for callbacks and handlers ([`ReceiveCallback`], [`RpcHandler`], ...).

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

// --- Public Re-exports ---
pub use config::{LimitsConfig, RelayConfig, RpcSettings, TransportConfig, CONFIG};
pub use transport_manager::{TransportManager, TransportSelector};
pub use types::{AgentId, FutureBox, RawHandler, ReceiveCallback, RpcHandler, TransportFactory};

// --- Crate-Internal Re-exports ---
pub(crate) use types::same_transport;

// --- Submodules ---

/// Defines the configuration system.
mod config;
/// Defines the process-wide transport type registry.
mod registry;
/// Defines the `TransportManager`.
mod transport_manager;
/// Defines common type aliases.
mod types;
