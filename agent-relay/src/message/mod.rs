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

//! Defines the RPC envelope, inbound message classification, and the error types
//! shared by transports, agents, and modules.
//!
//! # Key Components
//!
//! *   [`RpcRequest`]: The outbound request envelope (`{id, method, params}`).
//! *   [`RpcReply`]: A tagged success/failure reply envelope, decoded explicitly
//!     rather than inferred from field presence.
//! *   [`TransportError`]: Failures raised by the registry, the manager, and
//!     concrete transports.
//! *   [`RpcError`]: Failures surfaced to RPC callers and carried across the wire.

// --- Public Re-exports ---
pub use envelope::{RpcReply, RpcRequest, JSONRPC_VERSION};
pub use rpc_error::RpcError;
pub use transport_error::TransportError;

// --- Crate-Internal Re-exports ---
pub(crate) use envelope::{classify, Classified, RpcInbound};

// --- Submodules ---

/// Defines the RPC envelope types and classification of inbound messages.
mod envelope;
/// Defines [`RpcError`].
mod rpc_error;
/// Defines [`TransportError`].
mod transport_error;
