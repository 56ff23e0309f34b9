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

//! Defines the core traits that establish the transport contract.
//!
//! # Key Traits
//!
//! *   [`Transport`]: A pluggable communication channel. Hands out one
//!     [`Connection`] per agent id and tears everything down on `close`.
//! *   [`Connection`]: A bound, per-agent handle through which one agent sends.
//!     Inbound traffic arrives through the receive callback given to
//!     [`Transport::connect`].
//! *   [`TransportType`]: Links a concrete transport to its registry name and
//!     its construction from a configuration record.
//! *   [`Outbox`]: The outbound half of an agent, as seen by the RPC module.

// --- Public Re-exports ---
pub use connection::Connection;
pub use outbox::Outbox;
pub use transport::{Transport, TransportType};

// --- Submodules ---

/// Defines the [`Connection`] trait.
mod connection;
/// Defines the [`Outbox`] trait.
mod outbox;
/// Defines the [`Transport`] and [`TransportType`] traits.
mod transport;
