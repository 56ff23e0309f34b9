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

//! Agents: named endpoints that send and receive over transports.
//!
//! An [`Agent`] holds zero or more connections, one per transport, and routes
//! all inbound traffic through a single dispatch task. Its lifecycle is
//! reported as an [`AgentState`].

// --- Public Re-exports ---
pub use agent_state::AgentState;
pub use managed_agent::Agent;

// --- Submodules ---

/// Defines [`AgentState`].
mod agent_state;
/// Inbound dispatch and outbound address resolution.
mod dispatch;
/// Defines [`Agent`].
mod managed_agent;
