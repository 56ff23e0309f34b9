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

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde_json::Value;
use tracing::{trace, warn};

use crate::common::ReceiveCallback;
use crate::message::TransportError;

/// Table of agent ids bound to one transport.
///
/// Each binding carries a generation number. Binding an id again replaces the
/// callback (with a warning); unbinding only succeeds for the generation that
/// is still current, so closing a stale connection never removes its replacement.
#[derive(Default)]
pub(crate) struct AgentBindings {
    entries: DashMap<String, Binding>,
    generation: AtomicU64,
}

struct Binding {
    generation: u64,
    receive: ReceiveCallback,
}

impl std::fmt::Debug for AgentBindings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentBindings")
            .field("bound_agents", &self.entries.len())
            .finish()
    }
}

impl AgentBindings {
    /// Binds `agent_id` and returns the generation of the new binding.
    pub(crate) fn bind(&self, transport_type: &str, agent_id: &str, receive: ReceiveCallback) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let previous = self
            .entries
            .insert(agent_id.to_string(), Binding { generation, receive });
        if previous.is_some() {
            warn!(
                transport_type,
                agent = agent_id,
                "Agent id already connected, replacing its receive callback"
            );
        }
        trace!(transport_type, agent = agent_id, generation, "Agent bound");
        generation
    }

    /// Removes the binding of `agent_id` if it is still at `generation`.
    pub(crate) fn unbind(&self, agent_id: &str, generation: u64) -> bool {
        self.entries
            .remove_if(agent_id, |_, binding| binding.generation == generation)
            .is_some()
    }

    /// Returns the receive callback bound to `agent_id`.
    pub(crate) fn lookup(&self, agent_id: &str) -> Option<ReceiveCallback> {
        self.entries.get(agent_id).map(|binding| binding.receive.clone())
    }

    /// Invokes the callback bound to `to`.
    ///
    /// The callback is cloned out of the table first, so it may re-enter the
    /// transport without deadlocking.
    pub(crate) fn deliver(&self, from: &str, to: &str, message: Value) -> Result<(), TransportError> {
        let receive = self
            .lookup(to)
            .ok_or_else(|| TransportError::AgentNotFound(to.to_string()))?;
        receive(from.to_string(), message);
        Ok(())
    }

    pub(crate) fn clear(&self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
