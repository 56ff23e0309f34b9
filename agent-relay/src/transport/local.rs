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

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, trace};

use super::bindings::AgentBindings;
use super::strip_scheme;
use crate::common::{ReceiveCallback, TransportConfig};
use crate::message::TransportError;
use crate::traits::{Connection, Transport, TransportType};

/// In-process transport delivering messages synchronously.
///
/// `send` looks the target up and invokes its receive callback on the sending
/// task, so an unknown target is reported immediately as
/// [`TransportError::AgentNotFound`]. Targets may be written as `"id"` or
/// `"local://id"`.
#[derive(Debug, Default)]
pub struct LocalTransport {
    id: Option<String>,
    is_default: bool,
    shared: Arc<LocalShared>,
}

#[derive(Debug, Default)]
struct LocalShared {
    bindings: AgentBindings,
    closed: AtomicBool,
}

impl LocalTransport {
    /// Creates an anonymous local transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a local transport with the id and default flag of `config`.
    #[must_use]
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            id: config.id.clone(),
            is_default: config.default,
            shared: Arc::default(),
        }
    }

    /// Creates a local transport with the given id.
    #[must_use]
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Number of agents currently bound.
    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.shared.bindings.len()
    }
}

#[async_trait]
impl Transport for LocalTransport {
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
        Ok(Arc::new(LocalConnection {
            agent_id: agent_id.to_string(),
            generation,
            shared: self.shared.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::AcqRel) {
            self.shared.bindings.clear();
            debug!(id = ?self.id, "Local transport closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl TransportType for LocalTransport {
    const TYPE: &'static str = "local";

    async fn create(config: TransportConfig) -> Result<Self, TransportError> {
        Ok(Self::from_config(&config))
    }
}

/// An agent's binding to a [`LocalTransport`].
#[derive(Debug)]
pub struct LocalConnection {
    agent_id: String,
    generation: u64,
    shared: Arc<LocalShared>,
    closed: AtomicBool,
}

#[async_trait]
impl Connection for LocalConnection {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn transport_type(&self) -> &'static str {
        LocalTransport::TYPE
    }

    fn address(&self) -> String {
        self.agent_id.clone()
    }

    async fn send(&self, to: &str, message: Value) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) || self.shared.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let target = strip_scheme(to, LocalTransport::TYPE);
        trace!(from = %self.agent_id, to = target, "Local send");
        self.shared.bindings.deliver(&self.agent_id, target, message)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.shared.bindings.unbind(&self.agent_id, self.generation);
        }
    }
}
