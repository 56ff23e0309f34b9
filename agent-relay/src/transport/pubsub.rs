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

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use lazy_static::lazy_static;
use serde_json::Value;
use tracing::{debug, trace, warn};

use super::strip_scheme;
use crate::common::{ReceiveCallback, TransportConfig};
use crate::message::TransportError;
use crate::traits::{Connection, Transport, TransportType};

lazy_static! {
    /// Process-wide brokers keyed by name.
    static ref BROKERS: DashMap<String, Arc<PubSubBroker>> = DashMap::new();
}

static NEXT_SUBSCRIBER: AtomicU64 = AtomicU64::new(1);

/// Broker used when a transport's configuration names none.
pub const DEFAULT_BROKER: &str = "default";

/// Named channels and the subscriptions attached to them.
#[derive(Default)]
struct PubSubBroker {
    channels: DashMap<String, Vec<Subscription>>,
}

#[derive(Clone)]
struct Subscription {
    transport: u64,
    generation: u64,
    receive: ReceiveCallback,
}

impl PubSubBroker {
    fn subscribe(&self, channel: &str, subscription: Subscription) {
        let mut subscribers = self.channels.entry(channel.to_string()).or_default();
        if let Some(existing) = subscribers
            .iter_mut()
            .find(|s| s.transport == subscription.transport)
        {
            warn!(
                channel,
                "Agent id already subscribed through this transport, replacing its receive callback"
            );
            *existing = subscription;
        } else {
            subscribers.push(subscription);
        }
    }

    fn unsubscribe(&self, channel: &str, transport: u64, generation: u64) {
        if let Some(mut subscribers) = self.channels.get_mut(channel) {
            subscribers.retain(|s| !(s.transport == transport && s.generation == generation));
        }
        self.channels.remove_if(channel, |_, subscribers| subscribers.is_empty());
    }

    fn unsubscribe_all(&self, transport: u64) {
        self.channels.retain(|_, subscribers| {
            subscribers.retain(|s| s.transport != transport);
            !subscribers.is_empty()
        });
    }

    /// Delivers `message` to every subscriber of `channel`; returns how many received it.
    fn publish(&self, from: &str, channel: &str, message: &Value) -> usize {
        let receivers: Vec<ReceiveCallback> = self
            .channels
            .get(channel)
            .map(|subscribers| subscribers.iter().map(|s| s.receive.clone()).collect())
            .unwrap_or_default();
        for receive in &receivers {
            receive(from.to_string(), message.clone());
        }
        receivers.len()
    }

    fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, |subscribers| subscribers.len())
    }
}

struct PubSubShared {
    key: u64,
    broker_name: String,
    broker: Arc<PubSubBroker>,
    closed: AtomicBool,
    generation: AtomicU64,
}

/// Publish/subscribe transport.
///
/// Connecting an agent subscribes it to the channel named after its id;
/// sending publishes to the channel named by the target id. Every transport
/// attached to the same broker sees the same channels, and a message reaches
/// every subscriber of its channel. Publishing to a channel without
/// subscribers fails with [`TransportError::AgentNotFound`].
///
/// Configuration options:
///
/// *   `broker`: name of the broker to attach to (default `"default"`).
pub struct PubSubTransport {
    id: Option<String>,
    is_default: bool,
    shared: Arc<PubSubShared>,
}

impl fmt::Debug for PubSubTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PubSubTransport")
            .field("id", &self.id)
            .field("broker", &self.shared.broker_name)
            .finish_non_exhaustive()
    }
}

impl PubSubTransport {
    /// Attaches a new transport to the broker called `broker`.
    #[must_use]
    pub fn attach(broker: impl Into<String>) -> Self {
        Self::build(None, false, broker.into())
    }

    /// Name of the broker this transport publishes through.
    #[must_use]
    pub fn broker(&self) -> &str {
        &self.shared.broker_name
    }

    /// Number of subscriptions on `channel` across the whole broker.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.shared.broker.subscriber_count(channel)
    }

    fn build(id: Option<String>, is_default: bool, broker_name: String) -> Self {
        let broker = BROKERS.entry(broker_name.clone()).or_default().clone();
        Self {
            id,
            is_default,
            shared: Arc::new(PubSubShared {
                key: NEXT_SUBSCRIBER.fetch_add(1, Ordering::Relaxed),
                broker_name,
                broker,
                closed: AtomicBool::new(false),
                generation: AtomicU64::new(0),
            }),
        }
    }
}

impl Drop for PubSubTransport {
    fn drop(&mut self) {
        if !self.shared.closed.swap(true, Ordering::AcqRel) {
            self.shared.broker.unsubscribe_all(self.shared.key);
            trace!(broker = %self.shared.broker_name, "Dropped pubsub transport unsubscribed");
        }
    }
}

#[async_trait]
impl Transport for PubSubTransport {
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
        let shared = &self.shared;
        let generation = shared.generation.fetch_add(1, Ordering::Relaxed) + 1;
        shared.broker.subscribe(
            agent_id,
            Subscription {
                transport: shared.key,
                generation,
                receive,
            },
        );
        debug!(broker = %shared.broker_name, channel = agent_id, "Subscribed");
        Ok(Arc::new(PubSubConnection {
            agent_id: agent_id.to_string(),
            generation,
            shared: shared.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::AcqRel) {
            self.shared.broker.unsubscribe_all(self.shared.key);
            debug!(broker = %self.shared.broker_name, "Pubsub transport closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl TransportType for PubSubTransport {
    const TYPE: &'static str = "pubsub";

    async fn create(config: TransportConfig) -> Result<Self, TransportError> {
        let broker = match config.options.get("broker") {
            None | Some(Value::Null) => DEFAULT_BROKER.to_string(),
            Some(Value::String(name)) => name.clone(),
            Some(other) => {
                return Err(TransportError::InvalidConfig(format!(
                    "broker must be a string, got {other}"
                )))
            }
        };
        Ok(Self::build(config.id, config.default, broker))
    }
}

/// An agent's subscription on a [`PubSubTransport`].
pub struct PubSubConnection {
    agent_id: String,
    generation: u64,
    shared: Arc<PubSubShared>,
    closed: AtomicBool,
}

impl fmt::Debug for PubSubConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PubSubConnection")
            .field("agent_id", &self.agent_id)
            .field("broker", &self.shared.broker_name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connection for PubSubConnection {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn transport_type(&self) -> &'static str {
        PubSubTransport::TYPE
    }

    fn address(&self) -> String {
        format!("{}://{}", PubSubTransport::TYPE, self.agent_id)
    }

    async fn send(&self, to: &str, message: Value) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) || self.shared.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let channel = strip_scheme(to, PubSubTransport::TYPE);
        let delivered = self.shared.broker.publish(&self.agent_id, channel, &message);
        trace!(from = %self.agent_id, channel, delivered, "Published");
        if delivered == 0 {
            return Err(TransportError::AgentNotFound(channel.to_string()));
        }
        Ok(())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.shared
                .broker
                .unsubscribe(&self.agent_id, self.shared.key, self.generation);
        }
    }
}
