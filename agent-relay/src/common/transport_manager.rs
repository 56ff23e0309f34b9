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

use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, instrument, trace};

use crate::common::registry::{self, factory_for, factory_from_fn};
use crate::common::{same_transport, RelayConfig, TransportConfig};
use crate::message::TransportError;
use crate::traits::{Transport, TransportType};

/// Owns the live transport instances of an application.
///
/// Transport *types* live in a process-wide registry shared by every manager
/// and are registered through [`TransportManager::register_type`] or
/// [`TransportManager::register_factory`]. The built-in types `local`,
/// `distribus`, `pubsub` and `tcp` are always present.
///
/// Instances are kept in insertion order, which is also the order returned by
/// [`get_by_type`](Self::get_by_type).
///
/// Removing transports ([`unload`](Self::unload), [`clear`](Self::clear)) does
/// not close them, because agents may still hold connections into a shared
/// transport. Both return the removed instances so callers can close them;
/// [`close_all`](Self::close_all) does both in one step.
#[derive(Debug, Default)]
pub struct TransportManager {
    transports: RwLock<Vec<Arc<dyn Transport>>>,
}

/// Identifies transports to remove from a [`TransportManager`].
#[derive(Debug, Clone)]
pub enum TransportSelector {
    /// Matches every transport whose id equals this string.
    Id(String),
    /// Matches this exact instance.
    Instance(Arc<dyn Transport>),
}

impl TransportSelector {
    fn matches(&self, transport: &Arc<dyn Transport>) -> bool {
        match self {
            Self::Id(id) => transport.id() == Some(id.as_str()),
            Self::Instance(instance) => same_transport(instance, transport),
        }
    }
}

impl From<&str> for TransportSelector {
    fn from(id: &str) -> Self {
        Self::Id(id.to_string())
    }
}

impl From<String> for TransportSelector {
    fn from(id: String) -> Self {
        Self::Id(id)
    }
}

impl From<Arc<dyn Transport>> for TransportSelector {
    fn from(transport: Arc<dyn Transport>) -> Self {
        Self::Instance(transport)
    }
}

impl From<&Arc<dyn Transport>> for TransportSelector {
    fn from(transport: &Arc<dyn Transport>) -> Self {
        Self::Instance(transport.clone())
    }
}

impl TransportManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a manager and loads `configs` in order.
    ///
    /// # Errors
    ///
    /// See [`load_all`](Self::load_all).
    pub async fn from_configs(
        configs: impl IntoIterator<Item = TransportConfig>,
    ) -> Result<Self, TransportError> {
        let manager = Self::new();
        manager.load_all(configs).await?;
        Ok(manager)
    }

    /// Creates a manager holding the transports listed in `config`.
    ///
    /// # Errors
    ///
    /// See [`load_all`](Self::load_all).
    pub async fn from_config(config: &RelayConfig) -> Result<Self, TransportError> {
        Self::from_configs(config.transports.iter().cloned()).await
    }

    /// Registers a transport type under [`TransportType::TYPE`].
    ///
    /// # Errors
    ///
    /// * [`TransportError::RegistrationConflict`] - If the name is taken. The
    ///   first registration remains in effect.
    pub fn register_type<T: TransportType>() -> Result<(), TransportError> {
        registry::global().register(T::TYPE, factory_for::<T>())
    }

    /// Registers an async constructor under `name`.
    ///
    /// # Errors
    ///
    /// * [`TransportError::RegistrationConflict`] - If the name is taken.
    pub fn register_factory<F, Fut>(name: &str, constructor: F) -> Result<(), TransportError>
    where
        F: Fn(TransportConfig) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn Transport>, TransportError>> + Send + 'static,
    {
        registry::global().register(name, factory_from_fn(constructor))
    }

    /// Returns the names of all registered transport types, sorted.
    #[must_use]
    pub fn types() -> Vec<String> {
        registry::global().names()
    }

    /// Whether a transport type is registered under `name`.
    #[must_use]
    pub fn is_registered(name: &str) -> bool {
        registry::global().contains(name)
    }

    /// Constructs a transport from `config` and appends it.
    ///
    /// # Errors
    ///
    /// * [`TransportError::UnknownType`] - If `config.transport_type` is not registered.
    /// * Any error raised by the transport's constructor.
    #[instrument(skip(self), fields(transport_type = %config.transport_type))]
    pub async fn load(&self, config: TransportConfig) -> Result<Arc<dyn Transport>, TransportError> {
        let factory = registry::global()
            .factory(&config.transport_type)
            .ok_or_else(|| TransportError::UnknownType(config.transport_type.clone()))?;
        let transport = factory(config).await?;
        self.transports.write().push(transport.clone());
        debug!(id = ?transport.id(), "Transport loaded");
        Ok(transport)
    }

    /// Constructs transports for every record and appends them in input order.
    ///
    /// All types are checked before anything is constructed. If a constructor
    /// fails, the transports already built by this call are closed and nothing
    /// is appended.
    ///
    /// # Errors
    ///
    /// * [`TransportError::UnknownType`] - If any record names an unregistered type.
    /// * Any error raised by a transport's constructor.
    pub async fn load_all(
        &self,
        configs: impl IntoIterator<Item = TransportConfig>,
    ) -> Result<Vec<Arc<dyn Transport>>, TransportError> {
        let mut planned = Vec::new();
        for config in configs {
            let factory = registry::global()
                .factory(&config.transport_type)
                .ok_or_else(|| TransportError::UnknownType(config.transport_type.clone()))?;
            planned.push((factory, config));
        }

        let mut built: Vec<Arc<dyn Transport>> = Vec::with_capacity(planned.len());
        for (factory, config) in planned {
            match factory(config).await {
                Ok(transport) => built.push(transport),
                Err(e) => {
                    for transport in &built {
                        transport.close().await;
                    }
                    return Err(e);
                }
            }
        }

        self.transports.write().extend(built.iter().cloned());
        debug!(count = built.len(), "Transports loaded");
        Ok(built)
    }

    /// Appends an already constructed transport without consulting the registry.
    pub fn add(&self, transport: Arc<dyn Transport>) {
        trace!(id = ?transport.id(), transport_type = transport.transport_type(), "Transport added");
        self.transports.write().push(transport);
    }

    /// Returns the first transport whose id equals `id`.
    ///
    /// # Errors
    ///
    /// * [`TransportError::NotFound`] - If no transport carries `id`.
    pub fn get(&self, id: &str) -> Result<Arc<dyn Transport>, TransportError> {
        self.transports
            .read()
            .iter()
            .find(|transport| transport.id() == Some(id))
            .cloned()
            .ok_or_else(|| TransportError::NotFound(id.to_string()))
    }

    /// Returns all transports in insertion order.
    #[must_use]
    pub fn get_all(&self) -> Vec<Arc<dyn Transport>> {
        self.transports.read().clone()
    }

    /// Returns the transports of one type, or all of them when `type_name` is `None`.
    ///
    /// # Errors
    ///
    /// * [`TransportError::UnknownType`] - If `type_name` is not a registered type,
    ///   even when the manager holds no transports at all.
    pub fn get_by_type(&self, type_name: Option<&str>) -> Result<Vec<Arc<dyn Transport>>, TransportError> {
        let Some(type_name) = type_name else {
            return Ok(self.get_all());
        };
        if !registry::global().contains(type_name) {
            return Err(TransportError::UnknownType(type_name.to_string()));
        }
        Ok(self
            .transports
            .read()
            .iter()
            .filter(|transport| transport.transport_type() == type_name)
            .cloned()
            .collect())
    }

    /// Removes every transport matching `target` and returns them, unclosed.
    pub fn unload(&self, target: impl Into<TransportSelector>) -> Vec<Arc<dyn Transport>> {
        self.unload_many([target])
    }

    /// Removes every transport matching any of `targets` and returns them, unclosed.
    pub fn unload_many<S: Into<TransportSelector>>(
        &self,
        targets: impl IntoIterator<Item = S>,
    ) -> Vec<Arc<dyn Transport>> {
        let selectors: Vec<TransportSelector> = targets.into_iter().map(Into::into).collect();
        let mut transports = self.transports.write();
        let (removed, kept): (Vec<_>, Vec<_>) = transports
            .drain(..)
            .partition(|transport| selectors.iter().any(|s| s.matches(transport)));
        *transports = kept;
        trace!(count = removed.len(), "Transports unloaded");
        removed
    }

    /// Removes all transports and returns them, unclosed.
    pub fn clear(&self) -> Vec<Arc<dyn Transport>> {
        std::mem::take(&mut *self.transports.write())
    }

    /// Removes and closes all transports.
    #[instrument(skip(self))]
    pub async fn close_all(&self) {
        for transport in self.clear() {
            transport.close().await;
        }
        debug!("All transports closed");
    }

    /// Number of transports held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.transports.read().len()
    }

    /// Whether the manager holds no transports.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transports.read().is_empty()
    }
}
