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

//! Process-wide registry of transport types.

use std::future::Future;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use lazy_static::lazy_static;
use tracing::trace;

use crate::common::{FutureBox, TransportConfig, TransportFactory};
use crate::message::TransportError;
use crate::traits::{Transport, TransportType};
use crate::transport::{DistribusTransport, LocalTransport, PubSubTransport, TcpTransport};

lazy_static! {
    /// The registry shared by every `TransportManager` in the process.
    static ref TRANSPORT_TYPES: TransportTypeRegistry = TransportTypeRegistry::with_builtins();
}

/// Returns the process-wide registry.
pub(crate) fn global() -> &'static TransportTypeRegistry {
    &TRANSPORT_TYPES
}

/// Registry mapping transport type names to constructors.
///
/// The registry is cumulative: there is no unregister. Registration goes through
/// the map's entry API, so two threads registering the same name cannot both
/// succeed.
#[derive(Default)]
pub(crate) struct TransportTypeRegistry {
    factories: DashMap<String, TransportFactory>,
}

impl std::fmt::Debug for TransportTypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportTypeRegistry")
            .field("registered_types", &self.names())
            .finish()
    }
}

impl TransportTypeRegistry {
    /// Creates a registry holding the built-in transport types.
    fn with_builtins() -> Self {
        let registry = Self::default();
        for (name, factory) in [
            (LocalTransport::TYPE, factory_for::<LocalTransport>()),
            (DistribusTransport::TYPE, factory_for::<DistribusTransport>()),
            (PubSubTransport::TYPE, factory_for::<PubSubTransport>()),
            (TcpTransport::TYPE, factory_for::<TcpTransport>()),
        ] {
            registry.factories.insert(name.to_string(), factory);
        }
        registry
    }

    /// Registers a constructor under `name`.
    ///
    /// # Errors
    ///
    /// * [`TransportError::RegistrationConflict`] - If `name` is already registered.
    ///   The existing registration is left intact.
    pub(crate) fn register(&self, name: &str, factory: TransportFactory) -> Result<(), TransportError> {
        match self.factories.entry(name.to_string()) {
            Entry::Occupied(_) => Err(TransportError::RegistrationConflict(name.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(factory);
                trace!(transport_type = name, "Registered transport type");
                Ok(())
            }
        }
    }

    /// Returns the constructor registered under `name`.
    pub(crate) fn factory(&self, name: &str) -> Option<TransportFactory> {
        self.factories.get(name).map(|entry| entry.value().clone())
    }

    /// Checks whether `name` is registered.
    pub(crate) fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Returns all registered names, sorted.
    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

/// Builds a registry constructor for a [`TransportType`].
pub(crate) fn factory_for<T: TransportType>() -> TransportFactory {
    Arc::new(
        |config: TransportConfig| -> FutureBox<Result<Arc<dyn Transport>, TransportError>> {
            Box::pin(async move {
                let transport = T::create(config).await?;
                Ok(Arc::new(transport) as Arc<dyn Transport>)
            })
        },
    )
}

/// Builds a registry constructor from an async closure.
pub(crate) fn factory_from_fn<F, Fut>(constructor: F) -> TransportFactory
where
    F: Fn(TransportConfig) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Arc<dyn Transport>, TransportError>> + Send + 'static,
{
    Arc::new(
        move |config: TransportConfig| -> FutureBox<Result<Arc<dyn Transport>, TransportError>> {
            Box::pin(constructor(config))
        },
    )
}
