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

use std::sync::Arc;

use agent_relay::prelude::*;
use serde_json::Value;

use crate::setup::*;

mod setup;

/// A local transport registered under its own type name.
#[derive(Debug)]
struct EchoTransport {
    inner: LocalTransport,
}

#[async_trait]
impl Transport for EchoTransport {
    fn id(&self) -> Option<&str> {
        self.inner.id()
    }

    fn transport_type(&self) -> &'static str {
        Self::TYPE
    }

    fn is_default(&self) -> bool {
        self.inner.is_default()
    }

    async fn connect(
        &self,
        agent_id: &str,
        receive: ReceiveCallback,
    ) -> Result<Arc<dyn Connection>, TransportError> {
        self.inner.connect(agent_id, receive).await
    }

    async fn close(&self) {
        self.inner.close().await;
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

#[async_trait]
impl TransportType for EchoTransport {
    const TYPE: &'static str = "echo-manager-test";

    async fn create(config: TransportConfig) -> Result<Self, TransportError> {
        Ok(Self {
            inner: LocalTransport::from_config(&config),
        })
    }
}

fn types_of(transports: &[Arc<dyn Transport>]) -> Vec<&'static str> {
    transports.iter().map(|t| t.transport_type()).collect()
}

#[tokio::test]
async fn test_new_manager_is_empty_and_builtins_registered() {
    initialize_tracing();
    let manager = TransportManager::new();

    assert!(manager.is_empty());
    let types = TransportManager::types();
    for builtin in ["distribus", "local", "pubsub", "tcp"] {
        assert!(types.contains(&builtin.to_string()), "missing {builtin}");
    }
}

#[tokio::test]
async fn test_register_type_and_conflict() -> anyhow::Result<()> {
    initialize_tracing();
    TransportManager::register_type::<EchoTransport>()?;
    assert!(TransportManager::is_registered(EchoTransport::TYPE));

    let err = TransportManager::register_type::<EchoTransport>().unwrap_err();
    assert_eq!(err, TransportError::RegistrationConflict(EchoTransport::TYPE.to_string()));
    assert!(err.to_string().contains("already exists"));

    // The first registration stays usable.
    let manager = TransportManager::new();
    let echo = manager.load(TransportConfig::new(EchoTransport::TYPE)).await?;
    assert_eq!(echo.transport_type(), EchoTransport::TYPE);
    Ok(())
}

#[tokio::test]
async fn test_builtin_names_cannot_be_taken() {
    initialize_tracing();
    let err = TransportManager::register_factory("local", |config| async move {
        Ok(Arc::new(LocalTransport::from_config(&config)) as Arc<dyn Transport>)
    })
    .unwrap_err();
    assert_eq!(err, TransportError::RegistrationConflict("local".to_string()));
}

#[tokio::test]
async fn test_register_factory_closure() -> anyhow::Result<()> {
    initialize_tracing();
    let name = unique("closure-type");
    TransportManager::register_factory(&name, |config| async move {
        Ok(Arc::new(LocalTransport::from_config(&config)) as Arc<dyn Transport>)
    })?;

    let manager = TransportManager::new();
    let transport = manager
        .load(TransportConfig::new(name.as_str()).with_id("from-closure"))
        .await?;
    assert_eq!(transport.id(), Some("from-closure"));
    assert!(std::ptr::eq(
        Arc::as_ptr(&manager.get("from-closure")?).cast::<()>(),
        Arc::as_ptr(&transport).cast::<()>()
    ));
    Ok(())
}

#[tokio::test]
async fn test_add_appends_instance() -> anyhow::Result<()> {
    initialize_tracing();
    let manager = TransportManager::new();
    let transport: Arc<dyn Transport> = Arc::new(LocalTransport::with_id("added"));

    manager.add(transport.clone());

    assert_eq!(manager.len(), 1);
    assert_eq!(manager.get("added")?.transport_type(), "local");
    Ok(())
}

#[tokio::test]
async fn test_load_preserves_order_and_length() -> anyhow::Result<()> {
    initialize_tracing();
    let manager = TransportManager::new();
    let loaded = manager
        .load_all([
            TransportConfig::new("local"),
            TransportConfig::new("distribus"),
            TransportConfig::new("local"),
            TransportConfig::new("pubsub"),
        ])
        .await?;

    assert_eq!(types_of(&loaded), ["local", "distribus", "local", "pubsub"]);
    assert_eq!(types_of(&manager.get_all()), ["local", "distribus", "local", "pubsub"]);
    Ok(())
}

#[tokio::test]
async fn test_load_unknown_type_fails_and_appends_nothing() {
    initialize_tracing();
    let manager = TransportManager::new();

    let err = manager.load(TransportConfig::new("carrier-pigeon")).await.unwrap_err();
    assert_eq!(err, TransportError::UnknownType("carrier-pigeon".to_string()));

    let err = manager
        .load_all([TransportConfig::new("local"), TransportConfig::new("carrier-pigeon")])
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::UnknownType(_)));
    assert!(manager.is_empty());
}

#[tokio::test]
async fn test_get_missing_id_fails() -> anyhow::Result<()> {
    initialize_tracing();
    let manager = TransportManager::new();
    let err = manager.get("nonexisting").unwrap_err();
    assert_eq!(err, TransportError::NotFound("nonexisting".to_string()));
    assert!(err.to_string().contains("not found"));

    manager.load(TransportConfig::new("local").with_id("other")).await?;
    assert!(matches!(manager.get("nonexisting"), Err(TransportError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_get_first_match_wins() -> anyhow::Result<()> {
    initialize_tracing();
    let manager = TransportManager::new();
    manager.load(TransportConfig::new("local")).await?;
    let first = manager.load(TransportConfig::new("distribus").with_id("dup")).await?;
    manager.load(TransportConfig::new("local").with_id("dup")).await?;

    assert_eq!(manager.get("dup")?.transport_type(), first.transport_type());
    Ok(())
}

#[tokio::test]
async fn test_get_by_type() -> anyhow::Result<()> {
    initialize_tracing();
    let manager = TransportManager::new();
    manager
        .load_all([
            TransportConfig::new("distribus").with_id("d1"),
            TransportConfig::new("local").with_id("l1"),
            TransportConfig::new("local").with_id("l2"),
            TransportConfig::new("distribus").with_id("d2"),
        ])
        .await?;

    let all = manager.get_by_type(None)?;
    assert_eq!(types_of(&all), ["distribus", "local", "local", "distribus"]);

    let locals = manager.get_by_type(Some("local"))?;
    let ids: Vec<_> = locals.iter().map(|t| t.id().map(str::to_string)).collect();
    assert_eq!(ids, [Some("l1".to_string()), Some("l2".to_string())]);

    // Registered but without instances.
    assert!(manager.get_by_type(Some("tcp"))?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_get_by_unregistered_type_fails_even_when_empty() {
    initialize_tracing();
    let manager = TransportManager::new();
    let err = manager.get_by_type(Some("foo")).unwrap_err();
    assert_eq!(err, TransportError::UnknownType("foo".to_string()));
}

#[tokio::test]
async fn test_unload_by_id_and_instance() -> anyhow::Result<()> {
    initialize_tracing();
    let manager = TransportManager::new();
    manager
        .load_all([
            TransportConfig::new("local").with_id("a"),
            TransportConfig::new("local").with_id("b"),
            TransportConfig::new("local").with_id("c"),
        ])
        .await?;

    let removed = manager.unload("a");
    assert_eq!(removed.len(), 1);
    assert!(matches!(manager.get("a"), Err(TransportError::NotFound(_))));
    // Unloading does not close.
    assert!(!removed[0].is_closed());

    let b = manager.get("b")?;
    manager.unload(&b);
    assert!(matches!(manager.get("b"), Err(TransportError::NotFound(_))));
    assert_eq!(manager.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_unload_many_mixed_selectors() -> anyhow::Result<()> {
    initialize_tracing();
    let manager = TransportManager::new();
    let loaded = manager
        .load_all([
            TransportConfig::new("local").with_id("x"),
            TransportConfig::new("local"),
            TransportConfig::new("local").with_id("y"),
        ])
        .await?;

    let removed = manager.unload_many([
        TransportSelector::from("x"),
        TransportSelector::from(&loaded[1]),
    ]);
    assert_eq!(removed.len(), 2);
    assert_eq!(manager.get_all().len(), 1);
    assert!(manager.get("y").is_ok());
    Ok(())
}

#[tokio::test]
async fn test_clear_empties_manager() -> anyhow::Result<()> {
    initialize_tracing();
    let manager = TransportManager::new();
    manager
        .load_all([TransportConfig::new("local"), TransportConfig::new("pubsub")])
        .await?;

    let removed = manager.clear();
    assert_eq!(removed.len(), 2);
    assert!(manager.get_by_type(None)?.is_empty());
    assert!(removed.iter().all(|t| !t.is_closed()));
    Ok(())
}

#[tokio::test]
async fn test_close_all_closes_transports() -> anyhow::Result<()> {
    initialize_tracing();
    let manager = TransportManager::new();
    let loaded = manager
        .load_all([TransportConfig::new("local"), TransportConfig::new("distribus")])
        .await?;

    manager.close_all().await;

    assert!(manager.is_empty());
    assert!(loaded.iter().all(|t| t.is_closed()));
    Ok(())
}

#[tokio::test]
async fn test_invalid_options_are_rejected() {
    initialize_tracing();
    let manager = TransportManager::new();
    let err = manager
        .load(TransportConfig::new("pubsub").with_option("broker", 42))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::InvalidConfig(_)));

    let err = manager
        .load(TransportConfig::new("tcp").with_option("max_frame_size", Value::from("big")))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::InvalidConfig(_)));
    assert!(manager.is_empty());
}
