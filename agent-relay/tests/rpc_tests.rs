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
use std::time::Duration;

use agent_relay::prelude::*;
use anyhow::anyhow;
use serde_json::{json, Value};

use crate::setup::*;

mod setup;

/// Registers the functions the round-trip tests call.
fn register_calculator(rpc: &RpcModule, expected_caller: &'static str) {
    rpc.register_sync("add", move |params, from| {
        anyhow::ensure!(from.ends_with(expected_caller), "unexpected caller {from}");
        let a = params["a"].as_i64().ok_or_else(|| anyhow!("a must be an integer"))?;
        let b = params["b"].as_i64().ok_or_else(|| anyhow!("b must be an integer"))?;
        Ok(a + b)
    });
    rpc.register_sync("nothing", |_params, _from| Ok(()));
    rpc.register_sync("explode", |_params, _from| -> anyhow::Result<Value> {
        Err(anyhow!("kaboom"))
    });
    rpc.register("sleep", |params, _from| async move {
        let ms = params["ms"].as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(params["tag"].clone())
    });
}

/// Two agents on one transport: `agent1` serves, `agent2` calls.
async fn pair(transport: &Arc<dyn Transport>, prefix: &str) -> anyhow::Result<(Agent, Agent)> {
    let agent1 = Agent::new(format!("{prefix}-agent1"));
    let agent2 = Agent::new(format!("{prefix}-agent2"));
    register_calculator(&agent1.load_rpc(rpc_config()), "agent2");
    agent2.load_rpc(rpc_config());
    agent1.connect(transport).await?;
    agent2.connect(transport).await?;
    Ok((agent1, agent2))
}

#[tokio::test]
async fn test_round_trip_add() -> anyhow::Result<()> {
    initialize_tracing();
    let (_agent1, agent2) = pair(&local(), "add").await?;

    let reply = agent2
        .request("add-agent1", json!({"method": "add", "params": {"a": 1, "b": 3}}))
        .await?;
    assert_eq!(reply, json!(4));
    Ok(())
}

#[tokio::test]
async fn test_request_through_module_directly() -> anyhow::Result<()> {
    initialize_tracing();
    let (_agent1, agent2) = pair(&local(), "direct").await?;
    let rpc = agent2.rpc().ok_or_else(|| anyhow!("rpc module missing"))?;

    let reply = rpc
        .request(&agent2, "direct-agent1", json!({"method": "add", "params": {"a": 2, "b": 2}}))
        .await?;
    assert_eq!(reply, json!(4));
    Ok(())
}

#[tokio::test]
async fn test_void_handler_resolves_to_null() -> anyhow::Result<()> {
    initialize_tracing();
    let (_agent1, agent2) = pair(&local(), "void").await?;

    let reply = agent2.request("void-agent1", json!({"method": "nothing"})).await?;
    assert_eq!(reply, Value::Null);
    Ok(())
}

#[tokio::test]
async fn test_missing_method_names_it() -> anyhow::Result<()> {
    initialize_tracing();
    let (_agent1, agent2) = pair(&local(), "missing").await?;

    let err = agent2
        .request("missing-agent1", json!({"method": "foo", "params": {"a": 1, "b": 3}}))
        .await
        .unwrap_err();
    assert_eq!(err, RpcError::Remote("Error: Cannot find function: foo".to_string()));
    assert_eq!(err.to_string(), "Error: Cannot find function: foo");
    Ok(())
}

#[tokio::test]
async fn test_invalid_requests_fail_before_sending() -> anyhow::Result<()> {
    initialize_tracing();
    let (_agent1, agent2) = pair(&local(), "invalid").await?;

    let err = agent2.request("invalid-agent1", json!("hello")).await.unwrap_err();
    assert_eq!(err, RpcError::MalformedMessage);
    assert_eq!(err.to_string(), "TypeError: Message must be an object");

    let err = agent2.request("invalid-agent1", Value::Null).await.unwrap_err();
    assert_eq!(err.to_string(), "TypeError: Message must be an object");

    let err = agent2
        .request("invalid-agent1", json!({"params": {"a": 1, "b": 3}}))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Error: Property \"method\" expected");

    assert_eq!(agent2.rpc().map(|rpc| rpc.pending_count()), Some(0));
    Ok(())
}

#[tokio::test]
async fn test_handler_error_is_carried_back() -> anyhow::Result<()> {
    initialize_tracing();
    let (_agent1, agent2) = pair(&local(), "explode").await?;

    let err = agent2
        .request("explode-agent1", json!({"method": "explode"}))
        .await
        .unwrap_err();
    assert_eq!(err, RpcError::Remote("Error: kaboom".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_request_without_module_fails_fast() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = local();
    let plain = Agent::new("no-rpc");
    plain.connect(&transport).await?;

    let err = plain.request("anyone", json!({"method": "add"})).await.unwrap_err();
    assert_eq!(err, RpcError::NoRpcModule);
    Ok(())
}

#[tokio::test]
async fn test_request_to_unknown_agent_fails() -> anyhow::Result<()> {
    initialize_tracing();
    let (_agent1, agent2) = pair(&local(), "unknown").await?;

    let err = agent2.request("ghost", json!({"method": "add"})).await.unwrap_err();
    assert_eq!(err, RpcError::Transport(TransportError::AgentNotFound("ghost".to_string())));
    assert_eq!(agent2.rpc().map(|rpc| rpc.pending_count()), Some(0));
    Ok(())
}

#[tokio::test]
async fn test_concurrent_requests_correlate_out_of_order() -> anyhow::Result<()> {
    initialize_tracing();
    let (_agent1, agent2) = pair(&local(), "concurrent").await?;

    let slow = agent2.request(
        "concurrent-agent1",
        json!({"method": "sleep", "params": {"ms": 150, "tag": "slow"}}),
    );
    let fast = agent2.request(
        "concurrent-agent1",
        json!({"method": "sleep", "params": {"ms": 0, "tag": "fast"}}),
    );
    let (slow, fast) = tokio::join!(slow, fast);

    assert_eq!(slow?, json!("slow"));
    assert_eq!(fast?, json!("fast"));
    Ok(())
}

#[tokio::test]
async fn test_timeout_then_late_reply_is_discarded() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = local();
    let server = Agent::new("slowpoke");
    register_calculator(&server.load_rpc(rpc_config()), "impatient");
    server.connect(&transport).await?;

    let client = Agent::new("impatient");
    let rpc = client.load_rpc(RpcConfig::with_timeout(Duration::from_millis(50)));
    client.connect(&transport).await?;
    let mut raw = collect_raw(&client);

    let err = client
        .request("slowpoke", json!({"method": "sleep", "params": {"ms": 200}}))
        .await
        .unwrap_err();
    assert_eq!(err, RpcError::Timeout);
    assert_eq!(rpc.pending_count(), 0);

    // The late reply is consumed by the RPC module, not handed to the raw handler.
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_silent(&mut raw).await;
    Ok(())
}

#[tokio::test]
async fn test_dropped_request_clears_pending() -> anyhow::Result<()> {
    initialize_tracing();
    let (_agent1, agent2) = pair(&local(), "dropped").await?;
    let rpc = agent2.rpc().ok_or_else(|| anyhow!("rpc module missing"))?;

    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        agent2.request("dropped-agent1", json!({"method": "sleep", "params": {"ms": 500}})),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(rpc.pending_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_malformed_inbound_request_gets_error_reply() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = local();
    let server = Agent::new("strict");
    server.load_rpc(rpc_config());
    server.connect(&transport).await?;

    // A caller without an RPC module sees the reply as a raw message.
    let caller = Agent::new("sloppy");
    let mut raw = collect_raw(&caller);
    caller.connect(&transport).await?;

    caller
        .send("strict", json!({"jsonrpc": "2.0", "id": 99, "params": {}}))
        .await?;
    let (from, reply) = next(&mut raw).await;
    assert_eq!(from, "strict");
    assert_eq!(reply["id"], 99);
    assert_eq!(reply["error"], "Error: Property \"method\" expected");
    assert!(reply.get("result").is_none());

    caller
        .send("strict", json!({"jsonrpc": "2.0", "id": 100, "method": "none"}))
        .await?;
    let (_, reply) = next(&mut raw).await;
    assert_eq!(reply["id"], 100);
    assert_eq!(reply["error"], "Error: Cannot find function: none");
    Ok(())
}

#[tokio::test]
async fn test_success_reply_carries_explicit_null() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = local();
    let server = Agent::new("nullish");
    register_calculator(&server.load_rpc(rpc_config()), "peeker");
    server.connect(&transport).await?;

    let caller = Agent::new("peeker");
    let mut raw = collect_raw(&caller);
    caller.connect(&transport).await?;

    caller
        .send("nullish", json!({"id": 5, "method": "nothing", "params": {}}))
        .await?;
    let (_, reply) = next(&mut raw).await;
    assert_eq!(reply["id"], 5);
    assert_eq!(reply.get("result"), Some(&Value::Null));
    assert!(reply.get("error").is_none());
    Ok(())
}

#[tokio::test]
async fn test_handler_may_issue_nested_requests() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = local();

    let backend = Agent::new("nested-backend");
    register_calculator(&backend.load_rpc(rpc_config()), "frontend");
    backend.connect(&transport).await?;

    let frontend = Agent::new("frontend");
    let rpc = frontend.load_rpc(rpc_config());
    frontend.connect(&transport).await?;
    let outbound = frontend.clone();
    rpc.register("double_add", move |params, _from| {
        let outbound = outbound.clone();
        async move {
            let sum = outbound
                .request("nested-backend", json!({"method": "add", "params": params}))
                .await
                .map_err(|e| anyhow!(e))?;
            Ok(sum.as_i64().unwrap_or_default() * 2)
        }
    });

    let caller = Agent::new("nested-caller");
    caller.load_rpc(rpc_config());
    caller.connect(&transport).await?;
    let reply = caller
        .request("frontend", json!({"method": "double_add", "params": {"a": 1, "b": 2}}))
        .await?;
    assert_eq!(reply, json!(6));
    Ok(())
}

#[tokio::test]
async fn test_rpc_over_distribus() -> anyhow::Result<()> {
    initialize_tracing();
    let network = unique("rpc-net");
    let host_a: Arc<dyn Transport> = Arc::new(DistribusTransport::join(network.clone()));
    let host_b: Arc<dyn Transport> = Arc::new(DistribusTransport::join(network));

    let agent1 = Agent::new("bus-agent1");
    register_calculator(&agent1.load_rpc(rpc_config()), "agent2");
    agent1.connect(&host_a).await?;
    let agent2 = Agent::new("bus-agent2");
    agent2.load_rpc(rpc_config());
    agent2.connect(&host_b).await?;

    let reply = agent2
        .request("bus-agent1", json!({"method": "add", "params": {"a": 20, "b": 22}}))
        .await?;
    assert_eq!(reply, json!(42));
    Ok(())
}

#[tokio::test]
async fn test_rpc_over_pubsub() -> anyhow::Result<()> {
    initialize_tracing();
    let transport: Arc<dyn Transport> = Arc::new(PubSubTransport::attach(unique("rpc-broker")));
    let (_agent1, agent2) = pair(&transport, "ps").await?;

    let reply = agent2
        .request("ps-agent1", json!({"method": "add", "params": {"a": 5, "b": 5}}))
        .await?;
    assert_eq!(reply, json!(10));
    Ok(())
}

#[tokio::test]
async fn test_rpc_over_tcp() -> anyhow::Result<()> {
    initialize_tracing();
    let server_side = Arc::new(TcpTransport::bind("127.0.0.1:0").await?);
    let client_side: Arc<dyn Transport> = Arc::new(TcpTransport::bind("127.0.0.1:0").await?);
    let server_transport: Arc<dyn Transport> = server_side.clone();

    let agent1 = Agent::new("tcp-agent1");
    register_calculator(&agent1.load_rpc(rpc_config()), "tcp-agent2");
    agent1.connect(&server_transport).await?;
    let agent2 = Agent::new("tcp-agent2");
    agent2.load_rpc(rpc_config());
    agent2.connect(&client_side).await?;

    let target = server_side.url_for("tcp-agent1");
    let reply = agent2
        .request(&target, json!({"method": "add", "params": {"a": 1, "b": 3}}))
        .await?;
    assert_eq!(reply, json!(4));

    // The remote listener knows no "ghost": the request fails without waiting for a timeout.
    let ghost = server_side.url_for("ghost");
    let err = agent2.request(&ghost, json!({"method": "add"})).await.unwrap_err();
    assert_eq!(err, RpcError::Remote("Agent not found: ghost".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_id_less_traffic_between_rpc_agents_is_never_answered() -> anyhow::Result<()> {
    initialize_tracing();
    let left = Arc::new(TcpTransport::bind("127.0.0.1:0").await?);
    let right = Arc::new(TcpTransport::bind("127.0.0.1:0").await?);
    let left_transport: Arc<dyn Transport> = left.clone();
    let right_transport: Arc<dyn Transport> = right.clone();

    let sender = Agent::new("quiet-sender");
    sender.load_rpc(rpc_config());
    sender.connect(&left_transport).await?;

    let (noted_tx, mut noted) = tokio::sync::mpsc::unbounded_channel();
    let receiver = Agent::new("quiet-receiver");
    let rpc = receiver.load_rpc(rpc_config());
    register_calculator(&rpc, "quiet-sender");
    rpc.register_sync("note", move |params, _from| {
        let _ = noted_tx.send(params);
        Ok(())
    });
    receiver.connect(&right_transport).await?;

    let target = right.url_for("quiet-receiver");
    // A notification, a null-id reply of either kind and a marked envelope without method.
    sender.send(&target, json!({"method": "add", "params": {}})).await?;
    sender.send(&target, json!({"method": "note", "params": {"n": 1}})).await?;
    sender
        .send(&target, json!({"jsonrpc": "2.0", "id": null, "error": "Error: stray"}))
        .await?;
    sender
        .send(&target, json!({"jsonrpc": "2.0", "id": null, "result": 1}))
        .await?;
    sender.send(&target, json!({"jsonrpc": "2.0", "id": null})).await?;

    let params = tokio::time::timeout(Duration::from_secs(2), noted.recv()).await?;
    assert_eq!(params, Some(json!({"n": 1})));

    tokio::time::sleep(Duration::from_millis(300)).await;
    let settled = (left.stats().frames_sent(), right.stats().frames_sent());
    assert_eq!(settled, (5, 0));
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!((left.stats().frames_sent(), right.stats().frames_sent()), settled);
    assert_eq!(sender.rpc().map(|rpc| rpc.pending_count()), Some(0));
    Ok(())
}

#[tokio::test]
async fn test_reply_without_id_is_consumed_not_answered() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = local();
    let server = Agent::new("hushed");
    server.load_rpc(rpc_config());
    let mut server_raw = collect_raw(&server);
    server.connect(&transport).await?;

    let caller = Agent::new("chatty");
    let mut raw = collect_raw(&caller);
    caller.connect(&transport).await?;

    caller
        .send("hushed", json!({"jsonrpc": "2.0", "id": null, "error": "Error: Property \"method\" expected"}))
        .await?;
    caller.send("hushed", json!({"jsonrpc": "2.0", "params": {}})).await?;

    assert_silent(&mut server_raw).await;
    assert_silent(&mut raw).await;
    Ok(())
}

#[tokio::test]
async fn test_cancel_by_correlation_id() -> anyhow::Result<()> {
    initialize_tracing();
    let (_agent1, agent2) = pair(&local(), "cancel").await?;
    let rpc = agent2.rpc().ok_or_else(|| anyhow!("rpc module missing"))?;

    let pending = agent2
        .send_request("cancel-agent1", json!({"method": "sleep", "params": {"ms": 300}}))
        .await?;
    let id = pending.id();
    let waiting = tokio::spawn(pending.wait());
    assert!(rpc.cancel(id));
    assert_eq!(waiting.await?, Err(RpcError::Cancelled));

    // The reply arriving after cancellation finds no pending entry.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(rpc.pending_count(), 0);

    let pending = agent2
        .send_request("cancel-agent1", json!({"method": "add", "params": {"a": 2, "b": 5}}))
        .await?;
    assert_ne!(pending.id(), id);
    assert_eq!(pending.wait().await?, json!(7));
    Ok(())
}
