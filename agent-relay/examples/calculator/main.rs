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

use std::time::Duration;

use agent_relay::prelude::*;
use anyhow::anyhow;
use serde_json::json;

// A calculator agent served over TCP, and a client calling it.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let manager = TransportManager::from_configs([
        TransportConfig::new("local").with_id("inproc").as_default(),
        TransportConfig::new("tcp").with_id("net"),
    ])
    .await?;
    let inproc = manager.get("inproc")?;
    let net = manager.get("net")?;

    let calc = Agent::new("calc");
    let rpc = calc.load_rpc(RpcConfig::with_timeout(Duration::from_secs(2)));
    rpc.register_sync("add", |params, from| {
        println!("add requested by {from}");
        let a = params["a"].as_f64().ok_or_else(|| anyhow!("a must be a number"))?;
        let b = params["b"].as_f64().ok_or_else(|| anyhow!("b must be a number"))?;
        Ok(a + b)
    });
    rpc.register("slow_echo", |params, _from| async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(params)
    });
    calc.connect(&inproc).await?;
    let calc_tcp = calc.connect(&net).await?;

    let client = Agent::new("client");
    client.load_rpc(RpcConfig::with_timeout(Duration::from_secs(2)));
    client.on_message(|from, message| println!("client got {message} from {from}"));
    client.connect_all(&manager).await?;

    // Bare ids go through the default (local) transport.
    let sum = client
        .request("calc", json!({"method": "add", "params": {"a": 2, "b": 3}}))
        .await?;
    println!("2 + 3 = {sum}");

    // A full URL goes through the transport of that type.
    let echoed = client
        .request(&calc_tcp.address(), json!({"method": "slow_echo", "params": {"hello": "tcp"}}))
        .await?;
    println!("echo over tcp: {echoed}");

    match client.request("calc", json!({"method": "divide", "params": {}})).await {
        Err(RpcError::Remote(message)) => println!("expected failure: {message}"),
        other => println!("unexpected outcome: {other:?}"),
    }

    client.disconnect_all().await;
    calc.disconnect_all().await;
    manager.close_all().await;
    Ok(())
}
