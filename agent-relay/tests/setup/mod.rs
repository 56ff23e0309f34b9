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

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use agent_relay::prelude::*;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

// Ensures tracing initialization happens only once across all tests.
static INIT: Once = Once::new();

static UNIQUE: AtomicUsize = AtomicUsize::new(0);

/// How long a test waits for an expected message before failing.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Initializes the global tracing subscriber for tests.
///
/// Logs go to `logs/relay_tests.txt`; `RUST_LOG` overrides the default filter.
pub fn initialize_tracing() {
    INIT.call_once(|| {
        std::fs::create_dir_all("logs").expect("could not create logs dir");

        let file_appender = RollingFileAppender::new(Rotation::NEVER, "logs", "relay_tests.txt");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // Leak the guard so the non-blocking writer is not dropped before process exit
        Box::leak(Box::new(guard));

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info")
                .add_directive("agent_relay=trace".parse().unwrap())
                .add_directive("agent_relay::transport::tcp=debug".parse().unwrap())
        });

        let subscriber = FmtSubscriber::builder()
            .with_span_events(FmtSpan::NONE)
            .with_max_level(Level::TRACE)
            .compact()
            .with_line_number(true)
            .without_time()
            .with_target(true)
            .with_env_filter(filter)
            .with_writer(non_blocking)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .expect("setting default subscriber failed");
    });
}

/// Returns a name no other test in this process uses.
///
/// Transport type names, network ids and broker names are process-wide.
pub fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", UNIQUE.fetch_add(1, Ordering::Relaxed))
}

/// A receive callback that forwards `(from, message)` into a channel.
pub fn collector() -> (ReceiveCallback, mpsc::UnboundedReceiver<(String, Value)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: ReceiveCallback = Arc::new(move |from, message| {
        let _ = tx.send((from, message));
    });
    (callback, rx)
}

/// Installs a raw handler on `agent` that forwards into a channel.
pub fn collect_raw(agent: &Agent) -> mpsc::UnboundedReceiver<(String, Value)> {
    let (tx, rx) = mpsc::unbounded_channel();
    agent.on_message(move |from, message| {
        let _ = tx.send((from.to_string(), message));
    });
    rx
}

/// Waits for the next collected message.
pub async fn next(rx: &mut mpsc::UnboundedReceiver<(String, Value)>) -> (String, Value) {
    tokio::time::timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("collector closed")
}

/// Asserts that nothing arrives within a short grace period.
pub async fn assert_silent(rx: &mut mpsc::UnboundedReceiver<(String, Value)>) {
    let outcome = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(outcome.is_err(), "unexpected message: {outcome:?}");
}

/// A local transport shared as a trait object.
pub fn local() -> Arc<dyn Transport> {
    Arc::new(LocalTransport::new())
}

/// An RPC configuration with a generous timeout so broken tests fail instead of hanging.
pub fn rpc_config() -> RpcConfig {
    RpcConfig::with_timeout(Duration::from_secs(5))
}
