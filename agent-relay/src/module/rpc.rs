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
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::common::{AgentId, FutureBox, RpcHandler, CONFIG};
use crate::message::{RpcError, RpcReply, RpcRequest};
use crate::traits::Outbox;

type PendingMap = DashMap<u64, oneshot::Sender<Result<Value, RpcError>>>;

/// Settings of one [`RpcModule`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcConfig {
    /// How long a request waits for its reply.
    ///
    /// `None` waits indefinitely. A target that never answers then leaves its
    /// pending entry behind for as long as the caller keeps the request future
    /// alive, which long-running hosts should avoid.
    pub timeout: Option<Duration>,
}

impl Default for RpcConfig {
    /// Uses `rpc.timeout_ms` from the global configuration.
    fn default() -> Self {
        Self {
            timeout: CONFIG.rpc.timeout(),
        }
    }
}

impl RpcConfig {
    /// A configuration whose requests time out after `timeout`.
    #[must_use]
    pub const fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    /// A configuration whose requests wait for their reply indefinitely.
    #[must_use]
    pub const fn without_timeout() -> Self {
        Self { timeout: None }
    }
}

/// Request/reply correlation on top of one-way sends.
///
/// The caller side allocates a correlation id per request, parks a oneshot
/// sender in the pending table and waits on the receiver. Whoever removes the
/// pending entry first (a reply, the timeout, [`cancel`](Self::cancel) or the
/// dropped request future) owns its completion; anything arriving afterwards
/// is discarded.
///
/// The callee side looks up registered functions by method name and turns
/// their outcome into a reply envelope.
///
/// `RpcModule` is a cheap handle; clones share functions and pending requests.
#[derive(Clone)]
pub struct RpcModule {
    inner: Arc<RpcInner>,
}

struct RpcInner {
    config: RpcConfig,
    functions: DashMap<String, RpcHandler>,
    pending: PendingMap,
    next_id: AtomicU64,
}

impl fmt::Debug for RpcModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcModule")
            .field("config", &self.inner.config)
            .field("functions", &self.methods())
            .field("pending", &self.inner.pending.len())
            .finish()
    }
}

impl Default for RpcModule {
    fn default() -> Self {
        Self::new(RpcConfig::default())
    }
}

/// A request that has been sent and is waiting for its reply.
///
/// [`id`](Self::id) is the correlation id to pass to
/// [`RpcModule::cancel`]. Dropping the handle without waiting abandons the
/// request and removes its pending entry.
#[must_use = "a pending request is abandoned when dropped"]
pub struct PendingRequest {
    rpc: RpcModule,
    id: u64,
    rx: Option<oneshot::Receiver<Result<Value, RpcError>>>,
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest").field("id", &self.id).finish()
    }
}

impl PendingRequest {
    /// Correlation id carried in the request envelope.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the reply, honoring the module's timeout.
    ///
    /// # Errors
    ///
    /// [`RpcError::Remote`] for a failure reply, [`RpcError::Timeout`] or
    /// [`RpcError::Cancelled`].
    pub async fn wait(mut self) -> Result<Value, RpcError> {
        let Some(rx) = self.rx.take() else {
            return Err(RpcError::Cancelled);
        };
        self.rpc.await_reply(self.id, rx).await
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        self.rpc.inner.pending.remove(&self.id);
    }
}

impl RpcModule {
    /// Creates a module with no registered functions.
    #[must_use]
    pub fn new(config: RpcConfig) -> Self {
        Self {
            inner: Arc::new(RpcInner {
                config,
                functions: DashMap::new(),
                pending: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Settings this module was created with.
    #[must_use]
    pub fn config(&self) -> &RpcConfig {
        &self.inner.config
    }

    /// Registers an async function under `name`, replacing any previous one.
    ///
    /// The handler receives `(params, from)`. Its `Ok` value is serialized as
    /// the reply's `result` (`()` becomes an explicit `null`); its `Err` is sent
    /// back as `"Error: <message>"`.
    pub fn register<F, Fut, R>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Value, AgentId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Serialize + 'static,
    {
        let handler = Arc::new(handler);
        let erased: RpcHandler = Arc::new(move |params: Value, from: AgentId| -> FutureBox<anyhow::Result<Value>> {
            let handler = handler.clone();
            Box::pin(async move {
                let result = handler(params, from).await?;
                Ok(serde_json::to_value(result)?)
            })
        });
        let name = name.into();
        if self.inner.functions.insert(name.clone(), erased).is_some() {
            debug!(method = %name, "Replaced RPC function");
        }
    }

    /// Registers a synchronous function under `name`.
    pub fn register_sync<F, R>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Value, AgentId) -> anyhow::Result<R> + Send + Sync + 'static,
        R: Serialize + Send + 'static,
    {
        self.register(name, move |params, from| {
            let outcome = handler(params, from);
            async move { outcome }
        });
    }

    /// Removes the function registered under `name`.
    pub fn unregister(&self, name: &str) -> bool {
        self.inner.functions.remove(name).is_some()
    }

    /// Names of the registered functions, sorted.
    #[must_use]
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .functions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Number of requests still waiting for a reply.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Fails the pending request `id` with [`RpcError::Cancelled`].
    ///
    /// Returns `false` if the request already completed.
    pub fn cancel(&self, id: u64) -> bool {
        match self.inner.pending.remove(&id) {
            Some((_, tx)) => {
                let _ = tx.send(Err(RpcError::Cancelled));
                true
            }
            None => false,
        }
    }

    /// Sends `message` as a request to `to` through `outbox` and waits for the reply.
    ///
    /// `message` must be an object with a string `method`; `params` defaults to `{}`.
    ///
    /// # Errors
    ///
    /// *   [`RpcError::MalformedMessage`] / [`RpcError::MissingProperty`] for an
    ///     invalid message, before anything is sent.
    /// *   [`RpcError::Transport`] if the outbox fails to send.
    /// *   [`RpcError::Remote`] with the error string of a failure reply.
    /// *   [`RpcError::Timeout`] or [`RpcError::Cancelled`].
    pub async fn request<O>(&self, outbox: &O, to: &str, message: Value) -> Result<Value, RpcError>
    where
        O: Outbox + ?Sized,
    {
        self.send_request(outbox, to, message).await?.wait().await
    }

    /// Sends `message` as a request and returns without waiting for the reply.
    ///
    /// The returned [`PendingRequest`] exposes the correlation id for
    /// [`cancel`](Self::cancel).
    ///
    /// # Errors
    ///
    /// The validation and transport errors of [`request`](Self::request).
    pub async fn send_request<O>(&self, outbox: &O, to: &str, message: Value) -> Result<PendingRequest, RpcError>
    where
        O: Outbox + ?Sized,
    {
        let (method, params) = split_request(message)?;

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(id, tx);
        let pending = PendingRequest {
            rpc: self.clone(),
            id,
            rx: Some(rx),
        };

        trace!(id, %method, to, "Sending RPC request");
        let envelope = RpcRequest {
            id: json!(id),
            method,
            params,
        }
        .into_value();
        outbox.send(to, envelope).await?;
        Ok(pending)
    }

    async fn await_reply(
        &self,
        id: u64,
        mut rx: oneshot::Receiver<Result<Value, RpcError>>,
    ) -> Result<Value, RpcError> {
        let outcome = match self.inner.config.timeout {
            None => rx.await,
            Some(limit) => match tokio::time::timeout(limit, &mut rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    if self.inner.pending.remove(&id).is_some() {
                        debug!(id, ?limit, "RPC request timed out");
                        return Err(RpcError::Timeout);
                    }
                    // A reply removed the entry first and is completing it.
                    rx.await
                }
            },
        };
        outcome.unwrap_or(Err(RpcError::Cancelled))
    }

    /// Completes the pending request a reply belongs to.
    ///
    /// Returns `false` for replies nobody is waiting for (late, duplicated or
    /// foreign ids); those are discarded.
    pub fn resolve(&self, reply: RpcReply) -> bool {
        let Some(id) = reply.id().as_u64() else {
            debug!(id = %reply.id(), "Discarding reply with foreign correlation id");
            return false;
        };
        match self.inner.pending.remove(&id) {
            Some((_, tx)) => {
                trace!(id, "Resolving RPC request");
                let _ = tx.send(reply.into_result());
                true
            }
            None => {
                debug!(id, "Discarding late or unknown reply");
                false
            }
        }
    }

    /// Runs the function `method` and builds the reply to send back.
    ///
    /// Never fails: unknown methods, handler errors and handler panics all
    /// become failure replies.
    pub async fn handle_request(&self, id: Value, method: &str, params: Value, from: AgentId) -> RpcReply {
        let handler = self.inner.functions.get(method).map(|entry| entry.value().clone());
        let Some(handler) = handler else {
            debug!(method, %from, "RPC request for unknown function");
            return RpcReply::failure(id, &RpcError::MethodNotFound(method.to_string()));
        };

        trace!(method, %from, "Invoking RPC function");
        match AssertUnwindSafe(handler(params, from)).catch_unwind().await {
            Ok(Ok(result)) => RpcReply::success(id, result),
            Ok(Err(e)) => RpcReply::failure(id, &RpcError::HandlerFailure(e.to_string())),
            Err(_) => {
                warn!(method, "RPC function panicked");
                RpcReply::failure(id, &RpcError::HandlerFailure("Handler panicked".to_string()))
            }
        }
    }
}

/// Validates an outgoing request message and splits it into `(method, params)`.
fn split_request(message: Value) -> Result<(String, Value), RpcError> {
    let Value::Object(mut fields) = message else {
        return Err(RpcError::MalformedMessage);
    };
    let method = match fields.remove("method") {
        Some(Value::String(method)) => method,
        _ => return Err(RpcError::MissingProperty("method".to_string())),
    };
    let params = fields.remove("params").unwrap_or_else(|| json!({}));
    Ok((method, params))
}
