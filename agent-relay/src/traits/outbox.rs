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

use async_trait::async_trait;
use serde_json::Value;

use crate::message::TransportError;

/// Anything that can hand a message to a transport on behalf of an agent.
///
/// [`RpcModule::request`](crate::module::RpcModule::request) sends its
/// envelopes through this trait, so the module never needs to know which
/// connection an address resolves to.
#[async_trait]
pub trait Outbox: Send + Sync {
    /// Sends `message` to `to`.
    ///
    /// # Errors
    ///
    /// Returns the [`TransportError`] raised while resolving or sending.
    async fn send(&self, to: &str, message: Value) -> Result<(), TransportError>;
}
