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

/// Lifecycle of an [`Agent`](super::Agent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentState {
    /// Never connected to a transport.
    Created,
    /// Holding this many live connections (at least one).
    Connected(usize),
    /// Was connected before, holds no connection now.
    Disconnected,
}

impl AgentState {
    pub(crate) const fn from_counts(connections: usize, ever_connected: bool) -> Self {
        match (connections, ever_connected) {
            (0, false) => Self::Created,
            (0, true) => Self::Disconnected,
            (n, _) => Self::Connected(n),
        }
    }

    /// Whether at least one connection is live.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected(_))
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Connected(n) => write!(f, "connected({n})"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}
