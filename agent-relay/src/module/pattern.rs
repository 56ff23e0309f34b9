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
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::trace;

use crate::common::RawHandler;

/// Test applied to every raw message: `(from, message) -> matched`.
pub type Predicate = Arc<dyn Fn(&str, &Value) -> bool + Send + Sync>;

/// What a pattern listener reacts to.
#[derive(Clone)]
pub enum Pattern {
    /// Messages equal to this value.
    Exact(Value),
    /// Messages for which the closure returns `true`.
    Predicate(Predicate),
}

impl Pattern {
    /// Builds a [`Pattern::Predicate`] from a closure.
    pub fn predicate<F>(test: F) -> Self
    where
        F: Fn(&str, &Value) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(test))
    }

    /// Whether `message` from `from` matches.
    #[must_use]
    pub fn matches(&self, from: &str, message: &Value) -> bool {
        match self {
            Self::Exact(expected) => expected == message,
            Self::Predicate(test) => test(from, message),
        }
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(value) => f.debug_tuple("Exact").field(value).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl From<Value> for Pattern {
    fn from(value: Value) -> Self {
        Self::Exact(value)
    }
}

impl From<&str> for Pattern {
    fn from(text: &str) -> Self {
        Self::Exact(Value::String(text.to_string()))
    }
}

impl From<String> for Pattern {
    fn from(text: String) -> Self {
        Self::Exact(Value::String(text))
    }
}

#[derive(Clone)]
struct Listener {
    id: u64,
    pattern: Pattern,
    callback: RawHandler,
}

/// Routes raw messages to listeners by pattern.
///
/// Listeners are tried in registration order and the first match consumes the
/// message. Cheap to clone; clones share their listeners.
#[derive(Clone, Default)]
pub struct PatternModule {
    listeners: Arc<RwLock<Vec<Listener>>>,
    next_id: Arc<AtomicU64>,
}

impl fmt::Debug for PatternModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternModule")
            .field("listeners", &self.len())
            .finish()
    }
}

impl PatternModule {
    /// Creates a module without listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener and returns its id for [`unlisten`](Self::unlisten).
    pub fn listen<F>(&self, pattern: impl Into<Pattern>, callback: F) -> u64
    where
        F: Fn(&str, Value) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.listeners.write().push(Listener {
            id,
            pattern: pattern.into(),
            callback: Arc::new(callback),
        });
        id
    }

    /// Removes the listener `id`; returns whether it existed.
    pub fn unlisten(&self, id: u64) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|listener| listener.id != id);
        listeners.len() != before
    }

    /// Number of listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Whether no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Hands `message` to the first matching listener.
    ///
    /// # Errors
    ///
    /// Gives the message back when no listener matches.
    pub fn dispatch(&self, from: &str, message: Value) -> Result<(), Value> {
        // Predicates may listen or unlisten on this module; run them unlocked.
        let listeners = self.listeners.read().clone();
        let callback = listeners
            .into_iter()
            .find(|listener| listener.pattern.matches(from, &message))
            .map(|listener| (listener.id, listener.callback));

        match callback {
            Some((id, callback)) => {
                trace!(listener = id, from, "Pattern matched");
                callback(from, message);
                Ok(())
            }
            None => Err(message),
        }
    }
}
