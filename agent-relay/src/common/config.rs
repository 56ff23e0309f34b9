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

use std::path::Path;
use std::time::Duration;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, info};

/// Configuration for Agent Relay.
///
/// Loaded from TOML files in XDG-compliant directories. Every section falls back
/// to its defaults when absent.
///
/// # Example Configuration File
///
/// ```toml
/// [[transports]]
/// type = "local"
/// id = "inproc"
/// default = true
///
/// [[transports]]
/// type = "tcp"
/// id = "net"
/// address = "0.0.0.0:7070"
/// advertise_address = "relay.example.net"
///
/// [rpc]
/// timeout_ms = 5000
///
/// [limits]
/// max_frame_size = 1048576
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Transports to instantiate, in order.
    pub transports: Vec<TransportConfig>,
    /// Request/reply settings.
    pub rpc: RpcSettings,
    /// Limits and capacity configuration.
    pub limits: LimitsConfig,
}

/// Request/reply settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcSettings {
    /// Reply timeout in milliseconds.
    ///
    /// When unset, requests wait indefinitely. In long-running systems an unanswered
    /// request then holds its pending entry until the caller drops or cancels it.
    pub timeout_ms: Option<u64>,
}

/// Limits and capacity configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum accepted frame payload for socket transports, in bytes.
    pub max_frame_size: usize,
    /// Timeout for establishing outbound socket connections, in milliseconds.
    pub tcp_connect_timeout_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_frame_size: 1_048_576, // 1 MiB
            tcp_connect_timeout_ms: 5_000,
        }
    }
}

impl RpcSettings {
    /// Returns the reply timeout as a `Duration`, if one is configured.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

impl LimitsConfig {
    /// Returns the outbound connect timeout as a `Duration`.
    #[must_use]
    pub const fn tcp_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.tcp_connect_timeout_ms)
    }
}

impl RelayConfig {
    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns the TOML parse error when the text is malformed.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Loads configuration from a specific file, falling back to defaults on any error.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => match Self::from_toml_str(&text) {
                Ok(config) => {
                    info!("Loaded configuration from: {}", path.display());
                    config
                }
                Err(e) => {
                    error!("Failed to parse configuration file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                error!("Failed to read configuration file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Loads configuration from XDG-compliant locations.
    ///
    /// Looks for `$XDG_CONFIG_HOME/agent-relay/config.toml` (falling back to
    /// `~/.config/agent-relay/config.toml`). A missing file yields the default
    /// configuration; a malformed one is logged and also yields defaults.
    pub fn load() -> Self {
        let xdg_dirs = match xdg::BaseDirectories::with_prefix("agent-relay") {
            Ok(dirs) => dirs,
            Err(e) => {
                error!("Failed to initialize XDG directories: {}", e);
                return Self::default();
            }
        };

        match xdg_dirs.find_config_file("config.toml") {
            Some(path) => Self::load_from(&path),
            None => {
                info!("No configuration file found, using defaults");
                Self::default()
            }
        }
    }
}

/// A transport configuration record, consumed by
/// [`TransportManager::load`](crate::common::TransportManager::load).
///
/// `type` selects the registered transport type. Any other keys are kept in
/// `options` for the concrete transport to interpret.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Registered transport type name (e.g. `"local"`, `"tcp"`).
    #[serde(rename = "type")]
    pub transport_type: String,
    /// Optional unique id of the instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Whether agents use this transport for bare addresses.
    #[serde(default)]
    pub default: bool,
    /// Type-specific options.
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl TransportConfig {
    /// Creates a record for the given transport type with no id and no options.
    #[must_use]
    pub fn new(transport_type: impl Into<String>) -> Self {
        Self {
            transport_type: transport_type.into(),
            ..Self::default()
        }
    }

    /// Sets the instance id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Marks the transport as the default one.
    #[must_use]
    pub const fn as_default(mut self) -> Self {
        self.default = true;
        self
    }

    /// Adds a type-specific option.
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Returns a string option.
    #[must_use]
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }

    /// Returns an unsigned integer option.
    #[must_use]
    pub fn option_u64(&self, key: &str) -> Option<u64> {
        self.options.get(key).and_then(Value::as_u64)
    }
}

lazy_static! {
    /// Global configuration instance loaded from XDG-compliant locations.
    pub static ref CONFIG: RelayConfig = RelayConfig::load();
}
