//! Configuration data structures for Rampart.
//!
//! These types map directly to YAML (also JSON / TOML) configuration files. They are
//! serde-friendly and carry defaults so that minimal configs stay concise. Durations are
//! written in humantime form (`"30s"`, `"1m 30s"`).
use std::{collections::BTreeMap, fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::ports::plugin::PluginConfig;

fn default_enabled() -> bool {
    true
}

/// Reference to a plugin by name, with its opaque configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginRef {
    pub name: String,
    /// Disabled references are ignored when the pipeline is built
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub config: PluginConfig,
}

impl PluginRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            config: PluginConfig::new(),
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = config {
            self.config = map;
        }
        self
    }
}

/// The nine standard HTTP methods a route may be restricted to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Connect,
    Options,
    Trace,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Connect => "CONNECT",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Trace => "TRACE",
        }
    }
}

impl AsRef<str> for HttpMethod {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A route inside a namespace.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RouteConfig {
    /// Empty means every method
    pub methods: Vec<HttpMethod>,
    pub middlewares: Vec<PluginRef>,
    pub request_modifiers: Vec<PluginRef>,
}

/// Dialer tuning for upstream connections.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DialerConfig {
    /// Connect timeout
    #[serde(with = "humantime_opt")]
    pub timeout: Option<Duration>,
    /// TCP keepalive interval
    #[serde(with = "humantime_opt")]
    pub keep_alive: Option<Duration>,
    /// Delay before racing the next address family (happy eyeballs)
    #[serde(with = "humantime_opt")]
    pub fallback_delay: Option<Duration>,
}

/// Upstream transport tuning for one namespace.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    /// Never reuse upstream connections
    pub disable_keep_alives: bool,
    pub max_idle_conns_per_host: Option<usize>,
    #[serde(with = "humantime_opt")]
    pub idle_conn_timeout: Option<Duration>,
    /// Time allowed between sending the request and receiving response headers
    #[serde(with = "humantime_opt")]
    pub response_header_timeout: Option<Duration>,
    pub dialer: DialerConfig,
}

/// A named routing domain.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NamespaceConfig {
    /// Host and/or path prefixes; empty registers routes as written
    pub mounts: Vec<String>,
    pub transport: TransportConfig,
    /// Transport hooks and on-request hooks
    pub hooks: Vec<PluginRef>,
    pub middlewares: Vec<PluginRef>,
    pub request_modifiers: Vec<PluginRef>,
    pub routes: BTreeMap<String, RouteConfig>,
}

/// A listener.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub addr: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggerConfig {
    /// `EnvFilter` directive, e.g. `info` or `rampart=debug,tower_http=info`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Process-wide runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Upper bound for draining in-flight requests on shutdown
    #[serde(with = "humantime_serde_duration")]
    pub graceful_shutdown_timeout: Duration,
    pub logger: LoggerConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            graceful_shutdown_timeout: Duration::from_secs(30),
            logger: LoggerConfig::default(),
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    #[serde(default)]
    pub gateway: RuntimeConfig,
    /// Namespace names are the keys and therefore unique
    #[serde(default)]
    pub namespaces: BTreeMap<String, NamespaceConfig>,
}

mod humantime_serde_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

mod humantime_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_str(&humantime::format_duration(*d).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|raw| humantime::parse_duration(&raw).map_err(serde::de::Error::custom))
            .transpose()
    }
}
