//! Client configuration parsing, validation, and URL derivation.

use std::fs;
use std::path::Path;
use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{AppError, Result};

/// Identification sent in the `clientInfo` block of `initialize`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct ClientInfo {
    /// Client name reported to the server.
    pub name: String,
    /// Client version reported to the server.
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "Readium Debug Client".into(),
            version: "1.0.0".into(),
        }
    }
}

/// Timeout values (seconds) for every suspension point of a session.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Liveness probe timeout.
    #[serde(default = "default_health_seconds")]
    pub health_seconds: u64,
    /// Wait for the endpoint event after the stream opens.
    #[serde(default = "default_handshake_seconds")]
    pub handshake_seconds: u64,
    /// Pause between the handshake and `initialize`; 0 disables it.
    #[serde(default = "default_settle_seconds")]
    pub settle_seconds: u64,
    /// Per-POST timeout on the side channel.
    #[serde(default = "default_request_seconds")]
    pub request_seconds: u64,
    /// Wait for the `tools/list` reply.
    #[serde(default = "default_list_seconds")]
    pub list_seconds: u64,
    /// Wait for the tool invocation reply.
    #[serde(default = "default_invoke_seconds")]
    pub invoke_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            health_seconds: default_health_seconds(),
            handshake_seconds: default_handshake_seconds(),
            settle_seconds: default_settle_seconds(),
            request_seconds: default_request_seconds(),
            list_seconds: default_list_seconds(),
            invoke_seconds: default_invoke_seconds(),
        }
    }
}

fn default_health_seconds() -> u64 {
    5
}

fn default_handshake_seconds() -> u64 {
    30
}

fn default_settle_seconds() -> u64 {
    5
}

fn default_request_seconds() -> u64 {
    60
}

fn default_list_seconds() -> u64 {
    30
}

fn default_invoke_seconds() -> u64 {
    120
}

/// Retry policy for side-channel dispatch.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DispatchConfig {
    /// Total attempts per request, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Fixed pause between attempts.
    #[serde(default = "default_backoff_millis")]
    pub backoff_millis: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_millis: default_backoff_millis(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_millis() -> u64 {
    2000
}

/// The capability invoked at the end of the protocol sequence.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ToolConfig {
    /// Tool name looked up in the `tools/list` reply.
    #[serde(default = "default_tool_name")]
    pub name: String,
    /// Argument object passed verbatim in `call_tool`.
    #[serde(default = "default_tool_arguments")]
    pub arguments: Map<String, Value>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            name: default_tool_name(),
            arguments: default_tool_arguments(),
        }
    }
}

fn default_tool_name() -> String {
    "analyze_docs".into()
}

fn default_tool_arguments() -> Map<String, Value> {
    let mut args = Map::new();
    args.insert(
        "path".into(),
        Value::String("https://github.com/pablotoledo/AlGranoBot.git".into()),
    );
    args.insert("use_markitdown".into(), Value::Bool(false));
    args
}

fn default_base_url() -> String {
    "http://localhost:8000".into()
}

fn default_sse_path() -> String {
    "/sse".into()
}

fn default_messages_path() -> String {
    "/messages/".into()
}

fn default_health_path() -> String {
    "/health".into()
}

fn default_protocol_version() -> String {
    "1.0.0".into()
}

/// Client configuration parsed from an optional TOML file.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ClientConfig {
    /// Server origin, e.g. `http://localhost:8000`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Path of the event stream endpoint.
    #[serde(default = "default_sse_path")]
    pub sse_path: String,
    /// Path of the side-channel endpoint; `session_id` is appended as a query.
    #[serde(default = "default_messages_path")]
    pub messages_path: String,
    /// Path probed by the liveness precheck.
    #[serde(default = "default_health_path")]
    pub health_path: String,
    /// `protocolVersion` sent in `initialize`.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    /// Client identification for `initialize`.
    #[serde(default)]
    pub client_info: ClientInfo,
    /// Timeouts for the session.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Dispatch retry policy.
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Tool invoked once the capability list is known.
    #[serde(default)]
    pub tool: ToolConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            sse_path: default_sse_path(),
            messages_path: default_messages_path(),
            health_path: default_health_path(),
            protocol_version: default_protocol_version(),
            client_info: ClientInfo::default(),
            timeouts: TimeoutConfig::default(),
            dispatch: DispatchConfig::default(),
            tool: ToolConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde cannot express.
    ///
    /// Call again after applying command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        self.base()?;

        for (key, path) in [
            ("sse_path", &self.sse_path),
            ("messages_path", &self.messages_path),
            ("health_path", &self.health_path),
        ] {
            if !path.starts_with('/') {
                return Err(AppError::Config(format!("{key} must start with '/'")));
            }
        }

        if self.dispatch.max_attempts == 0 {
            return Err(AppError::Config(
                "dispatch.max_attempts must be greater than zero".into(),
            ));
        }

        for (key, seconds) in [
            ("health_seconds", self.timeouts.health_seconds),
            ("handshake_seconds", self.timeouts.handshake_seconds),
            ("list_seconds", self.timeouts.list_seconds),
            ("invoke_seconds", self.timeouts.invoke_seconds),
        ] {
            if seconds == 0 {
                return Err(AppError::Config(format!(
                    "timeouts.{key} must be greater than zero"
                )));
            }
        }

        if self.tool.name.trim().is_empty() {
            return Err(AppError::Config("tool.name must not be empty".into()));
        }

        Ok(())
    }

    /// Absolute URL of the event stream.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the URL cannot be built.
    pub fn sse_url(&self) -> Result<Url> {
        self.join(&self.sse_path)
    }

    /// Absolute URL of the liveness endpoint.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the URL cannot be built.
    pub fn health_url(&self) -> Result<Url> {
        self.join(&self.health_path)
    }

    /// Side-channel URL scoped to `session_id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the URL cannot be built.
    pub fn messages_url(&self, session_id: &str) -> Result<Url> {
        let mut url = self.join(&self.messages_path)?;
        url.query_pairs_mut().append_pair("session_id", session_id);
        Ok(url)
    }

    /// Handshake timeout as a [`Duration`].
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.handshake_seconds)
    }

    /// Liveness probe timeout as a [`Duration`].
    #[must_use]
    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.health_seconds)
    }

    /// Settle delay as a [`Duration`].
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.timeouts.settle_seconds)
    }

    /// Per-POST timeout as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.request_seconds)
    }

    /// `tools/list` reply timeout as a [`Duration`].
    #[must_use]
    pub fn list_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.list_seconds)
    }

    /// Invocation reply timeout as a [`Duration`].
    #[must_use]
    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.invoke_seconds)
    }

    /// Pause between dispatch attempts as a [`Duration`].
    #[must_use]
    pub fn dispatch_backoff(&self) -> Duration {
        Duration::from_millis(self.dispatch.backoff_millis)
    }

    fn base(&self) -> Result<Url> {
        let url = Url::parse(&self.base_url)
            .map_err(|err| AppError::Config(format!("base_url invalid: {err}")))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(AppError::Config(format!(
                "base_url scheme must be http or https, got {other}"
            ))),
        }
    }

    fn join(&self, path: &str) -> Result<Url> {
        self.base()?
            .join(path)
            .map_err(|err| AppError::Config(format!("cannot join {path} onto base_url: {err}")))
    }
}
