//! CLI configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via AGENTRUN_CONFIG or --config)
//! 3. Environment variables
//! 4. Command-line flags

use agentrun_client::{ClientConfig, TlsClientConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Effective CLI configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Backend endpoint.
    pub server: ServerConfig,
    /// Connection timing.
    pub timeouts: TimeoutConfig,
    /// Bidirectional request servicing.
    pub requests: RequestConfig,
    /// Model credentials.
    pub model: ModelConfig,
    /// TLS configuration.
    pub tls: TlsConfig,
    /// Local library file answering data requests.
    pub library: Option<PathBuf>,
}

impl AppConfig {
    /// Loads configuration from `path` (or AGENTRUN_CONFIG), then applies
    /// environment variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var("AGENTRUN_CONFIG").ok().map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: AppConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Applies `AGENTRUN_*` overrides read through `var`.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        self.server.apply_overrides(&var);
        self.timeouts.apply_overrides(&var);
        self.requests.apply_overrides(&var);
        self.model.apply_overrides(&var);
        self.tls.apply_overrides(&var);

        if let Some(path) = var("AGENTRUN_LIBRARY") {
            self.library = Some(PathBuf::from(path));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tls.validate()?;
        if self.timeouts.connect_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "timeouts.connect_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.requests.max_concurrent == Some(0) {
            return Err(ConfigError::ValidationError(
                "requests.max_concurrent must be greater than 0".to_string(),
            ));
        }
        self.client_config()
            .websocket_url()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        Ok(())
    }

    /// Builds the client configuration.
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(&self.server.base_url)
            .with_ws_path(&self.server.ws_path)
            .with_connect_timeout(Duration::from_secs(self.timeouts.connect_timeout_secs))
            .with_cancel_grace(Duration::from_millis(self.timeouts.cancel_grace_ms))
            .with_close_timeout(Duration::from_millis(self.timeouts.close_timeout_ms))
            .with_respond_on_servicing_failure(self.requests.respond_on_failure);
        if let Some(secs) = self.timeouts.ready_timeout_secs {
            config = config.with_ready_timeout(Duration::from_secs(secs));
        }
        if let Some(limit) = self.requests.max_concurrent {
            config = config.with_max_concurrent_requests(limit);
        }
        if let Some(tls) = self.tls.client_tls() {
            config = config.with_tls(tls);
        }
        config
    }

    /// Returns a copy safe to print.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.model.api_key.is_some() {
            config.model.api_key = Some("<redacted>".to_string());
        }
        config
    }
}

/// Backend endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL (`http`, `https`, `ws` or `wss`).
    pub base_url: String,
    /// Endpoint path appended to the base URL.
    pub ws_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            ws_path: agentrun_protocol::DEFAULT_WS_PATH.to_string(),
        }
    }
}

impl ServerConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("AGENTRUN_BASE_URL") {
            self.base_url = url;
        }
        if let Some(path) = var("AGENTRUN_WS_PATH") {
            self.ws_path = path;
        }
    }
}

/// Connection timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub connect_timeout_secs: u64,
    /// Unset waits for `ready` indefinitely.
    pub ready_timeout_secs: Option<u64>,
    pub cancel_grace_ms: u64,
    pub close_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            ready_timeout_secs: None,
            cancel_grace_ms: 2000,
            close_timeout_ms: 1000,
        }
    }
}

impl TimeoutConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(secs) = var("AGENTRUN_CONNECT_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.connect_timeout_secs = secs;
        }
        if let Some(secs) = var("AGENTRUN_READY_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.ready_timeout_secs = Some(secs);
        }
        if let Some(ms) = var("AGENTRUN_CANCEL_GRACE_MS").and_then(|v| v.parse().ok()) {
            self.cancel_grace_ms = ms;
        }
    }
}

/// Bidirectional request servicing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    /// Upper bound on requests serviced at once. Unset is unbounded.
    pub max_concurrent: Option<usize>,
    /// Answer failed requests with an error-shaped response.
    pub respond_on_failure: bool,
}

impl RequestConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(limit) = var("AGENTRUN_MAX_CONCURRENT_REQUESTS").and_then(|v| v.parse().ok()) {
            self.max_concurrent = Some(limit);
        }
        if let Some(flag) = var("AGENTRUN_RESPOND_ON_FAILURE") {
            self.respond_on_failure = flag == "1" || flag.to_lowercase() == "true";
        }
    }
}

/// Platform model credentials.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub access_id: Option<String>,
    pub api_key: Option<String>,
}

impl ModelConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(id) = var("AGENTRUN_ACCESS_ID") {
            self.access_id = Some(id);
        }
        if let Some(key) = var("AGENTRUN_API_KEY") {
            self.api_key = Some(key);
        }
    }
}

/// TLS configuration for `wss` endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Path to CA certificate for server verification.
    pub ca_cert_path: Option<PathBuf>,
    /// Path to client certificate (for mTLS).
    pub client_cert_path: Option<PathBuf>,
    /// Path to client private key (for mTLS).
    pub client_key_path: Option<PathBuf>,
}

impl TlsConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(path) = var("AGENTRUN_CA_CERT") {
            self.ca_cert_path = Some(PathBuf::from(path));
        }
        if let Some(path) = var("AGENTRUN_CLIENT_CERT") {
            self.client_cert_path = Some(PathBuf::from(path));
        }
        if let Some(path) = var("AGENTRUN_CLIENT_KEY") {
            self.client_key_path = Some(PathBuf::from(path));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_cert_path.is_some() != self.client_key_path.is_some() {
            return Err(ConfigError::ValidationError(
                "tls.client_cert_path and tls.client_key_path must be set together".to_string(),
            ));
        }
        Ok(())
    }

    fn client_tls(&self) -> Option<TlsClientConfig> {
        if self.ca_cert_path.is_none() && self.client_cert_path.is_none() {
            return None;
        }
        Some(TlsClientConfig {
            ca_cert_path: self.ca_cert_path.clone(),
            client_cert_path: self.client_cert_path.clone(),
            client_key_path: self.client_key_path.clone(),
        })
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
