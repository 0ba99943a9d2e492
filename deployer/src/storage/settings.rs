//! Settings file management

use serde::{Deserialize, Serialize};

use crate::errors::DeployerError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Deployer settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines on stdout
    #[serde(default)]
    pub log_json: bool,

    /// Also write a daily rolling log file under the base directory
    #[serde(default)]
    pub log_to_file: bool,

    /// Remote CRM configuration
    #[serde(default)]
    pub crm: CrmSettings,

    /// Outbound rate limit per credential
    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    /// Deployment engine tuning
    #[serde(default)]
    pub engine: EngineSettings,

    /// Operator HTTP API
    #[serde(default)]
    pub server: ServerSettings,
}

impl Settings {
    /// Read settings from `file`, falling back to defaults when it does not exist
    pub async fn load_or_default(file: &File) -> Result<Self, DeployerError> {
        if !file.exists().await {
            return Ok(Self::default());
        }
        file.read_json().await
    }
}

/// Remote CRM API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmSettings {
    /// Base URL of the CRM REST API
    #[serde(default = "default_crm_url")]
    pub base_url: String,

    /// Timeout of a single request in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_crm_url() -> String {
    "https://api.hubapi.com".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for CrmSettings {
    fn default() -> Self {
        Self {
            base_url: default_crm_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Rate limit settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Requests admitted per window and credential
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Callers allowed to wait for admission per credential
    #[serde(default = "default_max_queue")]
    pub max_queue: usize,

    /// Cumulative backoff after which a throttled call gives up, in seconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_max_requests() -> u32 {
    100
}

fn default_window_ms() -> u64 {
    10_000
}

fn default_max_queue() -> usize {
    256
}

fn default_max_backoff() -> u64 {
    120
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_ms: default_window_ms(),
            max_queue: default_max_queue(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

/// Deployment engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Chunk size when properties are created one request per item
    #[serde(default = "default_property_batch_size")]
    pub property_batch_size: usize,

    /// Create properties through the batch endpoint instead of one by one
    #[serde(default)]
    pub use_batch_endpoint: bool,

    /// Chunk size for the batch endpoint
    #[serde(default = "default_endpoint_batch_size")]
    pub endpoint_batch_size: usize,

    /// Retries of a timed out request
    #[serde(default = "default_timeout_retries")]
    pub timeout_retries: u32,

    /// Roll back a failed deployment right away instead of waiting for an operator
    #[serde(default = "default_auto_rollback")]
    pub auto_rollback: bool,
}

fn default_property_batch_size() -> usize {
    10
}

fn default_endpoint_batch_size() -> usize {
    100
}

fn default_timeout_retries() -> u32 {
    3
}

fn default_auto_rollback() -> bool {
    true
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            property_batch_size: default_property_batch_size(),
            use_batch_endpoint: false,
            endpoint_batch_size: default_endpoint_batch_size(),
            timeout_retries: default_timeout_retries(),
            auto_rollback: default_auto_rollback(),
        }
    }
}

/// Operator HTTP API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}
