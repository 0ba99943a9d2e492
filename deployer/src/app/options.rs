//! Application configuration options

use std::time::Duration;

use crate::deploy::EngineOptions;
use crate::dispatch::DispatchOptions;
use crate::remote::batch::BatchMode;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::workers::recovery;

/// Main application options
#[derive(Debug, Clone, Default)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Remote CRM access
    pub crm: CrmOptions,

    /// Storage configuration
    pub storage: StorageOptions,

    /// Rate limiting of remote calls
    pub dispatch: DispatchOptions,

    /// Deployment engine
    pub engine: EngineOptions,

    /// Server configuration
    pub server: ServerOptions,

    /// Startup recovery worker options
    pub recovery: recovery::Options,
}

impl AppOptions {
    /// Resolve runtime options from the settings file
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        let engine = &settings.engine;
        let batch_mode = if engine.use_batch_endpoint {
            BatchMode::endpoint(engine.endpoint_batch_size)
        } else {
            BatchMode::item_by_item(engine.property_batch_size)
        };
        let call_timeout = Duration::from_secs(settings.crm.request_timeout_secs);

        Self {
            crm: CrmOptions {
                base_url: settings.crm.base_url.clone(),
                request_timeout: call_timeout,
                dry_run: false,
            },
            storage: StorageOptions {
                layout,
                in_memory: false,
            },
            dispatch: DispatchOptions {
                max_requests: settings.rate_limit.max_requests,
                window: Duration::from_millis(settings.rate_limit.window_ms),
                max_queue: settings.rate_limit.max_queue,
                call_timeout,
                timeout_retries: engine.timeout_retries,
                max_backoff: Duration::from_secs(settings.rate_limit.max_backoff_secs),
                ..Default::default()
            },
            engine: EngineOptions {
                batch_mode,
                auto_rollback: engine.auto_rollback,
            },
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            ..Default::default()
        }
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Remote CRM options
#[derive(Debug, Clone)]
pub struct CrmOptions {
    pub base_url: String,

    /// Timeout of the underlying HTTP requests
    pub request_timeout: Duration,

    /// Use the in-process fake CRM instead of the remote one
    pub dry_run: bool,
}

impl Default for CrmOptions {
    fn default() -> Self {
        Self {
            base_url: "https://api.hubapi.com".to_string(),
            request_timeout: Duration::from_secs(30),
            dry_run: false,
        }
    }
}

/// Storage configuration options
#[derive(Debug, Clone, Default)]
pub struct StorageOptions {
    /// Storage layout paths
    pub layout: StorageLayout,

    /// Keep deployments in memory only
    pub in_memory: bool,
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}
