//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::deploy::{DeploymentEngine, EventHub};
use crate::dispatch::Dispatcher;
use crate::errors::DeployerError;
use crate::http::HttpClient;
use crate::remote::{CrmApi, CrmClient, FakeCrm};
use crate::storage::{DeploymentStore, FileStore, MemoryStore};
use crate::templates::{FileTemplateStore, MemoryTemplateStore, TemplateStore};

/// Main application state
pub struct AppState {
    /// Deployment records
    pub store: Arc<dyn DeploymentStore>,

    /// Configuration templates
    pub templates: Arc<dyn TemplateStore>,

    /// Shared rate limiter of all remote calls
    pub dispatcher: Arc<Dispatcher>,

    /// Progress fan-out
    pub hub: EventHub,

    pub engine: DeploymentEngine,
}

impl AppState {
    pub async fn init(options: &AppOptions) -> Result<Self, DeployerError> {
        let layout = &options.storage.layout;

        let (store, templates): (Arc<dyn DeploymentStore>, Arc<dyn TemplateStore>) =
            if options.storage.in_memory {
                info!("Keeping deployments in memory");
                (
                    Arc::new(MemoryStore::new()),
                    Arc::new(MemoryTemplateStore::new()),
                )
            } else {
                layout.setup().await?;
                info!("Storing deployments under {}", layout.base_dir.display());
                (
                    Arc::new(FileStore::new(layout.deployments_dir())),
                    Arc::new(FileTemplateStore::new(layout.templates_dir())),
                )
            };

        let dispatcher = Arc::new(Dispatcher::new(options.dispatch.clone()));

        let api: Arc<dyn CrmApi> = if options.crm.dry_run {
            info!("Dry run: remote calls go to an in-process CRM");
            Arc::new(FakeCrm::new())
        } else {
            let http = HttpClient::new(&options.crm.base_url, options.crm.request_timeout)?;
            Arc::new(CrmClient::new(http, dispatcher.clone()))
        };

        let hub = EventHub::new();
        let engine = DeploymentEngine::new(
            api,
            store.clone(),
            templates.clone(),
            hub.clone(),
            options.engine.clone(),
        );

        Ok(Self {
            store,
            templates,
            dispatcher,
            hub,
            engine,
        })
    }
}
