//! Server state

use std::sync::Arc;

use crate::deploy::{DeploymentEngine, EventHub};
use crate::dispatch::Dispatcher;
use crate::storage::DeploymentStore;

/// Server state shared across handlers
pub struct ServerState {
    pub engine: DeploymentEngine,
    pub store: Arc<dyn DeploymentStore>,
    pub hub: EventHub,
    pub dispatcher: Arc<Dispatcher>,
}

impl ServerState {
    pub fn new(engine: DeploymentEngine, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            store: engine.store().clone(),
            hub: engine.hub().clone(),
            engine,
            dispatcher,
        }
    }
}
