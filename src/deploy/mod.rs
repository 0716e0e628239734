mod environment;
mod lifecycle;
mod resources;
mod store;
mod types;

pub use environment::{Environment, PinnedPackage};
pub use lifecycle::{DeploymentEvent, DeploymentLifecycle, DeploymentState};
pub use resources::{GpuKind, GpuSpec, ResourceProfile, parse_memory};
pub use store::DeploymentStore;
pub use types::*;

use crate::{
    Error, Result,
    config::{AppConfig, EndpointKind, ModelConfig},
    model::{Initializer, ModelHandle},
};
use std::sync::Arc;
use tracing::{error, info};

/// An app whose model has been loaded and which is ready to serve.
#[derive(Debug, Clone)]
pub struct DeployedApp {
    pub name: String,
    pub record: DeploymentRecord,
    pub environment: Environment,
    pub resources: ResourceProfile,
    pub model: ModelConfig,
    pub endpoints: Vec<EndpointKind>,
    pub handle: ModelHandle,
}

impl DeployedApp {
    pub fn serves(&self, kind: EndpointKind) -> bool {
        self.endpoints.contains(&kind)
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            app_name: self.name.clone(),
            deployment_id: self.record.id.clone(),
            model_id: self.record.model_id.clone(),
            state: self.record.state,
            resources: self.resources.summary(),
            endpoints: self.record.endpoints.clone(),
        }
    }
}

/// Runs the deploy / inspect / teardown sequence against the registry.
pub struct Deployer {
    store: Arc<DeploymentStore>,
    initializer: Arc<dyn Initializer>,
    base_url: String,
}

impl Deployer {
    pub fn new(
        store: Arc<DeploymentStore>,
        initializer: Arc<dyn Initializer>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            initializer,
            base_url: base_url.into(),
        }
    }

    pub fn store(&self) -> &Arc<DeploymentStore> {
        &self.store
    }

    pub async fn deploy(&self, app: &AppConfig) -> Result<DeployedApp> {
        let environment = Environment::from_config(&app.environment)?;
        let resources = ResourceProfile::from_config(&app.resources)?;
        let endpoints = resolve_endpoints(app)?;

        info!(
            "Deploying app {} (model {}, environment {} with {} pinned packages, {})",
            app.name,
            app.model.id(),
            environment.name,
            environment.packages.len(),
            resources.summary()
        );

        let mut record = DeploymentRecord::new(
            &app.name,
            app.model.id(),
            &environment.name,
            &self.base_url,
            endpoints
                .iter()
                .map(|kind| EndpointInfo::new(&self.base_url, &app.name, *kind))
                .collect(),
        );
        let mut lifecycle = DeploymentLifecycle::new(&app.name);
        self.store.save(&record).await?;

        let state = lifecycle.transition(DeploymentEvent::Initialize)?;
        self.store.update_state(&record.id, state).await?;

        let handle = match self.initializer.initialize(&app.model).await {
            Ok(handle) => handle,
            Err(e) => {
                error!("Initializer for app {} failed: {}", app.name, e);
                let state = lifecycle.transition(DeploymentEvent::LoadFailed)?;
                self.store.update_state(&record.id, state).await?;
                return Err(e);
            }
        };

        let state = lifecycle.transition(DeploymentEvent::Loaded)?;
        self.store.update_state(&record.id, state).await?;
        record.state = state;

        info!("App {} is ready as deployment {}", app.name, record.id);

        Ok(DeployedApp {
            name: app.name.clone(),
            record,
            environment,
            resources,
            model: app.model.clone(),
            endpoints,
            handle,
        })
    }

    /// All deployments, or only the newest one of `app_name`.
    pub async fn inspect(&self, app_name: Option<&str>) -> Result<Vec<DeploymentRecord>> {
        match app_name {
            Some(name) => Ok(self.store.latest_for_app(name).await?.into_iter().collect()),
            None => self.store.list().await,
        }
    }

    /// Stops a deployment. Stopping one that already ended is a no-op.
    pub async fn teardown(&self, deployment_id: &str) -> Result<DeploymentRecord> {
        let mut record =
            self.store
                .get(deployment_id)
                .await?
                .ok_or_else(|| Error::DeploymentNotFound {
                    deployment_id: deployment_id.to_string(),
                })?;

        if record.state.is_terminal() {
            info!(
                "Deployment {} already {}, nothing to tear down",
                deployment_id, record.state
            );
            return Ok(record);
        }

        let state = record.state.next(DeploymentEvent::Stop)?;
        self.store.update_state(deployment_id, state).await?;
        record.state = state;
        info!("Deployment {} of app {} torn down", deployment_id, record.app_name);
        Ok(record)
    }
}

fn resolve_endpoints(app: &AppConfig) -> Result<Vec<EndpointKind>> {
    let supported = app.model.supported_endpoints();
    if app.endpoints.is_empty() {
        return Ok(supported.to_vec());
    }

    let mut endpoints = Vec::new();
    for kind in &app.endpoints {
        if !supported.contains(kind) {
            return Err(Error::validation(format!(
                "app {} declares endpoint {} which model {} cannot serve",
                app.name,
                kind.as_str(),
                app.model.id()
            )));
        }
        if !endpoints.contains(kind) {
            endpoints.push(*kind);
        }
    }
    Ok(endpoints)
}
