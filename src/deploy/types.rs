use super::DeploymentState;
use crate::config::EndpointKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointInfo {
    pub kind: EndpointKind,
    pub method: String,
    pub path: String,
    pub url: String,
}

impl EndpointInfo {
    pub fn new(base_url: &str, app_name: &str, kind: EndpointKind) -> Self {
        let path = format!("/{}/{}", app_name, kind.as_str());
        Self {
            kind,
            method: "POST".to_string(),
            url: format!("{}{}", base_url.trim_end_matches('/'), path),
            path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub id: String,
    pub app_name: String,
    pub model_id: String,
    pub environment: String,
    pub state: DeploymentState,
    pub base_url: String,
    pub endpoints: Vec<EndpointInfo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeploymentRecord {
    pub fn new(
        app_name: impl Into<String>,
        model_id: impl Into<String>,
        environment: impl Into<String>,
        base_url: impl Into<String>,
        endpoints: Vec<EndpointInfo>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            app_name: app_name.into(),
            model_id: model_id.into(),
            environment: environment.into(),
            state: DeploymentState::Pending,
            base_url: base_url.into(),
            endpoints,
            created_at: now,
            updated_at: now,
        }
    }
}

/// What gets printed after a deploy and served on `GET /apps`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub app_name: String,
    pub deployment_id: String,
    pub model_id: String,
    pub state: DeploymentState,
    pub resources: String,
    pub endpoints: Vec<EndpointInfo>,
}

impl ConnectionInfo {
    pub fn render(&self) -> String {
        let mut out = format!(
            "App '{}' deployment {} is {}\n  model: {}\n  resources: {}\n",
            self.app_name,
            self.deployment_id,
            self.state,
            self.model_id,
            self.resources
        );
        for endpoint in &self.endpoints {
            out.push_str(&format!("  {} {}\n", endpoint.method, endpoint.url));
        }
        out
    }
}
