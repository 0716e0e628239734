use modelhost::{
    config::{self, AppConfig, Config},
    deploy::{DeployedApp, Deployer, DeploymentStore},
    model::BuiltinInitializer,
    server::{self, AppState},
};
use axum::Router;
use std::sync::Arc;
use tempfile::TempDir;

pub const TEST_BASE_URL: &str = "http://127.0.0.1:8000";

/// Sample configuration YAML for testing
pub const SAMPLE_CONFIG_YAML: &str = r#"
server:
  host: "127.0.0.1"
  port: 0
  logs:
    level: "debug"
apps:
  - name: llm
    environment:
      name: llm-env
      packages: ["torch==2.1.0", "transformers==4.35.2"]
    resources: { cpu: 2, memory: 4Gi, timeout: 30 }
    model:
      kind: text_generation
      id: builtin/ngram
      defaults: { max_new_tokens: 16, temperature: 0.0 }
  - name: sd
    environment:
      name: sd-env
      packages: ["diffusers==0.24.0"]
    resources: { cpu: 2, memory: 8Gi, gpu: { count: 1, kind: T4 }, timeout: 30 }
    model:
      kind: text_to_image
      id: builtin/procedural-diffusion
      defaults: { width: 64, height: 64, num_inference_steps: 4 }
"#;

pub fn create_test_config() -> Config {
    config::parse(SAMPLE_CONFIG_YAML).expect("sample config parses")
}

pub fn test_app(name: &str) -> AppConfig {
    create_test_config()
        .app(name)
        .cloned()
        .expect("app present in sample config")
}

/// Create a temporary directory for test files
pub fn create_temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

pub async fn create_test_store(dir: &TempDir) -> Arc<DeploymentStore> {
    let db_path = dir.path().join("deployments.db");
    Arc::new(
        DeploymentStore::new(&db_path.to_string_lossy())
            .await
            .expect("store opens"),
    )
}

pub async fn create_test_deployer(dir: &TempDir) -> Deployer {
    Deployer::new(
        create_test_store(dir).await,
        Arc::new(BuiltinInitializer),
        TEST_BASE_URL,
    )
}

/// Deploys every app of the sample config.
pub async fn deploy_sample_apps(dir: &TempDir) -> Vec<DeployedApp> {
    let deployer = create_test_deployer(dir).await;
    let mut apps = Vec::new();
    for app in &create_test_config().apps {
        apps.push(deployer.deploy(app).await.expect("sample app deploys"));
    }
    apps
}

pub async fn create_test_app() -> (Router, TempDir) {
    let temp_dir = create_temp_dir();
    let apps = deploy_sample_apps(&temp_dir).await;
    (server::router(AppState::new(apps)), temp_dir)
}
