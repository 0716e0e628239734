mod types;

pub use types::*;

use crate::{Error, Result};
use std::{collections::HashSet, env, path::Path};
use tracing::debug;

pub async fn load() -> Result<Config> {
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
    load_from(&config_path).await
}

pub async fn load_from(config_path: impl AsRef<Path>) -> Result<Config> {
    let config_path = config_path.as_ref();
    debug!("Loading configuration from: {}", config_path.display());

    let config_str = tokio::fs::read_to_string(config_path).await?;
    parse(&config_str)
}

pub fn parse(config_str: &str) -> Result<Config> {
    let config: Config = serde_yaml::from_str(config_str)?;
    validate_app_names(&config)?;
    Ok(config)
}

/// App names become the first path segment of every route, so they must be
/// unique and URL-safe.
fn validate_app_names(config: &Config) -> Result<()> {
    let mut seen = HashSet::new();
    for app in &config.apps {
        let valid = !app.name.is_empty()
            && app
                .name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
        if !valid {
            return Err(Error::config(format!(
                "App name '{}' must be non-empty and use only a-z, 0-9, '-' or '_'",
                app.name
            )));
        }
        if !seen.insert(app.name.as_str()) {
            return Err(Error::config(format!("Duplicate app name '{}'", app.name)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MINIMAL: &str = r#"
apps:
  - name: llm
    environment:
      name: llm-env
    model:
      kind: text_generation
      id: builtin/ngram
"#;

    #[test]
    fn test_defaults_applied() {
        let config = parse(MINIMAL).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.logs.level, "info");
        assert_eq!(config.server.database_path, "deployments.db");

        let app = config.app("llm").unwrap();
        assert_eq!(app.resources.timeout, 300);
        assert_eq!(app.resources.memory, MemorySpec::Mebibytes(2048));
        assert!(app.endpoints.is_empty());
        match &app.model {
            ModelConfig::TextGeneration { defaults, weights, .. } => {
                assert_eq!(defaults.max_new_tokens, 64);
                assert!(weights.is_none());
            }
            other => panic!("unexpected model config: {other:?}"),
        }
    }

    #[test]
    fn test_memory_accepts_number_or_text() {
        let yaml = r#"
apps:
  - name: sd
    environment: { name: sd-env }
    resources: { cpu: 2, memory: 16Gi, gpu: { count: 1, kind: A10G }, timeout: 60 }
    model: { kind: text_to_image, id: builtin/procedural-diffusion }
    endpoints: [text_to_image]
"#;
        let config = parse(yaml).unwrap();
        let app = config.app("sd").unwrap();
        assert_eq!(app.resources.memory, MemorySpec::Text("16Gi".to_string()));
        assert_eq!(app.endpoints, vec![EndpointKind::TextToImage]);
        assert_eq!(app.resources.gpu.as_ref().unwrap().kind, "A10G");
    }

    #[test]
    fn test_duplicate_app_names_rejected() {
        let yaml = format!("{MINIMAL}{}", MINIMAL.replace("apps:\n", ""));
        let err = parse(&yaml).unwrap_err();
        assert!(err.to_string().contains("Duplicate app name"));
    }

    #[test]
    fn test_app_name_must_be_path_safe() {
        let yaml = MINIMAL.replace("name: llm\n", "name: \"My App\"\n");
        assert!(matches!(parse(&yaml), Err(Error::Config(_))));
    }

    #[test]
    fn test_unknown_model_kind_rejected() {
        let yaml = MINIMAL.replace("text_generation", "speech_to_text");
        assert!(matches!(parse(&yaml), Err(Error::Yaml(_))));
    }
}
