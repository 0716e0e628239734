use crate::{Error, Result, config::EnvironmentConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A package pinned to one exact version, e.g. `torch==2.1.0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinnedPackage {
    pub name: String,
    pub version: String,
}

impl PinnedPackage {
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        let (name, version) = spec.split_once("==").ok_or_else(|| {
            Error::validation(format!(
                "environment package '{spec}' must be pinned as name==version"
            ))
        })?;
        let (name, version) = (name.trim(), version.trim());

        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '[' | ']' | ','))
        {
            return Err(Error::validation(format!(
                "environment package '{spec}' has an invalid name"
            )));
        }
        if version.is_empty() || version.contains(['=', '<', '>', '*', ' ']) {
            return Err(Error::validation(format!(
                "environment package '{spec}' must pin one exact version"
            )));
        }

        Ok(Self {
            name: name.to_string(),
            version: version.to_string(),
        })
    }

    /// Package index names compare case-insensitively with `-`, `_` and `.`
    /// treated as the same character.
    pub fn normalized_name(&self) -> String {
        let base = self.name.split('[').next().unwrap_or(&self.name);
        base.to_ascii_lowercase().replace(['_', '.'], "-")
    }

    pub fn requirement(&self) -> String {
        format!("{}=={}", self.name, self.version)
    }
}

/// Named software environment an app's initializer and endpoints run in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,
    pub base_image: Option<String>,
    pub packages: Vec<PinnedPackage>,
}

impl Environment {
    pub fn from_config(config: &EnvironmentConfig) -> Result<Self> {
        if config.name.trim().is_empty() {
            return Err(Error::validation("environment name must not be empty"));
        }

        let packages = config
            .packages
            .iter()
            .map(|spec| PinnedPackage::parse(spec))
            .collect::<Result<Vec<_>>>()?;

        let mut seen = HashSet::new();
        for package in &packages {
            if !seen.insert(package.normalized_name()) {
                return Err(Error::validation(format!(
                    "environment '{}' pins '{}' more than once",
                    config.name, package.name
                )));
            }
        }

        Ok(Self {
            name: config.name.clone(),
            base_image: config.base_image.clone(),
            packages,
        })
    }

    /// Requirements file contents, one pin per line.
    pub fn requirements(&self) -> String {
        self.packages
            .iter()
            .map(PinnedPackage::requirement)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn env_config(packages: &[&str]) -> EnvironmentConfig {
        EnvironmentConfig {
            name: "llm-env".to_string(),
            base_image: Some("debian-slim".to_string()),
            packages: packages.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[test]
    fn test_parse_pinned_package() {
        let package = PinnedPackage::parse(" transformers==4.35.2 ").unwrap();
        assert_eq!(package.name, "transformers");
        assert_eq!(package.version, "4.35.2");
        assert_eq!(package.requirement(), "transformers==4.35.2");
    }

    #[rstest]
    #[case("torch")]
    #[case("torch>=2.0")]
    #[case("torch==")]
    #[case("==2.0")]
    #[case("torch==2.*")]
    #[case("torch===2.0")]
    fn test_unpinned_packages_rejected(#[case] spec: &str) {
        assert!(matches!(PinnedPackage::parse(spec), Err(Error::Validation(_))));
    }

    #[test]
    fn test_duplicate_pins_rejected_after_normalization() {
        let config = env_config(&["Safe_Tensors==0.4.0", "safe-tensors==0.4.1"]);
        let err = Environment::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_requirements_rendering() {
        let config = env_config(&["torch==2.1.0", "accelerate[torch]==0.24.1"]);
        let env = Environment::from_config(&config).unwrap();
        assert_eq!(env.requirements(), "torch==2.1.0\naccelerate[torch]==0.24.1");
        assert_eq!(env.base_image.as_deref(), Some("debian-slim"));
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut config = env_config(&[]);
        config.name = "  ".to_string();
        assert!(Environment::from_config(&config).is_err());
    }
}
