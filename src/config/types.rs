use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub apps: Vec<AppConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub logs: LogsConfig,
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// One deployable service: environment, resources, model and the endpoints
/// exposed on top of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub environment: EnvironmentConfig,
    #[serde(default)]
    pub resources: ResourceConfig,
    pub model: ModelConfig,
    /// Empty means every endpoint the model kind can serve.
    #[serde(default)]
    pub endpoints: Vec<EndpointKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub name: String,
    #[serde(default)]
    pub base_image: Option<String>,
    #[serde(default)]
    pub packages: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(default = "default_cpu")]
    pub cpu: f32,
    #[serde(default = "default_memory")]
    pub memory: MemorySpec,
    #[serde(default)]
    pub gpu: Option<GpuConfig>,
    /// Seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

/// Memory is either a plain MiB count or a human size such as `16Gi`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MemorySpec {
    Mebibytes(u64),
    Text(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuConfig {
    #[serde(default = "default_gpu_count")]
    pub count: u32,
    #[serde(default = "default_gpu_kind")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelConfig {
    TextGeneration {
        id: String,
        /// Corpus the built-in n-gram model is trained from.
        #[serde(default)]
        weights: Option<PathBuf>,
        #[serde(default)]
        defaults: GenerationDefaults,
    },
    TextToImage {
        id: String,
        #[serde(default)]
        defaults: ImageDefaults,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationDefaults {
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageDefaults {
    #[serde(default = "default_image_side")]
    pub width: u32,
    #[serde(default = "default_image_side")]
    pub height: u32,
    #[serde(default = "default_inference_steps")]
    pub num_inference_steps: u32,
    #[serde(default = "default_guidance_scale")]
    pub guidance_scale: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    Generate,
    GenerateStream,
    TextToImage,
}

impl EndpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::GenerateStream => "generate_stream",
            Self::TextToImage => "text_to_image",
        }
    }
}

impl ModelConfig {
    pub fn id(&self) -> &str {
        match self {
            Self::TextGeneration { id, .. } | Self::TextToImage { id, .. } => id,
        }
    }

    /// Endpoints a model of this kind is able to answer.
    pub fn supported_endpoints(&self) -> &'static [EndpointKind] {
        match self {
            Self::TextGeneration { .. } => &[EndpointKind::Generate, EndpointKind::GenerateStream],
            Self::TextToImage { .. } => &[EndpointKind::TextToImage],
        }
    }
}

impl Config {
    pub fn app(&self, name: &str) -> Option<&AppConfig> {
        self.apps.iter().find(|app| app.name == name)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            logs: LogsConfig::default(),
            database_path: default_database_path(),
        }
    }
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            cpu: default_cpu(),
            memory: default_memory(),
            gpu: None,
            timeout: default_timeout(),
        }
    }
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            max_new_tokens: default_max_new_tokens(),
            temperature: default_temperature(),
            top_k: default_top_k(),
            top_p: default_top_p(),
        }
    }
}

impl Default for ImageDefaults {
    fn default() -> Self {
        Self {
            width: default_image_side(),
            height: default_image_side(),
            num_inference_steps: default_inference_steps(),
            guidance_scale: default_guidance_scale(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_database_path() -> String {
    "deployments.db".to_string()
}

fn default_cpu() -> f32 {
    1.0
}

fn default_memory() -> MemorySpec {
    MemorySpec::Mebibytes(2048)
}

fn default_timeout() -> u64 {
    300
}

fn default_gpu_count() -> u32 {
    1
}

fn default_gpu_kind() -> String {
    "any".to_string()
}

fn default_max_new_tokens() -> usize {
    64
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_k() -> usize {
    50
}

fn default_top_p() -> f32 {
    0.95
}

fn default_image_side() -> u32 {
    512
}

fn default_inference_steps() -> u32 {
    30
}

fn default_guidance_scale() -> f32 {
    7.5
}
