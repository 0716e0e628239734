pub mod decode;
pub mod diffusion;
pub mod ngram;
pub mod sampling;
pub mod tokenizer;

pub use decode::{FinishReason, GeneratedToken, Generation, TokenStream, generate, generate_within};
pub use diffusion::{ImageRequest, ProceduralDiffusion, decode_png_base64, encode_png_base64};
pub use ngram::NgramModel;
pub use sampling::SamplingParams;
pub use tokenizer::Tokenizer;

use crate::{Error, Result, config::ModelConfig};
use async_trait::async_trait;
use image::RgbImage;
use rand::rngs::StdRng;
use std::{sync::Arc, time::Instant};
use tracing::{debug, info};

pub const NGRAM_MODEL_ID: &str = "builtin/ngram";
pub const PROCEDURAL_DIFFUSION_MODEL_ID: &str = "builtin/procedural-diffusion";

const BUNDLED_CORPUS: &str = include_str!("../../assets/corpus.txt");

/// Autoregressive language model driven one token at a time.
pub trait LanguageModel: Send + Sync {
    fn tokenizer(&self) -> &Tokenizer;

    fn eos_token_id(&self) -> u32 {
        tokenizer::EOS_TOKEN_ID
    }

    /// Chooses exactly one token to follow `ids`.
    fn next_token(&self, ids: &[u32], params: &SamplingParams, rng: &mut StdRng) -> Result<u32>;
}

pub trait ImageModel: Send + Sync {
    fn generate(&self, request: &ImageRequest) -> Result<RgbImage>;
}

/// Loaded model shared by every endpoint call of one app.
#[derive(Clone)]
pub enum ModelHandle {
    Text(Arc<dyn LanguageModel>),
    Image(Arc<dyn ImageModel>),
}

impl ModelHandle {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text_generation",
            Self::Image(_) => "text_to_image",
        }
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ModelHandle::{}", self.kind())
    }
}

/// Loads a model once per deployment.
#[async_trait]
pub trait Initializer: Send + Sync {
    async fn initialize(&self, config: &ModelConfig) -> Result<ModelHandle>;
}

/// Resolves the model ids shipped with this crate.
#[derive(Debug, Default)]
pub struct BuiltinInitializer;

#[async_trait]
impl Initializer for BuiltinInitializer {
    async fn initialize(&self, config: &ModelConfig) -> Result<ModelHandle> {
        let started = Instant::now();
        let handle = match config {
            ModelConfig::TextGeneration { id, weights, .. } if id == NGRAM_MODEL_ID => {
                let corpus = match weights {
                    Some(path) => {
                        debug!("Reading corpus from {}", path.display());
                        tokio::fs::read_to_string(path).await?
                    }
                    None => BUNDLED_CORPUS.to_string(),
                };
                let model = tokio::task::spawn_blocking(move || NgramModel::train(&corpus))
                    .await
                    .map_err(|e| Error::internal(format!("model loading task failed: {e}")))??;
                info!(
                    "Loaded {} with a vocabulary of {} pieces",
                    id,
                    model.tokenizer().vocab_size()
                );
                ModelHandle::Text(Arc::new(model))
            }
            ModelConfig::TextToImage { id, .. } if id == PROCEDURAL_DIFFUSION_MODEL_ID => {
                info!("Loaded {}", id);
                ModelHandle::Image(Arc::new(ProceduralDiffusion::new()))
            }
            other => {
                return Err(Error::model(format!(
                    "no {} model is registered under '{}'",
                    match other {
                        ModelConfig::TextGeneration { .. } => "text generation",
                        ModelConfig::TextToImage { .. } => "text-to-image",
                    },
                    other.id()
                )));
            }
        };

        info!(
            "Initialized {} in {} ms",
            config.id(),
            started.elapsed().as_millis()
        );
        Ok(handle)
    }
}
