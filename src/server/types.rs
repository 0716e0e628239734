use crate::{
    config::{GenerationDefaults, ImageDefaults},
    model::{ImageRequest, SamplingParams},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_new_tokens: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Request overrides layered on top of the app's configured defaults.
    pub fn sampling_params(&self, defaults: &GenerationDefaults) -> SamplingParams {
        let base = SamplingParams::from(defaults);
        SamplingParams {
            max_new_tokens: self.max_new_tokens.unwrap_or(base.max_new_tokens),
            temperature: self.temperature.unwrap_or(base.temperature),
            top_k: self.top_k.unwrap_or(base.top_k),
            top_p: self.top_p.unwrap_or(base.top_p),
            seed: self.seed,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextToImageRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_inference_steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance_scale: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl TextToImageRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn image_request(&self, defaults: &ImageDefaults) -> ImageRequest {
        let mut request = ImageRequest::new(self.prompt.clone(), defaults);
        if let Some(steps) = self.num_inference_steps {
            request.num_inference_steps = steps;
        }
        if let Some(guidance) = self.guidance_scale {
            request.guidance_scale = guidance;
        }
        if let Some(width) = self.width {
            request.width = width;
        }
        if let Some(height) = self.height {
            request.height = height;
        }
        request.seed = self.seed;
        request
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_overrides_win_over_defaults() {
        let request: GenerateRequest =
            serde_json::from_str(r#"{"prompt":"hi","temperature":0.0,"seed":9}"#).unwrap();
        let params = request.sampling_params(&GenerationDefaults::default());
        assert_eq!(params.temperature, 0.0);
        assert_eq!(params.max_new_tokens, 64);
        assert_eq!(params.top_k, 50);
        assert_eq!(params.seed, Some(9));
    }

    #[test]
    fn test_image_overrides() {
        let request: TextToImageRequest =
            serde_json::from_str(r#"{"prompt":"a cat","width":128,"num_inference_steps":5}"#)
                .unwrap();
        let image = request.image_request(&ImageDefaults::default());
        assert_eq!(image.width, 128);
        assert_eq!(image.height, 512);
        assert_eq!(image.num_inference_steps, 5);
        assert_eq!(image.guidance_scale, 7.5);
    }
}
