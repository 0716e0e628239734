use super::ImageModel;
use crate::{Error, Result, config::ImageDefaults};
use base64::{Engine, engine::general_purpose::STANDARD};
use image::{ImageFormat, Rgb, RgbImage, imageops::FilterType};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

const LATENT_SCALE: u32 = 8;
const MIN_SIDE: u32 = 64;
const MAX_SIDE: u32 = 1024;
const MAX_STEPS: u32 = 150;
const MAX_GUIDANCE: f32 = 30.0;
/// Share of the initial noise removed over a full schedule.
const REFINEMENT: f32 = 0.9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRequest {
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub num_inference_steps: u32,
    pub guidance_scale: f32,
    pub seed: Option<u64>,
}

impl ImageRequest {
    pub fn new(prompt: impl Into<String>, defaults: &ImageDefaults) -> Self {
        Self {
            prompt: prompt.into(),
            width: defaults.width,
            height: defaults.height,
            num_inference_steps: defaults.num_inference_steps,
            guidance_scale: defaults.guidance_scale,
            seed: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, side) in [("width", self.width), ("height", self.height)] {
            if side % LATENT_SCALE != 0 || !(MIN_SIDE..=MAX_SIDE).contains(&side) {
                return Err(Error::validation(format!(
                    "{name} must be a multiple of {LATENT_SCALE} between {MIN_SIDE} and {MAX_SIDE}, got {side}"
                )));
            }
        }
        if self.num_inference_steps == 0 || self.num_inference_steps > MAX_STEPS {
            return Err(Error::validation(format!(
                "num_inference_steps must be between 1 and {MAX_STEPS}, got {}",
                self.num_inference_steps
            )));
        }
        if !(0.0..=MAX_GUIDANCE).contains(&self.guidance_scale) {
            return Err(Error::validation(format!(
                "guidance_scale must be between 0 and {MAX_GUIDANCE}, got {}",
                self.guidance_scale
            )));
        }
        Ok(())
    }
}

/// Text-to-image model that refines a seeded noise latent toward a
/// prompt-conditioned color field and upsamples the result.
#[derive(Debug, Default)]
pub struct ProceduralDiffusion;

impl ProceduralDiffusion {
    pub fn new() -> Self {
        Self
    }
}

impl ImageModel for ProceduralDiffusion {
    fn generate(&self, request: &ImageRequest) -> Result<RgbImage> {
        request.validate()?;

        let latent_w = request.width / LATENT_SCALE;
        let latent_h = request.height / LATENT_SCALE;
        let prompt_hash = fnv1a(request.prompt.as_bytes());
        let mut rng = StdRng::seed_from_u64(request.seed.unwrap_or(prompt_hash));

        let mut latent: Vec<[f32; 3]> = (0..latent_w * latent_h)
            .map(|_| {
                [
                    0.5 + 0.25 * gaussian(&mut rng),
                    0.5 + 0.25 * gaussian(&mut rng),
                    0.5 + 0.25 * gaussian(&mut rng),
                ]
            })
            .collect();

        let field = ConditionField::from_prompt(&request.prompt, prompt_hash);
        let weight = request.guidance_scale / (1.0 + request.guidance_scale);
        let target: Vec<[f32; 3]> = (0..latent_h)
            .flat_map(|y| (0..latent_w).map(move |x| (x, y)))
            .map(|(x, y)| {
                let cond = field.sample(
                    x as f32 / latent_w.max(1) as f32,
                    y as f32 / latent_h.max(1) as f32,
                );
                let mut out = [0.0; 3];
                for c in 0..3 {
                    out[c] = UNCONDITIONED + weight * (cond[c] - UNCONDITIONED);
                }
                out
            })
            .collect();

        let step_rate =
            1.0 - (1.0 - REFINEMENT).powf(1.0 / request.num_inference_steps as f32);
        for _ in 0..request.num_inference_steps {
            for (cell, goal) in latent.iter_mut().zip(&target) {
                for c in 0..3 {
                    cell[c] += (goal[c] - cell[c]) * step_rate;
                }
            }
        }

        let small = RgbImage::from_fn(latent_w, latent_h, |x, y| {
            let cell = latent[(y * latent_w + x) as usize];
            Rgb(cell.map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8))
        });

        Ok(image::imageops::resize(
            &small,
            request.width,
            request.height,
            FilterType::Triangle,
        ))
    }
}

const UNCONDITIONED: f32 = 0.5;

/// Prompt-derived color field: one palette color per word laid out along a
/// gradient whose direction also comes from the prompt.
struct ConditionField {
    palette: Vec<[f32; 3]>,
    direction: (f32, f32),
}

impl ConditionField {
    fn from_prompt(prompt: &str, prompt_hash: u64) -> Self {
        let mut palette: Vec<[f32; 3]> = prompt
            .split_whitespace()
            .map(|word| {
                let h = fnv1a(word.to_lowercase().as_bytes());
                [
                    (h & 0xff) as f32 / 255.0,
                    ((h >> 8) & 0xff) as f32 / 255.0,
                    ((h >> 16) & 0xff) as f32 / 255.0,
                ]
            })
            .collect();
        if palette.is_empty() {
            palette.push([UNCONDITIONED; 3]);
        }

        let angle = (prompt_hash % 360) as f32 * std::f32::consts::PI / 180.0;
        Self {
            palette,
            direction: (angle.cos(), angle.sin()),
        }
    }

    fn sample(&self, u: f32, v: f32) -> [f32; 3] {
        if self.palette.len() == 1 {
            return self.palette[0];
        }
        let (dx, dy) = self.direction;
        // Project onto the gradient axis and fold into [0, 1].
        let t = ((u * dx + v * dy) * 0.5 + 0.5).rem_euclid(1.0);
        let span = (self.palette.len() - 1) as f32;
        let pos = t * span;
        let i = (pos.floor() as usize).min(self.palette.len() - 2);
        let frac = pos - i as f32;
        let (a, b) = (self.palette[i], self.palette[i + 1]);
        [
            a[0] + (b[0] - a[0]) * frac,
            a[1] + (b[1] - a[1]) * frac,
            a[2] + (b[2] - a[2]) * frac,
        ]
    }
}

/// Standard normal sample via Box-Muller.
fn gaussian(rng: &mut StdRng) -> f32 {
    let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
    let u2: f32 = rng.r#gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
}

/// FNV-1a, stable across platforms and releases.
fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf29ce484222325, |hash, b| {
        (hash ^ *b as u64).wrapping_mul(0x100000001b3)
    })
}

pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

pub fn encode_png_base64(image: &RgbImage) -> Result<String> {
    Ok(STANDARD.encode(encode_png(image)?))
}

/// Inverse of [`encode_png_base64`]; fails unless the payload is a PNG.
pub fn decode_png_base64(encoded: &str) -> Result<Vec<u8>> {
    let bytes = STANDARD.decode(encoded.trim())?;
    if image::guess_format(&bytes)? != ImageFormat::Png {
        return Err(Error::model("payload is not a PNG image"));
    }
    Ok(bytes)
}
