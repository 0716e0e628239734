use crate::{Error, Result, config::GenerationDefaults};
use rand::{Rng, SeedableRng, distributions::WeightedIndex, prelude::Distribution, rngs::StdRng};
use serde::{Deserialize, Serialize};

const MAX_NEW_TOKENS: usize = 4096;
const MAX_TEMPERATURE: f32 = 5.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub max_new_tokens: usize,
    /// `0.0` selects greedy decoding.
    pub temperature: f32,
    pub top_k: usize,
    pub top_p: f32,
    pub seed: Option<u64>,
}

impl SamplingParams {
    pub fn greedy(max_new_tokens: usize) -> Self {
        Self {
            max_new_tokens,
            temperature: 0.0,
            top_k: 1,
            top_p: 1.0,
            seed: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_new_tokens == 0 || self.max_new_tokens > MAX_NEW_TOKENS {
            return Err(Error::validation(format!(
                "max_new_tokens must be between 1 and {MAX_NEW_TOKENS}, got {}",
                self.max_new_tokens
            )));
        }
        if !(0.0..=MAX_TEMPERATURE).contains(&self.temperature) {
            return Err(Error::validation(format!(
                "temperature must be between 0 and {MAX_TEMPERATURE}, got {}",
                self.temperature
            )));
        }
        if self.top_k == 0 {
            return Err(Error::validation("top_k must be at least 1"));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(Error::validation(format!(
                "top_p must be in (0, 1], got {}",
                self.top_p
            )));
        }
        Ok(())
    }

    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

impl From<&GenerationDefaults> for SamplingParams {
    fn from(defaults: &GenerationDefaults) -> Self {
        Self {
            max_new_tokens: defaults.max_new_tokens,
            temperature: defaults.temperature,
            top_k: defaults.top_k,
            top_p: defaults.top_p,
            seed: None,
        }
    }
}

/// Picks one token id from `(id, weight)` candidates with non-negative
/// weights (e.g. counts or probabilities).
pub fn sample<R: Rng + ?Sized>(
    candidates: &[(u32, f32)],
    params: &SamplingParams,
    rng: &mut R,
) -> Result<u32> {
    let mut ranked: Vec<(u32, f32)> = candidates
        .iter()
        .copied()
        .filter(|(_, weight)| *weight > 0.0)
        .collect();
    if ranked.is_empty() {
        return Err(Error::model("no candidate tokens to sample from"));
    }
    // Highest weight first, lowest id on ties.
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    if params.temperature == 0.0 {
        return Ok(ranked[0].0);
    }

    ranked.truncate(params.top_k.max(1));

    let inv_temp = 1.0 / params.temperature as f64;
    let max_log = (ranked[0].1 as f64).ln();
    let mut probs: Vec<f64> = ranked
        .iter()
        .map(|(_, weight)| (((*weight as f64).ln() - max_log) * inv_temp).exp())
        .collect();
    normalize(&mut probs);

    if params.top_p < 1.0 {
        let mut cumulative = 0.0;
        let mut keep = probs.len();
        for (i, p) in probs.iter().enumerate() {
            cumulative += p;
            if cumulative >= params.top_p as f64 {
                keep = i + 1;
                break;
            }
        }
        probs.truncate(keep);
        ranked.truncate(keep);
        normalize(&mut probs);
    }

    let dist = WeightedIndex::new(&probs)
        .map_err(|e| Error::model(format!("invalid sampling distribution: {e}")))?;
    Ok(ranked[dist.sample(rng)].0)
}

fn normalize(probs: &mut [f64]) {
    let total: f64 = probs.iter().sum();
    if total > 0.0 {
        probs.iter_mut().for_each(|p| *p /= total);
    }
}
