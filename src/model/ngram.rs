use super::{
    LanguageModel,
    sampling::{SamplingParams, sample},
    tokenizer::{BOS_TOKEN_ID, EOS_TOKEN_ID, Tokenizer, WORD_MARKER},
};
use crate::{Error, Result};
use rand::rngs::StdRng;
use std::collections::HashMap;

/// Word bigram language model trained from a plain-text corpus. Contexts
/// never seen in training back off to unigram frequencies.
#[derive(Debug)]
pub struct NgramModel {
    tokenizer: Tokenizer,
    bigrams: HashMap<u32, Vec<(u32, f32)>>,
    unigrams: Vec<(u32, f32)>,
}

impl NgramModel {
    pub fn train(corpus: &str) -> Result<Self> {
        if corpus.split_whitespace().next().is_none() {
            return Err(Error::model("cannot train a language model on an empty corpus"));
        }

        let tokenizer = Tokenizer::from_corpus(corpus);
        let mut bigram_counts: HashMap<u32, HashMap<u32, u32>> = HashMap::new();
        let mut unigram_counts: HashMap<u32, u32> = HashMap::new();

        let mut observe = |prev: u32, next: u32| {
            *bigram_counts.entry(prev).or_default().entry(next).or_default() += 1;
            *unigram_counts.entry(next).or_default() += 1;
        };

        for line in corpus.lines() {
            let mut prev = BOS_TOKEN_ID;
            for word in line.split_whitespace() {
                let id = tokenizer
                    .token_id(&format!("{WORD_MARKER}{word}"))
                    .ok_or_else(|| Error::internal(format!("word '{word}' missing from vocabulary")))?;
                observe(prev, id);
                prev = id;

                if word.ends_with(['.', '!', '?']) {
                    observe(prev, EOS_TOKEN_ID);
                    prev = BOS_TOKEN_ID;
                }
            }
            if prev != BOS_TOKEN_ID {
                observe(prev, EOS_TOKEN_ID);
            }
        }

        let bigrams = bigram_counts
            .into_iter()
            .map(|(prev, nexts)| (prev, to_weights(nexts)))
            .collect();
        let unigrams = to_weights(unigram_counts);

        Ok(Self {
            tokenizer,
            bigrams,
            unigrams,
        })
    }

    /// Distribution over the token following `ids`.
    pub fn candidates(&self, ids: &[u32]) -> &[(u32, f32)] {
        let last = ids.last().copied().unwrap_or(BOS_TOKEN_ID);
        self.bigrams
            .get(&last)
            .map(Vec::as_slice)
            .unwrap_or(&self.unigrams)
    }
}

fn to_weights(counts: HashMap<u32, u32>) -> Vec<(u32, f32)> {
    let mut weights: Vec<(u32, f32)> = counts
        .into_iter()
        .map(|(id, count)| (id, count as f32))
        .collect();
    weights.sort_by_key(|(id, _)| *id);
    weights
}

impl LanguageModel for NgramModel {
    fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    fn next_token(&self, ids: &[u32], params: &SamplingParams, rng: &mut StdRng) -> Result<u32> {
        sample(self.candidates(ids), params, rng)
    }
}
