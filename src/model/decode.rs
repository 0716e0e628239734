use super::{LanguageModel, sampling::SamplingParams};
use crate::{Error, Result};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The model produced the end-of-sequence token.
    Eos,
    /// `max_new_tokens` steps ran without reaching end-of-sequence.
    Length,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedToken {
    pub id: u32,
    pub text: String,
}

/// Manual decode loop: each step asks the model for exactly one token given
/// the whole sequence so far, then appends it and feeds the grown sequence
/// back in on the next step.
pub struct TokenStream {
    model: Arc<dyn LanguageModel>,
    params: SamplingParams,
    rng: StdRng,
    ids: Vec<u32>,
    prompt_len: usize,
    steps: usize,
    finish_reason: Option<FinishReason>,
    deadline: Option<(Instant, Duration)>,
    failed: bool,
}

impl TokenStream {
    pub fn new(model: Arc<dyn LanguageModel>, prompt: &str, params: SamplingParams) -> Self {
        let ids = model.tokenizer().encode(prompt);
        let prompt_len = ids.len();
        let rng = params.rng();
        debug!(
            "Starting decode loop with {} prompt tokens, budget {}",
            prompt_len, params.max_new_tokens
        );
        Self {
            model,
            params,
            rng,
            ids,
            prompt_len,
            steps: 0,
            finish_reason: None,
            deadline: None,
            failed: false,
        }
    }

    /// Ends the loop with [`Error::Timeout`] once `limit` has elapsed, checked
    /// before every model call.
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.deadline = Some((Instant::now() + limit, limit));
        self
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    /// Model calls made so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn generated_ids(&self) -> &[u32] {
        &self.ids[self.prompt_len..]
    }
}

impl Iterator for TokenStream {
    type Item = Result<GeneratedToken>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finish_reason.is_some() || self.failed {
            return None;
        }
        if self.steps >= self.params.max_new_tokens {
            self.finish_reason = Some(FinishReason::Length);
            return None;
        }

        if let Some((deadline, limit)) = self.deadline {
            if Instant::now() >= deadline {
                self.failed = true;
                return Some(Err(Error::Timeout {
                    timeout_secs: limit.as_secs(),
                }));
            }
        }

        self.steps += 1;
        let id = match self.model.next_token(&self.ids, &self.params, &mut self.rng) {
            Ok(id) => id,
            Err(e) => {
                self.failed = true;
                return Some(Err(e));
            }
        };

        if id == self.model.eos_token_id() {
            self.finish_reason = Some(FinishReason::Eos);
            return None;
        }

        self.ids.push(id);
        let text = self.model.tokenizer().decode_piece(id);
        Some(Ok(GeneratedToken { id, text }))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub tokens: usize,
    pub finish_reason: FinishReason,
}

/// Runs the decode loop to completion and joins the decoded pieces.
pub fn generate(
    model: Arc<dyn LanguageModel>,
    prompt: &str,
    params: SamplingParams,
) -> Result<Generation> {
    collect(TokenStream::new(model, prompt, params))
}

/// Like [`generate`], but gives up with [`Error::Timeout`] after `limit`.
pub fn generate_within(
    model: Arc<dyn LanguageModel>,
    prompt: &str,
    params: SamplingParams,
    limit: Duration,
) -> Result<Generation> {
    collect(TokenStream::new(model, prompt, params).with_time_limit(limit))
}

fn collect(mut stream: TokenStream) -> Result<Generation> {
    let mut text = String::new();
    for token in stream.by_ref() {
        text.push_str(&token?.text);
    }

    Ok(Generation {
        text: text.trim_start().to_string(),
        tokens: stream.generated_ids().len(),
        finish_reason: stream.finish_reason().unwrap_or(FinishReason::Length),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tokenizer::{EOS_TOKEN_ID, Tokenizer};
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Replays a fixed script of token ids and records every sequence it is
    /// asked to extend.
    struct ScriptedModel {
        tokenizer: Tokenizer,
        script: Mutex<Vec<u32>>,
        seen: Mutex<Vec<Vec<u32>>>,
    }

    impl ScriptedModel {
        fn new(corpus: &str, pieces: &[&str]) -> Self {
            let tokenizer = Tokenizer::from_corpus(corpus);
            let script = pieces
                .iter()
                .rev()
                .map(|piece| tokenizer.token_id(piece).unwrap())
                .collect();
            Self {
                tokenizer,
                script: Mutex::new(script),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl LanguageModel for ScriptedModel {
        fn tokenizer(&self) -> &Tokenizer {
            &self.tokenizer
        }

        fn next_token(&self, ids: &[u32], _: &SamplingParams, _: &mut StdRng) -> Result<u32> {
            self.seen.lock().unwrap().push(ids.to_vec());
            self.script
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| Error::model("script exhausted"))
        }
    }

    #[test]
    fn test_stops_on_eos_without_emitting_it() {
        let model = Arc::new(ScriptedModel::new("hi there friend", &["▁there", "▁friend", "</s>", "▁hi"]));
        let mut stream = TokenStream::new(model.clone(), "hi", SamplingParams::greedy(10));
        let pieces: Vec<String> = stream.by_ref().map(|t| t.unwrap().text).collect();

        assert_eq!(pieces, vec![" there", " friend"]);
        assert_eq!(stream.finish_reason(), Some(FinishReason::Eos));
        assert_eq!(stream.steps(), 3);
        assert!(!stream.generated_ids().contains(&EOS_TOKEN_ID));
    }

    #[test]
    fn test_stops_at_token_budget() {
        let model = Arc::new(ScriptedModel::new("a b", &["▁a", "▁b", "▁a", "▁b", "▁a"]));
        let mut stream = TokenStream::new(model.clone(), "", SamplingParams::greedy(3));
        let count = stream.by_ref().count();

        assert_eq!(count, 3);
        assert_eq!(stream.finish_reason(), Some(FinishReason::Length));
        assert_eq!(model.seen.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_grown_sequence_is_refed() {
        let model = Arc::new(ScriptedModel::new("x y z", &["▁y", "▁z", "</s>"]));
        let _ = generate(model.clone(), "x", SamplingParams::greedy(5)).unwrap();

        let seen = model.seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].len(), 2);
        assert_eq!(seen[1].len(), 3);
        assert_eq!(seen[2].len(), 4);
        assert!(seen[1].starts_with(&seen[0]));
        assert!(seen[2].starts_with(&seen[1]));
    }

    #[test]
    fn test_generate_joins_pieces() {
        let model = Arc::new(ScriptedModel::new("hello world", &["▁hello", "l", "▁world", "</s>"]));
        let generation = generate(model, "", SamplingParams::greedy(10)).unwrap();
        assert_eq!(generation.text, "hellol world");
        assert_eq!(generation.tokens, 3);
        assert_eq!(generation.finish_reason, FinishReason::Eos);
    }

    #[test]
    fn test_model_error_ends_stream() {
        let model = Arc::new(ScriptedModel::new("a", &["▁a"]));
        let mut stream = TokenStream::new(model, "", SamplingParams::greedy(5));
        assert!(stream.next().unwrap().is_ok());
        assert!(stream.next().unwrap().is_err());
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_time_limit_stops_before_next_call() {
        let model = Arc::new(ScriptedModel::new("a b", &["▁a", "▁b", "▁a"]));
        let mut stream = TokenStream::new(model.clone(), "", SamplingParams::greedy(3))
            .with_time_limit(Duration::ZERO);

        assert!(matches!(
            stream.next(),
            Some(Err(Error::Timeout { timeout_secs: 0 }))
        ));
        assert!(stream.next().is_none());
        assert_eq!(stream.steps(), 0);
        assert!(model.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_generate_within_reports_timeout() {
        let model = Arc::new(ScriptedModel::new("a b", &["▁a"]));
        let result = generate_within(model, "a", SamplingParams::greedy(1), Duration::ZERO);
        assert!(matches!(result, Err(Error::Timeout { .. })));
    }
}
