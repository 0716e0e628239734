use modelhost::model::{
    FinishReason, LanguageModel, NgramModel, SamplingParams, TokenStream, generate,
    tokenizer::EOS_TOKEN_ID,
};
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::sync::Arc;

const CORPUS: &str = include_str!("../assets/corpus.txt");

fn trained_model() -> Arc<dyn LanguageModel> {
    Arc::new(NgramModel::train(CORPUS).unwrap())
}

fn sampled(max_new_tokens: usize, seed: u64) -> SamplingParams {
    SamplingParams {
        max_new_tokens,
        temperature: 1.0,
        top_k: 40,
        top_p: 0.9,
        seed: Some(seed),
    }
}

#[rstest]
#[case(1)]
#[case(7)]
#[case(42)]
#[case(1234)]
fn test_budget_bounds_every_run(#[case] seed: u64) {
    let model = trained_model();
    for budget in [1, 5, 32] {
        let mut stream = TokenStream::new(model.clone(), "The server", sampled(budget, seed));
        let emitted = stream.by_ref().map(|t| t.unwrap()).count();

        assert!(stream.steps() <= budget);
        assert!(emitted <= budget);
        assert_eq!(emitted, stream.generated_ids().len());
        assert!(!stream.generated_ids().contains(&EOS_TOKEN_ID));

        match stream.finish_reason() {
            Some(FinishReason::Length) => assert_eq!(emitted, budget),
            Some(FinishReason::Eos) => assert_eq!(stream.steps(), emitted + 1),
            None => panic!("finished stream must report a reason"),
        }
    }
}

#[rstest]
#[case("The model", 3)]
#[case("Each request", 19)]
#[case("unseen words here", 5)]
fn test_streamed_pieces_join_to_generated_text(#[case] prompt: &str, #[case] seed: u64) {
    let model = trained_model();
    let params = sampled(24, seed);

    let streamed: String = TokenStream::new(model.clone(), prompt, params.clone())
        .map(|t| t.unwrap().text)
        .collect();
    let generation = generate(model, prompt, params).unwrap();

    assert_eq!(streamed.trim_start(), generation.text);
}

#[test]
fn test_greedy_ignores_seed() {
    let model = trained_model();
    let first = generate(
        model.clone(),
        "The loop",
        SamplingParams {
            seed: Some(1),
            ..SamplingParams::greedy(20)
        },
    )
    .unwrap();
    let second = generate(
        model,
        "The loop",
        SamplingParams {
            seed: Some(99),
            ..SamplingParams::greedy(20)
        },
    )
    .unwrap();

    assert_eq!(first, second);
}

#[test]
fn test_generated_text_has_no_markers() {
    let model = trained_model();
    for seed in 0..20 {
        let generation = generate(model.clone(), "A", sampled(30, seed)).unwrap();
        assert!(!generation.text.contains('▁'));
        assert!(!generation.text.contains("</s>"));
        assert!(!generation.text.starts_with(' '));
    }
}
