//! End-to-end pipeline: oracle round-trips over generated corpora,
//! training over the same corpus, and beam k-best output.

use trellis::{
    init_gold_batch, update_batch, ArcEager, BeamSearch, FeatureCache, GoldParse,
    HashEmbed, LinearScorer, ParserConfig, Tokens, TransitionSystem, CONTEXT_WIDTH,
};

fn mix(seed: u64, i: u64) -> u64 {
    let mut x = seed.wrapping_mul(0x9e37_79b9_7f4a_7c15).wrapping_add(i);
    x ^= x >> 31;
    x.wrapping_mul(0xff51_afd7_ed55_8ccd)
}

/// Drive a random legal walk and read its arcs back as a gold parse.
/// Everything generated this way is reachable by construction.
fn random_reachable_gold(system: &ArcEager, input: &Tokens, seed: u64) -> GoldParse {
    let mut state = system.initial_state(input, 0);
    let mut mask = trellis::ActionMask::new(system.n_classes());
    let mut i = 0u64;
    while !system.is_final(&state) {
        system.legal(&state, &mut mask);
        let legal: Vec<usize> = mask.iter_ones().collect();
        let class = legal[(mix(seed, i) as usize) % legal.len()];
        system.apply(&mut state, class);
        i += 1;
    }
    let heads = (0..input.len()).map(|t| state.head(t)).collect();
    let labels = (0..input.len()).map(|t| state.label(t)).collect();
    GoldParse::new(heads, labels).unwrap()
}

fn corpus(system: &ArcEager, seed: u64) -> (Vec<Tokens>, Vec<GoldParse>) {
    let mut inputs = Vec::new();
    let mut golds = Vec::new();
    for i in 0..12u64 {
        let len = 1 + (mix(seed, 100 + i) as usize) % 14;
        let ids = (0..len).map(|k| (mix(seed, i * 31 + k as u64) % 500) as u32).collect();
        let input = Tokens::new(ids);
        let gold = random_reachable_gold(system, &input, seed ^ i);
        inputs.push(input);
        golds.push(gold);
    }
    (inputs, golds)
}

#[test]
fn oracle_round_trips_generated_corpus() {
    let system = ArcEager::with_labels(["det", "nsubj", "obj"]);
    for seed in 0..3u64 {
        let (inputs, golds) = corpus(&system, seed);
        for (input, gold) in inputs.iter().zip(&golds) {
            let seq = system.oracle_sequence(input, gold).unwrap();
            let mut state = system.initial_state(input, 0);
            for &class in &seq {
                system.apply(&mut state, class);
            }
            assert!(system.is_final(&state));
            for t in 0..input.len() {
                assert_eq!(state.head(t), gold.head(t));
                assert_eq!(state.label(t), gold.label(t));
            }
        }
    }
}

#[test]
fn training_consumes_generated_corpus() {
    let system = ArcEager::with_labels(["det", "nsubj"]);
    let n = system.n_classes();
    let hidden = 5;
    let (inputs, golds) = corpus(&system, 7);
    let tok2vec = HashEmbed::new(CONTEXT_WIDTH * hidden);
    let scorer = LinearScorer::new(hidden, n);

    let stats = update_batch(&system, &inputs, &golds, &tok2vec, &scorer).unwrap();
    assert_eq!(stats.skipped, 0);
    assert!(stats.examples >= inputs.len());
    assert!(stats.steps > 0);
    assert!(stats.loss.is_finite());
}

#[test]
fn windows_start_on_the_oracle_path() {
    let system = ArcEager::new();
    let input = Tokens::new((0..30).collect());
    let gold = random_reachable_gold(&system, &input, 11);
    let (examples, window, skipped) =
        init_gold_batch(&system, std::slice::from_ref(&input), std::slice::from_ref(&gold), &[0]).unwrap();
    assert_eq!(skipped, 0);
    assert!(examples.len() > 1);
    for example in &examples {
        // Window starts sit on oracle step boundaries.
        assert_eq!(example.state.steps() % window, 0);
        // And carry only arcs consistent with the gold.
        for t in 0..input.len() {
            if let Some(h) = example.state.head(t) {
                assert_eq!(gold.head(t), Some(h));
            }
        }
    }
}

#[test]
fn beam_k_best_is_ranked_and_final() {
    let system = ArcEager::with_labels(["a"]);
    let n = system.n_classes();
    let hidden = 4;
    let inputs = vec![Tokens::new(vec![10, 20, 30, 40, 50])];
    let cache =
        FeatureCache::build(&inputs, &HashEmbed::new(CONTEXT_WIDTH * hidden), CONTEXT_WIDTH)
            .unwrap();
    let weights = (0..hidden * n).map(|i| ((i % 7) as f32) * 0.3 - 0.9).collect();
    let scorer = LinearScorer::from_weights(weights, vec![0.0; n], hidden, n);
    let engine = BeamSearch::new(
        system,
        ParserConfig {
            beam_width: 6,
            hidden_width: hidden,
            ..Default::default()
        },
    )
    .unwrap();
    let beams = engine.parse_batch(&inputs, &cache, &scorer).unwrap();
    let beam = &beams[0];
    assert!(!beam.is_empty() && beam.len() <= 6);
    for hyp in beam.hyps() {
        assert!(hyp.state.is_final());
    }
    for pair in beam.hyps().windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    // No two hypotheses share structural content.
    let mut hashes: Vec<u64> = beam.hyps().iter().map(|h| h.state.content_hash()).collect();
    hashes.sort_unstable();
    hashes.dedup();
    assert_eq!(hashes.len(), beam.len());
}
