//! Beam search over transition systems.
//!
//! Per input the engine tracks up to `beam_width` hypotheses in an arena,
//! addressed by index; candidates reference their parent hypothesis by
//! index and only clone a state when a branch actually survives ranking.
//! Two candidates reaching structurally identical states (equal
//! [`ParseState::content_hash`]) are the same hypothesis; the
//! higher-scoring one wins, which keeps duplicates from consuming beam
//! width.
//!
//! With golds supplied, every hypothesis carries its cumulative
//! structural cost, and the round at which the last gold-consistent
//! hypothesis falls out of the beam is recorded as the [`Violation`],
//! the integration point for max-violation beam training.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::trace;
use rustc_hash::FxHashSet;

use crate::config::ParserConfig;
use crate::error::{Error, Result};
use crate::features::FeatureCache;
use crate::scorer::{Scorer, Scores};
use crate::search::fill_features;
use crate::state::{ParseState, CONTEXT_WIDTH, NO_TOKEN};
use crate::transition::{ActionMask, TransitionSystem};
use crate::types::{GoldParse, Tokens};

/// The point where the beam lost its last gold-consistent hypothesis.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    /// Round index at which the loss happened.
    pub step: usize,
    /// Cumulative score of the beam's best hypothesis at that round.
    pub score: f32,
    /// Action history of that best hypothesis.
    pub history: Vec<u32>,
}

/// One ranked hypothesis in a finished beam.
#[derive(Debug, Clone)]
pub struct BeamHyp {
    /// Final parse state.
    pub state: ParseState,
    /// Cumulative score over the action sequence.
    pub score: f32,
    /// Cumulative structural cost against the gold (0.0 when parsed
    /// without golds).
    pub cost: f32,
}

/// A finished beam, ranked by cumulative score descending. Hypothesis 0
/// is the parse result; the full list is the k-best surface.
#[derive(Debug)]
pub struct Beam {
    hyps: Vec<BeamHyp>,
    violation: Option<Violation>,
}

impl Beam {
    /// The highest-scoring hypothesis.
    ///
    /// A finished beam always holds at least one hypothesis.
    #[must_use]
    pub fn best(&self) -> &BeamHyp {
        &self.hyps[0]
    }

    /// All surviving hypotheses, best first.
    #[must_use]
    pub fn hyps(&self) -> &[BeamHyp] {
        &self.hyps
    }

    /// Number of surviving hypotheses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hyps.len()
    }

    /// True when nothing survived (never the case for a finished beam).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hyps.is_empty()
    }

    /// Max-violation record, when parsed with golds and the beam lost
    /// every gold-consistent hypothesis.
    #[must_use]
    pub fn violation(&self) -> Option<&Violation> {
        self.violation.as_ref()
    }
}

struct Hyp {
    state: ParseState,
    score: f32,
    cost: f32,
    is_final: bool,
}

struct SearchBeam {
    hyps: Vec<Hyp>,
    done: bool,
    violation: Option<Violation>,
}

enum Cand {
    /// Finalized hypothesis carried through unexpanded.
    Carry { parent: usize, score: f32 },
    /// Live hypothesis expanded with one action.
    Expand {
        parent: usize,
        class: usize,
        score: f32,
        cost: f32,
    },
}

impl Cand {
    fn score(&self) -> f32 {
        match self {
            Cand::Carry { score, .. } | Cand::Expand { score, .. } => *score,
        }
    }

    /// Deterministic tie order: expansion class ascending, carries last,
    /// then parent index.
    fn tie_key(&self) -> (usize, usize) {
        match self {
            Cand::Expand { class, parent, .. } => (*class, *parent),
            Cand::Carry { parent, .. } => (usize::MAX, *parent),
        }
    }
}

/// Beam-search driver over a batch of inputs.
pub struct BeamSearch<S> {
    system: S,
    config: ParserConfig,
    stop: Option<Arc<AtomicBool>>,
}

impl<S: TransitionSystem> BeamSearch<S> {
    /// Driver with the given width/density configuration.
    pub fn new(system: S, config: ParserConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            system,
            config,
            stop: None,
        })
    }

    /// Install a cooperative stop flag, polled once per round.
    #[must_use]
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    /// The underlying transition system.
    pub fn system(&self) -> &S {
        &self.system
    }

    /// Parse every input, returning one finished beam per input.
    pub fn parse_batch(
        &self,
        inputs: &[Tokens],
        cache: &FeatureCache,
        scorer: &dyn Scorer,
    ) -> Result<Vec<Beam>> {
        self.search(inputs, None, cache, scorer)
    }

    /// Parse with gold annotations, tracking per-hypothesis cost and the
    /// max-violation point.
    pub fn parse_batch_with_gold(
        &self,
        inputs: &[Tokens],
        golds: &[GoldParse],
        cache: &FeatureCache,
        scorer: &dyn Scorer,
    ) -> Result<Vec<Beam>> {
        if golds.len() != inputs.len() {
            return Err(Error::invalid_input(format!(
                "{} golds for {} inputs",
                golds.len(),
                inputs.len()
            )));
        }
        self.search(inputs, Some(golds), cache, scorer)
    }

    fn search(
        &self,
        inputs: &[Tokens],
        golds: Option<&[GoldParse]>,
        cache: &FeatureCache,
        scorer: &dyn Scorer,
    ) -> Result<Vec<Beam>> {
        let table = cache.table()?;
        let n = self.system.n_classes();
        if scorer.n_classes() != n {
            return Err(Error::invalid_input(format!(
                "scorer covers {} classes, system has {n}",
                scorer.n_classes()
            )));
        }
        if scorer.feature_width() != table.chunk() {
            return Err(Error::invalid_input(format!(
                "scorer expects {}-wide features, cache provides {}",
                scorer.feature_width(),
                table.chunk()
            )));
        }
        let width = self.config.beam_width;
        let mut beams: Vec<SearchBeam> = inputs
            .iter()
            .enumerate()
            .map(|(i, input)| {
                let initial = self.system.initial_state(input, table.offset_of(i));
                let is_final = self.system.is_final(&initial);
                let hyps: Vec<Hyp> = (0..width)
                    .map(|_| Hyp {
                        state: initial.clone(),
                        score: 0.0,
                        cost: 0.0,
                        is_final,
                    })
                    .collect();
                SearchBeam {
                    hyps,
                    done: is_final,
                    violation: None,
                }
            })
            .collect();

        let feat_width = table.chunk();
        let mut mask = ActionMask::new(n);
        let mut costbuf = vec![0.0f32; n];
        let mut step = 0usize;
        let step_limit = 2 * inputs.iter().map(Tokens::len).max().unwrap_or(0) + 4;
        while beams.iter().any(|b| !b.done) {
            if let Some(stop) = &self.stop {
                if stop.load(Ordering::Relaxed) {
                    return Err(Error::Interrupted);
                }
            }
            if step > step_limit {
                return Err(Error::state(format!(
                    "beam search exceeded {step_limit} rounds without terminating"
                )));
            }
            // One scorer call per round across every live hypothesis of
            // every beam.
            let mut ctx = [NO_TOKEN; CONTEXT_WIDTH];
            let mut feats = Vec::new();
            let mut rows = 0usize;
            let mut row_of: Vec<Vec<Option<usize>>> = Vec::with_capacity(beams.len());
            for beam in &beams {
                let mut beam_rows = vec![None; beam.hyps.len()];
                if !beam.done {
                    for (h, hyp) in beam.hyps.iter().enumerate() {
                        if hyp.is_final {
                            continue;
                        }
                        feats.resize(feats.len() + feat_width, 0.0);
                        let start = rows * feat_width;
                        fill_features(
                            table,
                            &hyp.state,
                            &mut ctx,
                            &mut feats[start..start + feat_width],
                        );
                        beam_rows[h] = Some(rows);
                        rows += 1;
                    }
                }
                row_of.push(beam_rows);
            }
            let scores = scorer.score(&feats, rows);
            for (b, beam) in beams.iter_mut().enumerate() {
                if beam.done {
                    continue;
                }
                let gold = golds.map(|g| &g[b]);
                self.advance_beam(beam, &scores, &row_of[b], gold, &mut mask, &mut costbuf, step)?;
            }
            trace!("beam round {step}: {rows} live hypotheses scored");
            step += 1;
        }
        Ok(beams
            .into_iter()
            .map(|beam| Beam {
                hyps: beam
                    .hyps
                    .into_iter()
                    .map(|h| BeamHyp {
                        state: h.state,
                        score: h.score,
                        cost: h.cost,
                    })
                    .collect(),
                violation: beam.violation,
            })
            .collect())
    }

    fn advance_beam(
        &self,
        beam: &mut SearchBeam,
        scores: &Scores,
        row_of: &[Option<usize>],
        gold: Option<&GoldParse>,
        mask: &mut ActionMask,
        costbuf: &mut [f32],
        step: usize,
    ) -> Result<()> {
        let mut cands: Vec<Cand> = Vec::new();
        for (h, hyp) in beam.hyps.iter().enumerate() {
            if hyp.is_final {
                cands.push(Cand::Carry {
                    parent: h,
                    score: hyp.score,
                });
                continue;
            }
            let row = row_of[h].map(|r| scores.row(r)).ok_or_else(|| {
                Error::state("live hypothesis missing a score row".to_string())
            })?;
            self.system.legal(&hyp.state, mask);
            if !mask.any() {
                return Err(Error::state(format!(
                    "no legal action at non-final state (step {})",
                    hyp.state.steps()
                )));
            }
            if let Some(gold) = gold {
                self.system.costs(&hyp.state, gold, mask, costbuf);
            }
            for class in mask.iter_ones() {
                let delta = if gold.is_some() { costbuf[class] } else { 0.0 };
                cands.push(Cand::Expand {
                    parent: h,
                    class,
                    score: hyp.score + row[class],
                    cost: hyp.cost + delta,
                });
            }
        }
        cands.sort_by(|a, b| {
            b.score()
                .partial_cmp(&a.score())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.tie_key().cmp(&b.tie_key()))
        });
        if self.config.beam_density > 0.0 {
            let best = cands.first().map_or(0.0, Cand::score);
            if best > 0.0 {
                let cutoff = best * (1.0 - self.config.beam_density);
                cands.retain(|c| c.score() >= cutoff);
            }
        }
        let mut next: Vec<Hyp> = Vec::with_capacity(self.config.beam_width);
        let mut seen: FxHashSet<u64> = FxHashSet::default();
        for cand in cands {
            if next.len() == self.config.beam_width {
                break;
            }
            match cand {
                Cand::Carry { parent, score } => {
                    let hyp = &beam.hyps[parent];
                    if !seen.insert(hyp.state.content_hash()) {
                        continue;
                    }
                    next.push(Hyp {
                        state: hyp.state.clone(),
                        score,
                        cost: hyp.cost,
                        is_final: true,
                    });
                }
                Cand::Expand {
                    parent,
                    class,
                    score,
                    cost,
                } => {
                    let mut child = beam.hyps[parent].state.clone();
                    self.system.apply(&mut child, class);
                    if !seen.insert(child.content_hash()) {
                        continue;
                    }
                    let is_final = self.system.is_final(&child);
                    next.push(Hyp {
                        state: child,
                        score,
                        cost,
                        is_final,
                    });
                }
            }
        }
        if next.is_empty() {
            return Err(Error::state(
                "beam pruned every hypothesis in one round".to_string(),
            ));
        }
        if gold.is_some() && beam.violation.is_none() {
            let had_gold = beam.hyps.iter().any(|h| h.cost == 0.0);
            let has_gold = next.iter().any(|h| h.cost == 0.0);
            if had_gold && !has_gold {
                beam.violation = Some(Violation {
                    step,
                    score: next[0].score,
                    history: next[0].state.history().to_vec(),
                });
            }
        }
        beam.done = next.iter().all(|h| h.is_final);
        beam.hyps = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorer::{HashEmbed, LinearScorer};
    use crate::transition::ArcEager;

    fn cache_for(inputs: &[Tokens], chunk: usize) -> FeatureCache {
        FeatureCache::build(inputs, &HashEmbed::new(CONTEXT_WIDTH * chunk), CONTEXT_WIDTH)
            .unwrap()
    }

    fn config(width: usize, density: f32) -> ParserConfig {
        ParserConfig {
            beam_width: width,
            beam_density: density,
            hidden_width: 2,
            pieces: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_tied_scores_collapse_to_one_hypothesis() {
        // Width 4, all scores tied, one legal action per round: the
        // seeded duplicates collapse through hash dedup.
        let system = ArcEager::new();
        let n = system.n_classes();
        let inputs = vec![Tokens::new(vec![7])];
        let cache = cache_for(&inputs, 2);
        let scorer = LinearScorer::new(2, n);
        let engine = BeamSearch::new(system, config(4, 0.0)).unwrap();
        let beams = engine.parse_batch(&inputs, &cache, &scorer).unwrap();
        assert_eq!(beams[0].len(), 1);
        assert!(beams[0].best().state.is_final());
    }

    #[test]
    fn test_tied_scores_keep_distinct_structures() {
        let system = ArcEager::new();
        let n = system.n_classes();
        let inputs = vec![Tokens::new(vec![1, 2, 3, 4, 5])];
        let cache = cache_for(&inputs, 2);
        let scorer = LinearScorer::new(2, n);
        let engine = BeamSearch::new(system, config(4, 0.0)).unwrap();
        let beams = engine.parse_batch(&inputs, &cache, &scorer).unwrap();
        let beam = &beams[0];
        assert!(!beam.is_empty() && beam.len() <= 4);
        let mut hashes: Vec<u64> =
            beam.hyps().iter().map(|h| h.state.content_hash()).collect();
        hashes.sort_unstable();
        hashes.dedup();
        assert_eq!(hashes.len(), beam.len(), "beam holds duplicate structures");
    }

    #[test]
    fn test_ranked_by_score_descending() {
        let system = ArcEager::with_labels(["x"]);
        let n = system.n_classes();
        let inputs = vec![Tokens::new(vec![1, 2, 3])];
        let cache = cache_for(&inputs, 2);
        let bias: Vec<f32> = (0..n).map(|c| (c as f32) * 0.5 - 1.0).collect();
        let scorer = LinearScorer::from_weights(vec![0.0; 2 * n], bias, 2, n);
        let engine = BeamSearch::new(system, config(4, 0.0)).unwrap();
        let beams = engine.parse_batch(&inputs, &cache, &scorer).unwrap();
        let scores: Vec<f32> = beams[0].hyps().iter().map(|h| h.score).collect();
        for pair in scores.windows(2) {
            assert!(pair[0] >= pair[1]);
        }
    }

    #[test]
    fn test_density_pruning_narrows_beam() {
        let system = ArcEager::new();
        let n = system.n_classes();
        assert_eq!(n, 4);
        let inputs = vec![Tokens::new(vec![1, 2])];
        let cache = cache_for(&inputs, 2);
        // Shift strongly preferred; arcs score far below it.
        let bias = vec![10.0, 0.0, -10.0, -5.0];
        let scorer = LinearScorer::from_weights(vec![0.0; 2 * n], bias, 2, n);

        let wide = BeamSearch::new(system.clone(), config(4, 0.0))
            .unwrap()
            .parse_batch(&inputs, &cache, &scorer)
            .unwrap();
        assert!(wide[0].len() > 1);

        let pruned = BeamSearch::new(system, config(4, 0.5))
            .unwrap()
            .parse_batch(&inputs, &cache, &scorer)
            .unwrap();
        assert_eq!(pruned[0].len(), 1);
        // Pruning must not change the winner.
        assert_eq!(
            pruned[0].best().state.history(),
            wide[0].best().state.history()
        );
    }

    #[test]
    fn test_violation_recorded_when_gold_falls_out() {
        let system = ArcEager::new();
        let n = system.n_classes();
        let inputs = vec![Tokens::new(vec![1, 2])];
        let golds = vec![GoldParse::unlabeled(vec![Some(1), None]).unwrap()];
        let cache = cache_for(&inputs, 2);
        // Width 1 and a scorer that always shifts: the gold LeftArc at
        // round 1 is never taken.
        let bias = vec![5.0, 0.0, 0.0, 0.0];
        let scorer = LinearScorer::from_weights(vec![0.0; 2 * n], bias, 2, n);
        let engine = BeamSearch::new(system, config(1, 0.0)).unwrap();
        let beams = engine
            .parse_batch_with_gold(&inputs, &golds, &cache, &scorer)
            .unwrap();
        let v = beams[0].violation().expect("gold fell out of the beam");
        assert_eq!(v.step, 1);
        assert!(beams[0].best().cost > 0.0);
    }

    #[test]
    fn test_gold_consistent_beam_has_no_violation() {
        let system = ArcEager::new();
        let n = system.n_classes();
        let inputs = vec![Tokens::new(vec![1, 2])];
        let golds = vec![GoldParse::unlabeled(vec![Some(1), None]).unwrap()];
        let cache = cache_for(&inputs, 2);
        // A scorer that prefers the gold LeftArc keeps the zero-cost
        // hypothesis ranked into the beam at every round.
        let bias = vec![0.0, 0.0, 5.0, 0.0];
        let scorer = LinearScorer::from_weights(vec![0.0; 2 * n], bias, 2, n);
        let engine = BeamSearch::new(system, config(4, 0.0)).unwrap();
        let beams = engine
            .parse_batch_with_gold(&inputs, &golds, &cache, &scorer)
            .unwrap();
        assert!(beams[0].violation().is_none());
        assert!(beams[0].hyps().iter().any(|h| h.cost == 0.0));
        assert_eq!(beams[0].best().cost, 0.0);
    }

    #[test]
    fn test_empty_input_beam() {
        let system = ArcEager::new();
        let inputs = vec![Tokens::default()];
        let cache = cache_for(&inputs, 2);
        let scorer = LinearScorer::new(2, system.n_classes());
        let engine = BeamSearch::new(system, config(4, 0.0)).unwrap();
        let beams = engine.parse_batch(&inputs, &cache, &scorer).unwrap();
        assert_eq!(beams[0].len(), 4);
        assert!(beams[0].best().state.is_final());
    }
}
