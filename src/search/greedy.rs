//! Batched single-best search.
//!
//! All non-final states advance one transition per round. With a hidden
//! scorer stage the round gathers every live state's features into one
//! scorer call (amortizing the matrix multiply); without one, each
//! state's step is independent of every other state's and runs fully in
//! parallel against the read-only feature table.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;

use crate::error::{Error, Result};
use crate::features::FeatureCache;
use crate::scorer::Scorer;
use crate::search::{argmax_valid, fill_features};
use crate::state::{ParseState, CONTEXT_WIDTH, NO_TOKEN};
use crate::transition::{ActionMask, TransitionSystem};
use crate::types::Tokens;

/// Greedy lock-step driver over a batch of inputs.
pub struct BatchedGreedy<S> {
    system: S,
    stop: Option<Arc<AtomicBool>>,
}

impl<S: TransitionSystem + Sync> BatchedGreedy<S> {
    /// Driver over a transition system.
    #[must_use]
    pub fn new(system: S) -> Self {
        Self { system, stop: None }
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

    /// Parse every input to a final state.
    pub fn parse_batch(
        &self,
        inputs: &[Tokens],
        cache: &FeatureCache,
        scorer: &dyn Scorer,
    ) -> Result<Vec<ParseState>> {
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
        let mut states: Vec<ParseState> = inputs
            .iter()
            .enumerate()
            .map(|(i, input)| self.system.initial_state(input, table.offset_of(i)))
            .collect();

        let width = table.chunk();
        let mut mask = ActionMask::new(n);
        let mut rounds = 0usize;
        loop {
            if let Some(stop) = &self.stop {
                if stop.load(Ordering::Relaxed) {
                    return Err(Error::Interrupted);
                }
            }
            let live: Vec<usize> = (0..states.len())
                .filter(|&i| !self.system.is_final(&states[i]))
                .collect();
            if live.is_empty() {
                break;
            }
            if scorer.has_hidden_layer() {
                // Full path: one scorer call for the whole round.
                let mut ctx = [NO_TOKEN; CONTEXT_WIDTH];
                let mut feats = vec![0.0f32; live.len() * width];
                for (r, &i) in live.iter().enumerate() {
                    fill_features(table, &states[i], &mut ctx, &mut feats[r * width..(r + 1) * width]);
                }
                let scores = scorer.score(&feats, live.len());
                for (r, &i) in live.iter().enumerate() {
                    let state = &mut states[i];
                    self.system.legal(state, &mut mask);
                    let class = argmax_valid(scores.row(r), &mask)
                        .ok_or_else(|| no_legal_action(state))?;
                    self.system.apply(state, class);
                }
            } else {
                self.advance_round_fast(&mut states, table, scorer)?;
            }
            rounds += 1;
        }
        debug!(
            "greedy parse: {} inputs final after {rounds} rounds",
            states.len()
        );
        Ok(states)
    }

    /// No-hidden-layer fast path: each live state's step touches only its
    /// own state plus the read-only table, so states advance in parallel.
    #[cfg(feature = "parallel")]
    fn advance_round_fast(
        &self,
        states: &mut [ParseState],
        table: &crate::features::FeatureTable,
        scorer: &dyn Scorer,
    ) -> Result<()> {
        use rayon::prelude::*;
        let system = &self.system;
        let n = system.n_classes();
        let width = table.chunk();
        states
            .par_iter_mut()
            .filter(|state| !system.is_final(state))
            .try_for_each_init(
                || {
                    (
                        ActionMask::new(n),
                        vec![0.0f32; width],
                        vec![0.0f32; n],
                        [NO_TOKEN; CONTEXT_WIDTH],
                    )
                },
                |(mask, feats, scores, ctx), state| {
                    fill_features(table, state, ctx, feats);
                    scorer.score_one(feats, scores);
                    system.legal(state, mask);
                    let class =
                        argmax_valid(scores, mask).ok_or_else(|| no_legal_action(state))?;
                    system.apply(state, class);
                    Ok(())
                },
            )
    }

    #[cfg(not(feature = "parallel"))]
    fn advance_round_fast(
        &self,
        states: &mut [ParseState],
        table: &crate::features::FeatureTable,
        scorer: &dyn Scorer,
    ) -> Result<()> {
        let n = self.system.n_classes();
        let width = table.chunk();
        let mut mask = ActionMask::new(n);
        let mut feats = vec![0.0f32; width];
        let mut scores = vec![0.0f32; n];
        let mut ctx = [NO_TOKEN; CONTEXT_WIDTH];
        for state in states.iter_mut() {
            if self.system.is_final(state) {
                continue;
            }
            fill_features(table, state, &mut ctx, &mut feats);
            scorer.score_one(&feats, &mut scores);
            self.system.legal(state, &mut mask);
            let class = argmax_valid(&scores, &mask).ok_or_else(|| no_legal_action(state))?;
            self.system.apply(state, class);
        }
        Ok(())
    }
}

fn no_legal_action(state: &ParseState) -> Error {
    Error::state(format!(
        "no legal action at non-final state (step {}, stack depth {})",
        state.steps(),
        state.stack_len()
    ))
}
