//! Search engines over transition systems.
//!
//! Two drivers consume the same [`crate::transition::TransitionSystem`]
//! interface: [`BatchedGreedy`] advances one hypothesis per input in
//! lock-step, [`BeamSearch`] tracks up to `beam_width` hypotheses per
//! input. Both make exactly one scorer call per round across the whole
//! live batch.

pub mod beam;
pub mod greedy;

pub use beam::{Beam, BeamHyp, BeamSearch, Violation};
pub use greedy::BatchedGreedy;

use crate::features::FeatureTable;
use crate::state::{ParseState, CONTEXT_WIDTH, NO_TOKEN};
use crate::transition::ActionMask;

/// Highest-scoring legal class, ties broken toward the lowest class id.
/// `None` iff no mask bit is set.
pub(crate) fn argmax_valid(scores: &[f32], mask: &ActionMask) -> Option<usize> {
    let mut best = None;
    let mut best_score = f32::NEG_INFINITY;
    for class in mask.iter_ones() {
        if scores[class] > best_score {
            best_score = scores[class];
            best = Some(class);
        }
    }
    best
}

/// Assemble a state's summed feature vector: extract the context, shift
/// the per-input token ids to global table rows, sum cached chunks.
pub(crate) fn fill_features(
    table: &FeatureTable,
    state: &ParseState,
    ctx: &mut [i32; CONTEXT_WIDTH],
    out: &mut [f32],
) {
    state.context(ctx);
    let offset = state.offset() as i32;
    for t in ctx.iter_mut() {
        if *t >= 0 {
            *t += offset;
        } else {
            *t = NO_TOKEN;
        }
    }
    table.sum_features(ctx, out);
}
