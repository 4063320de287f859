//! Gold-window batching and the batched update driver.
//!
//! Long inputs are split into fixed-length training windows so step
//! counts stay balanced across a batch: the window length is the minimum
//! input length in the batch, clamped to `[MIN_WINDOW, MAX_WINDOW]`, and
//! each window's start state is produced by fast-forwarding along the
//! input's oracle sequence. Inputs whose gold is unreachable are skipped
//! per-example, never failing the batch.

use log::debug;

use crate::error::{Error, Result};
use crate::features::FeatureTable;
use crate::scorer::{Scorer, Tok2Vec};
use crate::search::{argmax_valid, fill_features};
use crate::state::{ParseState, CONTEXT_WIDTH, NO_TOKEN};
use crate::train::oracle_loss::cost_sensitive_grad;
use crate::transition::{ActionMask, TransitionSystem};
use crate::types::{GoldParse, Tokens};

/// Smallest training-window length.
pub const MIN_WINDOW: usize = 5;
/// Largest training-window length.
pub const MAX_WINDOW: usize = 50;

/// One training window: a state fast-forwarded to the window start and
/// the number of transitions left in its budget.
pub struct TrainExample {
    /// State at the window start.
    pub state: ParseState,
    /// Index of the owning input in the batch.
    pub input_ix: usize,
    /// Remaining transitions in this window.
    pub budget: usize,
}

/// Aggregate result of one training call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateStats {
    /// Windows trained.
    pub examples: usize,
    /// Lock-step rounds executed.
    pub steps: usize,
    /// Summed loss over all scored states.
    pub loss: f32,
    /// Inputs skipped because their gold was unreachable.
    pub skipped: usize,
}

/// Split a batch into oracle-aligned training windows.
///
/// Returns the windows, the window length, and the number of skipped
/// inputs. `offsets[i]` places input `i`'s states in the batch feature
/// table.
pub fn init_gold_batch<S: TransitionSystem>(
    system: &S,
    inputs: &[Tokens],
    golds: &[GoldParse],
    offsets: &[usize],
) -> Result<(Vec<TrainExample>, usize, usize)> {
    if inputs.len() != golds.len() || inputs.len() != offsets.len() {
        return Err(Error::invalid_input(format!(
            "{} inputs, {} golds, {} offsets",
            inputs.len(),
            golds.len(),
            offsets.len()
        )));
    }
    let window = inputs
        .iter()
        .map(Tokens::len)
        .min()
        .unwrap_or(0)
        .clamp(MIN_WINDOW, MAX_WINDOW);
    let mut examples = Vec::new();
    let mut skipped = 0usize;
    for (i, (input, gold)) in inputs.iter().zip(golds).enumerate() {
        let oracle = match system.oracle_sequence(input, gold) {
            Ok(seq) => seq,
            Err(Error::Oracle(reason)) => {
                debug!("skipping input {i}: {reason}");
                skipped += 1;
                continue;
            }
            Err(e) => return Err(e),
        };
        if oracle.is_empty() {
            continue;
        }
        let mut state = system.initial_state(input, offsets[i]);
        examples.push(TrainExample {
            state: state.clone(),
            input_ix: i,
            budget: window,
        });
        for (k, &class) in oracle.iter().enumerate() {
            system.apply(&mut state, class);
            if (k + 1) % window == 0 && k + 1 < oracle.len() {
                examples.push(TrainExample {
                    state: state.clone(),
                    input_ix: i,
                    budget: window,
                });
            }
        }
    }
    Ok((examples, window, skipped))
}

/// One training pass over a batch: embed, window, advance each window by
/// the scorer's own greedy choices, accumulate cost-sensitive gradients,
/// and hand them back through the scorer and tok2vec backward hooks.
///
/// A batch with no usable gold returns a default [`UpdateStats`] rather
/// than an error.
pub fn update_batch<S: TransitionSystem>(
    system: &S,
    inputs: &[Tokens],
    golds: &[GoldParse],
    tok2vec: &dyn Tok2Vec,
    scorer: &dyn Scorer,
) -> Result<UpdateStats> {
    if inputs.is_empty() || golds.is_empty() {
        return Ok(UpdateStats::default());
    }
    if inputs.len() != golds.len() {
        return Err(Error::invalid_input(format!(
            "{} golds for {} inputs",
            golds.len(),
            inputs.len()
        )));
    }
    let embedded = tok2vec.embed(inputs);
    let tok_backward = embedded.backward;
    let lens: Vec<usize> = inputs.iter().map(Tokens::len).collect();
    let table = FeatureTable::from_rows(embedded.rows, embedded.width, CONTEXT_WIDTH, &lens)?;
    let offsets: Vec<usize> = (0..inputs.len()).map(|i| table.offset_of(i)).collect();

    let (mut examples, window, skipped) = init_gold_batch(system, inputs, golds, &offsets)?;
    let mut stats = UpdateStats {
        examples: examples.len(),
        skipped,
        ..Default::default()
    };
    if examples.is_empty() {
        return Ok(stats);
    }

    let n = system.n_classes();
    let width = table.chunk();
    if scorer.n_classes() != n || scorer.feature_width() != width {
        return Err(Error::invalid_input(
            "scorer geometry does not match system/cache".to_string(),
        ));
    }
    let mut mask = ActionMask::new(n);
    let mut costs = vec![0.0f32; n];
    let mut ctx = [NO_TOKEN; CONTEXT_WIDTH];
    let mut ctx_rows: Vec<[i32; CONTEXT_WIDTH]> = Vec::new();
    let mut d_rows = vec![0.0f32; table.values_len()];

    for _round in 0..window {
        let live: Vec<usize> = (0..examples.len())
            .filter(|&e| {
                examples[e].budget > 0 && !system.is_final(&examples[e].state)
            })
            .collect();
        if live.is_empty() {
            break;
        }
        let mut feats = vec![0.0f32; live.len() * width];
        ctx_rows.clear();
        for (r, &e) in live.iter().enumerate() {
            fill_features(
                &table,
                &examples[e].state,
                &mut ctx,
                &mut feats[r * width..(r + 1) * width],
            );
            ctx_rows.push(ctx);
        }
        let (scores, backward) = scorer.score_with_grad(&feats, live.len());
        let mut d_scores = vec![0.0f32; live.len() * n];
        for (r, &e) in live.iter().enumerate() {
            let example = &mut examples[e];
            let gold = &golds[example.input_ix];
            system.legal(&example.state, &mut mask);
            if !mask.any() {
                return Err(Error::state(format!(
                    "no legal action at non-final state (step {})",
                    example.state.steps()
                )));
            }
            system.costs(&example.state, gold, &mask, &mut costs);
            stats.loss += cost_sensitive_grad(
                scores.row(r),
                &costs,
                &mask,
                &mut d_scores[r * n..(r + 1) * n],
            );
            // Error exploration: follow the scorer's guess, not the
            // oracle, so training sees the states inference will see.
            let class = argmax_valid(scores.row(r), &mask).ok_or_else(|| {
                Error::state("legal mask emptied during scoring".to_string())
            })?;
            system.apply(&mut example.state, class);
            example.budget -= 1;
        }
        let d_feats = backward(&d_scores);
        for (r, ctx) in ctx_rows.iter().enumerate() {
            table.scatter_features(ctx, &d_feats[r * width..(r + 1) * width], &mut d_rows);
        }
        stats.steps += 1;
    }
    if let Some(backward) = tok_backward {
        backward(&d_rows);
    }
    debug!(
        "update: {} windows, {} rounds, loss {:.4}, {} skipped",
        stats.examples, stats.steps, stats.loss, stats.skipped
    );
    Ok(stats)
}
