//! Precomputed per-token feature table.
//!
//! Search makes the embedding cost per step vanish by paying it once per
//! batch:
//!
//! ```text
//! build (once per batch)          per step, per state
//! ───────────────────────         ─────────────────────────────
//! embed every token into          gather 13 context slots,
//! 13 slot-specific chunks   ──►   sum 13 cached chunks
//! (one bulk matrix product)       (no embedding work at all)
//! ```
//!
//! The table is immutable after build, so concurrent readers across
//! search threads are safe. When the embed runs on a background thread,
//! [`FeatureCache::table`] blocks until the handoff completes: lazily,
//! once, memoized.

use std::sync::Mutex;

use crossbeam_channel::{bounded, Receiver};
use once_cell::sync::OnceCell;

use crate::error::{Error, Result};
use crate::scorer::Tok2Vec;
use crate::types::Tokens;

/// Immutable per-token feature rows for one batch.
#[derive(Debug, Clone)]
pub struct FeatureTable {
    /// `n_tokens x row_width`, row-major.
    rows: Vec<f32>,
    row_width: usize,
    /// Output width of [`FeatureTable::sum_features`].
    chunk: usize,
    context_width: usize,
    /// First global row of each input.
    offsets: Vec<usize>,
    n_tokens: usize,
}

impl FeatureTable {
    /// Wrap embedded rows for a batch with the given per-input lengths.
    ///
    /// `row_width` must split evenly into `context_width` slot chunks.
    pub fn from_rows(
        rows: Vec<f32>,
        row_width: usize,
        context_width: usize,
        input_lens: &[usize],
    ) -> Result<Self> {
        if context_width == 0 || row_width == 0 || row_width % context_width != 0 {
            return Err(Error::invalid_input(format!(
                "token row width {row_width} does not split into {context_width} slots"
            )));
        }
        let n_tokens: usize = input_lens.iter().sum();
        if rows.len() != n_tokens * row_width {
            return Err(Error::invalid_input(format!(
                "expected {} embedded values for {n_tokens} tokens, got {}",
                n_tokens * row_width,
                rows.len()
            )));
        }
        let mut offsets = Vec::with_capacity(input_lens.len());
        let mut acc = 0;
        for &len in input_lens {
            offsets.push(acc);
            acc += len;
        }
        Ok(Self {
            rows,
            row_width,
            chunk: row_width / context_width,
            context_width,
            offsets,
            n_tokens,
        })
    }

    /// Total tokens across the batch.
    #[must_use]
    pub fn n_tokens(&self) -> usize {
        self.n_tokens
    }

    /// Width of one summed feature vector.
    #[must_use]
    pub fn chunk(&self) -> usize {
        self.chunk
    }

    /// Number of context slots per token row.
    #[must_use]
    pub fn context_width(&self) -> usize {
        self.context_width
    }

    /// First global row of input `i`.
    #[must_use]
    pub fn offset_of(&self, input: usize) -> usize {
        self.offsets[input]
    }

    /// Length of the flattened row buffer (for gradient accumulators).
    #[must_use]
    pub fn values_len(&self) -> usize {
        self.rows.len()
    }

    /// Sum the slot chunks for the given global context ids into `out`.
    /// Negative ids are sentinels and contribute zero.
    pub fn sum_features(&self, ctx: &[i32], out: &mut [f32]) {
        debug_assert_eq!(ctx.len(), self.context_width);
        debug_assert_eq!(out.len(), self.chunk);
        out.fill(0.0);
        for (slot, &t) in ctx.iter().enumerate() {
            if t < 0 {
                continue;
            }
            let t = t as usize;
            debug_assert!(t < self.n_tokens, "context id {t} out of range");
            let base = t * self.row_width + slot * self.chunk;
            for (o, &v) in out.iter_mut().zip(&self.rows[base..base + self.chunk]) {
                *o += v;
            }
        }
    }

    /// Reverse of [`FeatureTable::sum_features`]: add `d` into every
    /// addressed slot chunk of `d_rows` (a buffer of
    /// [`FeatureTable::values_len`] zeros-initialized values).
    pub fn scatter_features(&self, ctx: &[i32], d: &[f32], d_rows: &mut [f32]) {
        debug_assert_eq!(ctx.len(), self.context_width);
        debug_assert_eq!(d.len(), self.chunk);
        debug_assert_eq!(d_rows.len(), self.rows.len());
        for (slot, &t) in ctx.iter().enumerate() {
            if t < 0 {
                continue;
            }
            let base = t as usize * self.row_width + slot * self.chunk;
            for (o, &v) in d_rows[base..base + self.chunk].iter_mut().zip(d) {
                *o += v;
            }
        }
    }
}

/// Collapse `units * pieces` summed values to `units` by taking the
/// maximum piece per unit, recording the winning piece index for the
/// backward pass.
pub fn maxout(summed: &[f32], pieces: usize, out: &mut [f32], which: &mut [usize]) {
    debug_assert!(pieces > 0);
    debug_assert_eq!(summed.len(), out.len() * pieces);
    debug_assert_eq!(out.len(), which.len());
    for u in 0..out.len() {
        let slice = &summed[u * pieces..(u + 1) * pieces];
        let mut best = 0;
        for (p, &v) in slice.iter().enumerate() {
            if v > slice[best] {
                best = p;
            }
        }
        out[u] = slice[best];
        which[u] = best;
    }
}

/// Batch feature cache: built once, read concurrently afterwards.
pub struct FeatureCache {
    cell: OnceCell<FeatureTable>,
    rx: Mutex<Option<Receiver<Result<FeatureTable>>>>,
}

impl FeatureCache {
    /// Build synchronously on the calling thread.
    pub fn build(
        inputs: &[Tokens],
        tok2vec: &dyn Tok2Vec,
        context_width: usize,
    ) -> Result<Self> {
        let embedded = tok2vec.embed(inputs);
        let lens: Vec<usize> = inputs.iter().map(Tokens::len).collect();
        let table = FeatureTable::from_rows(embedded.rows, embedded.width, context_width, &lens)?;
        Ok(Self {
            cell: OnceCell::with_value(table),
            rx: Mutex::new(None),
        })
    }

    /// Start the embed on a background thread; the handoff resolves on
    /// first use of [`FeatureCache::table`].
    #[must_use]
    pub fn build_async<T>(inputs: Vec<Tokens>, tok2vec: T, context_width: usize) -> Self
    where
        T: Tok2Vec + 'static,
    {
        let (tx, rx) = bounded(1);
        std::thread::spawn(move || {
            let embedded = tok2vec.embed(&inputs);
            let lens: Vec<usize> = inputs.iter().map(Tokens::len).collect();
            let table =
                FeatureTable::from_rows(embedded.rows, embedded.width, context_width, &lens);
            let _ = tx.send(table);
        });
        Self {
            cell: OnceCell::new(),
            rx: Mutex::new(Some(rx)),
        }
    }

    /// The built table, blocking until any outstanding background build
    /// lands. Evaluated lazily, once, memoized.
    pub fn table(&self) -> Result<&FeatureTable> {
        self.cell.get_or_try_init(|| {
            let rx = self
                .rx
                .lock()
                .map_err(|_| Error::state("feature cache lock poisoned"))?
                .take()
                .ok_or_else(|| Error::state("feature cache has no pending build"))?;
            rx.recv()
                .map_err(|_| Error::state("feature build thread dropped before sending"))?
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorer::HashEmbed;
    use crate::state::CONTEXT_WIDTH;

    /// 2 slots, chunk 2: token rows are [slot0 | slot1].
    fn small_table() -> FeatureTable {
        let rows = vec![
            1.0, 2.0, 3.0, 4.0, // token 0
            10.0, 20.0, 30.0, 40.0, // token 1
        ];
        FeatureTable::from_rows(rows, 4, 2, &[2]).unwrap()
    }

    #[test]
    fn test_all_sentinel_sums_to_zero() {
        let table = small_table();
        let mut out = [9.9, 9.9];
        table.sum_features(&[-1, -1], &mut out);
        assert_eq!(out, [0.0, 0.0]);
    }

    #[test]
    fn test_single_slot_returns_cached_chunk() {
        let table = small_table();
        let mut out = [0.0, 0.0];
        table.sum_features(&[1, -1], &mut out);
        assert_eq!(out, [10.0, 20.0]);
        table.sum_features(&[-1, 1], &mut out);
        assert_eq!(out, [30.0, 40.0]);
    }

    #[test]
    fn test_sum_over_slots() {
        let table = small_table();
        let mut out = [0.0, 0.0];
        table.sum_features(&[0, 1], &mut out);
        assert_eq!(out, [1.0 + 30.0, 2.0 + 40.0]);
    }

    #[test]
    fn test_scatter_mirrors_sum() {
        let table = small_table();
        let mut d_rows = vec![0.0; table.values_len()];
        table.scatter_features(&[0, 1], &[0.5, 1.5], &mut d_rows);
        assert_eq!(d_rows, vec![0.5, 1.5, 0.0, 0.0, 0.0, 0.0, 0.5, 1.5]);
    }

    #[test]
    fn test_rejects_bad_shapes() {
        assert!(FeatureTable::from_rows(vec![0.0; 7], 7, 2, &[1]).is_err());
        assert!(FeatureTable::from_rows(vec![0.0; 6], 4, 2, &[2]).is_err());
    }

    #[test]
    fn test_offsets() {
        let table = FeatureTable::from_rows(vec![0.0; 5 * 4], 4, 2, &[2, 3]).unwrap();
        assert_eq!(table.offset_of(0), 0);
        assert_eq!(table.offset_of(1), 2);
        assert_eq!(table.n_tokens(), 5);
    }

    #[test]
    fn test_maxout() {
        let mut out = [0.0; 2];
        let mut which = [0; 2];
        maxout(&[1.0, 3.0, -2.0, -1.0], 2, &mut out, &mut which);
        assert_eq!(out, [3.0, -1.0]);
        assert_eq!(which, [1, 1]);
    }

    #[test]
    fn test_build_matches_async_build() {
        let inputs = vec![Tokens::new(vec![3, 1]), Tokens::new(vec![4])];
        let width = CONTEXT_WIDTH * 2;
        let sync = FeatureCache::build(&inputs, &HashEmbed::new(width), CONTEXT_WIDTH).unwrap();
        let lazy = FeatureCache::build_async(inputs, HashEmbed::new(width), CONTEXT_WIDTH);
        let a = sync.table().unwrap();
        let b = lazy.table().unwrap();
        assert_eq!(a.n_tokens(), b.n_tokens());
        let mut ra = vec![0.0; a.chunk()];
        let mut rb = vec![0.0; b.chunk()];
        let mut ctx = vec![-1i32; CONTEXT_WIDTH];
        ctx[0] = 2;
        a.sum_features(&ctx, &mut ra);
        b.sum_features(&ctx, &mut rb);
        assert_eq!(ra, rb);
        // Memoized: a second call must not re-wait.
        assert!(lazy.table().is_ok());
    }

    #[test]
    fn test_table_without_build_errors() {
        let cache = FeatureCache {
            cell: OnceCell::new(),
            rx: Mutex::new(None),
        };
        assert!(cache.table().is_err());
    }
}
