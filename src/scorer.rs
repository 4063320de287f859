//! External scorer and embedding seams.
//!
//! The engines never see a scorer's internals: any mapping from a summed
//! feature vector to per-action scores conforms, as long as it can also
//! produce a backward hook during training. [`LinearScorer`] is the
//! in-crate reference implementation; having no hidden stage, it also
//! exercises the batched-greedy fast path, and its determinism makes it
//! the test double of choice.

use crate::types::Tokens;

/// Row-major score matrix: one row of `n_classes` scores per state.
#[derive(Debug, Clone)]
pub struct Scores {
    data: Vec<f32>,
    n_classes: usize,
}

impl Scores {
    /// Wrap a row-major buffer.
    #[must_use]
    pub fn new(data: Vec<f32>, n_classes: usize) -> Self {
        debug_assert!(n_classes > 0 && data.len() % n_classes == 0);
        Self { data, n_classes }
    }

    /// Number of rows.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.data.len() / self.n_classes
    }

    /// Scores for row `r`.
    #[must_use]
    pub fn row(&self, r: usize) -> &[f32] {
        &self.data[r * self.n_classes..(r + 1) * self.n_classes]
    }
}

/// Backward hook returned by [`Scorer::score_with_grad`]: maps the
/// gradient with respect to the scores to the gradient with respect to
/// the input feature vectors.
pub type Backward<'a> = Box<dyn FnOnce(&[f32]) -> Vec<f32> + Send + 'a>;

/// The scoring collaborator: summed feature vectors in, per-action-class
/// scores out.
pub trait Scorer: Send + Sync {
    /// Number of action classes scored.
    fn n_classes(&self) -> usize;

    /// Width of one input feature vector.
    fn feature_width(&self) -> usize;

    /// False when the scorer has no nonlinear hidden stage, enabling the
    /// fully parallel per-state fast path in batched greedy search.
    fn has_hidden_layer(&self) -> bool {
        true
    }

    /// Score `rows` feature vectors in one call.
    fn score(&self, feats: &[f32], rows: usize) -> Scores;

    /// Score a single feature vector into `out` without allocating.
    fn score_one(&self, feats: &[f32], out: &mut [f32]) {
        let scores = self.score(feats, 1);
        out.copy_from_slice(scores.row(0));
    }

    /// Score with a backward hook for training.
    fn score_with_grad<'a>(&'a self, feats: &[f32], rows: usize) -> (Scores, Backward<'a>);
}

/// Per-token embeddings for a batch, flattened row-major, with an
/// optional backward hook consuming the gradient with respect to the
/// rows.
pub struct Embedded {
    /// `total_tokens x width` row-major matrix.
    pub rows: Vec<f32>,
    /// Width of one token row.
    pub width: usize,
    /// Training hook; `None` for pure inference.
    pub backward: Option<Box<dyn FnOnce(&[f32]) + Send>>,
}

/// The embedding collaborator: token ids in, per-token feature rows out.
///
/// Rows are slot-specific: each token's row holds one chunk per context
/// slot, so the feature cache can assemble a state's vector by summing
/// chunks (see [`crate::features::FeatureTable`]).
pub trait Tok2Vec: Send + Sync {
    /// Width of one token row (`context_width * hidden * pieces`).
    fn width(&self) -> usize;

    /// Embed every token of every input, concatenated in input order.
    fn embed(&self, inputs: &[Tokens]) -> Embedded;
}

/// Linear scorer: `scores = feats * W + b`, no hidden stage.
#[derive(Debug, Clone)]
pub struct LinearScorer {
    /// `feature_width x n_classes`, row-major by feature.
    weights: Vec<f32>,
    bias: Vec<f32>,
    n_features: usize,
    n_classes: usize,
}

impl LinearScorer {
    /// Zero-initialized scorer (every class ties at the bias).
    #[must_use]
    pub fn new(n_features: usize, n_classes: usize) -> Self {
        Self {
            weights: vec![0.0; n_features * n_classes],
            bias: vec![0.0; n_classes],
            n_features,
            n_classes,
        }
    }

    /// Scorer over explicit weights.
    ///
    /// # Panics
    /// If the buffer shapes do not match the declared widths.
    #[must_use]
    pub fn from_weights(
        weights: Vec<f32>,
        bias: Vec<f32>,
        n_features: usize,
        n_classes: usize,
    ) -> Self {
        assert_eq!(weights.len(), n_features * n_classes);
        assert_eq!(bias.len(), n_classes);
        Self {
            weights,
            bias,
            n_features,
            n_classes,
        }
    }
}

impl Scorer for LinearScorer {
    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn feature_width(&self) -> usize {
        self.n_features
    }

    fn has_hidden_layer(&self) -> bool {
        false
    }

    fn score(&self, feats: &[f32], rows: usize) -> Scores {
        debug_assert_eq!(feats.len(), rows * self.n_features);
        let mut data = Vec::with_capacity(rows * self.n_classes);
        for r in 0..rows {
            let mut row = self.bias.clone();
            let f = &feats[r * self.n_features..(r + 1) * self.n_features];
            for (j, &x) in f.iter().enumerate() {
                if x == 0.0 {
                    continue;
                }
                let w = &self.weights[j * self.n_classes..(j + 1) * self.n_classes];
                for (c, &wjc) in w.iter().enumerate() {
                    row[c] += x * wjc;
                }
            }
            data.extend_from_slice(&row);
        }
        Scores::new(data, self.n_classes)
    }

    fn score_one(&self, feats: &[f32], out: &mut [f32]) {
        debug_assert_eq!(feats.len(), self.n_features);
        debug_assert_eq!(out.len(), self.n_classes);
        out.copy_from_slice(&self.bias);
        for (j, &x) in feats.iter().enumerate() {
            if x == 0.0 {
                continue;
            }
            let w = &self.weights[j * self.n_classes..(j + 1) * self.n_classes];
            for (c, &wjc) in w.iter().enumerate() {
                out[c] += x * wjc;
            }
        }
    }

    fn score_with_grad<'a>(&'a self, feats: &[f32], rows: usize) -> (Scores, Backward<'a>) {
        let scores = self.score(feats, rows);
        let backward: Backward<'a> = Box::new(move |d_scores: &[f32]| {
            debug_assert_eq!(d_scores.len() % self.n_classes, 0);
            let rows = d_scores.len() / self.n_classes;
            let mut d_feats = vec![0.0f32; rows * self.n_features];
            for r in 0..rows {
                let d = &d_scores[r * self.n_classes..(r + 1) * self.n_classes];
                let out = &mut d_feats[r * self.n_features..(r + 1) * self.n_features];
                for (j, slot) in out.iter_mut().enumerate() {
                    let w = &self.weights[j * self.n_classes..(j + 1) * self.n_classes];
                    *slot = w.iter().zip(d).map(|(wjc, dc)| wjc * dc).sum();
                }
            }
            d_feats
        });
        (scores, backward)
    }
}

/// Deterministic pseudo-embedding for tests and benchmarks: each row is a
/// cheap integer mix of the token id and the slot index, no learned
/// parameters.
#[derive(Debug, Clone)]
pub struct HashEmbed {
    width: usize,
}

impl HashEmbed {
    /// Embedding with the given row width.
    #[must_use]
    pub fn new(width: usize) -> Self {
        Self { width }
    }

    fn cell(id: u32, k: usize) -> f32 {
        let mut x = u64::from(id)
            .wrapping_mul(0x9e37_79b9_7f4a_7c15)
            .wrapping_add(k as u64);
        x ^= x >> 33;
        x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
        x ^= x >> 33;
        ((x % 2000) as f32 / 1000.0) - 1.0
    }
}

impl Tok2Vec for HashEmbed {
    fn width(&self) -> usize {
        self.width
    }

    fn embed(&self, inputs: &[Tokens]) -> Embedded {
        let total: usize = inputs.iter().map(Tokens::len).sum();
        let mut rows = Vec::with_capacity(total * self.width);
        for input in inputs {
            for &id in input.ids() {
                for k in 0..self.width {
                    rows.push(Self::cell(id, k));
                }
            }
        }
        Embedded {
            rows,
            width: self.width,
            backward: None,
        }
    }
}
