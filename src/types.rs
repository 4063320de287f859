//! Input and gold-annotation types.
//!
//! Tokenization and vocabulary live outside this crate; an input arrives
//! here as a sequence of externally-assigned token ids. A gold annotation
//! is a head/label pair per token, used only during training to derive
//! per-action costs.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A tokenized input: externally-assigned token ids.
///
/// The id values are opaque to the search engines; only the length matters
/// to the state machine. Ids are handed to the tok2vec collaborator when
/// the feature cache is built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tokens {
    ids: Vec<u32>,
}

impl Tokens {
    /// Wrap a sequence of token ids.
    #[must_use]
    pub fn new(ids: Vec<u32>) -> Self {
        Self { ids }
    }

    /// Number of tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True for a zero-token input.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// The raw token ids.
    #[must_use]
    pub fn ids(&self) -> &[u32] {
        &self.ids
    }
}

impl From<Vec<u32>> for Tokens {
    fn from(ids: Vec<u32>) -> Self {
        Self::new(ids)
    }
}

/// Gold dependency annotation: one optional governor and arc label per
/// token. `None` head marks a root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoldParse {
    heads: Vec<Option<usize>>,
    labels: Vec<Option<u32>>,
}

impl GoldParse {
    /// Build a gold annotation, validating index bounds and acyclicity.
    pub fn new(heads: Vec<Option<usize>>, labels: Vec<Option<u32>>) -> Result<Self> {
        if heads.len() != labels.len() {
            return Err(Error::invalid_input(format!(
                "gold heads/labels length mismatch: {} vs {}",
                heads.len(),
                labels.len()
            )));
        }
        let n = heads.len();
        for (i, head) in heads.iter().enumerate() {
            match head {
                Some(h) if *h >= n => {
                    return Err(Error::invalid_input(format!(
                        "gold head {h} out of range for {n} tokens"
                    )));
                }
                Some(h) if *h == i => {
                    return Err(Error::invalid_input(format!(
                        "token {i} is its own governor"
                    )));
                }
                _ => {}
            }
        }
        // Head chains must terminate at a root within n hops.
        for start in 0..n {
            let mut cur = start;
            let mut hops = 0;
            while let Some(h) = heads[cur] {
                cur = h;
                hops += 1;
                if hops > n {
                    return Err(Error::invalid_input(format!(
                        "cycle in gold heads through token {start}"
                    )));
                }
            }
        }
        Ok(Self { heads, labels })
    }

    /// Build an unlabeled gold annotation.
    pub fn unlabeled(heads: Vec<Option<usize>>) -> Result<Self> {
        let labels = vec![None; heads.len()];
        Self::new(heads, labels)
    }

    /// Number of tokens covered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heads.len()
    }

    /// True for an empty annotation.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heads.is_empty()
    }

    /// Gold governor of token `i`, or `None` for a root.
    #[must_use]
    pub fn head(&self, i: usize) -> Option<usize> {
        self.heads[i]
    }

    /// Gold arc label of token `i`.
    #[must_use]
    pub fn label(&self, i: usize) -> Option<u32> {
        self.labels[i]
    }
}
