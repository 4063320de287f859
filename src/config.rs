//! Runtime configuration scalars.
//!
//! `ParserConfig` carries the knobs shared by the search engines:
//! `beam_width`, `beam_density`, the fixed feature-context width, and the
//! scorer-facing hidden/piece widths. The struct round-trips through an
//! opaque JSON byte blob so an external serialization layer can persist it
//! next to the scorer weights and the action table without knowing its
//! shape.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::state::CONTEXT_WIDTH;

/// Search and scorer-geometry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Maximum hypotheses tracked per input in beam search. `1` makes the
    /// beam engine equivalent to batched greedy search.
    pub beam_width: usize,
    /// Density pruning knob in `[0, 1)`. `0.0` disables pruning; larger
    /// values drop candidates further below the round's best cumulative
    /// score.
    pub beam_density: f32,
    /// Number of token slots in the feature context. Fixed per system;
    /// stored so persisted configs are self-describing.
    pub context_width: usize,
    /// Width of the summed feature vector the scorer consumes, per piece.
    pub hidden_width: usize,
    /// Maxout pieces in the cached feature table (`1` = no piece
    /// reduction).
    pub pieces: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            beam_width: 8,
            beam_density: 0.0,
            context_width: CONTEXT_WIDTH,
            hidden_width: 64,
            pieces: 1,
        }
    }
}

impl ParserConfig {
    /// Config for single-best greedy decoding.
    #[must_use]
    pub fn greedy() -> Self {
        Self {
            beam_width: 1,
            beam_density: 0.0,
            ..Self::default()
        }
    }

    /// Width of a cached per-token row: one chunk per context slot.
    #[must_use]
    pub fn token_row_width(&self) -> usize {
        self.context_width * self.hidden_width * self.pieces
    }

    /// Validate scalar ranges.
    pub fn validate(&self) -> Result<()> {
        if self.beam_width == 0 {
            return Err(Error::config("beam_width must be at least 1"));
        }
        if !(0.0..1.0).contains(&self.beam_density) {
            return Err(Error::config(format!(
                "beam_density must be in [0, 1), got {}",
                self.beam_density
            )));
        }
        if self.context_width == 0 || self.hidden_width == 0 || self.pieces == 0 {
            return Err(Error::config(
                "context_width, hidden_width and pieces must be non-zero",
            ));
        }
        Ok(())
    }

    /// Serialize to an opaque byte blob.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::config(e.to_string()))
    }

    /// Deserialize from a blob produced by [`ParserConfig::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let cfg: Self =
            serde_json::from_slice(bytes).map_err(|e| Error::config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(ParserConfig::default().validate().is_ok());
        assert!(ParserConfig::greedy().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_width() {
        let cfg = ParserConfig {
            beam_width: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_density_out_of_range() {
        let cfg = ParserConfig {
            beam_density: 1.0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_blob_round_trip() {
        let cfg = ParserConfig {
            beam_width: 4,
            beam_density: 0.01,
            ..Default::default()
        };
        let blob = cfg.to_bytes().unwrap();
        let back = ParserConfig::from_bytes(&blob).unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn test_partial_blob_fills_defaults() {
        let back = ParserConfig::from_bytes(br#"{"beam_width": 2}"#).unwrap();
        assert_eq!(back.beam_width, 2);
        assert_eq!(back.context_width, CONTEXT_WIDTH);
    }
}
