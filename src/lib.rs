//! # trellis
//!
//! Transition-based structured prediction for Rust.
//!
//! An input is parsed by applying a sequence of discrete actions chosen
//! by a learned scorer; during training, per-action structural costs
//! against a gold annotation drive a cost-sensitive loss. The crate is
//! the search/training control core: the scorer itself is an external
//! collaborator behind a trait.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │ Search engines                                      │
//! │   BatchedGreedy: one hypothesis per input,          │
//! │     lock-step rounds, parallel fast path            │
//! │   BeamSearch: beam_width hypotheses per input,      │
//! │     hash dedup, density pruning                     │
//! ├─────────────────────────────────────────────────────┤
//! │ Transition system (ArcEager)                        │
//! │   legality / dynamic-oracle costs / apply / oracle  │
//! ├─────────────────────────────────────────────────────┤
//! │ ParseState + FeatureCache                           │
//! │   stack, cursor, arcs, content hash;                │
//! │   per-token table built once per batch              │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Per search round there is exactly one scorer call covering every live
//! state in the batch; the branchy per-state transition work happens
//! between calls against the read-only feature table.
//!
//! ## Quick start
//!
//! ```rust
//! use trellis::{
//!     ArcEager, BatchedGreedy, FeatureCache, HashEmbed, LinearScorer, Tokens,
//!     TransitionSystem, CONTEXT_WIDTH,
//! };
//!
//! fn main() -> trellis::Result<()> {
//!     let system = ArcEager::with_labels(["nsubj", "obj"]);
//!     let n_classes = system.n_classes();
//!
//!     let inputs = vec![Tokens::new(vec![12, 40, 7])];
//!     let tok2vec = HashEmbed::new(CONTEXT_WIDTH * 8);
//!     let cache = FeatureCache::build(&inputs, &tok2vec, CONTEXT_WIDTH)?;
//!     let scorer = LinearScorer::new(8, n_classes);
//!
//!     let parser = BatchedGreedy::new(system);
//!     let states = parser.parse_batch(&inputs, &cache, &scorer)?;
//!     assert!(states[0].is_final());
//!     Ok(())
//! }
//! ```
//!
//! Beam search over the same pieces:
//!
//! ```rust
//! use trellis::{
//!     ArcEager, BeamSearch, FeatureCache, HashEmbed, LinearScorer,
//!     ParserConfig, Tokens, TransitionSystem, CONTEXT_WIDTH,
//! };
//!
//! fn main() -> trellis::Result<()> {
//!     let system = ArcEager::new();
//!     let n_classes = system.n_classes();
//!     let config = ParserConfig {
//!         beam_width: 4,
//!         hidden_width: 8,
//!         ..Default::default()
//!     };
//!
//!     let inputs = vec![Tokens::new(vec![3, 1, 4])];
//!     let cache = FeatureCache::build(
//!         &inputs,
//!         &HashEmbed::new(CONTEXT_WIDTH * 8),
//!         CONTEXT_WIDTH,
//!     )?;
//!     let scorer = LinearScorer::new(8, n_classes);
//!
//!     let engine = BeamSearch::new(system, config)?;
//!     let beams = engine.parse_batch(&inputs, &cache, &scorer)?;
//!     assert!(beams[0].best().state.is_final());
//!     Ok(())
//! }
//! ```
//!
//! ## Training
//!
//! [`update_batch`] windows a batch along oracle prefixes, advances each
//! window by the scorer's own greedy choices, and pushes cost-sensitive
//! gradients back through the scorer and tok2vec backward hooks.
//! Unreachable golds (non-projective trees) are skipped per example.
//!
//! ## Design notes
//!
//! - **Trait seams, not callbacks**: engines are generic over
//!   [`TransitionSystem`]; scoring and embedding sit behind [`Scorer`]
//!   and [`Tok2Vec`].
//! - **Owned, bounds-checked state**: no shared mutable structure between
//!   hypotheses; beam branching clones.
//! - **Feature flag `parallel`** (default): rayon-parallel per-state
//!   stepping in the no-hidden-layer greedy fast path, with a sequential
//!   fallback when disabled.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod features;
pub mod scorer;
pub mod search;
pub mod state;
pub mod train;
pub mod transition;
pub mod types;

pub use config::ParserConfig;
pub use error::{Error, Result};
pub use features::{maxout, FeatureCache, FeatureTable};
pub use scorer::{Backward, Embedded, HashEmbed, LinearScorer, Scorer, Scores, Tok2Vec};
pub use search::{BatchedGreedy, Beam, BeamHyp, BeamSearch, Violation};
pub use state::{ParseState, CONTEXT_WIDTH, NO_TOKEN};
pub use train::{
    cost_sensitive_grad, init_gold_batch, update_batch, TrainExample, UpdateStats,
};
pub use transition::{
    Action, ActionKind, ActionMask, ActionTable, ArcEager, TransitionSystem,
};
pub use types::{GoldParse, Tokens};

pub mod prelude {
    //! Commonly used items, re-exported for convenience.
    //!
    //! ```rust
    //! use trellis::prelude::*;
    //!
    //! let system = ArcEager::with_labels(["dep"]);
    //! assert_eq!(system.n_classes(), 6);
    //! ```
    pub use crate::config::ParserConfig;
    pub use crate::error::{Error, Result};
    pub use crate::features::FeatureCache;
    pub use crate::scorer::{LinearScorer, Scorer, Tok2Vec};
    pub use crate::search::{BatchedGreedy, BeamSearch};
    pub use crate::state::{ParseState, CONTEXT_WIDTH};
    pub use crate::train::{update_batch, UpdateStats};
    pub use crate::transition::{ArcEager, TransitionSystem};
    pub use crate::types::{GoldParse, Tokens};
}
