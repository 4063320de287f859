//! The action catalogue and the transition-system seam.
//!
//! A transition system is the fixed catalogue of discrete actions a parse
//! state can take. Every `(kind, label)` pair is interned to a dense class
//! id used to index score vectors; the mapping is append-only over a
//! model's lifetime, so adding a label never invalidates persisted ids.
//!
//! The [`TransitionSystem`] trait is the small interface the search
//! engines are generic over: legality, cost, application, and the
//! terminal-shape predicate. Any conforming system plugs into both the
//! batched-greedy and the beam engine.

pub mod arc_eager;

pub use arc_eager::ArcEager;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::state::ParseState;
use crate::types::{GoldParse, Tokens};

/// The four arc-eager action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    /// Push the buffer front onto the stack.
    Shift,
    /// Pop the stack top.
    Reduce,
    /// Arc from buffer front to stack top; pop.
    LeftArc,
    /// Arc from stack top to buffer front; push.
    RightArc,
}

/// One named, optionally labeled action with its dense class id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Action kind tag.
    pub kind: ActionKind,
    /// Interned arc label, `None` for Shift/Reduce.
    pub label: Option<u32>,
    /// Dense class id indexing score vectors.
    pub class: usize,
}

/// Append-only registry of actions and arc labels.
///
/// Classes 0-3 are Shift, Reduce, and the unlabeled arc actions; each
/// registered label appends a `LeftArc`/`RightArc` pair. Round-trips
/// through an opaque JSON blob for the external serialization layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionTable {
    actions: Vec<Action>,
    labels: Vec<String>,
    #[serde(skip)]
    index: FxHashMap<(ActionKind, Option<u32>), usize>,
    #[serde(skip)]
    label_index: FxHashMap<String, u32>,
}

impl ActionTable {
    /// Table with the unlabeled actions registered.
    #[must_use]
    pub fn new() -> Self {
        let mut table = Self {
            actions: Vec::new(),
            labels: Vec::new(),
            index: FxHashMap::default(),
            label_index: FxHashMap::default(),
        };
        table.register(ActionKind::Shift, None);
        table.register(ActionKind::Reduce, None);
        table.register(ActionKind::LeftArc, None);
        table.register(ActionKind::RightArc, None);
        table
    }

    /// Table with the given arc labels registered.
    #[must_use]
    pub fn with_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut table = Self::new();
        for label in labels {
            table.add_label(label.as_ref());
        }
        table
    }

    fn register(&mut self, kind: ActionKind, label: Option<u32>) -> usize {
        if let Some(&class) = self.index.get(&(kind, label)) {
            return class;
        }
        let class = self.actions.len();
        self.actions.push(Action { kind, label, class });
        self.index.insert((kind, label), class);
        class
    }

    /// Intern an arc label, registering its `LeftArc`/`RightArc` classes.
    /// Existing class ids are never renumbered.
    pub fn add_label(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.label_index.get(name) {
            return id;
        }
        let id = self.labels.len() as u32;
        self.labels.push(name.to_string());
        self.label_index.insert(name.to_string(), id);
        self.register(ActionKind::LeftArc, Some(id));
        self.register(ActionKind::RightArc, Some(id));
        id
    }

    /// Number of action classes.
    #[must_use]
    pub fn n_classes(&self) -> usize {
        self.actions.len()
    }

    /// Action for a class id.
    #[must_use]
    pub fn get(&self, class: usize) -> Option<&Action> {
        self.actions.get(class)
    }

    /// Class id for a `(kind, label)` pair.
    #[must_use]
    pub fn class_of(&self, kind: ActionKind, label: Option<u32>) -> Option<usize> {
        self.index.get(&(kind, label)).copied()
    }

    /// Interned id of a label name.
    #[must_use]
    pub fn label_id(&self, name: &str) -> Option<u32> {
        self.label_index.get(name).copied()
    }

    /// Name of an interned label.
    #[must_use]
    pub fn label_name(&self, id: u32) -> Option<&str> {
        self.labels.get(id as usize).map(String::as_str)
    }

    /// Serialize to an opaque byte blob.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::config(e.to_string()))
    }

    /// Deserialize from a blob produced by [`ActionTable::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut table: Self =
            serde_json::from_slice(bytes).map_err(|e| Error::config(e.to_string()))?;
        table.rebuild_index();
        Ok(table)
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .actions
            .iter()
            .map(|a| ((a.kind, a.label), a.class))
            .collect();
        self.label_index = self
            .labels
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i as u32))
            .collect();
    }
}

impl Default for ActionTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Reusable legality bitset over action classes.
///
/// Sized once per engine; `clear` + `set` in the hot per-state loop do not
/// allocate.
#[derive(Debug, Clone)]
pub struct ActionMask {
    bits: Vec<u64>,
    n: usize,
}

impl ActionMask {
    /// Mask over `n_classes` classes, all unset.
    #[must_use]
    pub fn new(n_classes: usize) -> Self {
        Self {
            bits: vec![0; n_classes.div_ceil(64)],
            n: n_classes,
        }
    }

    /// Number of classes covered.
    #[must_use]
    pub fn n_classes(&self) -> usize {
        self.n
    }

    /// Unset every bit.
    pub fn clear(&mut self) {
        self.bits.fill(0);
    }

    /// Mark `class` legal.
    pub fn set(&mut self, class: usize) {
        debug_assert!(class < self.n);
        self.bits[class / 64] |= 1 << (class % 64);
    }

    /// Whether `class` is legal.
    #[must_use]
    pub fn get(&self, class: usize) -> bool {
        debug_assert!(class < self.n);
        self.bits[class / 64] & (1 << (class % 64)) != 0
    }

    /// Whether any class is legal.
    #[must_use]
    pub fn any(&self) -> bool {
        self.bits.iter().any(|&b| b != 0)
    }

    /// Number of legal classes.
    #[must_use]
    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Legal class ids in ascending order.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter().enumerate().flat_map(|(word, &b)| {
            let mut b = b;
            std::iter::from_fn(move || {
                if b == 0 {
                    return None;
                }
                let bit = b.trailing_zeros() as usize;
                b &= b - 1;
                Some(word * 64 + bit)
            })
        })
    }
}

/// The interface a search engine needs from a transition system.
pub trait TransitionSystem {
    /// The action catalogue.
    fn actions(&self) -> &ActionTable;

    /// Number of action classes.
    fn n_classes(&self) -> usize {
        self.actions().n_classes()
    }

    /// Fresh state over `input`, placed at `offset` rows into the batch
    /// feature table.
    fn initial_state(&self, input: &Tokens, offset: usize) -> ParseState;

    /// Terminal-shape predicate.
    fn is_final(&self, state: &ParseState) -> bool;

    /// Set the legality bit for every class applicable to `state`.
    /// Must not allocate.
    fn legal(&self, state: &ParseState, mask: &mut ActionMask);

    /// Apply the transition for `class`, mutating `state` and advancing
    /// its step counter.
    fn apply(&self, state: &mut ParseState, class: usize);

    /// Structural divergence cost per action class against `gold`.
    ///
    /// Only slots whose mask bit is set are meaningful; illegal classes
    /// are filled with `f32::INFINITY` and must be excluded from
    /// comparisons entirely.
    fn costs(&self, state: &ParseState, gold: &GoldParse, mask: &ActionMask, out: &mut [f32]);

    /// Canonical action sequence deterministically reconstructing `gold`.
    ///
    /// Follows minimal-cost legal actions, breaking ties toward the
    /// lowest class id. Fails with [`Error::Oracle`] when `gold` is not
    /// reachable (a step with no zero-cost action, or a reconstruction
    /// mismatch).
    fn oracle_sequence(&self, input: &Tokens, gold: &GoldParse) -> Result<Vec<usize>> {
        if gold.len() != input.len() {
            return Err(Error::invalid_input(format!(
                "gold covers {} tokens, input has {}",
                gold.len(),
                input.len()
            )));
        }
        let n = self.n_classes();
        let mut state = self.initial_state(input, 0);
        let mut mask = ActionMask::new(n);
        let mut costs = vec![0.0f32; n];
        let mut sequence = Vec::new();
        let step_limit = 2 * input.len() + 2;
        while !self.is_final(&state) {
            if sequence.len() >= step_limit {
                return Err(Error::state(format!(
                    "oracle exceeded {step_limit} transitions without reaching a final state"
                )));
            }
            self.legal(&state, &mut mask);
            let mut best = None;
            let mut best_cost = f32::INFINITY;
            self.costs(&state, gold, &mask, &mut costs);
            for class in mask.iter_ones() {
                if costs[class] < best_cost {
                    best_cost = costs[class];
                    best = Some(class);
                }
            }
            let Some(class) = best else {
                return Err(Error::state(format!(
                    "no legal action at non-final state after {} steps",
                    state.steps()
                )));
            };
            if best_cost > 0.0 {
                return Err(Error::oracle(format!(
                    "cheapest action loses {best_cost} gold arcs at step {}",
                    state.steps()
                )));
            }
            self.apply(&mut state, class);
            sequence.push(class);
        }
        for i in 0..gold.len() {
            if state.head(i) != gold.head(i) {
                return Err(Error::oracle(format!(
                    "reconstruction mismatch at token {i}: got {:?}, gold {:?}",
                    state.head(i),
                    gold.head(i)
                )));
            }
            if gold.label(i).is_some() && state.label(i) != gold.label(i) {
                return Err(Error::oracle(format!(
                    "label mismatch at token {i}"
                )));
            }
        }
        Ok(sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlabeled_classes_first() {
        let table = ActionTable::new();
        assert_eq!(table.n_classes(), 4);
        assert_eq!(table.get(0).unwrap().kind, ActionKind::Shift);
        assert_eq!(table.get(1).unwrap().kind, ActionKind::Reduce);
        assert_eq!(table.get(2).unwrap().kind, ActionKind::LeftArc);
        assert_eq!(table.get(3).unwrap().kind, ActionKind::RightArc);
        assert_eq!(table.get(3).unwrap().label, None);
    }

    #[test]
    fn test_label_registration_is_append_only() {
        let mut table = ActionTable::with_labels(["nsubj"]);
        let before: Vec<Action> = (0..table.n_classes())
            .map(|c| *table.get(c).unwrap())
            .collect();
        let nsubj = table.label_id("nsubj").unwrap();
        // Re-adding is a no-op; a fresh label only appends.
        assert_eq!(table.add_label("nsubj"), nsubj);
        table.add_label("obj");
        assert_eq!(table.n_classes(), 8);
        for (c, old) in before.iter().enumerate() {
            assert_eq!(table.get(c).unwrap(), old);
        }
    }

    #[test]
    fn test_class_lookup() {
        let table = ActionTable::with_labels(["a", "b"]);
        let a = table.label_id("a").unwrap();
        let left_a = table.class_of(ActionKind::LeftArc, Some(a)).unwrap();
        assert_eq!(table.get(left_a).unwrap().kind, ActionKind::LeftArc);
        assert_eq!(table.get(left_a).unwrap().label, Some(a));
        assert!(table.class_of(ActionKind::LeftArc, Some(99)).is_none());
    }

    #[test]
    fn test_blob_round_trip_rebuilds_index() {
        let table = ActionTable::with_labels(["amod", "det"]);
        let blob = table.to_bytes().unwrap();
        let back = ActionTable::from_bytes(&blob).unwrap();
        assert_eq!(back.n_classes(), table.n_classes());
        assert_eq!(back.label_id("det"), table.label_id("det"));
        assert_eq!(
            back.class_of(ActionKind::RightArc, back.label_id("amod")),
            table.class_of(ActionKind::RightArc, table.label_id("amod"))
        );
    }

    #[test]
    fn test_mask_set_get_iter() {
        let mut mask = ActionMask::new(130);
        assert!(!mask.any());
        mask.set(0);
        mask.set(64);
        mask.set(129);
        assert!(mask.get(64));
        assert!(!mask.get(1));
        assert_eq!(mask.count(), 3);
        assert_eq!(mask.iter_ones().collect::<Vec<_>>(), vec![0, 64, 129]);
        mask.clear();
        assert!(!mask.any());
    }
}
