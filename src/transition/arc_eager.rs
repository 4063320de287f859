//! Arc-eager transition system with a dynamic oracle.
//!
//! Four action kinds over a stack and a buffer cursor:
//!
//! ```text
//! Shift        push B0                    buffer non-exhausted
//! Reduce       pop S0                     S0 attached, or buffer exhausted
//! LeftArc(l)   arc B0 -> S0, pop          S0 unattached, buffer non-exhausted
//! RightArc(l)  arc S0 -> B0, push         buffer non-exhausted
//! ```
//!
//! The forced Reduce at buffer exhaustion pops unattached tokens as roots,
//! which keeps the liveness invariant: every non-final state has at least
//! one legal action.
//!
//! Costs are the dynamic-oracle formulation: the number of gold arcs an
//! action makes unreachable, plus one for a correct-head attachment with
//! the wrong label. A zero-cost path exists exactly for reachable
//! (projective) gold structures.

use crate::state::ParseState;
use crate::transition::{ActionKind, ActionMask, ActionTable, TransitionSystem};
use crate::types::{GoldParse, Tokens};

/// Arc-eager system over an [`ActionTable`].
#[derive(Debug, Clone, Default)]
pub struct ArcEager {
    actions: ActionTable,
}

impl ArcEager {
    /// Unlabeled system: Shift, Reduce, LeftArc, RightArc.
    #[must_use]
    pub fn new() -> Self {
        Self {
            actions: ActionTable::new(),
        }
    }

    /// System with the given arc labels registered.
    #[must_use]
    pub fn with_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            actions: ActionTable::with_labels(labels),
        }
    }

    /// System over a previously persisted action table.
    #[must_use]
    pub fn from_table(actions: ActionTable) -> Self {
        Self { actions }
    }

    /// Intern an arc label; see [`ActionTable::add_label`].
    pub fn add_label(&mut self, name: &str) -> u32 {
        self.actions.add_label(name)
    }

    fn shift_cost(state: &ParseState, gold: &GoldParse) -> f32 {
        let b = state.buffer_front().expect("shift requires a buffer token");
        let mut cost = 0;
        if let Some(h) = gold.head(b) {
            if state.in_stack(h) {
                cost += 1;
            }
        }
        for k in state.stack_iter() {
            if state.head(k).is_none() && gold.head(k) == Some(b) {
                cost += 1;
            }
        }
        cost as f32
    }

    fn reduce_cost(state: &ParseState, gold: &GoldParse) -> f32 {
        let s0 = state.stack_top().expect("reduce requires a stack token");
        let mut cost = 0;
        for k in state.buffer_front().unwrap_or(state.input_len())..state.input_len() {
            if gold.head(k) == Some(s0) {
                cost += 1;
            }
        }
        cost as f32
    }

    fn left_cost(state: &ParseState, gold: &GoldParse, label: Option<u32>) -> f32 {
        let s0 = state.stack_top().expect("left-arc requires a stack token");
        let b = state.buffer_front().expect("left-arc requires a buffer token");
        let mut cost = 0;
        for k in b..state.input_len() {
            if gold.head(k) == Some(s0) {
                cost += 1;
            }
        }
        match gold.head(s0) {
            // Gold root: must not be attached at all.
            None => cost += 1,
            Some(h) if h == b => {
                if label_mismatch(label, gold.label(s0)) {
                    cost += 1;
                }
            }
            // True governor still in the buffer; attaching here loses it.
            Some(h) if h > b => cost += 1,
            // Governor already consumed: that arc was lost earlier.
            Some(_) => {}
        }
        cost as f32
    }

    fn right_cost(state: &ParseState, gold: &GoldParse, label: Option<u32>) -> f32 {
        let s0 = state.stack_top().expect("right-arc requires a stack token");
        let b = state.buffer_front().expect("right-arc requires a buffer token");
        let mut cost = 0;
        match gold.head(b) {
            None => cost += 1,
            Some(h) if h == s0 => {
                if label_mismatch(label, gold.label(b)) {
                    cost += 1;
                }
            }
            // True governor later in the buffer: b takes a head now and
            // can never take another.
            Some(h) if h > b => cost += 1,
            // Governor buried in the stack was still reachable while b
            // sat at the buffer front; it is lost now.
            Some(h) => {
                if state.in_stack(h) {
                    cost += 1;
                }
            }
        }
        for k in state.stack_iter() {
            if state.head(k).is_none() && gold.head(k) == Some(b) {
                cost += 1;
            }
        }
        cost as f32
    }
}

/// A labeled gold arc penalizes any action that attaches with a
/// different label, the unlabeled action included. Unlabeled gold arcs
/// accept any label.
fn label_mismatch(action: Option<u32>, gold: Option<u32>) -> bool {
    match gold {
        Some(g) => action != Some(g),
        None => false,
    }
}

impl TransitionSystem for ArcEager {
    fn actions(&self) -> &ActionTable {
        &self.actions
    }

    fn initial_state(&self, input: &Tokens, offset: usize) -> ParseState {
        ParseState::new(input.len(), offset)
    }

    fn is_final(&self, state: &ParseState) -> bool {
        state.is_final()
    }

    fn legal(&self, state: &ParseState, mask: &mut ActionMask) {
        mask.clear();
        if state.is_final() {
            return;
        }
        let buffer_open = !state.buffer_exhausted();
        let top = state.stack_top();
        let top_attached = top.map(|t| state.head(t).is_some());
        let can_reduce = match top_attached {
            Some(true) => true,
            // Forced pop: remaining stack tokens become roots.
            Some(false) => !buffer_open,
            None => false,
        };
        let can_arc = top.is_some() && buffer_open;
        let can_left = can_arc && top_attached == Some(false);
        for class in 0..self.actions.n_classes() {
            let legal = match self.actions.get(class).map(|a| a.kind) {
                Some(ActionKind::Shift) => buffer_open,
                Some(ActionKind::Reduce) => can_reduce,
                Some(ActionKind::LeftArc) => can_left,
                Some(ActionKind::RightArc) => can_arc,
                None => false,
            };
            if legal {
                mask.set(class);
            }
        }
    }

    fn apply(&self, state: &mut ParseState, class: usize) {
        let action = *self
            .actions
            .get(class)
            .expect("action class out of range");
        match action.kind {
            ActionKind::Shift => state.shift(),
            ActionKind::Reduce => {
                state.pop();
            }
            ActionKind::LeftArc => {
                let s0 = state.stack_top().expect("left-arc on empty stack");
                let b = state.buffer_front().expect("left-arc on empty buffer");
                state.add_arc(b, s0, action.label);
                state.pop();
            }
            ActionKind::RightArc => {
                let s0 = state.stack_top().expect("right-arc on empty stack");
                let b = state.buffer_front().expect("right-arc on empty buffer");
                state.add_arc(s0, b, action.label);
                state.shift();
            }
        }
        state.record(class);
    }

    fn costs(&self, state: &ParseState, gold: &GoldParse, mask: &ActionMask, out: &mut [f32]) {
        debug_assert!(out.len() >= self.actions.n_classes());
        out.fill(f32::INFINITY);
        for class in mask.iter_ones() {
            let action = self.actions.get(class).expect("masked class out of range");
            out[class] = match action.kind {
                ActionKind::Shift => Self::shift_cost(state, gold),
                ActionKind::Reduce => Self::reduce_cost(state, gold),
                ActionKind::LeftArc => Self::left_cost(state, gold, action.label),
                ActionKind::RightArc => Self::right_cost(state, gold, action.label),
            };
        }
    }
}
