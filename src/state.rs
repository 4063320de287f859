//! Mutable parse hypothesis over one input.
//!
//! A `ParseState` is exclusively owned by the search engine driving it.
//! Beam search clones on branch; nothing is ever aliased across
//! hypotheses. Structural invariants (index bounds, single governor,
//! acyclicity) are programming errors guarded by debug assertions, not
//! recoverable conditions.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;
use smallvec::SmallVec;

/// Number of token slots in the feature context.
pub const CONTEXT_WIDTH: usize = 13;

/// Sentinel for an absent token slot; contributes zero to feature sums.
pub const NO_TOKEN: i32 = -1;

const NONE: i32 = -1;

/// One partial structural hypothesis: a stack of token indices, a buffer
/// cursor, and the arcs produced so far.
#[derive(Debug, Clone)]
pub struct ParseState {
    stack: SmallVec<[u32; 8]>,
    cursor: usize,
    len: usize,
    /// Governor per token, `NONE` while unattached.
    heads: Vec<i32>,
    /// Arc label per token, `NONE` while unattached or unlabeled.
    labels: Vec<i32>,
    /// Two leftmost children per token, for feature extraction.
    lkids: Vec<[i32; 2]>,
    /// Two rightmost children per token.
    rkids: Vec<[i32; 2]>,
    /// First row of this input within the flattened batch feature table.
    offset: usize,
    steps: usize,
    history: Vec<u32>,
}

impl ParseState {
    /// Fresh state over an input of `len` tokens placed at `offset` rows
    /// into the batch feature table.
    #[must_use]
    pub fn new(len: usize, offset: usize) -> Self {
        Self {
            stack: SmallVec::new(),
            cursor: 0,
            len,
            heads: vec![NONE; len],
            labels: vec![NONE; len],
            lkids: vec![[NONE; 2]; len],
            rkids: vec![[NONE; 2]; len],
            offset,
            steps: 0,
            history: Vec::new(),
        }
    }

    /// Length of the owning input.
    #[must_use]
    pub fn input_len(&self) -> usize {
        self.len
    }

    /// Row offset of this input within the flattened batch.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of transitions applied so far.
    #[must_use]
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Applied action classes, oldest first.
    #[must_use]
    pub fn history(&self) -> &[u32] {
        &self.history
    }

    /// Current stack depth.
    #[must_use]
    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    /// Stack item `depth` positions below the top.
    #[must_use]
    pub fn stack_item(&self, depth: usize) -> Option<usize> {
        let n = self.stack.len();
        if depth < n {
            Some(self.stack[n - 1 - depth] as usize)
        } else {
            None
        }
    }

    /// Top of the stack.
    #[must_use]
    pub fn stack_top(&self) -> Option<usize> {
        self.stack_item(0)
    }

    /// First unconsumed token, if any.
    #[must_use]
    pub fn buffer_front(&self) -> Option<usize> {
        if self.cursor < self.len {
            Some(self.cursor)
        } else {
            None
        }
    }

    /// True once every token has been consumed.
    #[must_use]
    pub fn buffer_exhausted(&self) -> bool {
        self.cursor >= self.len
    }

    /// True iff the buffer is exhausted and the stack has terminal shape.
    /// No side effects.
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.buffer_exhausted() && self.stack.is_empty()
    }

    /// Governor assigned to token `i` so far.
    #[must_use]
    pub fn head(&self, i: usize) -> Option<usize> {
        debug_assert!(i < self.len);
        let h = self.heads[i];
        if h < 0 {
            None
        } else {
            Some(h as usize)
        }
    }

    /// Arc label assigned to token `i` so far.
    #[must_use]
    pub fn label(&self, i: usize) -> Option<u32> {
        debug_assert!(i < self.len);
        let l = self.labels[i];
        if l < 0 {
            None
        } else {
            Some(l as u32)
        }
    }

    /// Stack contents, bottom to top.
    pub(crate) fn stack_iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.stack.iter().map(|&t| t as usize)
    }

    pub(crate) fn in_stack(&self, t: usize) -> bool {
        self.stack.iter().any(|&s| s as usize == t)
    }

    pub(crate) fn shift(&mut self) {
        debug_assert!(self.cursor < self.len, "shift past end of buffer");
        self.stack.push(self.cursor as u32);
        self.cursor += 1;
    }

    pub(crate) fn pop(&mut self) -> Option<usize> {
        self.stack.pop().map(|t| t as usize)
    }

    /// Record arc `head -> child`. The child must be unattached.
    pub(crate) fn add_arc(&mut self, head: usize, child: usize, label: Option<u32>) {
        debug_assert!(head < self.len && child < self.len);
        debug_assert!(head != child, "self-governed token {child}");
        debug_assert!(self.heads[child] < 0, "token {child} already has a governor");
        debug_assert!(!self.reaches(head, child), "arc {head}->{child} closes a cycle");
        self.heads[child] = head as i32;
        self.labels[child] = label.map_or(NONE, |l| l as i32);
        let c = child as i32;
        if child < head {
            let lk = &mut self.lkids[head];
            if lk[0] < 0 || c < lk[0] {
                lk[1] = lk[0];
                lk[0] = c;
            } else if lk[1] < 0 || c < lk[1] {
                lk[1] = c;
            }
        } else {
            let rk = &mut self.rkids[head];
            if rk[0] < 0 || c > rk[0] {
                rk[1] = rk[0];
                rk[0] = c;
            } else if rk[1] < 0 || c > rk[1] {
                rk[1] = c;
            }
        }
    }

    /// True if following governors from `from` reaches `to`.
    fn reaches(&self, from: usize, to: usize) -> bool {
        let mut cur = from;
        let mut hops = 0;
        while self.heads[cur] >= 0 {
            cur = self.heads[cur] as usize;
            if cur == to {
                return true;
            }
            hops += 1;
            if hops > self.len {
                debug_assert!(false, "cycle in heads");
                return true;
            }
        }
        false
    }

    pub(crate) fn record(&mut self, class: usize) {
        self.history.push(class as u32);
        self.steps += 1;
    }

    /// Fill the fixed-width feature context with per-input token indices,
    /// [`NO_TOKEN`] where a slot is empty.
    ///
    /// Slot layout: S0 S1 S2, B0 B1 B2, two leftmost and two rightmost
    /// children of S0, two leftmost children of B0, governor of S0.
    pub fn context(&self, out: &mut [i32; CONTEXT_WIDTH]) {
        out.fill(NO_TOKEN);
        for depth in 0..3 {
            if let Some(t) = self.stack_item(depth) {
                out[depth] = t as i32;
            }
        }
        for ahead in 0..3 {
            let t = self.cursor + ahead;
            if t < self.len {
                out[3 + ahead] = t as i32;
            }
        }
        if let Some(s0) = self.stack_top() {
            out[6] = self.lkids[s0][0];
            out[7] = self.lkids[s0][1];
            out[8] = self.rkids[s0][0];
            out[9] = self.rkids[s0][1];
            out[12] = self.heads[s0];
        }
        if let Some(b0) = self.buffer_front() {
            out[10] = self.lkids[b0][0];
            out[11] = self.lkids[b0][1];
        }
    }

    /// Deterministic hash of the structural content: stack contents plus
    /// the arc set. Used only for hypothesis deduplication, never for
    /// score ordering.
    #[must_use]
    pub fn content_hash(&self) -> u64 {
        let mut h = FxHasher::default();
        self.stack.as_slice().hash(&mut h);
        self.heads.hash(&mut h);
        self.labels.hash(&mut h);
        h.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_after(len: usize, ops: impl FnOnce(&mut ParseState)) -> ParseState {
        let mut st = ParseState::new(len, 0);
        ops(&mut st);
        st
    }

    #[test]
    fn test_new_state_shape() {
        let st = ParseState::new(3, 7);
        assert_eq!(st.input_len(), 3);
        assert_eq!(st.offset(), 7);
        assert_eq!(st.stack_len(), 0);
        assert_eq!(st.buffer_front(), Some(0));
        assert!(!st.is_final());
    }

    #[test]
    fn test_empty_input_is_final() {
        assert!(ParseState::new(0, 0).is_final());
    }

    #[test]
    fn test_shift_and_pop() {
        let mut st = ParseState::new(2, 0);
        st.shift();
        assert_eq!(st.stack_top(), Some(0));
        assert_eq!(st.buffer_front(), Some(1));
        st.shift();
        assert_eq!(st.stack_top(), Some(1));
        assert!(st.buffer_exhausted());
        assert_eq!(st.pop(), Some(1));
        assert_eq!(st.pop(), Some(0));
        assert!(st.is_final());
    }

    #[test]
    fn test_arcs_and_children() {
        let mut st = ParseState::new(5, 0);
        st.add_arc(3, 1, Some(0));
        st.add_arc(3, 0, Some(1));
        st.add_arc(3, 4, None);
        assert_eq!(st.head(1), Some(3));
        assert_eq!(st.label(1), Some(0));
        assert_eq!(st.head(4), Some(3));
        assert_eq!(st.label(4), None);
        // Two leftmost children of 3 in ascending order.
        assert_eq!(st.lkids[3], [0, 1]);
        assert_eq!(st.rkids[3], [4, NONE]);
    }

    #[test]
    fn test_context_sentinels() {
        let st = ParseState::new(2, 0);
        let mut ctx = [0i32; CONTEXT_WIDTH];
        st.context(&mut ctx);
        // Empty stack: only B0/B1 populated.
        assert_eq!(ctx[0], NO_TOKEN);
        assert_eq!(ctx[3], 0);
        assert_eq!(ctx[4], 1);
        assert_eq!(ctx[5], NO_TOKEN);
        assert_eq!(ctx[12], NO_TOKEN);
    }

    #[test]
    fn test_context_children_and_head() {
        let st = state_after(4, |st| {
            st.shift(); // stack [0]
            st.add_arc(1, 0, None); // 0 <- 1
            st.pop();
            st.shift(); // stack [1]
            st.add_arc(1, 2, None);
        });
        let mut ctx = [0i32; CONTEXT_WIDTH];
        st.context(&mut ctx);
        assert_eq!(ctx[0], 1); // S0
        assert_eq!(ctx[3], 2); // B0
        assert_eq!(ctx[6], 0); // leftmost child of S0
        assert_eq!(ctx[8], 2); // rightmost child of S0
        assert_eq!(ctx[12], NO_TOKEN); // S0 unattached
    }

    #[test]
    fn test_hash_pure_over_content() {
        let make = || {
            state_after(3, |st| {
                st.shift();
                st.add_arc(1, 0, Some(2));
                st.pop();
                st.shift();
            })
        };
        // Independently constructed, identical content.
        assert_eq!(make().content_hash(), make().content_hash());
    }

    #[test]
    fn test_hash_diverges_on_different_actions() {
        let base = state_after(3, |st| {
            st.shift();
        });
        let mut a = base.clone();
        let mut b = base;
        a.shift();
        b.add_arc(1, 0, None);
        b.pop();
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_clone_is_deep() {
        let mut a = state_after(3, |st| {
            st.shift();
        });
        let b = a.clone();
        a.add_arc(1, 0, None);
        a.pop();
        assert_eq!(b.stack_top(), Some(0));
        assert_eq!(b.head(0), None);
        assert_ne!(a.content_hash(), b.content_hash());
    }
}
