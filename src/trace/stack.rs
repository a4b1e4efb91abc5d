//! Per-call-chain span stack.

use crate::trace::id::TraceId;
use crate::trace::sampling::Sampler;

/// Spans opened by the current call chain, innermost last.
///
/// An optional `base` holds the span inherited from an inbound request; it is
/// the parent of the first push but does not count towards [`TraceStack::depth`].
#[derive(Debug, Clone, Default)]
pub struct TraceStack {
    base: Option<TraceId>,
    frames: Vec<TraceId>,
}

impl TraceStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// A stack whose pushes descend from `base`.
    pub fn inherit(base: TraceId) -> Self {
        Self {
            base: Some(base),
            frames: Vec::new(),
        }
    }

    /// Innermost span, falling back to the inherited one.
    pub fn current(&self) -> Option<TraceId> {
        self.frames.last().copied().or(self.base)
    }

    /// Number of pushed spans still open.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Open a span below the current top, or a new root if there is none.
    pub fn push(&mut self, sampler: &Sampler) -> TraceId {
        let id = match self.current() {
            Some(parent) => parent.child(),
            None => TraceId::root(sampler.sample()),
        };
        self.frames.push(id);
        id
    }

    /// Close the innermost span.
    ///
    /// # Panics
    /// On underflow: every pop must pair with an earlier push.
    pub fn pop(&mut self) -> TraceId {
        match self.frames.pop() {
            Some(id) => id,
            None => panic!("trace stack underflow: pop without matching push"),
        }
    }

    /// Close `id`, which is normally the innermost span.
    ///
    /// Spans opened by concurrent calls on one task can complete out of
    /// order; those are removed in place. Returns false if `id` is not open.
    pub fn release(&mut self, id: TraceId) -> bool {
        if self.frames.last() == Some(&id) {
            self.pop();
            return true;
        }
        match self.frames.iter().rposition(|open| *open == id) {
            Some(pos) => {
                self.frames.remove(pos);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_push_creates_root() {
        let mut stack = TraceStack::new();
        let root = stack.push(&Sampler::always());
        assert!(root.is_root());
        assert!(root.sampled());
        assert_eq!(stack.depth(), 1);
        assert_eq!(stack.current(), Some(root));
    }

    #[test]
    fn nested_pushes_form_a_chain_and_pops_restore() {
        let mut stack = TraceStack::new();
        let outer = stack.push(&Sampler::never());
        let inner = stack.push(&Sampler::always());

        assert_eq!(inner.trace_id(), outer.trace_id());
        assert_eq!(inner.parent_id(), outer.span_id());
        // Sampling is decided at the root only.
        assert!(!inner.sampled());

        assert_eq!(stack.pop(), inner);
        assert_eq!(stack.current(), Some(outer));
        assert_eq!(stack.pop(), outer);
        assert_eq!(stack.current(), None);
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn inherited_base_parents_first_push() {
        let incoming = TraceId::from_parts(10, 10, 11, true);
        let mut stack = TraceStack::inherit(incoming);
        assert_eq!(stack.depth(), 0);

        let child = stack.push(&Sampler::never());
        assert_eq!(child.trace_id(), 10);
        assert_eq!(child.parent_id(), 11);
        assert!(child.sampled());

        stack.pop();
        assert_eq!(stack.current(), Some(incoming));
    }

    #[test]
    fn release_handles_out_of_order_completion() {
        let mut stack = TraceStack::new();
        let a = stack.push(&Sampler::always());
        let b = stack.push(&Sampler::always());

        assert!(stack.release(a));
        assert_eq!(stack.current(), Some(b));
        assert!(stack.release(b));
        assert!(!stack.release(b));
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    #[should_panic(expected = "underflow")]
    fn pop_on_empty_panics() {
        TraceStack::new().pop();
    }
}
