//! Trace identifiers.

use std::fmt;

/// Identity of one hop in a call tree.
///
/// A root has `span_id == trace_id == parent_id`. A child keeps the
/// `trace_id` and sampling decision of its parent, links to the parent's
/// span through `parent_id`, and gets a fresh `span_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId {
    trace_id: u64,
    parent_id: u64,
    span_id: u64,
    sampled: bool,
}

impl TraceId {
    /// Start a new call tree.
    pub fn root(sampled: bool) -> Self {
        let id = next_id();
        Self {
            trace_id: id,
            parent_id: id,
            span_id: id,
            sampled,
        }
    }

    /// Rebuild an id received from a peer.
    pub fn from_parts(trace_id: u64, parent_id: u64, span_id: u64, sampled: bool) -> Self {
        Self {
            trace_id,
            parent_id,
            span_id,
            sampled,
        }
    }

    /// Derive the next hop below this one.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            parent_id: self.span_id,
            span_id: next_id(),
            sampled: self.sampled,
        }
    }

    pub fn trace_id(&self) -> u64 {
        self.trace_id
    }

    pub fn parent_id(&self) -> u64 {
        self.parent_id
    }

    pub fn span_id(&self) -> u64 {
        self.span_id
    }

    pub fn sampled(&self) -> bool {
        self.sampled
    }

    pub fn is_root(&self) -> bool {
        self.span_id == self.trace_id && self.parent_id == self.trace_id
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:016x}.{:016x}<:{:016x}",
            self.trace_id, self.span_id, self.parent_id
        )
    }
}

/// Random non-zero 64-bit id. Zero is reserved for "absent" on the wire.
fn next_id() -> u64 {
    loop {
        let id = rand::random::<u64>();
        if id != 0 {
            return id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_links_to_itself() {
        let root = TraceId::root(true);
        assert!(root.is_root());
        assert_eq!(root.parent_id(), root.trace_id());
        assert_eq!(root.span_id(), root.trace_id());
        assert_ne!(root.trace_id(), 0);
    }

    #[test]
    fn child_derivation() {
        let root = TraceId::root(false);
        let child = root.child();
        let grandchild = child.child();

        assert_eq!(child.trace_id(), root.trace_id());
        assert_eq!(child.parent_id(), root.span_id());
        assert_ne!(child.span_id(), root.span_id());
        assert!(!child.sampled());
        assert!(!child.is_root());

        assert_eq!(grandchild.trace_id(), root.trace_id());
        assert_eq!(grandchild.parent_id(), child.span_id());
    }

    #[test]
    fn display_shows_trace_span_parent() {
        let id = TraceId::from_parts(1, 2, 3, true);
        assert_eq!(
            id.to_string(),
            "0000000000000001.0000000000000003<:0000000000000002"
        );
    }
}
