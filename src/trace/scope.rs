//! Task-local call-chain context.
//!
//! A call chain is the work done by one task inside [`scope`]. Spans pushed by
//! outbound messages live on that chain's [`TraceStack`], so concurrent chains
//! on other tasks never observe each other's spans.

use std::cell::RefCell;
use std::future::Future;

use crate::protocol::headers::{ClientId, RequestContext, RequestHeader, ResponseHeader};
use crate::trace::id::TraceId;
use crate::trace::sampling::Sampler;
use crate::trace::stack::TraceStack;

tokio::task_local! {
    static CALL_CONTEXT: RefCell<CallContext>;
}

/// State carried along one logical call chain.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    stack: TraceStack,
    caller: Option<ClientId>,
    broadcast: Vec<RequestContext>,
    last_response: Option<ResponseHeader>,
}

impl CallContext {
    /// A fresh chain; its first outbound message opens a root span.
    pub fn new() -> Self {
        Self::default()
    }

    /// A chain whose outbound messages are children of `parent`.
    pub fn with_parent(parent: TraceId) -> Self {
        Self {
            stack: TraceStack::inherit(parent),
            ..Self::default()
        }
    }

    /// Continue the chain described by an inbound request header.
    ///
    /// Outbound calls made while serving the request become children of the
    /// caller's span, and the caller's broadcast contexts are forwarded.
    pub fn from_request(header: &RequestHeader) -> Self {
        Self {
            stack: TraceStack::inherit(header.to_trace_id()),
            caller: header.client_id.clone(),
            broadcast: header.contexts.clone(),
            last_response: None,
        }
    }

    pub fn stack(&self) -> &TraceStack {
        &self.stack
    }

    pub fn caller(&self) -> Option<&ClientId> {
        self.caller.as_ref()
    }
}

/// Run `fut` as its own call chain.
pub async fn scope<F>(ctx: CallContext, fut: F) -> F::Output
where
    F: Future,
{
    CALL_CONTEXT.scope(RefCell::new(ctx), fut).await
}

/// True when the current task runs inside [`scope`].
pub fn in_scope() -> bool {
    CALL_CONTEXT.try_with(|_| ()).is_ok()
}

/// Innermost span of the current chain.
pub fn current() -> Option<TraceId> {
    CALL_CONTEXT
        .try_with(|ctx| ctx.borrow().stack.current())
        .ok()
        .flatten()
}

/// Open spans on the current chain; zero outside a scope.
pub fn depth() -> usize {
    CALL_CONTEXT
        .try_with(|ctx| ctx.borrow().stack.depth())
        .unwrap_or(0)
}

/// Identity of the service that sent the request being served.
pub fn caller() -> Option<ClientId> {
    CALL_CONTEXT
        .try_with(|ctx| ctx.borrow().caller.clone())
        .ok()
        .flatten()
}

/// Response header recorded by the most recent enhanced reply on this chain.
pub fn last_response() -> Option<ResponseHeader> {
    CALL_CONTEXT
        .try_with(|ctx| ctx.borrow().last_response.clone())
        .ok()
        .flatten()
}

/// Attach a key/value context to every later request on this chain.
///
/// Returns false outside a scope. A repeated key replaces the earlier value.
pub fn set_broadcast(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> bool {
    let entry = RequestContext {
        key: key.into(),
        value: value.into(),
    };
    CALL_CONTEXT
        .try_with(|ctx| {
            let mut ctx = ctx.borrow_mut();
            ctx.broadcast.retain(|existing| existing.key != entry.key);
            ctx.broadcast.push(entry);
        })
        .is_ok()
}

pub(crate) fn broadcast_contexts() -> Vec<RequestContext> {
    CALL_CONTEXT
        .try_with(|ctx| ctx.borrow().broadcast.clone())
        .unwrap_or_default()
}

pub(crate) fn record_response(header: &ResponseHeader) {
    let _ = CALL_CONTEXT.try_with(|ctx| {
        ctx.borrow_mut().last_response = Some(header.clone());
    });
}

/// Open a span on the current chain for one outbound message.
///
/// Outside a scope a standalone root is produced and nothing is pushed.
pub(crate) fn enter_span(sampler: &Sampler) -> SpanGuard {
    match CALL_CONTEXT.try_with(|ctx| ctx.borrow_mut().stack.push(sampler)) {
        Ok(id) => SpanGuard { id, pushed: true },
        Err(_) => SpanGuard {
            id: TraceId::root(sampler.sample()),
            pushed: false,
        },
    }
}

/// Keeps a pushed span open; closing it restores the parent.
#[derive(Debug)]
#[must_use = "the span closes as soon as the guard is dropped"]
pub struct SpanGuard {
    id: TraceId,
    pushed: bool,
}

impl SpanGuard {
    pub fn id(&self) -> TraceId {
        self.id
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if !self.pushed {
            return;
        }
        let released = CALL_CONTEXT
            .try_with(|ctx| ctx.borrow_mut().stack.release(self.id))
            .unwrap_or(false);
        if !released {
            tracing::warn!(span = %self.id, "span closed outside the call chain that opened it");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spans_pair_inside_a_scope() {
        scope(CallContext::new(), async {
            assert!(in_scope());
            assert_eq!(depth(), 0);

            let outer = enter_span(&Sampler::always());
            assert!(outer.id().is_root());
            assert_eq!(current(), Some(outer.id()));

            {
                let inner = enter_span(&Sampler::always());
                assert_eq!(inner.id().parent_id(), outer.id().span_id());
                assert_eq!(depth(), 2);
            }

            assert_eq!(depth(), 1);
            assert_eq!(current(), Some(outer.id()));
            drop(outer);
            assert_eq!(depth(), 0);
        })
        .await;
    }

    #[tokio::test]
    async fn seeded_parent_is_the_base() {
        let parent = TraceId::root(false);
        scope(CallContext::with_parent(parent), async {
            assert_eq!(current(), Some(parent));
            let child = enter_span(&Sampler::always());
            assert_eq!(child.id().trace_id(), parent.trace_id());
            assert_eq!(child.id().parent_id(), parent.span_id());
            assert!(!child.id().sampled());
        })
        .await;
    }

    #[tokio::test]
    async fn outside_a_scope_nothing_is_recorded() {
        assert!(!in_scope());
        let guard = enter_span(&Sampler::never());
        assert!(guard.id().is_root());
        assert!(!guard.id().sampled());
        assert_eq!(depth(), 0);
        assert!(!set_broadcast("k", "v"));
    }

    #[tokio::test]
    async fn concurrent_chains_are_isolated() {
        let a = tokio::spawn(scope(CallContext::new(), async {
            let guard = enter_span(&Sampler::always());
            tokio::task::yield_now().await;
            (guard.id(), depth())
        }));
        let b = tokio::spawn(scope(CallContext::new(), async {
            let guard = enter_span(&Sampler::always());
            tokio::task::yield_now().await;
            (guard.id(), depth())
        }));

        let (id_a, depth_a) = a.await.unwrap();
        let (id_b, depth_b) = b.await.unwrap();
        assert_eq!(depth_a, 1);
        assert_eq!(depth_b, 1);
        assert_ne!(id_a.trace_id(), id_b.trace_id());
    }

    #[tokio::test]
    async fn inbound_header_seeds_the_chain() {
        let header = RequestHeader {
            trace_id: 5,
            span_id: 6,
            parent_span_id: Some(5),
            sampled: Some(true),
            client_id: Some(ClientId::new("svc-upstream")),
            ..RequestHeader::default()
        };

        scope(CallContext::from_request(&header), async {
            assert_eq!(caller(), Some(ClientId::new("svc-upstream")));
            let guard = enter_span(&Sampler::never());
            assert_eq!(guard.id().trace_id(), 5);
            assert_eq!(guard.id().parent_id(), 6);
            assert!(guard.id().sampled());
        })
        .await;
    }

    #[tokio::test]
    async fn broadcast_keys_replace() {
        scope(CallContext::new(), async {
            assert!(set_broadcast("tenant", "a"));
            assert!(set_broadcast("tenant", "b"));
            let contexts = broadcast_contexts();
            assert_eq!(contexts.len(), 1);
            assert_eq!(contexts[0].value, b"b".to_vec());
        })
        .await;
    }
}
