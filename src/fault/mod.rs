//! Fault recovery chain
//!
//! The accelerator reports "memory must be faulted in before the job can
//! continue" through a fault notification that other components of the host
//! process may also be listening for. Every interested party installs a
//! [`FaultHandler`] at the head of a shared [`FaultChain`]; a fault walks the
//! chain from the most recently installed handler towards the oldest one
//! until some handler claims it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use tracing::{debug, trace};

use crate::error::{GzError, GzResult};

/// Kind of access that raised the fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultAccess {
    Read,
    Write,
}

/// Information handed to every handler consulted for one fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultContext {
    /// Faulting address
    pub addr: usize,

    /// Access that faulted
    pub access: FaultAccess,
}

impl FaultContext {
    pub fn new(addr: usize, access: FaultAccess) -> Self {
        Self { addr, access }
    }
}

/// One link of the chain.
///
/// Returns `true` when the handler owns the fault and has resolved it, which
/// stops the walk. Returning `false` passes the same context down the chain.
/// Handlers run on the faulting thread and must not re-enter the interrupted
/// operation.
pub trait FaultHandler: Send + Sync {
    fn on_fault(&self, ctx: &FaultContext) -> bool;

    /// Name used in diagnostics
    fn name(&self) -> &str {
        "anonymous"
    }
}

struct Link {
    id: u64,
    handler: Arc<dyn FaultHandler>,
}

/// Token for an installed handler
pub struct FaultRegistration {
    id: u64,
    superseded: Option<Arc<dyn FaultHandler>>,
}

impl FaultRegistration {
    /// The handler that was at the head before this one was installed
    pub fn superseded(&self) -> Option<&Arc<dyn FaultHandler>> {
        self.superseded.as_ref()
    }
}

impl fmt::Debug for FaultRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultRegistration")
            .field("id", &self.id)
            .field("superseded", &self.superseded.as_ref().map(|h| h.name().to_string()))
            .finish()
    }
}

/// Ordered list of fault handlers, newest first
pub struct FaultChain {
    // Stored oldest first; the head is the last element.
    links: RwLock<Vec<Link>>,
    next_id: AtomicU64,
}

static GLOBAL_CHAIN: OnceLock<Arc<FaultChain>> = OnceLock::new();

impl FaultChain {
    pub fn new() -> Self {
        Self {
            links: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// The process-wide chain
    pub fn global() -> &'static Arc<FaultChain> {
        GLOBAL_CHAIN.get_or_init(|| Arc::new(FaultChain::new()))
    }

    /// Push `handler` at the head of the chain.
    pub fn install(&self, handler: Arc<dyn FaultHandler>) -> FaultRegistration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut links = self.links.write().unwrap_or_else(|e| e.into_inner());
        let superseded = links.last().map(|link| Arc::clone(&link.handler));

        debug!(
            handler = handler.name(),
            superseded = superseded.as_ref().map(|h| h.name()),
            "installing fault handler"
        );
        links.push(Link { id, handler });

        FaultRegistration { id, superseded }
    }

    /// Remove a handler. Only the current head can be removed.
    ///
    /// # Errors
    /// Returns `GzError::InvalidArgument` if another handler was installed
    /// after this one, or if the registration belongs to another chain.
    pub fn uninstall(&self, registration: FaultRegistration) -> GzResult<()> {
        let mut links = self.links.write().unwrap_or_else(|e| e.into_inner());
        match links.last() {
            Some(head) if head.id == registration.id => {
                let link = links.pop();
                debug!(handler = link.as_ref().map(|l| l.handler.name()), "uninstalled fault handler");
                Ok(())
            }
            _ if links.iter().any(|link| link.id == registration.id) => Err(
                GzError::InvalidArgument("fault handler is not at the head of the chain".to_string()),
            ),
            _ => Err(GzError::InvalidArgument(
                "fault handler is not installed in this chain".to_string(),
            )),
        }
    }

    /// Walk the chain for one fault. Returns `true` if some handler claimed it.
    pub fn dispatch(&self, ctx: &FaultContext) -> bool {
        // Snapshot so a handler may install into the chain without deadlocking.
        let handlers: Vec<Arc<dyn FaultHandler>> = {
            let links = self.links.read().unwrap_or_else(|e| e.into_inner());
            links.iter().rev().map(|link| Arc::clone(&link.handler)).collect()
        };

        for handler in handlers {
            if handler.on_fault(ctx) {
                trace!(addr = ctx.addr, handler = handler.name(), "fault claimed");
                return true;
            }
            trace!(addr = ctx.addr, handler = handler.name(), "fault passed down the chain");
        }

        false
    }

    /// Dispatch and turn an unclaimed fault into an error.
    ///
    /// # Errors
    /// Returns `GzError::UnresolvedFault` when no handler claims the fault.
    pub fn resolve(&self, ctx: &FaultContext) -> GzResult<()> {
        if self.dispatch(ctx) {
            Ok(())
        } else {
            Err(GzError::UnresolvedFault { addr: ctx.addr })
        }
    }

    /// Number of installed handlers
    pub fn len(&self) -> usize {
        self.links.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FaultChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counting {
        name: &'static str,
        claims: bool,
        calls: AtomicUsize,
    }

    impl Counting {
        fn new(name: &'static str, claims: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                claims,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl FaultHandler for Counting {
        fn on_fault(&self, _ctx: &FaultContext) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.claims
        }

        fn name(&self) -> &str {
            self.name
        }
    }

    fn ctx() -> FaultContext {
        FaultContext::new(0xdead_0000, FaultAccess::Write)
    }

    #[test]
    fn test_declining_head_chains_to_previous() {
        let chain = FaultChain::new();
        let a = Counting::new("a", true);
        let b = Counting::new("b", false);
        chain.install(a.clone());
        let reg_b = chain.install(b.clone());

        assert_eq!(reg_b.superseded().map(|h| h.name()), Some("a"));
        assert!(chain.dispatch(&ctx()));
        assert_eq!(b.calls(), 1);
        assert_eq!(a.calls(), 1);
    }

    #[test]
    fn test_claiming_head_swallows_fault() {
        let chain = FaultChain::new();
        let a = Counting::new("a", true);
        let b = Counting::new("b", true);
        chain.install(a.clone());
        chain.install(b.clone());

        assert!(chain.dispatch(&ctx()));
        assert_eq!(b.calls(), 1);
        assert_eq!(a.calls(), 0);
    }

    #[test]
    fn test_exhausted_chain_is_unresolved() {
        let chain = FaultChain::new();
        assert!(!chain.dispatch(&ctx()));

        let a = Counting::new("a", false);
        let reg = chain.install(a.clone());
        assert!(reg.superseded().is_none());
        match chain.resolve(&ctx()) {
            Err(GzError::UnresolvedFault { addr }) => assert_eq!(addr, 0xdead_0000),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(a.calls(), 1);
    }

    #[test]
    fn test_uninstall_follows_stack_order() {
        let chain = FaultChain::new();
        let reg_a = chain.install(Counting::new("a", false));
        let reg_b = chain.install(Counting::new("b", false));

        assert!(matches!(chain.uninstall(reg_a), Err(GzError::InvalidArgument(_))));
        assert_eq!(chain.len(), 2);

        chain.uninstall(reg_b).unwrap();
        assert_eq!(chain.len(), 1);
    }
}
