//! Memory scopes: cancellation-bearing envelopes arranged in a tree rooted at
//! the call.
//!
//! Each scope owns a cancellation token that is a child of its parent scope's
//! token, so triggering a scope reaches every descendant. A scope also tracks
//! its externally accessible replies (the calls made into the scope from the
//! outside); once the scope is sealed and the last of those publishes, the
//! scope triggers itself and in-flight work inside it starts observing
//! cancellation.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// One node of the scope tree.
pub struct MemoryScope {
    token: CancellationToken,
    /// Externally accessible replies not yet published.
    accessible_open: AtomicUsize,
    /// Set once the scope's creator can make no further external calls into
    /// it.
    sealed: AtomicBool,
    /// Memories contained in this scope.
    memories: AtomicUsize,
}

impl MemoryScope {
    /// Root scope of a call; its token is a child of the call token.
    pub(crate) fn root(call_token: &CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            token: call_token.child_token(),
            accessible_open: AtomicUsize::new(0),
            sealed: AtomicBool::new(false),
            memories: AtomicUsize::new(0),
        })
    }

    /// Opens a child scope; triggering `self` triggers the child.
    pub(crate) fn child(self: &Arc<Self>) -> Arc<Self> {
        Arc::new(Self {
            token: self.token.child_token(),
            accessible_open: AtomicUsize::new(0),
            sealed: AtomicBool::new(false),
            memories: AtomicUsize::new(0),
        })
    }

    /// Passive trigger-check: true once this scope (or an ancestor) has
    /// triggered.
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Explicitly triggers this scope and every descendant.
    pub(crate) fn trigger(&self) {
        self.token.cancel();
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Records one externally accessible reply entering the scope.
    pub(crate) fn register_accessible(&self) {
        self.accessible_open.fetch_add(1, Ordering::SeqCst);
    }

    /// Records the publication of an externally accessible reply; the last
    /// one out of a sealed scope triggers it.
    pub(crate) fn accessible_published(&self) {
        let prev = self.accessible_open.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "accessible reply count underflow");
        if prev == 1 && self.sealed.load(Ordering::SeqCst) {
            self.trigger();
        }
    }

    /// Seals the scope: no further external calls will enter. Triggers
    /// immediately when nothing is outstanding.
    pub(crate) fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
        if self.accessible_open.load(Ordering::SeqCst) == 0 {
            self.trigger();
        }
    }

    pub(crate) fn register_memory(&self) {
        self.memories.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of memories contained in this scope.
    pub fn memory_count(&self) -> usize {
        self.memories.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for MemoryScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryScope")
            .field("triggered", &self.is_triggered())
            .field("sealed", &self.sealed.load(Ordering::SeqCst))
            .field("memories", &self.memory_count())
            .finish()
    }
}
