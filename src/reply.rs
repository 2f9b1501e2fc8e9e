//! Reply: the future-like handle for one invocation of one node in one
//! memory.
//!
//! A reply's external protocol is independent of the engine's task model: it
//! can be constructed pre-completed or completed mid-flight, and consumers see
//! the same observable shape either way. Two events are kept distinct
//! internally: the *outcome* is fixed exactly once at the end of the behavior
//! phase, while the externally observable *publication* is deferred until the
//! node's dependency-lifetime wait is satisfied. Accessors only ever expose
//! published state.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::{EncounteredError, ReplyError, ReplyFailure};
use crate::node::Role;

/// Final state of a reply.
#[derive(Debug, Clone)]
pub enum Outcome<V> {
    /// The behavior completed its response with a value.
    Success(V),
    /// The behavior (or a propagated dependency) failed; canonical chain.
    Failure(ReplyFailure),
    /// A cancellation signal was observed before or instead of the behavior.
    Cancelled,
}

impl<V> Outcome<V> {
    /// Short tag for logging.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::Failure(_) => "failure",
            Outcome::Cancelled => "cancelled",
        }
    }
}

/// Future-like handle for one invocation of one node with one memory.
///
/// Exclusively owned by its storage slot; everything a consumer holds is an
/// observational `Arc` handle. Once non-pending the state is immutable and
/// exactly one publication event is delivered.
pub struct Reply<V> {
    role: Role,
    /// Build-time proof that at most one consumer exists, used to decide
    /// whether ignoring may trigger the reply signal.
    unique_consumer: bool,
    cancel: CancellationToken,
    outcome: Mutex<Option<Outcome<V>>>,
    published: AtomicBool,
    publish_event: Notify,
    /// Dependency replies this invocation did not await before publishing;
    /// consumers with a node-for-all lifetime (and ultimately the call
    /// ledger) drain them. Set once, before publication.
    descendants: Mutex<Vec<Arc<Reply<V>>>>,
}

impl<V> Reply<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a pending reply owned by the invocation that installed it.
    pub(crate) fn pending(
        role: Role,
        cancel: CancellationToken,
        unique_consumer: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            role,
            unique_consumer,
            cancel,
            outcome: Mutex::new(None),
            published: AtomicBool::new(false),
            publish_event: Notify::new(),
            descendants: Mutex::new(Vec::new()),
        })
    }

    /// Creates an already-published reply. The observable protocol is
    /// identical to a reply completed mid-flight; useful as a reply-backed
    /// memory input that is known up front.
    pub fn completed(role: Role, outcome: Outcome<V>) -> Arc<Self> {
        Arc::new(Self {
            role,
            unique_consumer: false,
            cancel: CancellationToken::new(),
            outcome: Mutex::new(Some(outcome)),
            published: AtomicBool::new(true),
            publish_event: Notify::new(),
            descendants: Mutex::new(Vec::new()),
        })
    }

    /// Role of the node this reply belongs to.
    pub fn role(&self) -> &Role {
        &self.role
    }

    /// Fixes the outcome. The first call wins; later calls are ignored and
    /// report `false`.
    pub(crate) fn set_outcome(&self, outcome: Outcome<V>) -> bool {
        let mut slot = self.outcome.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        true
    }

    /// Records the unawaited dependency obligations. Must happen before
    /// publication; readers only look after `published()` resolves.
    pub(crate) fn set_descendants(&self, descendants: Vec<Arc<Reply<V>>>) {
        *self.descendants.lock() = descendants;
    }

    pub(crate) fn descendants(&self) -> Vec<Arc<Reply<V>>> {
        self.descendants.lock().clone()
    }

    /// Publishes the externally observable completion event. Exactly one
    /// call flips the flag; returns whether this call was it.
    pub(crate) fn publish(&self) -> bool {
        if self.published.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.publish_event.notify_waiters();
        true
    }

    /// True once the completion event has been published.
    pub fn is_complete(&self) -> bool {
        self.published.load(Ordering::Acquire)
    }

    /// Waits for the publication event.
    pub async fn published(&self) {
        loop {
            if self.is_complete() {
                return;
            }
            // Register interest before re-checking to avoid missing a wakeup.
            let notified = self.publish_event.notified();
            if self.is_complete() {
                return;
            }
            notified.await;
        }
    }

    /// Non-blocking peek: `None` while pending, the outcome once published.
    pub fn poll(&self) -> Option<Outcome<V>> {
        if !self.is_complete() {
            return None;
        }
        self.outcome.lock().clone()
    }

    /// Awaits publication and returns the value, or the failure/cancellation
    /// as a [`ReplyError`].
    pub async fn await_value(&self) -> Result<V, ReplyError> {
        self.published().await;
        match self.poll().expect("published reply has an outcome") {
            Outcome::Success(value) => Ok(value),
            Outcome::Failure(failure) => Err(ReplyError::Failed(failure)),
            Outcome::Cancelled => Err(ReplyError::Cancelled),
        }
    }

    /// Container layer of the failure chain, if this reply failed.
    pub fn failure(&self) -> Option<ReplyFailure> {
        match self.poll() {
            Some(Outcome::Failure(failure)) => Some(failure),
            _ => None,
        }
    }

    /// Call-stack layer of the failure chain, if this reply failed.
    pub fn failure_call_stack(&self) -> Option<Vec<Role>> {
        self.failure().map(|f| f.call_stack())
    }

    /// Encountered error of the failure chain, if this reply failed.
    pub fn encountered(&self) -> Option<EncounteredError> {
        self.failure().map(|f| f.encountered().clone())
    }

    /// First non-container cause of the failure chain, if this reply failed.
    pub fn first_non_container(&self) -> Option<EncounteredError> {
        self.failure().map(|f| f.first_non_container().clone())
    }

    /// True when the reply completed cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.poll(), Some(Outcome::Cancelled))
    }

    /// The reply-tier cancellation token (a descendant of the scope token).
    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Triggers the reply-tier signal. Only called when the unique-consumer
    /// proof holds.
    pub(crate) fn trigger_reply_signal(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn provably_unique_consumer(&self) -> bool {
        self.unique_consumer
    }
}

impl<V> Debug for Reply<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reply")
            .field("role", &self.role)
            .field("published", &self.published.load(Ordering::Acquire))
            .finish()
    }
}
