//! Error types for graph execution.
//!
//! Failures travel through the graph in a canonical three-layer shape: a
//! container layer (the [`ReplyFailure`] handle itself, preserving the reply
//! protocol), a call-stack layer (the roles of every node the failure passed
//! through), and the encountered error (what a behavior actually produced).
//! When a dependency failure is re-raised by a consumer, the same container is
//! reused and the consumer's role is pushed onto the call-stack layer, so one
//! failure keeps a single identity across the whole graph.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::node::Role;

/// The innermost layer of a failure chain: what a behavior actually produced.
///
/// This is never a container; [`ReplyFailure::first_non_container`] always
/// bottoms out here.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EncounteredError {
    /// A behavior failed with a message (fresh failure, not propagated).
    #[error("behavior failed: {0}")]
    Behavior(String),
    /// A dependency could not be invoked at all (device refusal, missing
    /// ancestor memory), so there was no dependency reply to propagate.
    #[error("dependency call failed: {0}")]
    DependencyCall(String),
}

struct FailureChain {
    /// Roles the failure passed through, origin first.
    call_stack: Mutex<Vec<Role>>,
    encountered: EncounteredError,
    /// Sibling failures attached under the suppress exception strategy.
    suppressed: Mutex<Vec<ReplyFailure>>,
}

/// Canonical failure chain of a failed reply.
///
/// Cloning is cheap and shares the chain: consumers that re-raise a
/// dependency failure decorate the *same* chain rather than wrapping it, so
/// [`ReplyFailure::same_chain`] holds across every node the failure crossed.
#[derive(Clone)]
pub struct ReplyFailure {
    inner: Arc<FailureChain>,
}

impl ReplyFailure {
    /// Creates a fresh chain originating at `origin`.
    pub(crate) fn new(origin: Role, encountered: EncounteredError) -> Self {
        Self {
            inner: Arc::new(FailureChain {
                call_stack: Mutex::new(vec![origin]),
                encountered,
                suppressed: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Pushes a consumer role onto the call-stack layer.
    ///
    /// Called when a consumer re-raises this failure; the chain identity is
    /// preserved.
    pub(crate) fn push_caller(&self, role: Role) {
        self.inner.call_stack.lock().push(role);
    }

    /// Attaches a sibling failure as a suppressed cause.
    ///
    /// No-op when `other` is this same chain or is already attached; a
    /// dependency tracked through two call sites contributes one cause.
    pub(crate) fn attach_suppressed(&self, other: ReplyFailure) {
        if self.same_chain(&other) {
            return;
        }
        let mut suppressed = self.inner.suppressed.lock();
        if suppressed.iter().any(|known| known.same_chain(&other)) {
            return;
        }
        suppressed.push(other);
    }

    /// The call-stack layer: roles the failure passed through, origin first.
    pub fn call_stack(&self) -> Vec<Role> {
        self.inner.call_stack.lock().clone()
    }

    /// The encountered error (innermost layer).
    pub fn encountered(&self) -> &EncounteredError {
        &self.inner.encountered
    }

    /// Walks the chain past the container and call-stack layers and returns
    /// the first non-container cause.
    ///
    /// Because propagation reuses containers instead of nesting them, this is
    /// always the encountered error of the originating behavior.
    pub fn first_non_container(&self) -> &EncounteredError {
        &self.inner.encountered
    }

    /// Sibling failures attached under the suppress strategy.
    pub fn suppressed(&self) -> Vec<ReplyFailure> {
        self.inner.suppressed.lock().clone()
    }

    /// True when both handles share one underlying chain.
    pub fn same_chain(&self, other: &ReplyFailure) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Display for ReplyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stack = self.inner.call_stack.lock();
        write!(f, "failed at [")?;
        for (i, role) in stack.iter().enumerate() {
            if i > 0 {
                write!(f, " <- ")?;
            }
            write!(f, "{role}")?;
        }
        write!(f, "]: {}", self.inner.encountered)
    }
}

impl fmt::Debug for ReplyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyFailure")
            .field("call_stack", &self.inner.call_stack.lock())
            .field("encountered", &self.inner.encountered)
            .field("suppressed", &self.inner.suppressed.lock().len())
            .finish()
    }
}

/// Error observed by a consumer awaiting a reply's value.
#[derive(Debug, Clone, Error)]
pub enum ReplyError {
    /// The reply completed failed; carries the canonical chain.
    #[error("{0}")]
    Failed(ReplyFailure),
    /// The reply completed cancelled without running its behavior.
    #[error("reply cancelled")]
    Cancelled,
}

/// Error produced by a node behavior.
///
/// `Dependency` re-raises a propagated dependency failure (the executor reuses
/// the chain and pushes the consumer's role); `Failed` starts a fresh chain.
/// Awaiting a dependency with `?` converts [`ReplyError`] into the right
/// variant.
#[derive(Debug, Error)]
pub enum BehaviorError {
    /// Fresh behavior failure with a message.
    #[error("behavior failed: {0}")]
    Failed(String),
    /// Re-raised dependency failure in canonical form.
    #[error("dependency failed: {0}")]
    Dependency(ReplyFailure),
    /// The behavior observed cancellation and bailed out.
    #[error("behavior cancelled")]
    Cancelled,
}

impl From<ReplyError> for BehaviorError {
    fn from(err: ReplyError) -> Self {
        match err {
            ReplyError::Failed(failure) => BehaviorError::Dependency(failure),
            ReplyError::Cancelled => BehaviorError::Cancelled,
        }
    }
}

impl From<DeviceError> for BehaviorError {
    fn from(err: DeviceError) -> Self {
        BehaviorError::Failed(err.to_string())
    }
}

/// Error returned by the dependency calling device.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    /// The device was used after the behavior contract ended. Weak
    /// enforcement: the device refuses calls it can detect, no more.
    #[error("device used after behavior completion")]
    Closed,
    /// The invoked dependency is not one of the calling node's declared edges.
    #[error("dependency {0} was not declared by the calling node")]
    UndeclaredDependency(Role),
    /// The edge was declared with a different memory binding than the call
    /// used (e.g. a same-memory call on a new-memory edge).
    #[error("dependency {0} was declared with a different memory binding")]
    BindingMismatch(Role),
    /// No ancestor memory of the required kind is reachable from the current
    /// memory.
    #[error("no ancestor memory of kind {0} is reachable")]
    AncestorNotFound(String),
    /// A freshly created memory's kind does not match the target node's
    /// memory-kind binding.
    #[error("memory kind {actual} does not match node binding {expected}")]
    KindMismatch { expected: String, actual: String },
}

/// Error when validating a graph candidate (build time, fatal: no graph is
/// produced).
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The memory-kind ancestor relationships contain a cycle.
    #[error("memory-kind ancestor relationships contain a cycle through kind {0}")]
    AncestorCycle(String),
    /// A consumer of an envelope-scoped dependency escapes the envelope.
    #[error("consumer {consumer} of {dependency} is not consumed by envelope {envelope}")]
    ConsumerOutsideEnvelope {
        dependency: Role,
        consumer: Role,
        envelope: Role,
    },
    /// A same-memory edge connects nodes bound to different memory kinds.
    #[error("same-memory edge {consumer} -> {dependency} crosses memory kinds {consumer_kind} and {dependency_kind}")]
    EdgeKindMismatch {
        consumer: Role,
        dependency: Role,
        consumer_kind: String,
        dependency_kind: String,
    },
    /// A new-memory edge was declared primed; priming cannot supply the
    /// memory factory and input, so such edges must be unprimed.
    #[error("new-memory edge {consumer} -> {dependency} cannot be primed")]
    PrimedNewMemoryEdge { consumer: Role, dependency: Role },
    /// An ancestor-memory edge targets a kind that is never an ancestor of
    /// the consumer's kind.
    #[error("ancestor edge {consumer} -> {dependency}: kind {kind} is not an ancestor of {consumer_kind}")]
    AncestorKindUnreachable {
        consumer: Role,
        dependency: Role,
        kind: String,
        consumer_kind: String,
    },
    /// A node's type tag is incompatible with its type-instance witness.
    #[error("node {role}: type tag {tag} is incompatible with its type instance")]
    TypeWitnessMismatch { role: Role, tag: String },
    /// A per-node validator required a provably unique consumer and the graph
    /// cannot prove one.
    #[error("node {0} does not have a provably unique consumer")]
    NoUniqueConsumer(Role),
    /// An envelope validator references a role absent from the graph.
    #[error("envelope role {0} is not part of the graph")]
    EnvelopeNotInGraph(Role),
    /// A user-supplied graph validator failed.
    #[error("graph validation failed: {0}")]
    Custom(String),
}

/// Call lifecycle misuse. Reported to the caller; never fatal to outstanding
/// work.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LifecycleError {
    /// A root invocation arrived after weakly-close. Best-effort refusal.
    #[error("call is already weakly closed")]
    AlreadyClosed,
    /// The invoked node is not a root of the graph the call was opened from.
    #[error("node {0} is not a root of this graph")]
    NotARoot(Role),
}

/// Failure of an observer hook. Recorded on the call, never aborts the
/// pipeline.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("observer failed: {0}")]
pub struct ObserverError(pub String);

/// An error the call collected but no consumer will ever observe through a
/// reply. Surfaced in the final or abandoned state.
#[derive(Debug, Clone, Error)]
pub enum UnhandledError {
    /// An observer hook failed around `role`.
    #[error("observer failure at {role}: {error}")]
    Observer { role: Role, error: ObserverError },
    /// A sibling priming failure dropped under the discard exception
    /// strategy.
    #[error("discarded dependency failure at {role}: {failure}")]
    DiscardedDependencyFailure { role: Role, failure: ReplyFailure },
    /// A lifecycle violation that was refused but is still worth reporting.
    #[error("lifecycle violation: {0}")]
    Lifecycle(LifecycleError),
}
