//! Nodes: immutable static descriptions of memoized async computations.
//!
//! A node declares everything the engine needs to run it: role, memory-kind
//! binding, dependency edges, priming-failure policy, dependency lifetime,
//! exception strategy, cancel mode, and a behavior. It never changes after
//! build. Construct nodes with [`NodeBuilder`]; compose them into a graph
//! with [`crate::graph::Graph::from_roots`].

mod behavior;
mod builder;

pub use behavior::{Behavior, CompositeSignalBehavior, CustomActionBehavior};
pub(crate) use behavior::BehaviorKind;
pub use builder::{BoundEdge, EdgeDecl, NodeBuilder};

use std::fmt;
use std::sync::Arc;

use crate::cancel::InterruptModifier;
use crate::graph::NodeValidator;
use crate::memory::MemoryKind;

/// Human-readable identity of a node, used in diagnostics and failure call
/// stacks.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Role(Arc<str>);

impl Role {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Role {
    fn from(name: &str) -> Self {
        Self(Arc::from(name))
    }
}

impl From<String> for Role {
    fn from(name: String) -> Self {
        Self(Arc::from(name.as_str()))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Type tag of a node's produced value shape.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct NodeType(Arc<str>);

impl From<&str> for NodeType {
    fn from(name: &str) -> Self {
        Self(Arc::from(name))
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Witness that a value shape is producible: checked against the node's type
/// tag at graph build.
#[derive(Clone)]
pub struct TypeInstance {
    accepts: NodeType,
}

impl TypeInstance {
    pub fn of(tag: impl Into<NodeType>) -> Self {
        Self {
            accepts: tag.into(),
        }
    }

    pub fn is_compatible(&self, tag: &NodeType) -> bool {
        &self.accepts == tag
    }
}

/// Stable node identity; the memoization key within one memory.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    #[cfg(test)]
    pub(crate) fn for_test(n: usize) -> Self {
        Self(n)
    }
}

/// Memory binding of a dependency edge.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MemoryBinding {
    /// The dependency runs in the consumer's memory.
    SameMemory,
    /// The dependency runs in a freshly created memory under a child scope.
    NewMemory,
    /// The dependency runs in an ancestor memory of its own kind.
    AncestorMemory,
}

/// Whether the engine invokes a dependency before the behavior runs.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Priming {
    /// Invoked automatically during the priming phase.
    Primed,
    /// Invoked by the behavior itself through the device.
    Unprimed,
}

/// What to do when a primed dependency fails.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum PrimingFailurePolicy {
    /// Await every primed reply; proceed to the behavior regardless of
    /// individual outcomes.
    #[default]
    WaitAll,
    /// End the priming phase at the first failed primed reply; it becomes
    /// the node's outcome and the behavior never runs.
    FailFast,
}

/// The completion envelope a node owes its consumers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum DependencyLifetime {
    /// Publication waits for every direct and transitive dependency call.
    #[default]
    NodeForAll,
    /// Publication waits for every direct dependency call.
    NodeForDirect,
    /// No local wait; the obligation propagates to consumers and ultimately
    /// to the call.
    Graph,
}

/// How sibling priming failures relate to a propagated failure.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ExceptionStrategy {
    /// Attach other primed-dependency failures as suppressed causes.
    #[default]
    Suppress,
    /// Drop them from the chain; they surface as unhandled errors instead.
    Discard,
}

/// How a node observes cancellation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CancelMode {
    /// Passive call/scope polls around the phases only.
    Standard,
    /// Additionally receives a composite read-only signal view.
    CompositeSignal,
    /// Additionally arms a custom cancel action; `may_interrupt` asks the
    /// engine to isolate interrupts to the behavior worker.
    CustomAction { may_interrupt: bool },
}

/// One declared dependency edge.
pub struct DependencyEdge<V> {
    pub(crate) target: Arc<Node<V>>,
    pub(crate) binding: MemoryBinding,
    pub(crate) priming: Priming,
}

impl<V> DependencyEdge<V> {
    pub fn target(&self) -> &Arc<Node<V>> {
        &self.target
    }

    pub fn binding(&self) -> MemoryBinding {
        self.binding
    }

    pub fn priming(&self) -> Priming {
        self.priming
    }
}

/// Handle a behavior uses to name one of its node's declared edges.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DependencyToken(pub(crate) u16);

/// Immutable static description of a memoized async computation.
pub struct Node<V> {
    pub(crate) role: Role,
    pub(crate) type_tag: Option<NodeType>,
    pub(crate) type_instance: Option<TypeInstance>,
    pub(crate) memory_kind: MemoryKind,
    pub(crate) deps: Vec<DependencyEdge<V>>,
    pub(crate) priming_policy: PrimingFailurePolicy,
    pub(crate) lifetime: DependencyLifetime,
    pub(crate) exception_strategy: ExceptionStrategy,
    pub(crate) behavior: BehaviorKind<V>,
    pub(crate) interrupt_modifier: Arc<dyn InterruptModifier>,
    pub(crate) validators: Vec<Arc<dyn NodeValidator<V>>>,
}

impl<V> Node<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn memory_kind(&self) -> &MemoryKind {
        &self.memory_kind
    }

    pub fn type_tag(&self) -> Option<&NodeType> {
        self.type_tag.as_ref()
    }

    pub fn dependencies(&self) -> &[DependencyEdge<V>] {
        &self.deps
    }

    pub fn priming_failure_policy(&self) -> PrimingFailurePolicy {
        self.priming_policy
    }

    pub fn dependency_lifetime(&self) -> DependencyLifetime {
        self.lifetime
    }

    pub fn exception_strategy(&self) -> ExceptionStrategy {
        self.exception_strategy
    }

    pub fn cancel_mode(&self) -> CancelMode {
        match &self.behavior {
            BehaviorKind::Plain(_) => CancelMode::Standard,
            BehaviorKind::CompositeSignal(_) => CancelMode::CompositeSignal,
            BehaviorKind::CustomAction { may_interrupt, .. } => CancelMode::CustomAction {
                may_interrupt: *may_interrupt,
            },
        }
    }

    /// Whether the reply-tier signal is re-read between priming and
    /// behavior. Standard nodes deliberately observe call/scope tiers only.
    pub(crate) fn observes_reply_signal(&self) -> bool {
        !matches!(self.cancel_mode(), CancelMode::Standard)
    }

    pub(crate) fn interrupt_isolated(&self) -> bool {
        matches!(
            self.cancel_mode(),
            CancelMode::CustomAction {
                may_interrupt: true
            }
        )
    }

    /// Stable identity: the address of the node's allocation, valid for as
    /// long as any graph holds the node.
    pub(crate) fn id(self: &Arc<Self>) -> NodeId {
        NodeId(Arc::as_ptr(self) as usize)
    }

    pub(crate) fn edge(&self, token: DependencyToken) -> Option<&DependencyEdge<V>> {
        self.deps.get(token.0 as usize)
    }
}

impl<V> fmt::Debug for Node<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("role", &self.role)
            .field("memory_kind", &self.memory_kind)
            .field("dependencies", &self.deps.len())
            .finish()
    }
}
