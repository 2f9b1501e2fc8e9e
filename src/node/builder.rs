//! Node builder.
//!
//! Required up front: role and memory kind. Required to finish: a behavior
//! variant (one of the three `build*` terminals). Everything else is
//! optional. Dependency edges are declared through a small typestate,
//! `dependency(..).same_memory().primed()`, so an edge cannot exist without
//! both its memory binding and its priming having been chosen.

use std::sync::Arc;

use crate::cancel::{InterruptModifier, NoopInterruptModifier};
use crate::graph::NodeValidator;
use crate::memory::MemoryKind;
use crate::node::behavior::{
    Behavior, BehaviorKind, CompositeSignalBehavior, CustomActionBehavior,
};
use crate::node::{
    DependencyEdge, DependencyLifetime, DependencyToken, ExceptionStrategy, MemoryBinding, Node,
    NodeType, Priming, PrimingFailurePolicy, Role, TypeInstance,
};

/// Builder for an immutable [`Node`].
pub struct NodeBuilder<V> {
    role: Role,
    memory_kind: MemoryKind,
    type_tag: Option<NodeType>,
    type_instance: Option<TypeInstance>,
    deps: Vec<DependencyEdge<V>>,
    priming_policy: PrimingFailurePolicy,
    lifetime: DependencyLifetime,
    exception_strategy: ExceptionStrategy,
    interrupt_modifier: Arc<dyn InterruptModifier>,
    validators: Vec<Arc<dyn NodeValidator<V>>>,
}

impl<V> NodeBuilder<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(role: impl Into<Role>, memory_kind: impl Into<MemoryKind>) -> Self {
        Self {
            role: role.into(),
            memory_kind: memory_kind.into(),
            type_tag: None,
            type_instance: None,
            deps: Vec::new(),
            priming_policy: PrimingFailurePolicy::default(),
            lifetime: DependencyLifetime::default(),
            exception_strategy: ExceptionStrategy::default(),
            interrupt_modifier: Arc::new(NoopInterruptModifier),
            validators: Vec::new(),
        }
    }

    /// Declares the node's produced type tag, checked against the witness at
    /// graph build.
    pub fn type_tag(mut self, tag: impl Into<NodeType>) -> Self {
        self.type_tag = Some(tag.into());
        self
    }

    /// Supplies the type-instance witness for the tag.
    pub fn type_instance(mut self, witness: TypeInstance) -> Self {
        self.type_instance = Some(witness);
        self
    }

    pub fn priming_failure_policy(mut self, policy: PrimingFailurePolicy) -> Self {
        self.priming_policy = policy;
        self
    }

    pub fn dependency_lifetime(mut self, lifetime: DependencyLifetime) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn exception_strategy(mut self, strategy: ExceptionStrategy) -> Self {
        self.exception_strategy = strategy;
        self
    }

    /// Replaces the no-op interrupt modifier; only consulted for
    /// custom-action nodes that may interrupt.
    pub fn interrupt_modifier(mut self, modifier: Arc<dyn InterruptModifier>) -> Self {
        self.interrupt_modifier = modifier;
        self
    }

    /// Adds a per-node validator factory, run at graph build.
    pub fn validator(mut self, validator: Arc<dyn NodeValidator<V>>) -> Self {
        self.validators.push(validator);
        self
    }

    /// Starts declaring a dependency edge on `target`. The returned handle
    /// must be driven to a [`DependencyToken`] by choosing a memory binding
    /// and then a priming.
    pub fn dependency(&mut self, target: &Arc<Node<V>>) -> EdgeDecl<'_, V> {
        EdgeDecl {
            deps: &mut self.deps,
            target: target.clone(),
        }
    }

    /// Finishes the node with a plain behavior.
    pub fn build(self, behavior: Arc<dyn Behavior<V>>) -> Arc<Node<V>> {
        self.finish(BehaviorKind::Plain(behavior))
    }

    /// Finishes the node with a composite-signal behavior.
    pub fn build_with_composite_signal(
        self,
        behavior: Arc<dyn CompositeSignalBehavior<V>>,
    ) -> Arc<Node<V>> {
        self.finish(BehaviorKind::CompositeSignal(behavior))
    }

    /// Finishes the node with a custom-action behavior. `may_interrupt`
    /// declares that the armed action may interrupt the behavior worker, and
    /// asks the engine to isolate that interrupt.
    pub fn build_with_custom_action(
        self,
        behavior: Arc<dyn CustomActionBehavior<V>>,
        may_interrupt: bool,
    ) -> Arc<Node<V>> {
        self.finish(BehaviorKind::CustomAction {
            behavior,
            may_interrupt,
        })
    }

    fn finish(self, behavior: BehaviorKind<V>) -> Arc<Node<V>> {
        Arc::new(Node {
            role: self.role,
            type_tag: self.type_tag,
            type_instance: self.type_instance,
            memory_kind: self.memory_kind,
            deps: self.deps,
            priming_policy: self.priming_policy,
            lifetime: self.lifetime,
            exception_strategy: self.exception_strategy,
            behavior,
            interrupt_modifier: self.interrupt_modifier,
            validators: self.validators,
        })
    }
}

/// Dependency edge being declared: first choose the memory binding.
pub struct EdgeDecl<'b, V> {
    deps: &'b mut Vec<DependencyEdge<V>>,
    target: Arc<Node<V>>,
}

impl<'b, V> EdgeDecl<'b, V> {
    /// The dependency runs in the consumer's own memory.
    pub fn same_memory(self) -> BoundEdge<'b, V> {
        self.bind(MemoryBinding::SameMemory)
    }

    /// The dependency runs in a freshly created memory under a child scope.
    /// Such edges must be unprimed; graph validation enforces it.
    pub fn new_memory(self) -> BoundEdge<'b, V> {
        self.bind(MemoryBinding::NewMemory)
    }

    /// The dependency runs in the ancestor memory matching its own kind.
    pub fn ancestor_memory(self) -> BoundEdge<'b, V> {
        self.bind(MemoryBinding::AncestorMemory)
    }

    fn bind(self, binding: MemoryBinding) -> BoundEdge<'b, V> {
        BoundEdge {
            deps: self.deps,
            target: self.target,
            binding,
        }
    }
}

/// Dependency edge with its binding chosen: now choose the priming.
pub struct BoundEdge<'b, V> {
    deps: &'b mut Vec<DependencyEdge<V>>,
    target: Arc<Node<V>>,
    binding: MemoryBinding,
}

impl<V> BoundEdge<'_, V> {
    /// The engine invokes this dependency before the behavior runs.
    pub fn primed(self) -> DependencyToken {
        self.push(Priming::Primed)
    }

    /// The behavior invokes this dependency itself through the device.
    pub fn unprimed(self) -> DependencyToken {
        self.push(Priming::Unprimed)
    }

    fn push(self, priming: Priming) -> DependencyToken {
        let index = self.deps.len();
        assert!(index <= u16::MAX as usize, "too many dependency edges");
        self.deps.push(DependencyEdge {
            target: self.target,
            binding: self.binding,
            priming,
        });
        DependencyToken(index as u16)
    }
}
