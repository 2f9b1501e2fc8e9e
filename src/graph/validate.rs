//! Graph validators.
//!
//! Two structural validators are always available: the memory-kind ancestor
//! DAG check and the consumer-envelope check for envelope-scoped resources.
//! Per-node validator factories wrap them for declaration on individual
//! nodes; arbitrary user validators run at graph build through
//! [`GraphValidator`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::error::ValidationError;
use crate::graph::Graph;
use crate::memory::MemoryKind;
use crate::node::{MemoryBinding, Node, Priming, Role};

/// Whole-graph validator supplied by the user at build time.
pub trait GraphValidator<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    fn validate(&self, graph: &Graph<V>) -> Result<(), ValidationError>;
}

/// Validator declared on an individual node, run against the built graph.
pub trait NodeValidator<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    fn validate(&self, node: &Arc<Node<V>>, graph: &Graph<V>) -> Result<(), ValidationError>;
}

/// Direct kind-level ancestor relationships: for every new-memory edge, the
/// created kind gains the creator kind as an ancestor.
fn kind_ancestors<V>(graph: &Graph<V>) -> HashMap<MemoryKind, HashSet<MemoryKind>>
where
    V: Clone + Send + Sync + 'static,
{
    let mut ancestors: HashMap<MemoryKind, HashSet<MemoryKind>> = HashMap::new();
    for node in graph.nodes() {
        for edge in node.dependencies() {
            if edge.binding() == MemoryBinding::NewMemory {
                ancestors
                    .entry(edge.target().memory_kind().clone())
                    .or_default()
                    .insert(node.memory_kind().clone());
            }
        }
    }
    ancestors
}

fn reachable_ancestors(
    ancestors: &HashMap<MemoryKind, HashSet<MemoryKind>>,
    from: &MemoryKind,
) -> HashSet<MemoryKind> {
    let mut seen = HashSet::new();
    let mut queue: VecDeque<MemoryKind> = VecDeque::new();
    queue.push_back(from.clone());
    while let Some(kind) = queue.pop_front() {
        if let Some(direct) = ancestors.get(&kind) {
            for ancestor in direct {
                if seen.insert(ancestor.clone()) {
                    queue.push_back(ancestor.clone());
                }
            }
        }
    }
    seen
}

/// Structural validator: the transitive union of ancestor relationships
/// across all memory kinds in the graph must form a DAG.
pub fn ancestor_memory_relationships_acyclic<V>(graph: &Graph<V>) -> Result<(), ValidationError>
where
    V: Clone + Send + Sync + 'static,
{
    let ancestors = kind_ancestors(graph);
    for kind in ancestors.keys() {
        if reachable_ancestors(&ancestors, kind).contains(kind) {
            return Err(ValidationError::AncestorCycle(kind.as_str().to_string()));
        }
    }
    Ok(())
}

/// Structural validator: every consumer of `dependency` other than
/// `envelope` itself must be (transitively) consumed by the envelope, so the
/// envelope's completion bounds every use of the resource.
pub fn consumer_envelops_dependency<V>(
    graph: &Graph<V>,
    dependency: &Arc<Node<V>>,
    envelope: &Arc<Node<V>>,
) -> Result<(), ValidationError>
where
    V: Clone + Send + Sync + 'static,
{
    let enveloped = graph.transitive_dependencies(envelope);
    for consumer in graph.consumers_of(dependency) {
        if Arc::ptr_eq(&consumer, envelope) {
            continue;
        }
        if !enveloped.contains(&consumer.id()) {
            return Err(ValidationError::ConsumerOutsideEnvelope {
                dependency: dependency.role().clone(),
                consumer: consumer.role().clone(),
                envelope: envelope.role().clone(),
            });
        }
    }
    Ok(())
}

/// Per-node invariants every graph build enforces: same-memory edges stay
/// within one kind, new-memory edges are unprimed, ancestor edges target a
/// reachable ancestor kind, and a declared type tag matches its witness.
pub(crate) fn edge_invariants<V>(graph: &Graph<V>) -> Result<(), ValidationError>
where
    V: Clone + Send + Sync + 'static,
{
    let ancestors = kind_ancestors(graph);
    for node in graph.nodes() {
        if let (Some(tag), Some(witness)) = (node.type_tag(), &node.type_instance) {
            if !witness.is_compatible(tag) {
                return Err(ValidationError::TypeWitnessMismatch {
                    role: node.role().clone(),
                    tag: tag.to_string(),
                });
            }
        }
        for edge in node.dependencies() {
            let target = edge.target();
            match edge.binding() {
                MemoryBinding::SameMemory => {
                    if node.memory_kind() != target.memory_kind() {
                        return Err(ValidationError::EdgeKindMismatch {
                            consumer: node.role().clone(),
                            dependency: target.role().clone(),
                            consumer_kind: node.memory_kind().as_str().to_string(),
                            dependency_kind: target.memory_kind().as_str().to_string(),
                        });
                    }
                }
                MemoryBinding::NewMemory => {
                    if edge.priming() == Priming::Primed {
                        return Err(ValidationError::PrimedNewMemoryEdge {
                            consumer: node.role().clone(),
                            dependency: target.role().clone(),
                        });
                    }
                }
                MemoryBinding::AncestorMemory => {
                    let reachable = reachable_ancestors(&ancestors, node.memory_kind());
                    if !reachable.contains(target.memory_kind()) {
                        return Err(ValidationError::AncestorKindUnreachable {
                            consumer: node.role().clone(),
                            dependency: target.role().clone(),
                            kind: target.memory_kind().as_str().to_string(),
                            consumer_kind: node.memory_kind().as_str().to_string(),
                        });
                    }
                }
            }
        }
    }
    Ok(())
}

/// Per-node validator factory: this node's ignoring will trigger the reply
/// signal, i.e. the graph proves a unique consumer.
pub fn ignoring_triggers_reply_signal<V>() -> Arc<dyn NodeValidator<V>>
where
    V: Clone + Send + Sync + 'static,
{
    struct IgnoringTriggersReplySignal;

    impl<V> NodeValidator<V> for IgnoringTriggersReplySignal
    where
        V: Clone + Send + Sync + 'static,
    {
        fn validate(&self, node: &Arc<Node<V>>, graph: &Graph<V>) -> Result<(), ValidationError> {
            if graph.provably_unique_consumer(node.id()) {
                Ok(())
            } else {
                Err(ValidationError::NoUniqueConsumer(node.role().clone()))
            }
        }
    }

    Arc::new(IgnoringTriggersReplySignal)
}

/// Per-node validator factory for resource nodes: every consumer of the node
/// must be consumed by the named envelope node.
pub fn consumed_by_envelope<V>(envelope: impl Into<Role>) -> Arc<dyn NodeValidator<V>>
where
    V: Clone + Send + Sync + 'static,
{
    struct ConsumedByEnvelope {
        envelope: Role,
    }

    impl<V> NodeValidator<V> for ConsumedByEnvelope
    where
        V: Clone + Send + Sync + 'static,
    {
        fn validate(&self, node: &Arc<Node<V>>, graph: &Graph<V>) -> Result<(), ValidationError> {
            let envelope = graph
                .node_by_role(&self.envelope)
                .ok_or_else(|| ValidationError::EnvelopeNotInGraph(self.envelope.clone()))?;
            consumer_envelops_dependency(graph, node, &envelope)
        }
    }

    Arc::new(ConsumedByEnvelope {
        envelope: envelope.into(),
    })
}
