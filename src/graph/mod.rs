//! Graphs: validated, immutable static structure a call is opened from.
//!
//! A [`GraphCandidate`] is a set of root nodes plus their transitive
//! dependency closure. Building a [`Graph`] runs the structural validators,
//! every per-node validator declared on individual nodes, and any
//! user-supplied graph validators; validation either succeeds and yields an
//! immutable graph or fails naming the offending nodes and edges.

mod validate;

pub use validate::{
    ancestor_memory_relationships_acyclic, consumed_by_envelope, consumer_envelops_dependency,
    ignoring_triggers_reply_signal, GraphValidator, NodeValidator,
};

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use crate::error::ValidationError;
use crate::logging;
use crate::node::{Node, NodeId, Role};

/// Root nodes plus their transitive dependency closure, not yet validated.
pub struct GraphCandidate<V> {
    role: Role,
    roots: Vec<Arc<Node<V>>>,
}

impl<V> GraphCandidate<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn from_roots(role: impl Into<Role>, roots: Vec<Arc<Node<V>>>) -> Self {
        Self {
            role: role.into(),
            roots,
        }
    }

    /// Runs every validator and yields the immutable graph, or the first
    /// diagnostic failure.
    pub fn build(
        self,
        validators: Vec<Arc<dyn GraphValidator<V>>>,
    ) -> Result<Arc<Graph<V>>, ValidationError> {
        // Transitive closure over dependency edges, breadth-first from the
        // roots.
        let mut nodes: Vec<Arc<Node<V>>> = Vec::new();
        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut queue: VecDeque<Arc<Node<V>>> = self.roots.iter().cloned().collect();
        while let Some(node) = queue.pop_front() {
            if !seen.insert(node.id()) {
                continue;
            }
            for edge in node.dependencies() {
                queue.push_back(edge.target().clone());
            }
            nodes.push(node);
        }

        let mut consumers: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut by_id: HashMap<NodeId, Arc<Node<V>>> = HashMap::new();
        for node in &nodes {
            by_id.insert(node.id(), node.clone());
            for edge in node.dependencies() {
                consumers
                    .entry(edge.target().id())
                    .or_default()
                    .push(node.id());
            }
        }

        let root_ids: HashSet<NodeId> = self.roots.iter().map(Node::id).collect();
        let mut unique = HashSet::new();
        for node in &nodes {
            let id = node.id();
            let internal = consumers.get(&id).map_or(0, Vec::len);
            let is_root = root_ids.contains(&id);
            // A root's external caller counts as a consumer; a non-root with
            // exactly one edge, or a root with none, is provably unique.
            let provable = (internal == 1 && !is_root) || (internal == 0 && is_root);
            if provable {
                unique.insert(id);
            }
        }

        let graph = Graph {
            role: self.role,
            roots: self.roots,
            nodes,
            by_id,
            consumers,
            unique,
        };

        validate::edge_invariants(&graph).inspect_err(logging::log_validation_error)?;
        ancestor_memory_relationships_acyclic(&graph)
            .inspect_err(logging::log_validation_error)?;
        for node in &graph.nodes {
            for validator in &node.validators {
                validator
                    .validate(node, &graph)
                    .inspect_err(logging::log_validation_error)?;
            }
        }
        for validator in &validators {
            validator
                .validate(&graph)
                .inspect_err(logging::log_validation_error)?;
        }

        Ok(Arc::new(graph))
    }
}

/// Compiled, validated graph: immutable, supports opening calls only.
pub struct Graph<V> {
    role: Role,
    roots: Vec<Arc<Node<V>>>,
    nodes: Vec<Arc<Node<V>>>,
    by_id: HashMap<NodeId, Arc<Node<V>>>,
    /// Dependency → consumer node ids, from declared edges.
    consumers: HashMap<NodeId, Vec<NodeId>>,
    /// Nodes whose sole consumer is statically known.
    unique: HashSet<NodeId>,
}

impl<V> Graph<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Builds and validates a graph in one step.
    pub fn from_roots(
        role: impl Into<Role>,
        roots: Vec<Arc<Node<V>>>,
        validators: Vec<Arc<dyn GraphValidator<V>>>,
    ) -> Result<Arc<Self>, ValidationError> {
        GraphCandidate::from_roots(role, roots).build(validators)
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn roots(&self) -> &[Arc<Node<V>>] {
        &self.roots
    }

    /// Every node in the graph: the roots and their transitive closure.
    pub fn nodes(&self) -> impl Iterator<Item = &Arc<Node<V>>> {
        self.nodes.iter()
    }

    pub fn is_root(&self, node: &Arc<Node<V>>) -> bool {
        self.roots.iter().any(|root| Arc::ptr_eq(root, node))
    }

    pub fn node_by_role(&self, role: &Role) -> Option<Arc<Node<V>>> {
        self.nodes
            .iter()
            .find(|node| node.role() == role)
            .cloned()
    }

    /// Nodes holding a declared edge on `node`.
    pub fn consumers_of(&self, node: &Arc<Node<V>>) -> Vec<Arc<Node<V>>> {
        self.consumers
            .get(&node.id())
            .into_iter()
            .flatten()
            .filter_map(|id| self.by_id.get(id).cloned())
            .collect()
    }

    /// Whether the graph proves `id` has at most one consumer, making an
    /// ignore eligible to trigger the reply signal. Conservative: when in
    /// doubt the answer is no.
    pub(crate) fn provably_unique_consumer(&self, id: NodeId) -> bool {
        self.unique.contains(&id)
    }

    /// Ids of every node reachable from `node` over dependency edges.
    pub(crate) fn transitive_dependencies(&self, node: &Arc<Node<V>>) -> HashSet<NodeId> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<Arc<Node<V>>> = node
            .dependencies()
            .iter()
            .map(|edge| edge.target().clone())
            .collect();
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next.id()) {
                continue;
            }
            for edge in next.dependencies() {
                queue.push_back(edge.target().clone());
            }
        }
        seen
    }
}

impl<V> fmt::Debug for Graph<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("role", &self.role)
            .field("roots", &self.roots.len())
            .field("nodes", &self.nodes.len())
            .finish()
    }
}
