//! Memories: per-request containers for memoized execution.
//!
//! A memory carries an input value, a memoization store, a scope, and
//! non-owning references to ancestor memories. Memoization is per memory
//! *instance*: two memories of the same kind hold independent stores, which is
//! how iteration yields independent per-element calls while graph-wide reuse
//! stays single-shot.

mod scope;
mod storage;

pub use scope::MemoryScope;
pub use storage::MemoryStore;

use std::fmt::Debug;
use std::sync::Arc;

use crate::error::ReplyError;
use crate::reply::Reply;

/// User-declared memory kind tag. Every node is statically bound to exactly
/// one kind.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemoryKind(Arc<str>);

impl MemoryKind {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MemoryKind {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

/// A memory's input: a value that is either already complete or still being
/// produced by another reply.
#[derive(Clone)]
pub enum Input<V> {
    /// A completed value.
    Ready(V),
    /// A value that becomes available when the backing reply publishes.
    Reply(Arc<Reply<V>>),
}

impl<V> Input<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn ready(value: V) -> Self {
        Input::Ready(value)
    }

    pub fn reply(reply: Arc<Reply<V>>) -> Self {
        Input::Reply(reply)
    }

    /// Resolves the input value, waiting on the backing reply when necessary.
    pub async fn get(&self) -> Result<V, ReplyError> {
        match self {
            Input::Ready(value) => Ok(value.clone()),
            Input::Reply(reply) => reply.await_value().await,
        }
    }
}

/// Per-request container: input, store, scope, ancestor links.
///
/// A memory exclusively owns its store; ancestors are shared-immutable `Arc`
/// handles used for lookup only, never for mutation, and the kind-level
/// ancestor relationships are validated to be acyclic at graph build.
pub struct Memory<V> {
    kind: MemoryKind,
    input: Input<V>,
    scope: Arc<MemoryScope>,
    ancestors: Vec<Arc<Memory<V>>>,
    store: MemoryStore<V>,
}

impl<V> Memory<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a memory under `scope`. The ancestor set is immutable from
    /// here on.
    pub fn new(
        kind: MemoryKind,
        scope: Arc<MemoryScope>,
        input: Input<V>,
        ancestors: Vec<Arc<Memory<V>>>,
    ) -> Arc<Self> {
        scope.register_memory();
        Arc::new(Self {
            kind,
            input,
            scope,
            ancestors,
            store: MemoryStore::new(),
        })
    }

    pub fn kind(&self) -> &MemoryKind {
        &self.kind
    }

    pub fn input(&self) -> &Input<V> {
        &self.input
    }

    pub fn scope(&self) -> &Arc<MemoryScope> {
        &self.scope
    }

    pub fn ancestors(&self) -> &[Arc<Memory<V>>] {
        &self.ancestors
    }

    /// Looks up the nearest ancestor memory of `kind`, searching direct
    /// ancestors first and then transitively.
    pub fn ancestor(&self, kind: &MemoryKind) -> Option<Arc<Memory<V>>> {
        for ancestor in &self.ancestors {
            if ancestor.kind() == kind {
                return Some(ancestor.clone());
            }
        }
        for ancestor in &self.ancestors {
            if let Some(found) = ancestor.ancestor(kind) {
                return Some(found);
            }
        }
        None
    }

    pub(crate) fn store(&self) -> &MemoryStore<V> {
        &self.store
    }
}

impl<V> Debug for Memory<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory")
            .field("kind", &self.kind)
            .field("ancestors", &self.ancestors.len())
            .finish()
    }
}

/// Constructs memories for new-memory dependency calls and for the root of a
/// call.
///
/// Ownership of the produced memory transfers to the engine immediately; the
/// factory must not retain and reuse the reference.
pub trait MemoryFactory<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    fn create(
        &self,
        scope: Arc<MemoryScope>,
        input: Input<V>,
        ancestors: Vec<Arc<Memory<V>>>,
    ) -> Arc<Memory<V>>;
}

/// The obvious factory: a memory of a fixed kind with the ancestors the
/// engine hands over.
pub struct PlainMemoryFactory {
    kind: MemoryKind,
}

impl PlainMemoryFactory {
    pub fn new(kind: impl Into<MemoryKind>) -> Self {
        Self { kind: kind.into() }
    }
}

impl<V> MemoryFactory<V> for PlainMemoryFactory
where
    V: Clone + Send + Sync + 'static,
{
    fn create(
        &self,
        scope: Arc<MemoryScope>,
        input: Input<V>,
        ancestors: Vec<Arc<Memory<V>>>,
    ) -> Arc<Memory<V>> {
        Memory::new(self.kind.clone(), scope, input, ancestors)
    }
}
