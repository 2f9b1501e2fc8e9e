//! Per-memory memoization store.
//!
//! One store per memory instance maps node identity to the reply for that
//! (node, memory) pair. `get_or_create` is the single memoization primitive:
//! linearizable and idempotent, so concurrent callers agree on one reply and
//! exactly one of them owns the pipeline. Entries are insertion-once and live
//! as long as the memory.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::node::NodeId;
use crate::reply::Reply;

/// Thread-safe node-identity → reply map, scoped to one memory instance.
pub struct MemoryStore<V> {
    replies: DashMap<NodeId, Arc<Reply<V>>>,
}

impl<V> MemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        Self {
            replies: DashMap::new(),
        }
    }

    /// Returns the reply for `id`, installing a fresh one atomically when
    /// absent. The boolean reports whether this call created the entry, which
    /// makes the caller the unique owner of the execution pipeline.
    pub(crate) fn get_or_create(
        &self,
        id: NodeId,
        create: impl FnOnce() -> Arc<Reply<V>>,
    ) -> (Arc<Reply<V>>, bool) {
        match self.replies.entry(id) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let reply = create();
                entry.insert(reply.clone());
                (reply, true)
            }
        }
    }

    /// Number of memoized replies in this store.
    pub fn len(&self) -> usize {
        self.replies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replies.is_empty()
    }
}
