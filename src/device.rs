//! Dependency calling device: the only legal path from a behavior to a
//! dependency.
//!
//! One device exists per node invocation. It resolves the declared edge to a
//! target memory (the current one, a freshly created one under a child scope,
//! or an ancestor), runs the target's pipeline through the memoization path,
//! and registers every returned reply for the invocation's lifetime wait. It
//! also carries *ignore* and weakly refuses use once the behavior contract
//! has ended.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::call::CallContext;
use crate::error::{DeviceError, ReplyFailure};
use crate::executor;
use crate::memory::{Input, Memory, MemoryFactory};
use crate::node::{DependencyToken, MemoryBinding, Node};
use crate::reply::{Outcome, Reply};

struct TrackedDependency<V> {
    reply: Arc<Reply<V>>,
    ignored: bool,
}

/// Per-invocation bridge from a behavior to its node's declared dependencies.
pub struct DependencyCallingDevice<V> {
    ctx: Arc<CallContext<V>>,
    node: Arc<Node<V>>,
    memory: Arc<Memory<V>>,
    tracked: Mutex<Vec<TrackedDependency<V>>>,
    closed: AtomicBool,
}

impl<V> DependencyCallingDevice<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        ctx: Arc<CallContext<V>>,
        node: Arc<Node<V>>,
        memory: Arc<Memory<V>>,
    ) -> Self {
        Self {
            ctx,
            node,
            memory,
            tracked: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// The current memory's input.
    pub fn input(&self) -> &Input<V> {
        self.memory.input()
    }

    /// The memory this invocation runs in.
    pub fn memory(&self) -> &Arc<Memory<V>> {
        &self.memory
    }

    /// Invokes a same-memory or ancestor-memory dependency and returns its
    /// reply. For primed edges this returns the memoized reply.
    pub fn call(&self, token: DependencyToken) -> Result<Arc<Reply<V>>, DeviceError> {
        self.refuse_if_closed()?;
        let edge = self
            .node
            .edge(token)
            .ok_or_else(|| DeviceError::UndeclaredDependency(self.node.role().clone()))?;
        let target = edge.target().clone();
        let target_memory = match edge.binding() {
            MemoryBinding::SameMemory => self.memory.clone(),
            MemoryBinding::AncestorMemory => self
                .memory
                .ancestor(target.memory_kind())
                .ok_or_else(|| {
                    DeviceError::AncestorNotFound(target.memory_kind().as_str().to_string())
                })?,
            MemoryBinding::NewMemory => {
                return Err(DeviceError::BindingMismatch(target.role().clone()))
            }
        };
        Ok(self.run(&target, &target_memory))
    }

    /// Invokes a new-memory dependency: constructs a memory via `factory`
    /// under a freshly opened child scope and calls the target there.
    ///
    /// Ownership of the created memory transfers to the engine immediately;
    /// the behavior must not retain and reuse it. The child scope triggers
    /// once the returned reply publishes.
    pub fn call_in_new_memory(
        &self,
        token: DependencyToken,
        factory: &dyn MemoryFactory<V>,
        input: Input<V>,
    ) -> Result<Arc<Reply<V>>, DeviceError> {
        self.refuse_if_closed()?;
        let edge = self
            .node
            .edge(token)
            .ok_or_else(|| DeviceError::UndeclaredDependency(self.node.role().clone()))?;
        if edge.binding() != MemoryBinding::NewMemory {
            return Err(DeviceError::BindingMismatch(edge.target().role().clone()));
        }
        let target = edge.target().clone();

        let child_scope = self.memory.scope().child();
        let ancestors = vec![self.memory.clone()];
        let new_memory = factory.create(child_scope.clone(), input, ancestors);
        if new_memory.kind() != target.memory_kind() {
            return Err(DeviceError::KindMismatch {
                expected: target.memory_kind().as_str().to_string(),
                actual: new_memory.kind().as_str().to_string(),
            });
        }

        // The reply is the scope's only externally accessible entry point;
        // once it publishes, everything inside the scope is cancellable.
        child_scope.register_accessible();
        let reply = self.run(&target, &new_memory);
        child_scope.seal();
        {
            let reply = reply.clone();
            let scope = child_scope;
            tokio::spawn(async move {
                reply.published().await;
                scope.accessible_published();
            });
        }
        Ok(reply)
    }

    /// Declares that this invocation no longer cares about `reply`.
    ///
    /// Only replies obtained through this device are affected. When the
    /// target node provably has no other consumer, the reply's cancel signal
    /// triggers; otherwise the ignore is recorded and the signal stays
    /// silent. Ignoring twice behaves as ignoring once.
    pub fn ignore(&self, reply: &Arc<Reply<V>>) -> Result<(), DeviceError> {
        self.refuse_if_closed()?;
        let mut tracked = self.tracked.lock();
        let Some(entry) = tracked
            .iter_mut()
            .find(|entry| Arc::ptr_eq(&entry.reply, reply))
        else {
            return Ok(());
        };
        if entry.ignored {
            return Ok(());
        }
        entry.ignored = true;
        drop(tracked);

        self.ctx.record_ignored(reply.clone());
        if reply.provably_unique_consumer() {
            reply.trigger_reply_signal();
        }
        Ok(())
    }

    /// Primed-phase invocation path; same resolution and tracking as `call`.
    pub(crate) fn prime(&self, token: DependencyToken) -> Result<Arc<Reply<V>>, DeviceError> {
        self.call(token)
    }

    /// Weak close: calls arriving after the behavior contract ended are
    /// refused on a best-effort basis.
    pub(crate) fn weakly_close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Replies this invocation still owes a lifetime wait for (ignored ones
    /// excluded).
    pub(crate) fn lifetime_replies(&self) -> Vec<Arc<Reply<V>>> {
        self.tracked
            .lock()
            .iter()
            .filter(|entry| !entry.ignored)
            .map(|entry| entry.reply.clone())
            .collect()
    }

    /// Failure chains of every tracked dependency reply that has published
    /// failed so far, one entry per chain. Used to attach or discard sibling
    /// failures.
    pub(crate) fn published_failures(&self) -> Vec<ReplyFailure> {
        let mut failures: Vec<ReplyFailure> = Vec::new();
        for entry in self.tracked.lock().iter() {
            if let Some(Outcome::Failure(failure)) = entry.reply.poll() {
                if !failures.iter().any(|known| known.same_chain(&failure)) {
                    failures.push(failure);
                }
            }
        }
        failures
    }

    fn run(&self, target: &Arc<Node<V>>, target_memory: &Arc<Memory<V>>) -> Arc<Reply<V>> {
        let isolated = self.node.interrupt_isolated();
        if isolated {
            self.node.interrupt_modifier.enter_isolated();
        }
        let reply = executor::call_node(
            &self.ctx,
            Some(self.node.role()),
            target,
            target_memory,
        );
        if isolated {
            self.node.interrupt_modifier.exit_isolated();
        }
        self.tracked.lock().push(TrackedDependency {
            reply: reply.clone(),
            ignored: false,
        });
        reply
    }

    fn refuse_if_closed(&self) -> Result<(), DeviceError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DeviceError::Closed);
        }
        Ok(())
    }
}
