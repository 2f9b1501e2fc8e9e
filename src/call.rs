//! Graph calls: request-scoped orchestration.
//!
//! A call owns the root memory and scope, the call-wide cancel signal, the
//! observer handle, and the accounting of every outstanding reply. Lifecycle:
//! *open* → any number of root invocations → *weakly-close* (single-shot) →
//! *final*, or *abandoned* at any point after close began. Weakly-close
//! resolves once the outstanding-reply ledger drains; abandon stops waiting
//! and snapshots what is known at that instant.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::{LifecycleError, ObserverError, ReplyFailure, UnhandledError};
use crate::executor;
use crate::graph::Graph;
use crate::logging;
use crate::memory::{Input, Memory, MemoryFactory, MemoryScope};
use crate::node::{Node, Role};
use crate::observer::{AfterHook, Observer};
use crate::reply::{Outcome, Reply};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum CallPhase {
    Open,
    WeaklyClosed,
    Final,
    Abandoned,
}

/// Ledger of replies created during the call that have not yet published.
pub(crate) struct Ledger<V> {
    outstanding: Mutex<HashMap<usize, Arc<Reply<V>>>>,
    changed: Notify,
}

impl<V> Ledger<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn new() -> Self {
        Self {
            outstanding: Mutex::new(HashMap::new()),
            changed: Notify::new(),
        }
    }

    pub(crate) fn register(&self, reply: &Arc<Reply<V>>) {
        self.outstanding
            .lock()
            .insert(Arc::as_ptr(reply) as usize, reply.clone());
    }

    pub(crate) fn deregister(&self, reply: &Arc<Reply<V>>) {
        let mut outstanding = self.outstanding.lock();
        outstanding.remove(&(Arc::as_ptr(reply) as usize));
        if outstanding.is_empty() {
            self.changed.notify_waiters();
        }
    }

    /// Resolves once no reply is outstanding. Registration only ever happens
    /// from live pipelines or root invocations, so an observed-empty ledger
    /// stays empty unless a new root is (erroneously) admitted.
    async fn drained(&self) {
        loop {
            if self.outstanding.lock().is_empty() {
                return;
            }
            let notified = self.changed.notified();
            if self.outstanding.lock().is_empty() {
                return;
            }
            notified.await;
        }
    }

}

/// Shared state of one call; everything the executor needs reaches it
/// through this context.
pub(crate) struct CallContext<V> {
    graph: Arc<Graph<V>>,
    root_memory: Arc<Memory<V>>,
    root_scope: Arc<MemoryScope>,
    cancel: CancellationToken,
    observer: Option<Arc<dyn Observer<V>>>,
    ledger: Ledger<V>,
    roots: Mutex<Vec<Arc<Reply<V>>>>,
    roots_open: AtomicUsize,
    ignored: Mutex<Vec<Arc<Reply<V>>>>,
    unhandled: Mutex<Vec<UnhandledError>>,
    phase: Mutex<CallPhase>,
}

impl<V> CallContext<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn graph(&self) -> &Arc<Graph<V>> {
        &self.graph
    }

    pub(crate) fn ledger(&self) -> &Ledger<V> {
        &self.ledger
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Runs an observer before-hook, recording a failure instead of
    /// propagating it. Allocation-free when no observer is attached.
    pub(crate) fn observe(
        &self,
        role: &Role,
        hook: impl FnOnce(&dyn Observer<V>) -> Result<AfterHook<V>, ObserverError>,
    ) -> Option<AfterHook<V>> {
        let observer = self.observer.as_ref()?;
        match hook(observer.as_ref()) {
            Ok(after) => Some(after),
            Err(error) => {
                self.record_observer_failure(role, error);
                None
            }
        }
    }

    /// Records the result of an observer after-closure.
    pub(crate) fn record_after(&self, role: &Role, result: Result<(), ObserverError>) {
        if let Err(error) = result {
            self.record_observer_failure(role, error);
        }
    }

    fn record_observer_failure(&self, role: &Role, error: ObserverError) {
        self.unhandled.lock().push(UnhandledError::Observer {
            role: role.clone(),
            error,
        });
    }

    pub(crate) fn record_discarded_failure(&self, role: &Role, failure: ReplyFailure) {
        self.unhandled
            .lock()
            .push(UnhandledError::DiscardedDependencyFailure {
                role: role.clone(),
                failure,
            });
    }

    pub(crate) fn record_ignored(&self, reply: Arc<Reply<V>>) {
        let mut ignored = self.ignored.lock();
        if !ignored.iter().any(|known| Arc::ptr_eq(known, &reply)) {
            ignored.push(reply);
        }
    }

    fn phase(&self) -> CallPhase {
        *self.phase.lock()
    }

    fn root_reply_published(&self) {
        self.root_scope.accessible_published();
        let remaining = self.roots_open.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 && self.phase() != CallPhase::Open {
            // Last root reply completed after weakly-close.
            self.cancel.cancel();
        }
    }

    fn state_snapshot(&self, is_abandoned: bool) -> FinalState<V> {
        FinalState {
            root_outcomes: self
                .roots
                .lock()
                .iter()
                .map(|reply| (reply.role().clone(), reply.poll()))
                .collect(),
            ignored_replies: self.ignored.lock().clone(),
            unhandled_errors: self.unhandled.lock().clone(),
            is_abandoned,
        }
    }
}

/// Terminal snapshot of a call.
///
/// After a clean weakly-close this is complete: every reply created during
/// the call has published. After an abandon the same shape is returned with
/// `is_abandoned = true` and no completeness guarantee.
pub struct FinalState<V> {
    /// Outcome per invoked root, in first-invocation order. `None` marks a
    /// root that was still pending when an abandon snapshot was taken.
    pub root_outcomes: Vec<(Role, Option<Outcome<V>>)>,
    /// Replies some consumer ignored during the call.
    pub ignored_replies: Vec<Arc<Reply<V>>>,
    /// Errors no consumer will observe through a reply: observer failures,
    /// discarded dependency failures, reported lifecycle violations.
    pub unhandled_errors: Vec<UnhandledError>,
    pub is_abandoned: bool,
}

/// A [`FinalState`] taken by `abandon`: same shape, no completeness
/// guarantee.
pub type AbandonedState<V> = FinalState<V>;

impl<V> Debug for FinalState<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinalState")
            .field("roots", &self.root_outcomes.len())
            .field("ignored", &self.ignored_replies.len())
            .field("unhandled", &self.unhandled_errors.len())
            .field("is_abandoned", &self.is_abandoned)
            .finish()
    }
}

/// One request against a graph.
pub struct GraphCall<V> {
    ctx: Arc<CallContext<V>>,
}

impl<V> GraphCall<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Opens a call: constructs the root scope and, through `factory`, the
    /// root memory carrying `input`.
    pub fn open(
        graph: Arc<Graph<V>>,
        factory: &dyn MemoryFactory<V>,
        input: Input<V>,
        observer: Option<Arc<dyn Observer<V>>>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let root_scope = MemoryScope::root(&cancel);
        let root_memory = factory.create(root_scope.clone(), input, Vec::new());
        logging::log_call_open(graph.role());
        Self {
            ctx: Arc::new(CallContext {
                graph,
                root_memory,
                root_scope,
                cancel,
                observer,
                ledger: Ledger::new(),
                roots: Mutex::new(Vec::new()),
                roots_open: AtomicUsize::new(0),
                ignored: Mutex::new(Vec::new()),
                unhandled: Mutex::new(Vec::new()),
                phase: Mutex::new(CallPhase::Open),
            }),
        }
    }

    /// Invokes a root node and returns its reply. Repeated invocations of
    /// the same root share one memoized reply.
    pub fn invoke(&self, node: &Arc<Node<V>>) -> Result<Arc<Reply<V>>, LifecycleError> {
        if self.ctx.phase() != CallPhase::Open {
            let err = LifecycleError::AlreadyClosed;
            self.ctx
                .unhandled
                .lock()
                .push(UnhandledError::Lifecycle(err.clone()));
            return Err(err);
        }
        if !self.ctx.graph.is_root(node) {
            return Err(LifecycleError::NotARoot(node.role().clone()));
        }

        let reply = executor::call_node(&self.ctx, None, node, &self.ctx.root_memory);

        let mut roots = self.ctx.roots.lock();
        if !roots.iter().any(|known| Arc::ptr_eq(known, &reply)) {
            roots.push(reply.clone());
            self.ctx.roots_open.fetch_add(1, Ordering::SeqCst);
            self.ctx.root_scope.register_accessible();
            let ctx = self.ctx.clone();
            let watched = reply.clone();
            tokio::spawn(async move {
                watched.published().await;
                ctx.root_reply_published();
            });
        }
        Ok(reply)
    }

    /// Declares that the caller no longer cares about `reply` (external
    /// consumer ignore). Triggers the reply signal only when the graph
    /// proved the caller is the unique consumer.
    pub fn ignore(&self, reply: &Arc<Reply<V>>) {
        self.ctx.record_ignored(reply.clone());
        if reply.provably_unique_consumer() {
            reply.trigger_reply_signal();
        }
    }

    /// Weakly closes the call and waits for every outstanding reply.
    ///
    /// Single-shot: further root invocations are refused (best-effort) and a
    /// second close is an error. The call cancel signal triggers as soon as
    /// the last root reply completes; the returned future resolves once the
    /// outstanding-reply ledger drains, yielding the final-state snapshot.
    pub async fn weakly_close(&self) -> Result<FinalState<V>, LifecycleError> {
        self.begin_close()?;
        self.ctx.ledger.drained().await;

        let mut phase = self.ctx.phase.lock();
        let is_abandoned = *phase == CallPhase::Abandoned;
        if !is_abandoned {
            *phase = CallPhase::Final;
        }
        drop(phase);

        logging::log_call_closed(self.ctx.graph.role(), is_abandoned);
        Ok(self.ctx.state_snapshot(is_abandoned))
    }

    /// Stops waiting: triggers the call cancel signal immediately and
    /// returns a snapshot of what is known right now. Outstanding work keeps
    /// completing silently but is never delivered. After natural completion
    /// this is a no-op returning the final snapshot.
    pub fn abandon(&self) -> AbandonedState<V> {
        {
            let mut phase = self.ctx.phase.lock();
            if *phase == CallPhase::Final {
                return self.ctx.state_snapshot(false);
            }
            *phase = CallPhase::Abandoned;
        }
        self.ctx.cancel.cancel();
        logging::log_call_abandoned(self.ctx.graph.role());
        self.ctx.state_snapshot(true)
    }

    /// Weakly closes, abandoning at `deadline` if the close has not finished
    /// by then. The returned state's `is_abandoned` flag reports which path
    /// ran.
    pub async fn weakly_close_or_abandon_on(
        &self,
        deadline: tokio::time::Instant,
    ) -> Result<FinalState<V>, LifecycleError> {
        match tokio::time::timeout_at(deadline, self.weakly_close()).await {
            Ok(result) => result,
            Err(_) => Ok(self.abandon()),
        }
    }

    /// Explicitly triggers the call-wide cancel signal.
    pub fn trigger_cancel_signal(&self) {
        self.ctx.cancel.cancel();
    }

    /// The root memory of this call.
    pub fn root_memory(&self) -> &Arc<Memory<V>> {
        &self.ctx.root_memory
    }

    /// Passive check of the call-wide signal.
    pub fn is_cancelled(&self) -> bool {
        self.ctx.is_cancelled()
    }

    fn begin_close(&self) -> Result<(), LifecycleError> {
        let mut phase = self.ctx.phase.lock();
        if *phase != CallPhase::Open {
            return Err(LifecycleError::AlreadyClosed);
        }
        *phase = CallPhase::WeaklyClosed;
        drop(phase);

        self.ctx.root_scope.seal();
        if self.ctx.roots_open.load(Ordering::SeqCst) == 0 {
            // Every root already completed (or none was invoked).
            self.ctx.cancel.cancel();
        }
        Ok(())
    }
}

impl<V> Debug for GraphCall<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphCall")
            .field("graph", self.ctx.graph.role())
            .field("phase", &*self.ctx.phase.lock())
            .finish()
    }
}
