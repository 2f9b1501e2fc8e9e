//! Node execution pipeline.
//!
//! One invocation of (node, memory) advances through check-in, priming,
//! behavior and waiting phases in that order; the phase boundaries are
//! happens-before edges the rest of the engine relies on. Check-in consults
//! the memoization store and either returns the stored reply or installs a
//! fresh one, making this invocation the unique owner of the pipeline. The
//! pipeline itself runs as a spawned task; the engine otherwise only observes
//! the future-like reply.

use std::collections::HashSet;
use std::sync::Arc;

use crate::call::CallContext;
use crate::cancel::{CancelActionSlot, CompositeCancelSignal};
use crate::device::DependencyCallingDevice;
use crate::error::{BehaviorError, EncounteredError, ReplyFailure};
use crate::logging;
use crate::memory::Memory;
use crate::node::{
    BehaviorKind, DependencyLifetime, DependencyToken, ExceptionStrategy, Node, Priming,
    PrimingFailurePolicy, Role,
};
use crate::observer::AfterHook;
use crate::reply::{Outcome, Reply};

/// Check-in for one call site of `node` in `memory`.
///
/// Returns the memoized reply when one exists; otherwise installs a fresh
/// pending reply, registers it with the call's outstanding-reply ledger, and
/// spawns the pipeline. The observer's every-call hook runs before the
/// storage lookup.
pub(crate) fn call_node<V>(
    ctx: &Arc<CallContext<V>>,
    caller: Option<&Role>,
    node: &Arc<Node<V>>,
    memory: &Arc<Memory<V>>,
) -> Arc<Reply<V>>
where
    V: Clone + Send + Sync + 'static,
{
    let role = node.role().clone();
    let every_after = ctx.observe(&role, |observer| observer.before_every_call(caller, &role));

    let (reply, created) = memory.store().get_or_create(node.id(), || {
        Reply::pending(
            role.clone(),
            memory.scope().token().child_token(),
            ctx.graph().provably_unique_consumer(node.id()),
        )
    });

    if !created {
        // Memoized hit: report the cached outcome when it is already known.
        if let Some(after) = every_after {
            let outcome = reply.poll();
            ctx.record_after(&role, after(outcome.as_ref()));
        }
        return reply;
    }

    ctx.ledger().register(&reply);
    let first_after = ctx.observe(&role, |observer| observer.before_first_call(&role));

    let pipeline = run_pipeline(
        ctx.clone(),
        node.clone(),
        memory.clone(),
        reply.clone(),
        every_after,
        first_after,
    );
    tokio::spawn(pipeline);

    reply
}

async fn run_pipeline<V>(
    ctx: Arc<CallContext<V>>,
    node: Arc<Node<V>>,
    memory: Arc<Memory<V>>,
    reply: Arc<Reply<V>>,
    every_after: Option<AfterHook<V>>,
    first_after: Option<AfterHook<V>>,
) where
    V: Clone + Send + Sync + 'static,
{
    logging::log_node_start(node.role());

    let device = DependencyCallingDevice::new(ctx.clone(), node.clone(), memory.clone());
    let outcome = execute_phases(&ctx, &node, &memory, &reply, &device).await;
    logging::log_node_complete(node.role(), outcome.kind());
    reply.set_outcome(outcome);
    device.weakly_close();

    // Waiting phase: defer the visible completion until the declared
    // dependency lifetime is satisfied. Whatever is not awaited here is
    // recorded as an obligation for consumers (and the call ledger) to drain.
    let owed = device.lifetime_replies();
    let descendants = match node.dependency_lifetime() {
        DependencyLifetime::NodeForAll => {
            await_transitively(owed).await;
            Vec::new()
        }
        DependencyLifetime::NodeForDirect => {
            let mut inherited = Vec::new();
            for dependency in &owed {
                dependency.published().await;
                inherited.extend(dependency.descendants());
            }
            inherited
        }
        DependencyLifetime::Graph => owed,
    };
    reply.set_descendants(descendants);
    reply.publish();

    // After-hooks run before the ledger entry clears so their failures are
    // visible in the final-state snapshot.
    let outcome = reply.poll();
    if let Some(after) = every_after {
        ctx.record_after(node.role(), after(outcome.as_ref()));
    }
    if let Some(after) = first_after {
        ctx.record_after(node.role(), after(outcome.as_ref()));
    }
    ctx.ledger().deregister(&reply);
}

/// Priming and behavior phases; returns the internal outcome.
async fn execute_phases<V>(
    ctx: &Arc<CallContext<V>>,
    node: &Arc<Node<V>>,
    memory: &Arc<Memory<V>>,
    reply: &Arc<Reply<V>>,
    device: &DependencyCallingDevice<V>,
) -> Outcome<V>
where
    V: Clone + Send + Sync + 'static,
{
    let role = node.role().clone();

    // Pre-priming check: call and scope tiers, always.
    if ctx.is_cancelled() || memory.scope().is_triggered() {
        logging::log_node_cancelled(&role);
        return Outcome::Cancelled;
    }

    // Priming: invoke primed dependencies in declared order.
    let mut primed = Vec::new();
    for (index, edge) in node.dependencies().iter().enumerate() {
        if edge.priming() != Priming::Primed {
            continue;
        }
        match device.prime(DependencyToken(index as u16)) {
            Ok(dependency) => primed.push(dependency),
            Err(err) => {
                // The recursive call never returned a reply, so there is
                // nothing to await or propagate; the phase ends here under
                // either policy.
                return Outcome::Failure(ReplyFailure::new(
                    role,
                    EncounteredError::DependencyCall(err.to_string()),
                ));
            }
        }
    }

    match node.priming_failure_policy() {
        PrimingFailurePolicy::WaitAll => {
            for dependency in &primed {
                dependency.published().await;
            }
        }
        PrimingFailurePolicy::FailFast => {
            if let Some(bad) = first_non_success(&primed).await {
                match bad.poll() {
                    Some(Outcome::Failure(failure)) => {
                        failure.push_caller(role);
                        return Outcome::Failure(failure);
                    }
                    _ => {
                        logging::log_node_cancelled(&role);
                        return Outcome::Cancelled;
                    }
                }
            }
        }
    }

    // Between phases: re-read call/scope, and the reply tier for nodes that
    // opted into it.
    if ctx.is_cancelled()
        || memory.scope().is_triggered()
        || (node.observes_reply_signal() && reply.cancel_token().is_cancelled())
    {
        logging::log_node_cancelled(&role);
        return Outcome::Cancelled;
    }

    // Behavior phase.
    let behavior_after = ctx.observe(&role, |observer| observer.before_behavior(&role));
    let result = run_behavior(ctx, node, memory, reply, device).await;
    let outcome = form_outcome(ctx, node, device, result);
    if let Some(after) = behavior_after {
        ctx.record_after(&role, after(Some(&outcome)));
    }
    outcome
}

async fn run_behavior<V>(
    ctx: &Arc<CallContext<V>>,
    node: &Arc<Node<V>>,
    memory: &Arc<Memory<V>>,
    reply: &Arc<Reply<V>>,
    device: &DependencyCallingDevice<V>,
) -> Result<V, BehaviorError>
where
    V: Clone + Send + Sync + 'static,
{
    match &node.behavior {
        BehaviorKind::Plain(behavior) => behavior.run(device).await,
        BehaviorKind::CompositeSignal(behavior) => {
            let signal = CompositeCancelSignal::new(
                ctx.cancel_token().clone(),
                memory.scope().token().clone(),
                reply.cancel_token().clone(),
            );
            behavior.run(device, &signal).await
        }
        BehaviorKind::CustomAction { behavior, .. } => {
            let slot = Arc::new(CancelActionSlot::new());
            let watcher = tokio::spawn(custom_action_watcher(
                ctx.clone(),
                node.clone(),
                reply.clone(),
                slot.clone(),
            ));
            let result = behavior.run(device, &slot).await;
            // Response complete: a late trigger must find nothing to run.
            slot.disarm();
            watcher.abort();
            result
        }
    }
}

/// Waits for the reply signal and fires the armed cancel action at most
/// once, isolated to the behavior worker when the node may interrupt.
async fn custom_action_watcher<V>(
    ctx: Arc<CallContext<V>>,
    node: Arc<Node<V>>,
    reply: Arc<Reply<V>>,
    slot: Arc<CancelActionSlot>,
) where
    V: Clone + Send + Sync + 'static,
{
    reply.cancel_token().cancelled().await;
    let role = node.role().clone();
    let after = ctx.observe(&role, |observer| observer.before_custom_action(&role));
    let isolated = node.interrupt_isolated();
    if isolated {
        node.interrupt_modifier.enter_isolated();
    }
    slot.fire();
    if isolated {
        node.interrupt_modifier.exit_isolated();
    }
    if let Some(after) = after {
        ctx.record_after(&role, after(None));
    }
}

/// Maps the behavior result onto an outcome, producing or reusing the
/// canonical failure chain and applying the exception strategy to sibling
/// dependency failures.
fn form_outcome<V>(
    ctx: &Arc<CallContext<V>>,
    node: &Arc<Node<V>>,
    device: &DependencyCallingDevice<V>,
    result: Result<V, BehaviorError>,
) -> Outcome<V>
where
    V: Clone + Send + Sync + 'static,
{
    let role = node.role().clone();
    let failure = match result {
        Ok(value) => return Outcome::Success(value),
        Err(BehaviorError::Cancelled) => return Outcome::Cancelled,
        Err(BehaviorError::Dependency(failure)) => {
            // Already canonical: reuse the container, grow the call stack.
            failure.push_caller(role.clone());
            failure
        }
        Err(BehaviorError::Failed(message)) => {
            ReplyFailure::new(role.clone(), EncounteredError::Behavior(message))
        }
    };

    for sibling in device.published_failures() {
        if sibling.same_chain(&failure) {
            continue;
        }
        match node.exception_strategy() {
            ExceptionStrategy::Suppress => failure.attach_suppressed(sibling),
            ExceptionStrategy::Discard => ctx.record_discarded_failure(&role, sibling),
        }
    }
    Outcome::Failure(failure)
}

/// Awaits `replies` until one publishes a non-success outcome; returns it.
/// Returns `None` once every reply has published successfully.
async fn first_non_success<V>(replies: &[Arc<Reply<V>>]) -> Option<Arc<Reply<V>>>
where
    V: Clone + Send + Sync + 'static,
{
    let mut pending: Vec<Arc<Reply<V>>> = replies.to_vec();
    while !pending.is_empty() {
        let index = {
            let waits: Vec<_> = pending
                .iter()
                .map(|reply| Box::pin(reply.published()))
                .collect();
            let (_, index, _rest) = futures::future::select_all(waits).await;
            index
        };
        let done = pending.swap_remove(index);
        match done.poll() {
            Some(Outcome::Success(_)) => continue,
            _ => return Some(done),
        }
    }
    None
}

/// Awaits the publication of every reply and, recursively, of every
/// obligation those replies propagated upward.
async fn await_transitively<V>(replies: Vec<Arc<Reply<V>>>)
where
    V: Clone + Send + Sync + 'static,
{
    let mut queue = replies;
    let mut seen = HashSet::new();
    while let Some(reply) = queue.pop() {
        if !seen.insert(Arc::as_ptr(&reply) as usize) {
            continue;
        }
        reply.published().await;
        queue.extend(reply.descendants());
    }
}
