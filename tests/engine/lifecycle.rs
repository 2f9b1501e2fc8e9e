//! Call lifecycle: weakly-close, abandon, and refusals.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use memodag::{
    Behavior, BehaviorError, DependencyCallingDevice, DependencyLifetime, Graph,
    LifecycleError, NodeBuilder,
};

use crate::common::{open_call, ConstBehavior, Val};

/// Never completes its response; only abandon bounds the damage.
struct Hang;

#[async_trait]
impl Behavior<Val> for Hang {
    async fn run(&self, _device: &DependencyCallingDevice<Val>) -> Result<Val, BehaviorError> {
        std::future::pending::<()>().await;
        unreachable!()
    }
}

/// **Scenario**: After weakly-close, further root invocations and a second
/// close are refused.
#[tokio::test]
async fn close_is_single_shot_and_refuses_roots() {
    let root = NodeBuilder::new("root", "main").build(Arc::new(ConstBehavior(json!(1))));
    let graph = Graph::from_roots("closing", vec![root.clone()], Vec::new()).unwrap();
    let call = open_call(graph, "main", json!(null));

    call.invoke(&root).unwrap().await_value().await.unwrap();
    let state = call.weakly_close().await.unwrap();
    assert!(!state.is_abandoned);

    match call.invoke(&root) {
        Err(LifecycleError::AlreadyClosed) => {}
        other => panic!("expected AlreadyClosed, got {:?}", other),
    }
    match call.weakly_close().await {
        Err(LifecycleError::AlreadyClosed) => {}
        other => panic!("expected AlreadyClosed, got {:?}", other.map(|_| ())),
    }
}

/// **Scenario**: Invoking a non-root node is refused.
#[tokio::test]
async fn non_root_invocation_is_refused() {
    let dep = NodeBuilder::new("dep", "main").build(Arc::new(ConstBehavior(json!(1))));
    let mut root = NodeBuilder::new("root", "main");
    root.dependency(&dep).same_memory().primed();
    let root = root.build(Arc::new(ConstBehavior(json!(2))));

    let graph = Graph::from_roots("roots_only", vec![root], Vec::new()).unwrap();
    let call = open_call(graph, "main", json!(null));

    match call.invoke(&dep) {
        Err(LifecycleError::NotARoot(role)) => assert_eq!(role.as_str(), "dep"),
        other => panic!("expected NotARoot, got {:?}", other),
    }
}

/// **Scenario**: Abandon after natural completion is a no-op; the snapshot
/// reports the finished state.
#[tokio::test]
async fn abandon_after_completion_is_noop() {
    let root = NodeBuilder::new("root", "main").build(Arc::new(ConstBehavior(json!(3))));
    let graph = Graph::from_roots("noop", vec![root.clone()], Vec::new()).unwrap();
    let call = open_call(graph, "main", json!(null));

    call.invoke(&root).unwrap().await_value().await.unwrap();
    call.weakly_close().await.unwrap();

    let state = call.abandon();
    assert!(!state.is_abandoned);
    assert_eq!(state.root_outcomes.len(), 1);
}

/// **Scenario**: A behavior that never completes holds weakly-close open;
/// the deadline path abandons and snapshots the pending root.
#[tokio::test]
async fn abandon_bounds_a_hung_behavior() {
    let root = NodeBuilder::new("hung", "main").build(Arc::new(Hang));
    let graph = Graph::from_roots("hung", vec![root.clone()], Vec::new()).unwrap();
    let call = open_call(graph, "main", json!(null));

    call.invoke(&root).unwrap();
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_millis(50);
    let state = call.weakly_close_or_abandon_on(deadline).await.unwrap();

    assert!(state.is_abandoned);
    assert!(call.is_cancelled(), "abandon triggers the call signal");
    match state.root_outcomes.as_slice() {
        [(role, None)] => assert_eq!(role.as_str(), "hung"),
        other => panic!("expected one pending root, got {:?}", other.len()),
    }
}

/// **Scenario**: A graph-lifetime node with no dependencies behaves exactly
/// like node-for-all: it publishes and the call closes cleanly.
#[tokio::test]
async fn graph_lifetime_without_dependencies_closes_cleanly() {
    let root = NodeBuilder::new("root", "main")
        .dependency_lifetime(DependencyLifetime::Graph)
        .build(Arc::new(ConstBehavior(json!(8))));
    let graph = Graph::from_roots("graph_lifetime", vec![root.clone()], Vec::new()).unwrap();
    let call = open_call(graph, "main", json!(null));

    let reply = call.invoke(&root).unwrap();
    assert_eq!(reply.await_value().await.unwrap(), json!(8));
    let state = call.weakly_close().await.unwrap();
    assert!(state.unhandled_errors.is_empty());
}
