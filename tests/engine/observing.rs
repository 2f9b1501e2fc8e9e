//! Observer hooks: before/after pairing, memoized hits, and failure
//! recording.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;

use memodag::{
    AfterHook, Graph, GraphCall, Input, NodeBuilder, Observer, ObserverError,
    PlainMemoryFactory, Role, UnhandledError,
};

use crate::common::{ConstBehavior, Val};

#[derive(Default)]
struct CountingObserver {
    every_before: AtomicUsize,
    every_after: Arc<AtomicUsize>,
    first_before: AtomicUsize,
    behavior_before: AtomicUsize,
}

impl Observer<Val> for CountingObserver {
    fn before_every_call(
        &self,
        _caller: Option<&Role>,
        _node: &Role,
    ) -> Result<AfterHook<Val>, ObserverError> {
        self.every_before.fetch_add(1, Ordering::SeqCst);
        let after = self.every_after.clone();
        Ok(Box::new(move |outcome| {
            if outcome.is_some() {
                after.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }))
    }

    fn before_first_call(&self, _node: &Role) -> Result<AfterHook<Val>, ObserverError> {
        self.first_before.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(|_| Ok(())))
    }

    fn before_behavior(&self, _node: &Role) -> Result<AfterHook<Val>, ObserverError> {
        self.behavior_before.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(|_| Ok(())))
    }
}

struct FailingObserver;

impl Observer<Val> for FailingObserver {
    fn before_behavior(&self, node: &Role) -> Result<AfterHook<Val>, ObserverError> {
        Err(ObserverError(format!("refused to watch {node}")))
    }
}

fn two_node_graph() -> (Arc<memodag::Node<Val>>, Arc<Graph<Val>>) {
    let dep = NodeBuilder::new("dep", "main").build(Arc::new(ConstBehavior(json!(1))));
    let mut root = NodeBuilder::new("root", "main");
    root.dependency(&dep).same_memory().primed();
    let root = root.build(Arc::new(ConstBehavior(json!(2))));
    let graph = Graph::from_roots("observed", vec![root.clone()], Vec::new()).unwrap();
    (root, graph)
}

/// **Scenario**: Every call site fires an every-call hook (memoized hits
/// included); first-call and behavior hooks fire once per created pipeline.
#[tokio::test]
async fn hooks_fire_per_call_site_and_per_pipeline() {
    let observer = Arc::new(CountingObserver::default());
    let (root, graph) = two_node_graph();
    let call = GraphCall::open(
        graph,
        &PlainMemoryFactory::new("main"),
        Input::ready(json!(null)),
        Some(observer.clone()),
    );

    let reply = call.invoke(&root).unwrap();
    reply.await_value().await.unwrap();
    let again = call.invoke(&root).unwrap();
    again.await_value().await.unwrap();
    let state = call.weakly_close().await.unwrap();
    assert!(state.unhandled_errors.is_empty());

    // Two root invocations plus the primed dependency call.
    assert_eq!(observer.every_before.load(Ordering::SeqCst), 3);
    assert_eq!(observer.every_after.load(Ordering::SeqCst), 3);
    // One created pipeline per node.
    assert_eq!(observer.first_before.load(Ordering::SeqCst), 2);
    assert_eq!(observer.behavior_before.load(Ordering::SeqCst), 2);
}

/// **Scenario**: A failing observer hook is recorded as an unhandled error
/// and never disturbs the pipeline.
#[tokio::test]
async fn observer_failure_is_recorded_not_fatal() {
    let (root, graph) = two_node_graph();
    let call = GraphCall::open(
        graph,
        &PlainMemoryFactory::new("main"),
        Input::ready(json!(null)),
        Some(Arc::new(FailingObserver)),
    );

    let reply = call.invoke(&root).unwrap();
    assert_eq!(reply.await_value().await.unwrap(), json!(2));

    let state = call.weakly_close().await.unwrap();
    let observer_failures: Vec<_> = state
        .unhandled_errors
        .iter()
        .filter(|err| matches!(err, UnhandledError::Observer { .. }))
        .collect();
    assert_eq!(observer_failures.len(), 2, "{:?}", state.unhandled_errors);
}
