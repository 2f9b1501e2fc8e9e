//! Shared dependencies run once per (node, memory), however many consumers
//! and root invocations there are.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use memodag::{
    Behavior, BehaviorError, DependencyCallingDevice, DependencyToken, Graph, NodeBuilder,
};

use crate::common::{open_call, CountingConst, Val};

struct PassThrough(DependencyToken);

#[async_trait]
impl Behavior<Val> for PassThrough {
    async fn run(&self, device: &DependencyCallingDevice<Val>) -> Result<Val, BehaviorError> {
        Ok(device.call(self.0)?.await_value().await?)
    }
}

struct Pair {
    first: DependencyToken,
    second: DependencyToken,
}

#[async_trait]
impl Behavior<Val> for Pair {
    async fn run(&self, device: &DependencyCallingDevice<Val>) -> Result<Val, BehaviorError> {
        let first = device.call(self.first)?.await_value().await?;
        let second = device.call(self.second)?.await_value().await?;
        Ok(json!([first, second]))
    }
}

/// **Scenario**: X and Y both depend primed on Z; the root depends on X and
/// Y and is invoked twice within one call. Z's behavior runs exactly once.
#[tokio::test]
async fn shared_dependency_runs_once() {
    let z_calls = Arc::new(AtomicUsize::new(0));
    let z = NodeBuilder::new("z", "main").build(Arc::new(CountingConst {
        value: json!(42),
        calls: z_calls.clone(),
    }));

    let mut x = NodeBuilder::new("x", "main");
    let zx = x.dependency(&z).same_memory().primed();
    let x = x.build(Arc::new(PassThrough(zx)));

    let mut y = NodeBuilder::new("y", "main");
    let zy = y.dependency(&z).same_memory().primed();
    let y = y.build(Arc::new(PassThrough(zy)));

    let mut root = NodeBuilder::new("root", "main");
    let first = root.dependency(&x).same_memory().primed();
    let second = root.dependency(&y).same_memory().primed();
    let root = root.build(Arc::new(Pair { first, second }));

    let graph = Graph::from_roots("memoized", vec![root.clone()], Vec::new()).unwrap();
    let call = open_call(graph, "main", json!(null));

    let reply_a = call.invoke(&root).unwrap();
    let reply_b = call.invoke(&root).unwrap();
    assert!(
        Arc::ptr_eq(&reply_a, &reply_b),
        "repeated invocations share one memoized reply"
    );

    assert_eq!(reply_a.await_value().await.unwrap(), json!([42, 42]));
    assert_eq!(z_calls.load(Ordering::SeqCst), 1);

    let state = call.weakly_close().await.unwrap();
    assert!(state.unhandled_errors.is_empty());
}
