//! Input + constant + apply over primed same-memory dependencies.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use memodag::{
    Behavior, BehaviorError, DependencyCallingDevice, DependencyToken, Graph, NodeBuilder,
};

use crate::common::{open_call, ConstBehavior, InputBehavior, Val};

struct Concat {
    left: DependencyToken,
    right: DependencyToken,
}

#[async_trait]
impl Behavior<Val> for Concat {
    async fn run(&self, device: &DependencyCallingDevice<Val>) -> Result<Val, BehaviorError> {
        let left = device.call(self.left)?.await_value().await?;
        let right = device.call(self.right)?.await_value().await?;
        Ok(json!(format!(
            "{} {}",
            left.as_str().unwrap_or_default(),
            right.as_str().unwrap_or_default()
        )))
    }
}

/// **Scenario**: Memory input "Hello", a constant "World", and an apply node
/// over both primed dependencies produce "Hello World" with no unhandled
/// errors.
#[tokio::test]
async fn hello_world() {
    let input_node = NodeBuilder::new("input_of_memory", "main").build(Arc::new(InputBehavior));
    let world = NodeBuilder::new("world", "main").build(Arc::new(ConstBehavior(json!("World"))));

    let mut concat = NodeBuilder::new("concat", "main");
    let left = concat.dependency(&input_node).same_memory().primed();
    let right = concat.dependency(&world).same_memory().primed();
    let concat = concat.build(Arc::new(Concat { left, right }));

    let graph = Graph::from_roots("hello", vec![concat.clone()], Vec::new()).unwrap();
    let call = open_call(graph, "main", json!("Hello"));

    let reply = call.invoke(&concat).unwrap();
    assert_eq!(reply.await_value().await.unwrap(), json!("Hello World"));

    let state = call.weakly_close().await.unwrap();
    assert!(state.unhandled_errors.is_empty(), "{:?}", state.unhandled_errors);
    assert!(!state.is_abandoned);
}

/// **Scenario**: A node with zero dependencies skips priming entirely and
/// completes from its behavior alone.
#[tokio::test]
async fn zero_dependency_node_runs_directly() {
    let constant = NodeBuilder::new("lonely", "main").build(Arc::new(ConstBehavior(json!(5))));
    let graph = Graph::from_roots("lonely", vec![constant.clone()], Vec::new()).unwrap();
    let call = open_call(graph, "main", json!(null));

    let reply = call.invoke(&constant).unwrap();
    assert_eq!(reply.await_value().await.unwrap(), json!(5));
    call.weakly_close().await.unwrap();
}
