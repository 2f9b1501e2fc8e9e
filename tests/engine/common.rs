//! Shared value type and behaviors for engine integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use memodag::{
    Behavior, BehaviorError, DependencyCallingDevice, Graph, GraphCall, Input,
    PlainMemoryFactory,
};

/// Heterogeneous value type used throughout the integration tests.
pub type Val = Value;

/// Opens a call against `graph` with a plain root memory of `kind`.
pub fn open_call(graph: Arc<Graph<Val>>, kind: &str, input: Val) -> GraphCall<Val> {
    GraphCall::open(
        graph,
        &PlainMemoryFactory::new(kind),
        Input::ready(input),
        None,
    )
}

/// Returns a fixed value.
pub struct ConstBehavior(pub Val);

#[async_trait]
impl Behavior<Val> for ConstBehavior {
    async fn run(&self, _device: &DependencyCallingDevice<Val>) -> Result<Val, BehaviorError> {
        Ok(self.0.clone())
    }
}

/// Returns the current memory's input.
pub struct InputBehavior;

#[async_trait]
impl Behavior<Val> for InputBehavior {
    async fn run(&self, device: &DependencyCallingDevice<Val>) -> Result<Val, BehaviorError> {
        Ok(device.input().get().await?)
    }
}

/// Returns a fixed value and counts how many times the behavior ran.
pub struct CountingConst {
    pub value: Val,
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Behavior<Val> for CountingConst {
    async fn run(&self, _device: &DependencyCallingDevice<Val>) -> Result<Val, BehaviorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.value.clone())
    }
}

/// Fails with a fixed message.
pub struct FailBehavior(pub String);

#[async_trait]
impl Behavior<Val> for FailBehavior {
    async fn run(&self, _device: &DependencyCallingDevice<Val>) -> Result<Val, BehaviorError> {
        Err(BehaviorError::Failed(self.0.clone()))
    }
}
