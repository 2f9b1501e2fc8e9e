//! Priming-failure policies: fail-fast vs wait-all, suppress vs discard.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use memodag::{
    Behavior, BehaviorError, DependencyCallingDevice, DependencyToken, EncounteredError,
    ExceptionStrategy, Graph, NodeBuilder, PrimingFailurePolicy, Role, UnhandledError,
};

use crate::common::{open_call, ConstBehavior, FailBehavior, Val};

struct NeverRuns {
    ran: Arc<AtomicBool>,
}

#[async_trait]
impl Behavior<Val> for NeverRuns {
    async fn run(&self, _device: &DependencyCallingDevice<Val>) -> Result<Val, BehaviorError> {
        self.ran.store(true, Ordering::SeqCst);
        Ok(json!(null))
    }
}

struct ReRaise {
    failing: DependencyToken,
    succeeding: DependencyToken,
    ran: Arc<AtomicBool>,
}

#[async_trait]
impl Behavior<Val> for ReRaise {
    async fn run(&self, device: &DependencyCallingDevice<Val>) -> Result<Val, BehaviorError> {
        self.ran.store(true, Ordering::SeqCst);
        // The succeeded sibling is observable even though a primed sibling
        // failed.
        let seven = device.call(self.succeeding)?.await_value().await?;
        assert_eq!(seven, json!(7));
        let value = device.call(self.failing)?.await_value().await?;
        Ok(value)
    }
}

/// **Scenario**: Under fail-fast, the first failed primed reply becomes the
/// consumer's outcome and the behavior never runs; the chain carries the
/// origin and the consumer.
#[tokio::test]
async fn fail_fast_skips_behavior() {
    let d1 = NodeBuilder::new("d1", "main").build(Arc::new(FailBehavior("boom".into())));
    let d2 = NodeBuilder::new("d2", "main").build(Arc::new(ConstBehavior(json!(7))));

    let ran = Arc::new(AtomicBool::new(false));
    let mut consumer =
        NodeBuilder::new("consumer", "main").priming_failure_policy(PrimingFailurePolicy::FailFast);
    consumer.dependency(&d1).same_memory().primed();
    consumer.dependency(&d2).same_memory().primed();
    let consumer = consumer.build(Arc::new(NeverRuns { ran: ran.clone() }));

    let graph = Graph::from_roots("fail_fast", vec![consumer.clone()], Vec::new()).unwrap();
    let call = open_call(graph, "main", json!(null));

    let reply = call.invoke(&consumer).unwrap();
    reply.await_value().await.unwrap_err();

    assert!(!ran.load(Ordering::SeqCst), "behavior must not run");
    assert_eq!(
        reply.first_non_container(),
        Some(EncounteredError::Behavior("boom".into()))
    );
    assert_eq!(
        reply.failure_call_stack().unwrap(),
        vec![Role::from("d1"), Role::from("consumer")]
    );

    call.weakly_close().await.unwrap();
}

/// **Scenario**: Under wait-all the behavior runs with a failed D1 and a
/// succeeded D2; re-raising D1 reuses the chain, and with the default
/// suppress strategy another primed failure is attached as a suppressed
/// cause.
#[tokio::test]
async fn wait_all_reraise_suppresses_siblings() {
    let d1 = NodeBuilder::new("d1", "main").build(Arc::new(FailBehavior("boom".into())));
    let d2 = NodeBuilder::new("d2", "main").build(Arc::new(ConstBehavior(json!(7))));
    let d3 = NodeBuilder::new("d3", "main").build(Arc::new(FailBehavior("other".into())));

    let ran = Arc::new(AtomicBool::new(false));
    let mut consumer = NodeBuilder::new("consumer", "main");
    let failing = consumer.dependency(&d1).same_memory().primed();
    let succeeding = consumer.dependency(&d2).same_memory().primed();
    consumer.dependency(&d3).same_memory().primed();
    let consumer = consumer.build(Arc::new(ReRaise {
        failing,
        succeeding,
        ran: ran.clone(),
    }));

    let graph = Graph::from_roots("wait_all", vec![consumer.clone()], Vec::new()).unwrap();
    let call = open_call(graph, "main", json!(null));

    let reply = call.invoke(&consumer).unwrap();
    reply.await_value().await.unwrap_err();

    assert!(ran.load(Ordering::SeqCst), "wait-all runs the behavior");
    let failure = reply.failure().unwrap();
    assert_eq!(
        failure.first_non_container(),
        &EncounteredError::Behavior("boom".into())
    );
    assert_eq!(
        failure.call_stack(),
        vec![Role::from("d1"), Role::from("consumer")]
    );

    let suppressed = failure.suppressed();
    assert_eq!(suppressed.len(), 1, "d3's failure rides along");
    assert_eq!(
        suppressed[0].first_non_container(),
        &EncounteredError::Behavior("other".into())
    );

    let state = call.weakly_close().await.unwrap();
    assert!(state.unhandled_errors.is_empty());
}

/// **Scenario**: With the discard strategy the sibling failure is dropped
/// from the chain and surfaces as an unhandled error instead.
#[tokio::test]
async fn discard_reports_siblings_as_unhandled() {
    let d1 = NodeBuilder::new("d1", "main").build(Arc::new(FailBehavior("boom".into())));
    let d2 = NodeBuilder::new("d2", "main").build(Arc::new(ConstBehavior(json!(7))));
    let d3 = NodeBuilder::new("d3", "main").build(Arc::new(FailBehavior("other".into())));

    let ran = Arc::new(AtomicBool::new(false));
    let mut consumer =
        NodeBuilder::new("consumer", "main").exception_strategy(ExceptionStrategy::Discard);
    let failing = consumer.dependency(&d1).same_memory().primed();
    let succeeding = consumer.dependency(&d2).same_memory().primed();
    consumer.dependency(&d3).same_memory().primed();
    let consumer = consumer.build(Arc::new(ReRaise {
        failing,
        succeeding,
        ran: ran.clone(),
    }));

    let graph = Graph::from_roots("discard", vec![consumer.clone()], Vec::new()).unwrap();
    let call = open_call(graph, "main", json!(null));

    let reply = call.invoke(&consumer).unwrap();
    reply.await_value().await.unwrap_err();

    let failure = reply.failure().unwrap();
    assert!(failure.suppressed().is_empty());

    let state = call.weakly_close().await.unwrap();
    let discarded: Vec<_> = state
        .unhandled_errors
        .iter()
        .filter(|err| {
            matches!(
                err,
                UnhandledError::DiscardedDependencyFailure { role, .. }
                    if *role == Role::from("consumer")
            )
        })
        .collect();
    assert_eq!(discarded.len(), 1, "{:?}", state.unhandled_errors);
}
