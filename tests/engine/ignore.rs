//! Ignoring replies: a provably unique consumer's ignore triggers the
//! reply-tier signal, observable through a composite-signal loop.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use memodag::{
    Behavior, BehaviorError, CompositeCancelSignal, CompositeSignalBehavior,
    DependencyCallingDevice, DependencyToken, Graph, NodeBuilder,
};

use crate::common::{open_call, Val};

/// Counts up to `iterations`, checking the composite signal every step and
/// stopping early once it reads triggered.
struct SignalLoop {
    iterations: u64,
}

#[async_trait]
impl CompositeSignalBehavior<Val> for SignalLoop {
    async fn run(
        &self,
        _device: &DependencyCallingDevice<Val>,
        signal: &CompositeCancelSignal,
    ) -> Result<Val, BehaviorError> {
        let mut count = 0u64;
        for _ in 0..self.iterations {
            if signal.is_triggered() {
                break;
            }
            count += 1;
            tokio::task::yield_now().await;
        }
        Ok(json!(count))
    }
}

/// Awaits whichever dependency publishes first, ignores both, and returns
/// the winner's value.
struct FirstOfTwo {
    short: DependencyToken,
    long: DependencyToken,
}

#[async_trait]
impl Behavior<Val> for FirstOfTwo {
    async fn run(&self, device: &DependencyCallingDevice<Val>) -> Result<Val, BehaviorError> {
        let short = device.call(self.short)?;
        let long = device.call(self.long)?;

        let winner = {
            let short_done = Box::pin(short.published());
            let long_done = Box::pin(long.published());
            match futures::future::select(short_done, long_done).await {
                futures::future::Either::Left(_) => short.clone(),
                futures::future::Either::Right(_) => long.clone(),
            }
        };
        let value = winner.await_value().await?;

        device.ignore(&short)?;
        device.ignore(&long)?;
        // A second ignore of the same reply behaves as the first.
        device.ignore(&long)?;

        // The call is still open, so only the reply-tier signal can stop the
        // long loop; its published count proves whether it fired.
        let long_count = long.await_value().await?;
        Ok(json!([value, long_count]))
    }
}

/// **Scenario**: Two composite-signal loops of 100 and 1_000_000 iterations;
/// the consumer takes whichever finishes first and ignores both. The short
/// loop completes its full count; the long loop observes the reply signal
/// and stops well short of its bound.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ignore_triggers_reply_signal_for_unique_consumer() {
    let short = NodeBuilder::new("short", "main")
        .build_with_composite_signal(Arc::new(SignalLoop { iterations: 100 }));
    let long = NodeBuilder::new("long", "main")
        .build_with_composite_signal(Arc::new(SignalLoop {
            iterations: 1_000_000,
        }));

    let mut consumer = NodeBuilder::new("consumer", "main");
    let short_edge = consumer.dependency(&short).same_memory().unprimed();
    let long_edge = consumer.dependency(&long).same_memory().unprimed();
    let consumer = consumer.build(Arc::new(FirstOfTwo {
        short: short_edge,
        long: long_edge,
    }));

    let graph = Graph::from_roots("race", vec![consumer.clone()], Vec::new()).unwrap();
    let call = open_call(graph, "main", json!(null));

    let reply = call.invoke(&consumer).unwrap();
    let value = reply.await_value().await.unwrap();
    assert_eq!(value[0], json!(100), "the short loop ran to completion");
    let long_count = value[1].as_u64().expect("long loop count");
    assert!(
        long_count < 1_000_000,
        "the reply signal stopped the loop early, got {long_count}"
    );

    let state = call.weakly_close().await.unwrap();
    assert!(state.unhandled_errors.is_empty());
    assert_eq!(
        state.ignored_replies.len(),
        2,
        "double ignore records one entry per reply"
    );
    assert!(state
        .ignored_replies
        .iter()
        .any(|ignored| ignored.role().as_str() == "long"));
}
