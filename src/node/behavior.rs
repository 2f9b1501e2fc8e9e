//! Behavior variants: the user code a node runs.
//!
//! Three variants exist, differing only in how they observe cancellation:
//! plain behaviors see nothing, composite-signal behaviors receive a read-only
//! view over the three signal tiers, and custom-action behaviors arm an
//! action the engine fires when the reply's signal triggers mid-flight.
//!
//! Contract for all variants: a returned `Err` is an immediate failed
//! completion; otherwise the returned future is the behavior's response and
//! must complete exactly once. The behavior must stop using the device by the
//! later of method return and response completion; the device weakly refuses
//! use after that, but is not obligated to catch every violation.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cancel::{CancelActionSlot, CompositeCancelSignal};
use crate::device::DependencyCallingDevice;
use crate::error::BehaviorError;

/// Plain behavior: invokes dependencies through the device, returns a value.
#[async_trait]
pub trait Behavior<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    async fn run(&self, device: &DependencyCallingDevice<V>) -> Result<V, BehaviorError>;
}

/// Behavior that passively observes cancellation through a composite view of
/// the call, scope and reply signals.
#[async_trait]
pub trait CompositeSignalBehavior<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    async fn run(
        &self,
        device: &DependencyCallingDevice<V>,
        signal: &CompositeCancelSignal,
    ) -> Result<V, BehaviorError>;
}

/// Behavior that arms a custom cancel action for the engine to fire.
///
/// The behavior should arm the slot before starting long-running work; the
/// engine runs the armed action at most once, only while the behavior is
/// still in flight.
#[async_trait]
pub trait CustomActionBehavior<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    async fn run(
        &self,
        device: &DependencyCallingDevice<V>,
        actions: &CancelActionSlot,
    ) -> Result<V, BehaviorError>;
}

/// The behavior a node was built with, tagged by variant.
pub(crate) enum BehaviorKind<V> {
    Plain(Arc<dyn Behavior<V>>),
    CompositeSignal(Arc<dyn CompositeSignalBehavior<V>>),
    CustomAction {
        behavior: Arc<dyn CustomActionBehavior<V>>,
        may_interrupt: bool,
    },
}
