//! Cancellation signals and hooks.
//!
//! Three signal tiers overlap during a call: the call-wide signal, one signal
//! per memory scope, and one signal per reply. Tiers are realized as a
//! `CancellationToken` hierarchy (call → scope → reply child tokens), so
//! triggering a higher tier reaches every lower tier it dominates without any
//! extra bookkeeping here.
//!
//! Behaviors observe cancellation passively through [`CompositeCancelSignal`]
//! or actively by arming a [`CancelActionSlot`]; both are opt-in per node.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Read-only view combining the three signal tiers for one reply.
///
/// Handed to composite-signal behaviors. The reply token is a descendant of
/// the scope and call tokens, so a triggered ancestor is always visible here.
#[derive(Clone)]
pub struct CompositeCancelSignal {
    call: CancellationToken,
    scope: CancellationToken,
    reply: CancellationToken,
}

impl CompositeCancelSignal {
    pub(crate) fn new(
        call: CancellationToken,
        scope: CancellationToken,
        reply: CancellationToken,
    ) -> Self {
        Self { call, scope, reply }
    }

    /// True when any of the three tiers has triggered.
    pub fn is_triggered(&self) -> bool {
        self.call.is_cancelled() || self.scope.is_cancelled() || self.reply.is_cancelled()
    }

    /// Resolves when any tier triggers. The reply token is a descendant of
    /// the other two, so waiting on it covers all three.
    pub async fn triggered(&self) {
        self.reply.cancelled().await;
    }
}

/// Action a custom-action behavior hands to the engine for active
/// cancellation.
pub type CancelAction = Box<dyn FnOnce() + Send>;

/// Slot through which a custom-action behavior publishes its cancel action.
///
/// The engine fires the armed action at most once, when the reply's signal
/// triggers while the behavior is still running. Once the behavior's response
/// completes the slot is disarmed and a late trigger is a no-op.
pub struct CancelActionSlot {
    action: Mutex<Option<CancelAction>>,
    fired: AtomicBool,
}

impl CancelActionSlot {
    pub(crate) fn new() -> Self {
        Self {
            action: Mutex::new(None),
            fired: AtomicBool::new(false),
        }
    }

    /// Arms the slot. A later `arm` replaces an unfired action.
    pub fn arm(&self, action: CancelAction) {
        *self.action.lock() = Some(action);
    }

    /// Runs the armed action, if any. At most one call ever runs an action.
    pub(crate) fn fire(&self) {
        if self.fired.swap(true, Ordering::AcqRel) {
            return;
        }
        let action = self.action.lock().take();
        if let Some(action) = action {
            action();
        }
    }

    /// Drops the armed action without running it.
    pub(crate) fn disarm(&self) {
        self.action.lock().take();
    }
}

/// Hook isolating interrupts to the behavior worker of a may-interrupt node.
///
/// The engine brackets every dependency call and custom-action run of such a
/// node with `enter_isolated` / `exit_isolated` so an interrupt aimed at the
/// behavior never leaks into unrelated code. Platform-specific; the default
/// is a no-op. Implementations opting out (e.g. shutdown paths where the
/// interrupt must survive) simply leave both hooks empty.
pub trait InterruptModifier: Send + Sync {
    /// Save and clear any pending interrupt before a critical section.
    fn enter_isolated(&self) {}
    /// Restore or clear the interrupt after the critical section.
    fn exit_isolated(&self) {}
}

/// Default [`InterruptModifier`]: interrupts pass through untouched.
pub struct NoopInterruptModifier;

impl InterruptModifier for NoopInterruptModifier {}
