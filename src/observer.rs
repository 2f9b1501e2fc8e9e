//! Observation hooks around node execution.
//!
//! An observer exposes four hook families (every call, first call, behavior,
//! custom action). Each before-hook returns an *after* closure that the
//! engine invokes with the outcome once it is known. Hook failures are
//! recorded on the call's unhandled-error list and never abort the pipeline.
//!
//! The engine holds `Option<Arc<dyn Observer>>`; with no observer attached
//! the fast path performs no allocation at all.

use std::sync::Arc;

use crate::error::ObserverError;
use crate::node::Role;
use crate::reply::Outcome;

/// Closure invoked with the outcome after the observed step finishes.
///
/// The outcome is `None` when it is not yet known at invocation time (e.g. an
/// every-call hook on a memoized hit whose reply is still pending).
pub type AfterHook<V> = Box<dyn FnOnce(Option<&Outcome<V>>) -> Result<(), ObserverError> + Send>;

fn noop_after<V>() -> AfterHook<V> {
    Box::new(|_| Ok(()))
}

/// Observer of node execution within one call.
///
/// Implementations may be invoked concurrently and must be internally safe.
/// Every hook has a no-op default so observers override only what they need.
pub trait Observer<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    /// Before the storage lookup of every call of a node, cached or not.
    fn before_every_call(
        &self,
        caller: Option<&Role>,
        node: &Role,
    ) -> Result<AfterHook<V>, ObserverError> {
        let _ = (caller, node);
        Ok(noop_after())
    }

    /// Before the pipeline of the call that created the reply.
    fn before_first_call(&self, node: &Role) -> Result<AfterHook<V>, ObserverError> {
        let _ = node;
        Ok(noop_after())
    }

    /// Before the behavior phase runs.
    fn before_behavior(&self, node: &Role) -> Result<AfterHook<V>, ObserverError> {
        let _ = node;
        Ok(noop_after())
    }

    /// Before a custom cancel action runs.
    fn before_custom_action(&self, node: &Role) -> Result<AfterHook<V>, ObserverError> {
        let _ = node;
        Ok(noop_after())
    }
}

/// Fans hooks out to several observers in order.
///
/// The first failing before-hook wins; after-closures of the parts that
/// succeeded are still invoked, in declaration order.
pub struct CompositeObserver<V>
where
    V: Clone + Send + Sync + 'static,
{
    parts: Vec<Arc<dyn Observer<V>>>,
}

impl<V> CompositeObserver<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(parts: Vec<Arc<dyn Observer<V>>>) -> Arc<dyn Observer<V>> {
        Arc::new(Self { parts })
    }

    fn fan_out(
        &self,
        hook: impl Fn(&dyn Observer<V>) -> Result<AfterHook<V>, ObserverError>,
    ) -> Result<AfterHook<V>, ObserverError> {
        let mut afters = Vec::with_capacity(self.parts.len());
        for part in &self.parts {
            afters.push(hook(part.as_ref())?);
        }
        Ok(Box::new(move |outcome| {
            let mut first_err = None;
            for after in afters {
                if let Err(err) = after(outcome) {
                    first_err.get_or_insert(err);
                }
            }
            match first_err {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }))
    }
}

impl<V> Observer<V> for CompositeObserver<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn before_every_call(
        &self,
        caller: Option<&Role>,
        node: &Role,
    ) -> Result<AfterHook<V>, ObserverError> {
        self.fan_out(|part| part.before_every_call(caller, node))
    }

    fn before_first_call(&self, node: &Role) -> Result<AfterHook<V>, ObserverError> {
        self.fan_out(|part| part.before_first_call(node))
    }

    fn before_behavior(&self, node: &Role) -> Result<AfterHook<V>, ObserverError> {
        self.fan_out(|part| part.before_behavior(node))
    }

    fn before_custom_action(&self, node: &Role) -> Result<AfterHook<V>, ObserverError> {
        self.fan_out(|part| part.before_custom_action(node))
    }
}
