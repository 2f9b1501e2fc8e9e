//! # memodag
//!
//! A runtime for **static asynchronous data-dependency graphs**. A program is
//! modeled as a DAG of *nodes*: memoized, value-returning async computations
//! that declare their dependencies up front. A client builds a [`Graph`],
//! opens a [`GraphCall`] against it, invokes root nodes, and receives
//! future-like [`Reply`] handles.
//!
//! ## Design Principles
//!
//! - **At-most-once per (node, memory)**: each memory instance holds a store
//!   mapping node identity to reply; concurrent callers share one pipeline.
//! - **Declared dependencies**: a behavior reaches a dependency only through
//!   its [`DependencyCallingDevice`], over edges the node declared at build
//!   time (same-memory, new-memory, or ancestor-memory; primed or unprimed).
//! - **Three-tier cancellation**: call, scope, and reply signals overlap;
//!   passive polls bracket the behavior, and nodes opt into a composite
//!   signal view or a custom cancel action for mid-flight observation.
//! - **Tracked lifetimes**: every reply created during a call is accounted
//!   for, so weakly closing a call waits for exactly the outstanding work and
//!   abandoning bounds the damage with a diagnostic snapshot.
//!
//! ## Main Modules
//!
//! - [`node`]: [`NodeBuilder`], behavior variants, edge declaration.
//! - [`graph`]: [`Graph::from_roots`], structural and per-node validators.
//! - [`call`]: [`GraphCall`] lifecycle: invoke, weakly close, abandon.
//! - [`reply`]: the future-like reply handle and its failure accessors.
//! - [`memory`]: memories, kinds, scopes, and the memoization store.
//! - [`cancel`]: signal views, custom cancel actions, interrupt isolation.
//! - [`observer`]: before/after hooks around node execution.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use memodag::{
//!     Behavior, BehaviorError, DependencyCallingDevice, Graph, GraphCall, Input, NodeBuilder,
//!     PlainMemoryFactory,
//! };
//!
//! struct Shout;
//!
//! #[async_trait]
//! impl Behavior<String> for Shout {
//!     async fn run(
//!         &self,
//!         device: &DependencyCallingDevice<String>,
//!     ) -> Result<String, BehaviorError> {
//!         let input = device.input().get().await?;
//!         Ok(input.to_uppercase())
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let shout = NodeBuilder::new("shout", "main").build(Arc::new(Shout));
//! let graph = Graph::from_roots("example", vec![shout.clone()], Vec::new()).unwrap();
//!
//! let call = GraphCall::open(
//!     graph,
//!     &PlainMemoryFactory::new("main"),
//!     Input::ready("hello".to_string()),
//!     None,
//! );
//! let reply = call.invoke(&shout).unwrap();
//! assert_eq!(reply.await_value().await.unwrap(), "HELLO");
//! let state = call.weakly_close().await.unwrap();
//! assert!(state.unhandled_errors.is_empty());
//! # }
//! ```

pub mod call;
pub mod cancel;
mod device;
pub mod error;
mod executor;
pub mod graph;
pub mod logging;
pub mod memory;
pub mod node;
pub mod observer;
pub mod reply;

pub use call::{AbandonedState, FinalState, GraphCall};
pub use cancel::{
    CancelAction, CancelActionSlot, CompositeCancelSignal, InterruptModifier,
    NoopInterruptModifier,
};
pub use device::DependencyCallingDevice;
pub use error::{
    BehaviorError, DeviceError, EncounteredError, LifecycleError, ObserverError, ReplyError,
    ReplyFailure, UnhandledError, ValidationError,
};
pub use graph::{
    ancestor_memory_relationships_acyclic, consumed_by_envelope, consumer_envelops_dependency,
    ignoring_triggers_reply_signal, Graph, GraphCandidate, GraphValidator, NodeValidator,
};
pub use memory::{
    Input, Memory, MemoryFactory, MemoryKind, MemoryScope, MemoryStore, PlainMemoryFactory,
};
pub use node::{
    Behavior, CancelMode, CompositeSignalBehavior, CustomActionBehavior, DependencyLifetime,
    DependencyToken, ExceptionStrategy, MemoryBinding, Node, NodeBuilder, NodeType, Priming,
    PrimingFailurePolicy, Role, TypeInstance,
};
pub use observer::{AfterHook, CompositeObserver, Observer};
pub use reply::{Outcome, Reply};
