//! Logging helpers for graph execution.
//!
//! Structured logging for node pipeline events and call lifecycle
//! transitions, keyed by role.

use crate::error::ValidationError;
use crate::node::Role;

/// Log the start of a node invocation's pipeline.
pub fn log_node_start(role: &Role) {
    #[cfg(feature = "tracing")]
    tracing::debug!(role = %role, "Starting node pipeline");

    #[cfg(not(feature = "tracing"))]
    eprintln!("[DEBUG] Starting node pipeline: {}", role);
}

/// Log the internal completion of a node invocation.
pub fn log_node_complete(role: &Role, outcome: &str) {
    #[cfg(feature = "tracing")]
    tracing::debug!(role = %role, outcome = outcome, "Node pipeline complete");

    #[cfg(not(feature = "tracing"))]
    eprintln!("[DEBUG] Node pipeline complete: {} -> {}", role, outcome);
}

/// Log a node skipping its behavior because a signal was observed.
pub fn log_node_cancelled(role: &Role) {
    #[cfg(feature = "tracing")]
    tracing::debug!(role = %role, "Node cancelled before behavior");

    #[cfg(not(feature = "tracing"))]
    eprintln!("[DEBUG] Node cancelled before behavior: {}", role);
}

/// Log the opening of a graph call.
pub fn log_call_open(graph_role: &Role) {
    #[cfg(feature = "tracing")]
    tracing::info!(graph = %graph_role, "Graph call opened");

    #[cfg(not(feature = "tracing"))]
    eprintln!("[INFO] Graph call opened: {}", graph_role);
}

/// Log the completion of a weakly-closed call.
pub fn log_call_closed(graph_role: &Role, is_abandoned: bool) {
    #[cfg(feature = "tracing")]
    tracing::info!(graph = %graph_role, is_abandoned, "Graph call closed");

    #[cfg(not(feature = "tracing"))]
    eprintln!(
        "[INFO] Graph call closed: {} (abandoned: {})",
        graph_role, is_abandoned
    );
}

/// Log an abandon.
pub fn log_call_abandoned(graph_role: &Role) {
    #[cfg(feature = "tracing")]
    tracing::warn!(graph = %graph_role, "Graph call abandoned");

    #[cfg(not(feature = "tracing"))]
    eprintln!("[WARN] Graph call abandoned: {}", graph_role);
}

/// Log a graph validation failure.
pub fn log_validation_error(error: &ValidationError) {
    #[cfg(feature = "tracing")]
    tracing::error!(?error, "Graph validation failed");

    #[cfg(not(feature = "tracing"))]
    eprintln!("[ERROR] Graph validation failed: {:?}", error);
}
