// ============================================================================
// Lifecycle Tracker
// Turns before/after order statuses into audit entries
// ============================================================================

use crate::domain::{OrderId, OrderStatus, StateChange};
use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};

/// Decides whether an engine operation changed an order's status.
///
/// Stateless: every call is a pure function of its arguments.
#[derive(Debug, Default, Clone, Copy)]
pub struct LifecycleTracker;

impl LifecycleTracker {
    pub fn new() -> Self {
        Self
    }

    /// Audit entry for an order entering the system.
    pub fn admit(&self, order_id: OrderId, now: DateTime<Utc>) -> StateChange {
        StateChange::admitted(order_id, now)
    }

    /// Emit a `StateChange` iff `before != after`.
    ///
    /// A change that is not an edge of the lifecycle graph means the engine
    /// corrupted the order, and is reported as an invariant violation.
    pub fn track(
        &self,
        instrument: &str,
        order_id: OrderId,
        before: OrderStatus,
        after: OrderStatus,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<StateChange>> {
        if before == after {
            return Ok(None);
        }

        if !before.can_transition_to(after) {
            return Err(EngineError::invariant(
                instrument,
                format!("order {} moved {} -> {}", order_id, before, after),
            ));
        }

        Ok(Some(StateChange {
            order_id,
            from: Some(before),
            to: after,
            timestamp: now,
        }))
    }
}
