// ============================================================================
// State Change Audit Entry
// ============================================================================

use chrono::{DateTime, Utc};

use super::{OrderId, OrderStatus};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Audit record of one order status transition.
///
/// `from` is `None` only for the admission entry (`-> Open`).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StateChange {
    pub order_id: OrderId,
    pub from: Option<OrderStatus>,
    pub to: OrderStatus,
    pub timestamp: DateTime<Utc>,
}

impl StateChange {
    pub fn admitted(order_id: OrderId, timestamp: DateTime<Utc>) -> Self {
        Self {
            order_id,
            from: None,
            to: OrderStatus::Open,
            timestamp,
        }
    }

    pub fn is_admission(&self) -> bool {
        self.from.is_none()
    }
}
