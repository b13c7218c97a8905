// ============================================================================
// In-Memory Collaborators
// Reference stores for tests, demos and embedding without a database
// ============================================================================

use super::collaborators::{AuditStore, Collaborators, OrderStore, TradePublisher, TradeStore};
use crate::domain::{Order, OrderId, Side, StateChange, Trade};
use crate::error::StoreError;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Counts down injected transient failures.
#[derive(Debug, Default)]
struct FailureBudget(AtomicU32);

impl FailureBudget {
    fn set(&self, n: u32) {
        self.0.store(n, Ordering::Release);
    }

    fn check(&self, what: &str) -> Result<(), StoreError> {
        let took = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if took {
            Err(StoreError::Transient(format!("injected {what} failure")))
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// Orders
// ============================================================================

#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<HashMap<OrderId, Order>>,
    failures: FailureBudget,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls fail with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.failures.set(n);
    }

    pub fn get(&self, id: &OrderId) -> Option<Order> {
        self.orders.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.orders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.read().is_empty()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn upsert(&self, order: &Order) -> Result<(), StoreError> {
        self.failures.check("order upsert")?;

        let mut orders = self.orders.write();
        let stale = orders.get(&order.id).is_some_and(|stored| {
            stored.filled_quantity() > order.filled_quantity()
                || (stored.status().is_terminal() && !order.status().is_terminal())
        });
        if !stale {
            orders.insert(order.id, order.clone());
        }
        Ok(())
    }

    async fn query_open(&self, instrument: &str, side: Side) -> Result<Vec<Order>, StoreError> {
        self.failures.check("open order query")?;

        let mut open: Vec<Order> = self
            .orders
            .read()
            .values()
            .filter(|o| o.instrument == instrument && o.side == side)
            .filter(|o| o.status().can_be_cancelled() && o.sequence_number() > 0)
            .cloned()
            .collect();
        open.sort_by_key(Order::sequence_number);
        Ok(open)
    }
}

// ============================================================================
// Trades
// ============================================================================

#[derive(Default)]
pub struct InMemoryTradeStore {
    trades: Mutex<Vec<Trade>>,
    seen: Mutex<HashSet<Uuid>>,
    failures: FailureBudget,
}

impl InMemoryTradeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: u32) {
        self.failures.set(n);
    }

    /// All appended trades in append order
    pub fn trades(&self) -> Vec<Trade> {
        self.trades.lock().clone()
    }
}

#[async_trait]
impl TradeStore for InMemoryTradeStore {
    async fn append(&self, trade: &Trade) -> Result<(), StoreError> {
        self.failures.check("trade append")?;

        if self.seen.lock().insert(trade.id) {
            self.trades.lock().push(trade.clone());
        }
        Ok(())
    }
}

// ============================================================================
// Audit
// ============================================================================

#[derive(Default)]
pub struct InMemoryAuditStore {
    changes: Mutex<Vec<StateChange>>,
    failures: FailureBudget,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: u32) {
        self.failures.set(n);
    }

    pub fn changes(&self) -> Vec<StateChange> {
        self.changes.lock().clone()
    }

    pub fn changes_for(&self, order_id: &OrderId) -> Vec<StateChange> {
        self.changes
            .lock()
            .iter()
            .filter(|c| c.order_id == *order_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, change: &StateChange) -> Result<(), StoreError> {
        self.failures.check("audit append")?;

        // Each status is entered at most once per order, so (order, to) is a
        // natural idempotency key for redelivered entries.
        let mut changes = self.changes.lock();
        let duplicate = changes
            .iter()
            .any(|c| c.order_id == change.order_id && c.to == change.to);
        if !duplicate {
            changes.push(change.clone());
        }
        Ok(())
    }
}

// ============================================================================
// Publisher
// ============================================================================

/// Publisher that keeps every trade it was handed.
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<Trade>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<Trade> {
        self.published.lock().clone()
    }
}

impl TradePublisher for RecordingPublisher {
    fn publish(&self, trade: &Trade) -> Result<(), StoreError> {
        self.published.lock().push(trade.clone());
        Ok(())
    }
}

// ============================================================================
// Bundle
// ============================================================================

/// Concrete handles to a full set of in-memory collaborators.
#[derive(Clone, Default)]
pub struct InMemoryCollaborators {
    pub orders: Arc<InMemoryOrderStore>,
    pub trades: Arc<InMemoryTradeStore>,
    pub audit: Arc<InMemoryAuditStore>,
    pub publisher: Arc<RecordingPublisher>,
}

impl InMemoryCollaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            orders: self.orders.clone(),
            trades: self.trades.clone(),
            audit: self.audit.clone(),
            publisher: self.publisher.clone(),
        }
    }
}
