// ============================================================================
// Collaborator Interfaces
// Stores and sinks the matching core hands its results to
// ============================================================================

use crate::domain::{Order, Side, StateChange, Trade};
use crate::error::StoreError;
use async_trait::async_trait;
use std::sync::Arc;

/// Durable order state, keyed by order id.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert or replace the order. Must be idempotent: replaying an older
    /// copy (lower filled quantity) must not regress the stored state.
    async fn upsert(&self, order: &Order) -> Result<(), StoreError>;

    /// Open and partially filled orders for one side of an instrument.
    /// Only used for cold-start book reconstruction.
    async fn query_open(&self, instrument: &str, side: Side) -> Result<Vec<Order>, StoreError>;
}

/// Append-only execution log, keyed by trade id.
#[async_trait]
pub trait TradeStore: Send + Sync {
    async fn append(&self, trade: &Trade) -> Result<(), StoreError>;
}

/// Append-only order status audit log.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, change: &StateChange) -> Result<(), StoreError>;
}

/// Fire-and-forget trade feed (market data, notifications).
pub trait TradePublisher: Send + Sync {
    fn publish(&self, trade: &Trade) -> Result<(), StoreError>;
}

/// Collaborator handles injected into the dispatcher at construction.
#[derive(Clone)]
pub struct Collaborators {
    pub orders: Arc<dyn OrderStore>,
    pub trades: Arc<dyn TradeStore>,
    pub audit: Arc<dyn AuditStore>,
    pub publisher: Arc<dyn TradePublisher>,
}

/// Publisher that drops every trade
pub struct NoOpPublisher;

impl TradePublisher for NoOpPublisher {
    fn publish(&self, _trade: &Trade) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Publisher that logs every trade
pub struct LoggingPublisher;

impl TradePublisher for LoggingPublisher {
    fn publish(&self, trade: &Trade) -> Result<(), StoreError> {
        tracing::debug!(
            instrument = %trade.instrument,
            sequence = trade.sequence,
            "trade executed: {} @ {}",
            trade.quantity,
            trade.price
        );
        Ok(())
    }
}
