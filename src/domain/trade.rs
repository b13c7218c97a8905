// ============================================================================
// Trade Domain Model
// ============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{OrderId, Price, Quantity, Side};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One execution between a resting (maker) and an incoming (taker) order.
///
/// Trades are append-only: created by the matching engine, never mutated.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Trade {
    /// Unique trade identifier, stable across restarts
    pub id: Uuid,

    /// Emission order within one run of the instrument's engine. Starts at 1
    /// and starts over when the instrument is recovered, so only `id` is
    /// unique in the trade store.
    pub sequence: u64,

    /// Trading instrument
    pub instrument: String,

    pub buy_order_id: OrderId,

    pub sell_order_id: OrderId,

    /// Side of the incoming order that crossed the book
    pub aggressor: Side,

    /// Execution price (always the maker's price)
    pub price: Price,

    /// Executed quantity
    pub quantity: Quantity,

    /// Trade timestamp
    pub timestamp: DateTime<Utc>,
}

impl Trade {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sequence: u64,
        instrument: String,
        maker_order_id: OrderId,
        taker_order_id: OrderId,
        aggressor: Side,
        price: Price,
        quantity: Quantity,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let (buy_order_id, sell_order_id) = match aggressor {
            Side::Buy => (taker_order_id, maker_order_id),
            Side::Sell => (maker_order_id, taker_order_id),
        };

        Self {
            id: Uuid::new_v4(),
            sequence,
            instrument,
            buy_order_id,
            sell_order_id,
            aggressor,
            price,
            quantity,
            timestamp,
        }
    }

    pub fn maker_order_id(&self) -> OrderId {
        match self.aggressor {
            Side::Buy => self.sell_order_id,
            Side::Sell => self.buy_order_id,
        }
    }

    pub fn taker_order_id(&self) -> OrderId {
        match self.aggressor {
            Side::Buy => self.buy_order_id,
            Side::Sell => self.sell_order_id,
        }
    }

    /// Notional value of the trade (price * quantity)
    pub fn notional_value(&self) -> Decimal {
        self.price * self.quantity
    }
}
