// ============================================================================
// Order Domain Model
// ============================================================================

use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;
use uuid::Uuid;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub use state::OrderStatus;

/// Limit price. Market orders carry none.
pub type Price = Decimal;

/// Order and execution quantity.
pub type Quantity = Decimal;

// ============================================================================
// Value Objects
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OrderId(Uuid);

impl OrderId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum OrderType {
    Limit,
    Market,
}

// ============================================================================
// Order State Machine
// ============================================================================

pub mod state {
    use std::fmt;

    #[cfg(feature = "serde")]
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    #[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
    pub enum OrderStatus {
        Open,
        Partial,
        Filled,
        Cancelled,
    }

    impl OrderStatus {
        pub fn is_terminal(&self) -> bool {
            matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
        }

        pub fn can_be_cancelled(&self) -> bool {
            matches!(self, OrderStatus::Open | OrderStatus::Partial)
        }

        /// Whether `self -> next` is an edge of the lifecycle graph.
        ///
        /// The graph is acyclic: Open -> Partial -> Filled, with Cancelled
        /// reachable from both live states.
        pub fn can_transition_to(&self, next: OrderStatus) -> bool {
            matches!(
                (self, next),
                (OrderStatus::Open, OrderStatus::Partial)
                    | (OrderStatus::Open, OrderStatus::Filled)
                    | (OrderStatus::Open, OrderStatus::Cancelled)
                    | (OrderStatus::Partial, OrderStatus::Filled)
                    | (OrderStatus::Partial, OrderStatus::Cancelled)
            )
        }

        pub fn as_str(&self) -> &'static str {
            match self {
                OrderStatus::Open => "open",
                OrderStatus::Partial => "partial",
                OrderStatus::Filled => "filled",
                OrderStatus::Cancelled => "cancelled",
            }
        }
    }

    impl fmt::Display for OrderStatus {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }
}

// ============================================================================
// Order Entity
// ============================================================================

/// Mutable order state restored from a store during recovery.
#[derive(Debug, Clone)]
pub struct RestingState {
    pub filled_quantity: Quantity,
    pub filled_notional: Decimal,
    pub status: OrderStatus,
    pub sequence_number: u64,
    pub updated_at: DateTime<Utc>,
}

/// One incoming or resting order.
///
/// Identity and economics are public and fixed at creation. Fill progress,
/// status and sequence are private: only the matching engine moves them, so
/// `filled + remaining == quantity` holds for every order it hands out.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Order {
    pub id: OrderId,
    pub account_id: String,
    pub instrument: String,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Option<Price>,
    pub quantity: Quantity,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,

    filled_quantity: Quantity,
    filled_notional: Decimal,
    status: OrderStatus,
    /// Admission counter within the instrument; 0 until the order rests.
    sequence_number: u64,
    updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(
        account_id: impl Into<String>,
        instrument: impl Into<String>,
        side: Side,
        order_type: OrderType,
        price: Option<Price>,
        quantity: Quantity,
    ) -> Self {
        let now = Utc::now();
        let price = match order_type {
            OrderType::Limit => price,
            OrderType::Market => None,
        };
        Self {
            id: OrderId::new(),
            account_id: account_id.into(),
            instrument: instrument.into(),
            side,
            order_type,
            price,
            quantity,
            created_at: now,
            expires_at: None,
            filled_quantity: Decimal::ZERO,
            filled_notional: Decimal::ZERO,
            status: OrderStatus::Open,
            sequence_number: 0,
            updated_at: now,
        }
    }

    pub fn limit(
        account_id: impl Into<String>,
        instrument: impl Into<String>,
        side: Side,
        price: Price,
        quantity: Quantity,
    ) -> Self {
        Self::new(
            account_id,
            instrument,
            side,
            OrderType::Limit,
            Some(price),
            quantity,
        )
    }

    pub fn market(
        account_id: impl Into<String>,
        instrument: impl Into<String>,
        side: Side,
        quantity: Quantity,
    ) -> Self {
        Self::new(
            account_id,
            instrument,
            side,
            OrderType::Market,
            None,
            quantity,
        )
    }

    /// Use a caller-assigned id (e.g. one the gateway already acknowledged).
    pub fn with_id(mut self, id: OrderId) -> Self {
        self.id = id;
        self
    }

    pub fn with_expiration(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Rehydrate fill progress read back from an order store.
    pub fn with_resting_state(mut self, state: RestingState) -> Self {
        self.filled_quantity = state.filled_quantity;
        self.filled_notional = state.filled_notional;
        self.status = state.status;
        self.sequence_number = state.sequence_number;
        self.updated_at = state.updated_at;
        self
    }

    // ========================================================================
    // Getters
    // ========================================================================

    pub fn filled_quantity(&self) -> Quantity {
        self.filled_quantity
    }

    /// Quantity still executable. Zero once the order is terminal.
    pub fn remaining_quantity(&self) -> Quantity {
        match self.status {
            OrderStatus::Cancelled => Decimal::ZERO,
            _ => self.quantity - self.filled_quantity,
        }
    }

    /// Quantity discarded by cancellation (zero unless cancelled).
    pub fn cancelled_quantity(&self) -> Quantity {
        match self.status {
            OrderStatus::Cancelled => self.quantity - self.filled_quantity,
            _ => Decimal::ZERO,
        }
    }

    pub fn filled_notional(&self) -> Decimal {
        self.filled_notional
    }

    pub fn average_fill_price(&self) -> Option<Price> {
        if self.filled_quantity.is_zero() {
            None
        } else {
            self.filled_notional.checked_div(self.filled_quantity)
        }
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_market_order(&self) -> bool {
        matches!(self.order_type, OrderType::Market)
    }

    pub fn is_limit_order(&self) -> bool {
        matches!(self.order_type, OrderType::Limit)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Admission checks applied before an order reaches the book.
    pub fn validate(&self) -> EngineResult<()> {
        if self.quantity <= Decimal::ZERO {
            return Err(EngineError::invalid("quantity must be positive"));
        }

        if self.is_limit_order() {
            match self.price {
                None => return Err(EngineError::invalid("limit orders must have a price")),
                Some(price) if price <= Decimal::ZERO => {
                    return Err(EngineError::invalid("price must be positive"))
                },
                Some(price) if price.checked_mul(self.quantity).is_none() => {
                    return Err(EngineError::invalid("price times quantity is not representable"))
                },
                Some(_) => {},
            }
        }

        if self.instrument.is_empty() {
            return Err(EngineError::invalid("instrument cannot be empty"));
        }

        if self.status != OrderStatus::Open || !self.filled_quantity.is_zero() {
            return Err(EngineError::invalid("new orders must be open and unfilled"));
        }

        Ok(())
    }

    // ========================================================================
    // Engine-only mutations
    // ========================================================================

    pub(crate) fn assign_sequence(&mut self, seq: u64) {
        self.sequence_number = seq;
    }

    /// Apply one execution of `quantity` at `price`.
    pub(crate) fn fill(
        &mut self,
        quantity: Quantity,
        price: Price,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let remaining = self.remaining_quantity();
        if quantity <= Decimal::ZERO || quantity > remaining {
            return Err(EngineError::invariant(
                self.instrument.clone(),
                format!(
                    "fill of {} exceeds remaining {} on order {}",
                    quantity, remaining, self.id
                ),
            ));
        }

        let notional = price
            .checked_mul(quantity)
            .and_then(|value| self.filled_notional.checked_add(value))
            .ok_or_else(|| {
                EngineError::invariant(
                    self.instrument.clone(),
                    format!("fill notional overflowed on order {}", self.id),
                )
            })?;

        self.filled_quantity += quantity;
        self.filled_notional = notional;
        self.status = if self.filled_quantity == self.quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::Partial
        };
        self.updated_at = now;
        Ok(())
    }

    /// Retire the unfilled remainder. Returns the status held before.
    pub(crate) fn cancel(&mut self, now: DateTime<Utc>) -> EngineResult<OrderStatus> {
        let before = self.status;
        if !before.can_be_cancelled() {
            return Err(EngineError::NotCancelable {
                order_id: self.id,
                status: before,
            });
        }
        self.status = OrderStatus::Cancelled;
        self.updated_at = now;
        Ok(before)
    }
}
