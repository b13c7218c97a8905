// ============================================================================
// Order Book Domain Model
// ============================================================================

use crossbeam_skiplist::SkipMap;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};

use super::{Order, OrderId, Price, Quantity, Side};
use crate::error::{EngineError, EngineResult};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

// ============================================================================
// Priority Key
// ============================================================================

/// Sort key of a resting order within its side.
///
/// Bids store the negated price so that both sides iterate best-first in
/// ascending key order; ties break on the admission sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct PriorityKey {
    rank: Decimal,
    sequence: u64,
}

// ============================================================================
// Order Book Side
// ============================================================================

/// One side (bids or asks) of the book.
/// Skip list keyed by price-time priority; values are the resting order ids.
pub struct OrderBookSide {
    levels: SkipMap<PriorityKey, OrderId>,
    /// Sequences resting on this side, whatever their price.
    sequences: HashSet<u64>,
    pub side: Side,
}

impl OrderBookSide {
    pub fn new(side: Side) -> Self {
        Self {
            levels: SkipMap::new(),
            sequences: HashSet::new(),
            side,
        }
    }

    fn key_for(&self, price: Price, sequence: u64) -> PriorityKey {
        let rank = match self.side {
            Side::Buy => -price,
            Side::Sell => price,
        };
        PriorityKey { rank, sequence }
    }

    fn price_of(&self, key: &PriorityKey) -> Price {
        match self.side {
            Side::Buy => -key.rank,
            Side::Sell => key.rank,
        }
    }

    fn insert(&mut self, price: Price, sequence: u64, order_id: OrderId) -> bool {
        if !self.sequences.insert(sequence) {
            return false;
        }
        self.levels.insert(self.key_for(price, sequence), order_id);
        true
    }

    fn remove(&mut self, price: Price, sequence: u64) -> bool {
        self.sequences.remove(&sequence);
        self.levels.remove(&self.key_for(price, sequence)).is_some()
    }

    /// Id of the best-priority resting order
    pub fn best_order_id(&self) -> Option<OrderId> {
        self.levels.front().map(|entry| *entry.value())
    }

    /// Get the best (top-of-book) price
    pub fn best_price(&self) -> Option<Price> {
        self.levels.front().map(|entry| self.price_of(entry.key()))
    }

    /// Resting order ids, best priority first
    pub fn order_ids(&self) -> Vec<OrderId> {
        self.levels.iter().map(|entry| *entry.value()).collect()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

// ============================================================================
// Price Level Book
// ============================================================================

/// Bid and ask sides for one instrument, plus the resting orders themselves.
///
/// The side indexes only hold ids; order state lives in `orders` so a partial
/// fill updates the order in place without touching its priority key.
pub struct PriceLevelBook {
    instrument: String,
    bids: OrderBookSide,
    asks: OrderBookSide,
    orders: HashMap<OrderId, Order>,
}

impl PriceLevelBook {
    pub fn new(instrument: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            bids: OrderBookSide::new(Side::Buy),
            asks: OrderBookSide::new(Side::Sell),
            orders: HashMap::new(),
        }
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    fn side(&self, side: Side) -> &OrderBookSide {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut OrderBookSide {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    /// Add a sequenced limit order at its priority position.
    pub fn insert(&mut self, order: Order) -> EngineResult<()> {
        if self.orders.contains_key(&order.id) {
            return Err(EngineError::DuplicateOrder { order_id: order.id });
        }

        let price = match order.price {
            Some(price) if order.is_limit_order() => price,
            _ => return Err(EngineError::invalid("only limit orders can rest in the book")),
        };

        if order.sequence_number() == 0 {
            return Err(EngineError::invalid("resting orders need a sequence number"));
        }

        if order.remaining_quantity() <= Decimal::ZERO {
            return Err(EngineError::invalid("resting orders need remaining quantity"));
        }

        if !self
            .side_mut(order.side)
            .insert(price, order.sequence_number(), order.id)
        {
            return Err(EngineError::invalid(format!(
                "sequence {} is already resting on the {:?} side",
                order.sequence_number(),
                order.side
            )));
        }
        self.orders.insert(order.id, order);
        Ok(())
    }

    /// Best-priority order on `side`, if any.
    pub fn peek_best(&self, side: Side) -> Option<&Order> {
        self.side(side)
            .best_order_id()
            .and_then(|id| self.orders.get(&id))
    }

    pub(crate) fn get_mut(&mut self, order_id: &OrderId) -> Option<&mut Order> {
        self.orders.get_mut(order_id)
    }

    /// Take an order out of the book (full fill or cancel).
    pub fn remove(&mut self, order_id: &OrderId) -> EngineResult<Order> {
        let order = self
            .orders
            .remove(order_id)
            .ok_or(EngineError::NotFound {
                order_id: *order_id,
            })?;

        let indexed = order
            .price
            .map(|price| self.side_mut(order.side).remove(price, order.sequence_number()))
            .unwrap_or(false);

        if !indexed {
            return Err(EngineError::invariant(
                self.instrument.clone(),
                format!("order {} was missing from the {:?} index", order.id, order.side),
            ));
        }

        Ok(order)
    }

    pub fn get(&self, order_id: &OrderId) -> Option<&Order> {
        self.orders.get(order_id)
    }

    pub fn contains(&self, order_id: &OrderId) -> bool {
        self.orders.contains_key(order_id)
    }

    pub fn best_price(&self, side: Side) -> Option<Price> {
        self.side(side).best_price()
    }

    /// True iff both sides are populated and best bid >= best ask.
    pub fn is_crossed(&self) -> bool {
        match (self.bids.best_price(), self.asks.best_price()) {
            (Some(bid), Some(ask)) => bid >= ask,
            _ => false,
        }
    }

    /// Whether `incoming` would trade against the opposite best right now.
    pub fn crosses(&self, incoming: &Order) -> bool {
        let Some(best) = self.side(incoming.side.opposite()).best_price() else {
            return false;
        };

        match (incoming.price, incoming.is_market_order()) {
            (_, true) => true,
            (Some(limit), false) => match incoming.side {
                Side::Buy => limit >= best,
                Side::Sell => limit <= best,
            },
            (None, false) => false,
        }
    }

    /// Resting orders on `side`, best priority first
    pub fn resting_orders(&self, side: Side) -> Vec<&Order> {
        self.side(side)
            .order_ids()
            .iter()
            .filter_map(|id| self.orders.get(id))
            .collect()
    }

    pub(crate) fn order_ids(&self) -> Vec<OrderId> {
        self.orders.keys().copied().collect()
    }

    /// Aggregated (price, remaining quantity) for the best `num_levels` prices
    pub fn depth(&self, side: Side, num_levels: usize) -> Vec<(Price, Quantity)> {
        let mut levels: Vec<(Price, Quantity)> = Vec::new();

        for order in self.resting_orders(side) {
            let Some(price) = order.price else { continue };
            match levels.last_mut() {
                Some((level_price, total)) if *level_price == price => {
                    *total = total.saturating_add(order.remaining_quantity());
                },
                _ => {
                    if levels.len() == num_levels {
                        break;
                    }
                    levels.push((price, order.remaining_quantity()));
                },
            }
        }

        levels
    }

    pub fn snapshot(&self, depth: usize) -> OrderBookSnapshot {
        OrderBookSnapshot::with_depth(
            self.instrument.clone(),
            self.depth(Side::Buy, depth),
            self.depth(Side::Sell, depth),
        )
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

// ============================================================================
// Order Book Snapshot
// ============================================================================

/// Immutable snapshot of the order book state
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OrderBookSnapshot {
    pub instrument: String,
    /// Bid levels (price, quantity)
    pub bids: Vec<(Price, Quantity)>,
    /// Ask levels (price, quantity)
    pub asks: Vec<(Price, Quantity)>,
    /// Current spread (ask - bid)
    pub spread: Option<Decimal>,
    /// Mid price
    pub mid_price: Option<Decimal>,
}

impl OrderBookSnapshot {
    pub fn with_depth(
        instrument: String,
        bids: Vec<(Price, Quantity)>,
        asks: Vec<(Price, Quantity)>,
    ) -> Self {
        let (spread, mid_price) = match (bids.first(), asks.first()) {
            (Some((bid, _)), Some((ask, _))) => (
                ask.checked_sub(*bid),
                bid.checked_add(*ask).and_then(|sum| sum.checked_div(Decimal::from(2))),
            ),
            _ => (None, None),
        };

        Self {
            instrument,
            bids,
            asks,
            spread,
            mid_price,
        }
    }

    pub fn best_bid(&self) -> Option<Price> {
        self.bids.first().map(|(price, _)| *price)
    }

    pub fn best_ask(&self) -> Option<Price> {
        self.asks.first().map(|(price, _)| *price)
    }

    pub fn total_bid_quantity(&self) -> Quantity {
        self.bids
            .iter()
            .fold(Decimal::ZERO, |sum, (_, qty)| sum.saturating_add(*qty))
    }

    pub fn total_ask_quantity(&self) -> Quantity {
        self.asks
            .iter()
            .fold(Decimal::ZERO, |sum, (_, qty)| sum.saturating_add(*qty))
    }
}
