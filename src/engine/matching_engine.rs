// ============================================================================
// Matching Engine
// Core business logic for order matching
// ============================================================================

use super::lifecycle::LifecycleTracker;
use super::price_time::PriceTimePriority;
use crate::domain::{
    Order, OrderBookSnapshot, OrderId, OrderStatus, PriceLevelBook, Side, StateChange, Trade,
};
use crate::error::{EngineError, EngineResult};
use crate::interfaces::{MatchContext, MatchingAlgorithm};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use smallvec::SmallVec;
use std::collections::{HashMap, VecDeque};

/// Everything one submission produced, in emission order.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    /// Final state of the submitted order
    pub order: Order,
    pub trades: Vec<Trade>,
    /// Final state of each resting order the submission executed against
    pub touched: Vec<Order>,
    pub state_changes: SmallVec<[StateChange; 4]>,
}

impl MatchOutcome {
    /// True if the remainder of the submitted order is now resting.
    pub fn rested(&self) -> bool {
        self.order.sequence_number() > 0 && self.order.status().can_be_cancelled()
    }

    /// Submitted order first, then touched resting orders.
    pub fn updated_orders(&self) -> impl Iterator<Item = &Order> {
        std::iter::once(&self.order).chain(self.touched.iter())
    }
}

/// Result of a successful cancel.
#[derive(Debug, Clone)]
pub struct CancelOutcome {
    pub order: Order,
    pub state_change: StateChange,
}

/// Single-instrument matching engine with pluggable matching algorithm.
///
/// Owned by exactly one actor, so every method takes `&mut self` and no
/// internal locking is needed.
pub struct MatchingEngine {
    /// Trading instrument (e.g., "BTC-USD")
    instrument: String,

    book: PriceLevelBook,

    /// Pluggable matching algorithm
    algorithm: Box<dyn MatchingAlgorithm>,

    lifecycle: LifecycleTracker,

    /// Sequence handed to the next order that rests (starts at 1)
    next_sequence: u64,

    next_trade_sequence: u64,

    /// Terminal status of orders that have left the book, bounded
    retired: RetiredOrders,
}

/// Default number of finished orders an engine remembers.
const DEFAULT_RETIRED_CAPACITY: usize = 100_000;

/// Finished orders, kept so a repeat cancel reports `NotCancelable` and a
/// reused id reports `DuplicateOrder`. Once full, the oldest entry is
/// forgotten and that id falls back to `NotFound`.
#[derive(Debug)]
struct RetiredOrders {
    statuses: HashMap<OrderId, OrderStatus>,
    order: VecDeque<OrderId>,
    capacity: usize,
}

impl RetiredOrders {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            statuses: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn insert(&mut self, order_id: OrderId, status: OrderStatus) {
        if self.capacity == 0 {
            return;
        }
        if self.statuses.insert(order_id, status).is_none() {
            self.order.push_back(order_id);
        }
        while self.statuses.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.statuses.remove(&oldest);
                },
                None => break,
            }
        }
    }

    fn get(&self, order_id: &OrderId) -> Option<OrderStatus> {
        self.statuses.get(order_id).copied()
    }

    fn contains(&self, order_id: &OrderId) -> bool {
        self.statuses.contains_key(order_id)
    }
}

impl MatchingEngine {
    /// Create a new matching engine
    pub fn new(instrument: impl Into<String>, algorithm: Box<dyn MatchingAlgorithm>) -> Self {
        let instrument = instrument.into();
        Self {
            book: PriceLevelBook::new(instrument.clone()),
            instrument,
            algorithm,
            lifecycle: LifecycleTracker::new(),
            next_sequence: 1,
            next_trade_sequence: 1,
            retired: RetiredOrders::with_capacity(DEFAULT_RETIRED_CAPACITY),
        }
    }

    /// Bound how many finished orders are remembered. Shrinking drops the
    /// oldest entries.
    pub fn with_retired_capacity(mut self, capacity: usize) -> Self {
        let mut retired = RetiredOrders::with_capacity(capacity);
        for order_id in self.retired.order.drain(..) {
            if let Some(status) = self.retired.statuses.get(&order_id) {
                retired.insert(order_id, *status);
            }
        }
        self.retired = retired;
        self
    }

    pub fn with_price_time(instrument: impl Into<String>) -> Self {
        Self::new(instrument, Box::new(PriceTimePriority::new()))
    }

    /// Submit an order to the matching engine
    pub fn submit(&mut self, order: Order) -> EngineResult<MatchOutcome> {
        self.submit_at(order, Utc::now())
    }

    /// Submit with an explicit clock reading
    pub fn submit_at(&mut self, mut order: Order, now: DateTime<Utc>) -> EngineResult<MatchOutcome> {
        order.validate()?;

        if order.instrument != self.instrument {
            return Err(EngineError::invalid(format!(
                "order for {} routed to {}",
                order.instrument, self.instrument
            )));
        }

        if self.book.contains(&order.id) || self.retired.contains(&order.id) {
            return Err(EngineError::DuplicateOrder { order_id: order.id });
        }

        let mut state_changes = SmallVec::new();
        state_changes.push(self.lifecycle.admit(order.id, now));

        let mut ctx = MatchContext {
            now,
            next_trade_sequence: self.next_trade_sequence,
        };
        let pass = self
            .algorithm
            .match_order(&mut order, &mut self.book, &mut ctx)?;
        self.next_trade_sequence = ctx.next_trade_sequence;

        let mut touched = Vec::with_capacity(pass.touched.len());
        for resting in pass.touched {
            let after = resting.order.status();
            if let Some(change) =
                self.lifecycle
                    .track(&self.instrument, resting.order.id, resting.before, after, now)?
            {
                state_changes.push(change);
            }
            if after.is_terminal() {
                self.retired.insert(resting.order.id, after);
            }
            touched.push(resting.order);
        }

        if order.remaining_quantity() > Decimal::ZERO {
            if order.is_limit_order() {
                order.assign_sequence(self.next_sequence);
                self.next_sequence += 1;
                self.book.insert(order.clone())?;
            } else {
                // Market remainders never rest.
                order.cancel(now)?;
            }
        }

        if let Some(change) =
            self.lifecycle
                .track(&self.instrument, order.id, OrderStatus::Open, order.status(), now)?
        {
            state_changes.push(change);
        }
        if order.status().is_terminal() {
            self.retired.insert(order.id, order.status());
        }

        self.verify_book()?;

        tracing::debug!(
            instrument = %self.instrument,
            order_id = %order.id,
            algorithm = self.algorithm.name(),
            trades = pass.trades.len(),
            status = %order.status(),
            "order processed"
        );

        Ok(MatchOutcome {
            order,
            trades: pass.trades,
            touched,
            state_changes,
        })
    }

    /// Cancel an order
    pub fn cancel(&mut self, order_id: OrderId) -> EngineResult<CancelOutcome> {
        self.cancel_at(order_id, Utc::now())
    }

    pub fn cancel_at(&mut self, order_id: OrderId, now: DateTime<Utc>) -> EngineResult<CancelOutcome> {
        let status = match self.book.get(&order_id) {
            Some(order) => order.status(),
            None => {
                return Err(match self.retired.get(&order_id) {
                    Some(status) => EngineError::NotCancelable { order_id, status },
                    None => EngineError::NotFound { order_id },
                })
            },
        };

        if !status.can_be_cancelled() {
            return Err(EngineError::NotCancelable { order_id, status });
        }

        let mut order = self.book.remove(&order_id)?;
        let before = order.cancel(now)?;
        let state_change = self
            .lifecycle
            .track(&self.instrument, order_id, before, order.status(), now)?
            .ok_or_else(|| {
                EngineError::invariant(
                    self.instrument.clone(),
                    format!("cancel of {} produced no transition", order_id),
                )
            })?;
        self.retired.insert(order_id, order.status());

        tracing::debug!(
            instrument = %self.instrument,
            order_id = %order_id,
            from = %before,
            "order cancelled"
        );

        Ok(CancelOutcome {
            order,
            state_change,
        })
    }

    /// Cancel every resting order whose expiration is at or before `now`,
    /// oldest sequence first.
    pub fn expire_due(&mut self, now: DateTime<Utc>) -> EngineResult<Vec<CancelOutcome>> {
        let mut due: Vec<(u64, OrderId)> = self
            .book
            .order_ids()
            .into_iter()
            .filter_map(|id| self.book.get(&id))
            .filter(|o| o.is_expired_at(now))
            .map(|o| (o.sequence_number(), o.id))
            .collect();
        due.sort_unstable();

        due.into_iter()
            .map(|(_, id)| self.cancel_at(id, now))
            .collect()
    }

    /// Rebuild the book from stored open orders.
    ///
    /// Orders are replayed in sequence order and the sequence counter resumes
    /// after the highest one seen. Trades are not replayed.
    pub fn recover(&mut self, mut orders: Vec<Order>) -> EngineResult<usize> {
        orders.sort_by_key(Order::sequence_number);

        let count = orders.len();
        for order in orders {
            if order.instrument != self.instrument {
                return Err(EngineError::invalid(format!(
                    "cannot restore {} order {} into {}",
                    order.instrument, order.id, self.instrument
                )));
            }
            if !order.status().can_be_cancelled() {
                return Err(EngineError::invalid(format!(
                    "cannot restore {} order {}",
                    order.status(),
                    order.id
                )));
            }
            if order
                .price
                .is_some_and(|price| price.checked_mul(order.quantity).is_none())
            {
                return Err(EngineError::invalid(format!(
                    "order {} has an unrepresentable notional",
                    order.id
                )));
            }

            self.next_sequence = self.next_sequence.max(order.sequence_number() + 1);
            self.book.insert(order)?;
        }

        self.verify_book()?;

        tracing::info!(
            instrument = %self.instrument,
            restored = count,
            next_sequence = self.next_sequence,
            "order book recovered"
        );

        Ok(count)
    }

    /// Get order book snapshot
    pub fn snapshot(&self, depth: usize) -> OrderBookSnapshot {
        self.book.snapshot(depth)
    }

    /// Get spread
    pub fn spread(&self) -> Option<Decimal> {
        self.snapshot(1).spread
    }

    /// Get mid price
    pub fn mid_price(&self) -> Option<Decimal> {
        self.snapshot(1).mid_price
    }

    /// Status of a resting order, or the final status of one that left the book.
    pub fn order_status(&self, order_id: &OrderId) -> Option<OrderStatus> {
        self.book
            .get(order_id)
            .map(Order::status)
            .or_else(|| self.retired.get(order_id))
    }

    /// Get the instrument name
    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn book(&self) -> &PriceLevelBook {
        &self.book
    }

    pub fn algorithm_name(&self) -> &str {
        self.algorithm.name()
    }

    // ========================================================================
    // Private methods
    // ========================================================================

    fn verify_book(&self) -> EngineResult<()> {
        if self.book.is_crossed() {
            return Err(EngineError::invariant(
                self.instrument.clone(),
                format!(
                    "book crossed: bid {:?} >= ask {:?}",
                    self.book.best_price(Side::Buy),
                    self.book.best_price(Side::Sell)
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RestingState;
    use chrono::Duration;
    use proptest::prelude::*;

    fn dec(v: i64) -> Decimal {
        Decimal::from(v)
    }

    fn engine() -> MatchingEngine {
        MatchingEngine::with_price_time("BTC-USD")
    }

    fn limit(side: Side, price: i64, qty: i64) -> Order {
        Order::limit("user", "BTC-USD", side, dec(price), dec(qty))
    }

    #[test]
    fn test_scenario_full_match_at_same_price() {
        let mut engine = engine();
        let buy = engine.submit(limit(Side::Buy, 100, 10)).unwrap();
        assert!(buy.rested());
        assert_eq!(buy.order.sequence_number(), 1);

        let sell = engine.submit(limit(Side::Sell, 100, 10)).unwrap();

        assert_eq!(sell.trades.len(), 1);
        let trade = &sell.trades[0];
        assert_eq!(trade.buy_order_id, buy.order.id);
        assert_eq!(trade.sell_order_id, sell.order.id);
        assert_eq!(trade.price, dec(100));
        assert_eq!(trade.quantity, dec(10));

        assert_eq!(sell.order.status(), OrderStatus::Filled);
        assert_eq!(sell.touched[0].status(), OrderStatus::Filled);
        assert!(engine.book().is_empty());
    }

    #[test]
    fn test_scenario_partial_fill_at_maker_price() {
        let mut engine = engine();
        let buy = engine.submit(limit(Side::Buy, 101, 10)).unwrap();
        let sell = engine.submit(limit(Side::Sell, 100, 6)).unwrap();

        assert_eq!(sell.trades.len(), 1);
        assert_eq!(sell.trades[0].price, dec(101));
        assert_eq!(sell.trades[0].quantity, dec(6));
        assert_eq!(sell.order.status(), OrderStatus::Filled);

        let resting = engine.book().get(&buy.order.id).unwrap();
        assert_eq!(resting.status(), OrderStatus::Partial);
        assert_eq!(resting.remaining_quantity(), dec(4));
        assert_eq!(resting.sequence_number(), 1);
    }

    #[test]
    fn test_scenario_market_order_on_empty_book() {
        let mut engine = engine();
        let outcome = engine
            .submit(Order::market("user", "BTC-USD", Side::Buy, dec(5)))
            .unwrap();

        assert!(outcome.trades.is_empty());
        assert!(!outcome.rested());
        assert_eq!(outcome.order.status(), OrderStatus::Cancelled);
        assert_eq!(outcome.order.cancelled_quantity(), dec(5));
        assert!(engine.book().is_empty());

        let tos: Vec<_> = outcome.state_changes.iter().map(|c| c.to).collect();
        assert_eq!(tos, vec![OrderStatus::Open, OrderStatus::Cancelled]);
    }

    #[test]
    fn test_scenario_cancel_twice() {
        let mut engine = engine();
        let order = engine.submit(limit(Side::Buy, 100, 10)).unwrap().order;

        let cancelled = engine.cancel(order.id).unwrap();
        assert_eq!(cancelled.state_change.from, Some(OrderStatus::Open));
        assert_eq!(cancelled.state_change.to, OrderStatus::Cancelled);
        assert_eq!(cancelled.order.status(), OrderStatus::Cancelled);
        assert!(engine.book().is_empty());

        let err = engine.cancel(order.id).unwrap_err();
        assert_eq!(
            err,
            EngineError::NotCancelable {
                order_id: order.id,
                status: OrderStatus::Cancelled,
            }
        );
    }

    #[test]
    fn test_cancel_unknown_and_filled() {
        let mut engine = engine();
        let unknown = OrderId::new();
        assert_eq!(
            engine.cancel(unknown).unwrap_err(),
            EngineError::NotFound { order_id: unknown }
        );

        let buy = engine.submit(limit(Side::Buy, 100, 1)).unwrap().order;
        engine.submit(limit(Side::Sell, 100, 1)).unwrap();
        assert!(matches!(
            engine.cancel(buy.id),
            Err(EngineError::NotCancelable {
                status: OrderStatus::Filled,
                ..
            })
        ));
    }

    #[test]
    fn test_time_priority_within_level() {
        let mut engine = engine();
        let first = engine.submit(limit(Side::Sell, 100, 3)).unwrap().order;
        let second = engine.submit(limit(Side::Sell, 100, 3)).unwrap().order;

        let outcome = engine.submit(limit(Side::Buy, 100, 4)).unwrap();
        let makers: Vec<_> = outcome.trades.iter().map(|t| t.sell_order_id).collect();
        assert_eq!(makers, vec![first.id, second.id]);
        assert_eq!(outcome.trades[1].quantity, dec(1));
    }

    #[test]
    fn test_partial_fill_keeps_priority() {
        let mut engine = engine();
        let first = engine.submit(limit(Side::Sell, 100, 10)).unwrap().order;
        let second = engine.submit(limit(Side::Sell, 100, 10)).unwrap().order;

        engine.submit(limit(Side::Buy, 100, 4)).unwrap();
        let outcome = engine.submit(limit(Side::Buy, 100, 4)).unwrap();

        assert_eq!(outcome.trades[0].sell_order_id, first.id);
        let resting: Vec<_> = engine
            .book()
            .resting_orders(Side::Sell)
            .iter()
            .map(|o| o.id)
            .collect();
        assert_eq!(resting, vec![first.id, second.id]);
    }

    #[test]
    fn test_remainder_rests_as_partial() {
        let mut engine = engine();
        engine.submit(limit(Side::Sell, 100, 2)).unwrap();
        let outcome = engine.submit(limit(Side::Buy, 101, 5)).unwrap();

        assert!(outcome.rested());
        assert_eq!(outcome.order.status(), OrderStatus::Partial);
        assert_eq!(outcome.order.sequence_number(), 2);
        assert_eq!(engine.book().best_price(Side::Buy), Some(dec(101)));
        assert_eq!(engine.order_status(&outcome.order.id), Some(OrderStatus::Partial));
    }

    #[test]
    fn test_market_partial_is_cancelled() {
        let mut engine = engine();
        engine.submit(limit(Side::Sell, 100, 2)).unwrap();
        let outcome = engine
            .submit(Order::market("user", "BTC-USD", Side::Buy, dec(5)))
            .unwrap();

        assert_eq!(outcome.order.filled_quantity(), dec(2));
        assert_eq!(outcome.order.status(), OrderStatus::Cancelled);
        assert_eq!(outcome.order.cancelled_quantity(), dec(3));
        assert!(engine.book().is_empty());
    }

    #[test]
    fn test_state_changes_in_emission_order() {
        let mut engine = engine();
        let maker = engine.submit(limit(Side::Sell, 100, 2)).unwrap().order;
        let outcome = engine.submit(limit(Side::Buy, 100, 5)).unwrap();

        let changes: Vec<_> = outcome
            .state_changes
            .iter()
            .map(|c| (c.order_id, c.from, c.to))
            .collect();
        assert_eq!(
            changes,
            vec![
                (outcome.order.id, None, OrderStatus::Open),
                (maker.id, Some(OrderStatus::Open), OrderStatus::Filled),
                (outcome.order.id, Some(OrderStatus::Open), OrderStatus::Partial),
            ]
        );
    }

    #[test]
    fn test_rejects_invalid_orders() {
        let mut engine = engine();

        let err = engine.submit(limit(Side::Buy, 100, 0)).unwrap_err();
        assert!(matches!(err, EngineError::InvalidOrder { .. }));

        let err = engine.submit(limit(Side::Buy, -1, 1)).unwrap_err();
        assert!(matches!(err, EngineError::InvalidOrder { .. }));

        let other = Order::limit("user", "ETH-USD", Side::Buy, dec(100), dec(1));
        let err = engine.submit(other).unwrap_err();
        assert!(matches!(err, EngineError::InvalidOrder { .. }));

        assert!(engine.book().is_empty());
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let mut engine = engine();
        let order = limit(Side::Buy, 100, 1);
        engine.submit(order.clone()).unwrap();
        assert_eq!(
            engine.submit(order.clone()).unwrap_err(),
            EngineError::DuplicateOrder { order_id: order.id }
        );

        engine.cancel(order.id).unwrap();
        assert!(matches!(
            engine.submit(order),
            Err(EngineError::DuplicateOrder { .. })
        ));
    }

    #[test]
    fn test_expire_due() {
        let mut engine = engine();
        let now = Utc::now();
        let expiring = engine
            .submit_at(limit(Side::Buy, 99, 1).with_expiration(now + Duration::seconds(5)), now)
            .unwrap()
            .order;
        let lasting = engine.submit_at(limit(Side::Buy, 98, 1), now).unwrap().order;

        assert!(engine.expire_due(now).unwrap().is_empty());

        let expired = engine.expire_due(now + Duration::seconds(5)).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].order.id, expiring.id);
        assert_eq!(expired[0].state_change.to, OrderStatus::Cancelled);
        assert!(engine.book().contains(&lasting.id));
    }

    #[test]
    fn test_snapshot_spread_and_mid() {
        let mut engine = engine();
        for i in 0..5 {
            engine.submit(limit(Side::Buy, 50000 - i * 100, 1)).unwrap();
            engine.submit(limit(Side::Sell, 50100 + i * 100, 1)).unwrap();
        }

        let snapshot = engine.snapshot(3);
        assert_eq!(snapshot.bids.len(), 3);
        assert_eq!(snapshot.asks.len(), 3);
        assert_eq!(engine.spread(), Some(dec(100)));
        assert_eq!(engine.mid_price(), Some(dec(50050)));
    }

    #[test]
    fn test_recovery_is_idempotent() {
        let mut original = engine();
        original.submit(limit(Side::Buy, 100, 5)).unwrap();
        original.submit(limit(Side::Buy, 100, 7)).unwrap();
        original.submit(limit(Side::Sell, 103, 4)).unwrap();
        original.submit(limit(Side::Sell, 102, 2)).unwrap();
        original.submit(limit(Side::Sell, 100, 6)).unwrap();

        let mut stored: Vec<Order> = [Side::Buy, Side::Sell]
            .iter()
            .flat_map(|side| original.book().resting_orders(*side))
            .cloned()
            .collect();
        stored.reverse();

        let mut restored = engine();
        assert_eq!(restored.recover(stored).unwrap(), 3);

        for side in [Side::Buy, Side::Sell] {
            let before: Vec<_> = original.book().resting_orders(side).into_iter().cloned().collect();
            let after: Vec<_> = restored.book().resting_orders(side).into_iter().cloned().collect();
            assert_eq!(before, after);
        }

        let next = restored.submit(limit(Side::Buy, 90, 1)).unwrap();
        assert_eq!(next.order.sequence_number(), 5);
    }

    #[test]
    fn test_unrepresentable_notional_is_rejected() {
        let mut engine = engine();
        let huge = dec(1_000_000_000_000_000);

        let err = engine
            .submit(Order::limit("user", "BTC-USD", Side::Sell, huge, huge))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidOrder { .. }));
        assert!(engine.book().is_empty());

        // A representable maker still trades against an oversized market order
        engine
            .submit(Order::limit("maker", "BTC-USD", Side::Sell, huge, dec(1)))
            .unwrap();
        let err = engine
            .submit(Order::limit("user", "BTC-USD", Side::Buy, huge, huge))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidOrder { .. }));
        assert_eq!(engine.book().len(), 1);

        let outcome = engine
            .submit(Order::market("user", "BTC-USD", Side::Buy, huge))
            .unwrap();
        assert_eq!(outcome.trades.len(), 1);
        assert_eq!(outcome.trades[0].notional_value(), huge);
        assert_eq!(outcome.order.status(), OrderStatus::Cancelled);
        assert!(engine.book().is_empty());
    }

    #[test]
    fn test_recovery_rejects_shared_sequence() {
        let resting = |price: i64| {
            limit(Side::Buy, price, 1).with_resting_state(RestingState {
                filled_quantity: Decimal::ZERO,
                filled_notional: Decimal::ZERO,
                status: OrderStatus::Open,
                sequence_number: 7,
                updated_at: Utc::now(),
            })
        };

        let mut engine = engine();
        assert!(matches!(
            engine.recover(vec![resting(100), resting(100)]),
            Err(EngineError::InvalidOrder { .. })
        ));

        let mut engine = MatchingEngine::with_price_time("BTC-USD");
        assert!(matches!(
            engine.recover(vec![resting(100), resting(99)]),
            Err(EngineError::InvalidOrder { .. })
        ));
    }

    #[test]
    fn test_trade_sequence_restarts_after_recovery() {
        let mut original = engine();
        original.submit(limit(Side::Sell, 100, 5)).unwrap();
        let first = original.submit(limit(Side::Buy, 100, 2)).unwrap();
        let second = original.submit(limit(Side::Buy, 100, 1)).unwrap();
        assert_eq!(first.trades[0].sequence, 1);
        assert_eq!(second.trades[0].sequence, 2);

        let stored: Vec<Order> = original
            .book()
            .resting_orders(Side::Sell)
            .into_iter()
            .cloned()
            .collect();
        let mut restored = engine();
        restored.recover(stored).unwrap();

        let after = restored.submit(limit(Side::Buy, 100, 1)).unwrap();
        assert_eq!(after.trades[0].sequence, 1);
        assert_ne!(after.trades[0].id, first.trades[0].id);
    }

    #[test]
    fn test_retired_memory_is_bounded() {
        let mut engine = engine().with_retired_capacity(2);
        let ids: Vec<OrderId> = (0..3)
            .map(|i| engine.submit(limit(Side::Buy, 90 + i, 1)).unwrap().order.id)
            .collect();
        for id in &ids {
            engine.cancel(*id).unwrap();
        }

        // The oldest finished order has been forgotten
        assert_eq!(engine.order_status(&ids[0]), None);
        assert_eq!(
            engine.cancel(ids[0]).unwrap_err(),
            EngineError::NotFound { order_id: ids[0] }
        );

        for id in &ids[1..] {
            assert_eq!(engine.order_status(id), Some(OrderStatus::Cancelled));
            assert!(matches!(
                engine.cancel(*id),
                Err(EngineError::NotCancelable { .. })
            ));
        }
    }

    #[test]
    fn test_shrinking_retired_capacity_keeps_newest() {
        let mut engine = engine();
        let ids: Vec<OrderId> = (0..3)
            .map(|i| engine.submit(limit(Side::Sell, 110 + i, 1)).unwrap().order.id)
            .collect();
        for id in &ids {
            engine.cancel(*id).unwrap();
        }

        let engine = engine.with_retired_capacity(1);
        assert_eq!(engine.order_status(&ids[0]), None);
        assert_eq!(engine.order_status(&ids[1]), None);
        assert_eq!(engine.order_status(&ids[2]), Some(OrderStatus::Cancelled));
    }

    #[test]
    fn test_recovery_rejects_terminal_orders() {
        let mut engine = engine();
        let filled = limit(Side::Buy, 100, 1).with_resting_state(RestingState {
            filled_quantity: dec(1),
            filled_notional: dec(100),
            status: OrderStatus::Filled,
            sequence_number: 1,
            updated_at: Utc::now(),
        });
        assert!(matches!(
            engine.recover(vec![filled]),
            Err(EngineError::InvalidOrder { .. })
        ));
    }

    // ========================================================================
    // Properties
    // ========================================================================

    #[derive(Debug, Clone)]
    enum Op {
        Limit { buy: bool, price: i64, qty: i64 },
        Market { buy: bool, qty: i64 },
        Cancel(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            6 => (any::<bool>(), 95i64..=105, 1i64..=20)
                .prop_map(|(buy, price, qty)| Op::Limit { buy, price, qty }),
            1 => (any::<bool>(), 1i64..=30).prop_map(|(buy, qty)| Op::Market { buy, qty }),
            1 => any::<usize>().prop_map(Op::Cancel),
        ]
    }

    fn side(buy: bool) -> Side {
        if buy {
            Side::Buy
        } else {
            Side::Sell
        }
    }

    proptest! {
        #[test]
        fn prop_matching_invariants(ops in prop::collection::vec(op(), 1..80)) {
            let mut engine = engine();
            let mut latest: HashMap<OrderId, Order> = HashMap::new();
            let mut submitted: Vec<OrderId> = Vec::new();
            let mut trades: Vec<Trade> = Vec::new();

            for op in ops {
                match op {
                    Op::Limit { buy, price, qty } => {
                        let outcome = engine.submit(limit(side(buy), price, qty)).unwrap();
                        submitted.push(outcome.order.id);
                        for order in outcome.updated_orders() {
                            latest.insert(order.id, order.clone());
                        }
                        trades.extend(outcome.trades);
                    },
                    Op::Market { buy, qty } => {
                        let order = Order::market("user", "BTC-USD", side(buy), dec(qty));
                        let outcome = engine.submit(order).unwrap();
                        for order in outcome.updated_orders() {
                            latest.insert(order.id, order.clone());
                        }
                        trades.extend(outcome.trades);
                    },
                    Op::Cancel(pick) => {
                        if submitted.is_empty() {
                            continue;
                        }
                        let id = submitted[pick % submitted.len()];
                        if let Ok(outcome) = engine.cancel(id) {
                            latest.insert(id, outcome.order);
                        }
                    },
                }

                prop_assert!(!engine.book().is_crossed());
            }

            for order in latest.values() {
                prop_assert_eq!(
                    order.filled_quantity() + order.remaining_quantity() + order.cancelled_quantity(),
                    order.quantity
                );
            }

            let traded: Decimal = trades.iter().map(|t| t.quantity).sum();
            let bought: Decimal = latest.values().filter(|o| o.side == Side::Buy).map(Order::filled_quantity).sum();
            let sold: Decimal = latest.values().filter(|o| o.side == Side::Sell).map(Order::filled_quantity).sum();
            prop_assert_eq!(bought, traded);
            prop_assert_eq!(sold, traded);

            for trade in &trades {
                let maker = &latest[&trade.maker_order_id()];
                prop_assert_eq!(maker.price, Some(trade.price));

                let taker = &latest[&trade.taker_order_id()];
                if let Some(limit) = taker.price {
                    match taker.side {
                        Side::Buy => prop_assert!(trade.price <= limit),
                        Side::Sell => prop_assert!(trade.price >= limit),
                    }
                }
            }
        }
    }
}
