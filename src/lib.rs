// ============================================================================
// Matchbook Library
// Price-time priority matching engine with per-instrument actors
// ============================================================================

//! # Matchbook
//!
//! A continuous limit order book and matching engine for financial
//! instruments.
//!
//! ## Features
//!
//! - **Price-time priority** crossing with executions at the resting order's price
//! - **Order lifecycle audit**: every status transition is recorded exactly once
//! - **One actor per instrument**: commands for a symbol are applied in
//!   arrival order by a single task that owns its book
//! - **Asynchronous persistence** with exponential-backoff retries, off the
//!   matching path
//! - **Cold-start recovery** of resting orders from the order store
//!
//! ## Example
//!
//! ```rust
//! use matchbook::prelude::*;
//! use rust_decimal::Decimal;
//!
//! let mut engine = MatchingEngine::with_price_time("BTC-USD");
//!
//! let sell = Order::limit("seller", "BTC-USD", Side::Sell, Decimal::from(50000), Decimal::ONE);
//! engine.submit(sell).unwrap();
//!
//! let buy = Order::limit("buyer", "BTC-USD", Side::Buy, Decimal::from(50000), Decimal::ONE);
//! let outcome = engine.submit(buy).unwrap();
//!
//! assert_eq!(outcome.trades.len(), 1);
//! assert_eq!(outcome.order.status(), OrderStatus::Filled);
//!
//! let snapshot = engine.snapshot(10);
//! println!("Best bid: {:?}", snapshot.best_bid());
//! println!("Best ask: {:?}", snapshot.best_ask());
//! println!("Spread: {:?}", snapshot.spread);
//! ```

pub mod dispatch;
pub mod domain;
pub mod engine;
pub mod error;
pub mod interfaces;
#[cfg(feature = "logging")]
pub mod logging;

// Re-exports for convenience
pub mod prelude {
    pub use crate::dispatch::{Dispatcher, PersistBatch, SymbolHandle};
    pub use crate::domain::{
        EngineConfig, Order, OrderBookSnapshot, OrderId, OrderStatus, OrderType, Price,
        PriceLevelBook, Quantity, RetryPolicy, Side, StateChange, Trade,
    };
    pub use crate::engine::{
        CancelOutcome, LifecycleTracker, MatchOutcome, MatchingEngine, PriceTimePriority,
    };
    pub use crate::error::{ConfigError, EngineError, EngineResult, StoreError};
    pub use crate::interfaces::memory::InMemoryCollaborators;
    pub use crate::interfaces::{
        AuditStore, Collaborators, LoggingPublisher, MatchingAlgorithm, NoOpPublisher,
        OrderStore, TradePublisher, TradeStore,
    };
}

#[cfg(test)]
mod integration_tests {
    use super::prelude::*;
    use rust_decimal::Decimal;
    use std::time::Duration;

    fn fast_config() -> EngineConfig {
        EngineConfig::default().with_retry(RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        })
    }

    #[tokio::test]
    async fn test_end_to_end_matching() {
        let stores = InMemoryCollaborators::new();
        let dispatcher = Dispatcher::start(
            fast_config().with_instrument("BTC-USD"),
            stores.collaborators(),
        )
        .await
        .unwrap();

        // Add sell order
        let sell = Order::limit("seller", "BTC-USD", Side::Sell, Decimal::from(50000), Decimal::ONE);
        let resting = dispatcher.submit(sell).await.unwrap();
        assert!(resting.rested());

        // Add matching buy order
        let buy = Order::limit("buyer", "BTC-USD", Side::Buy, Decimal::from(50000), Decimal::ONE);
        let outcome = dispatcher.submit(buy).await.unwrap();

        // Verify trade occurred
        assert_eq!(outcome.trades.len(), 1);
        assert_eq!(outcome.order.status(), OrderStatus::Filled);
        assert_eq!(outcome.touched[0].status(), OrderStatus::Filled);

        // Verify book is empty
        let snapshot = dispatcher.snapshot("BTC-USD").await.unwrap();
        assert!(snapshot.bids.is_empty());
        assert!(snapshot.asks.is_empty());

        // Shutdown drains persistence
        dispatcher.shutdown().await;
        assert_eq!(stores.trades.trades().len(), 1);
        assert_eq!(stores.publisher.published().len(), 1);
        assert_eq!(stores.audit.changes().len(), 4);
        assert!(stores
            .orders
            .get(&outcome.order.id)
            .is_some_and(|o| o.status() == OrderStatus::Filled));
    }

    #[tokio::test]
    async fn test_concurrent_submitters_conserve_quantity() {
        let stores = InMemoryCollaborators::new();
        let dispatcher = std::sync::Arc::new(
            Dispatcher::new(fast_config(), stores.collaborators()).unwrap(),
        );

        let mut tasks = Vec::new();
        for i in 0..8i64 {
            let dispatcher = dispatcher.clone();
            tasks.push(tokio::spawn(async move {
                let side = if i % 2 == 0 { Side::Buy } else { Side::Sell };
                let mut filled = Decimal::ZERO;
                for _ in 0..25 {
                    let order = Order::limit(
                        format!("trader{}", i),
                        "BTC-USD",
                        side,
                        Decimal::from(100),
                        Decimal::from(2),
                    );
                    let outcome = dispatcher.submit(order).await.unwrap();
                    filled += outcome.order.filled_quantity();
                }
                filled
            }));
        }

        let mut taker_volume = Decimal::ZERO;
        for task in tasks {
            taker_volume += task.await.unwrap();
        }

        dispatcher.flush().await.unwrap();
        let traded: Decimal = stores.trades.trades().iter().map(|t| t.quantity).sum();
        assert_eq!(traded, taker_volume);

        // Equal buy and sell volume at one price: everything crosses.
        let snapshot = dispatcher.snapshot("BTC-USD").await.unwrap();
        assert!(snapshot.bids.is_empty());
        assert!(snapshot.asks.is_empty());

        dispatcher.shutdown().await;
    }
}
