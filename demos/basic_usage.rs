// ============================================================================
// Basic Usage Example
// ============================================================================

use matchbook::interfaces::memory::InMemoryCollaborators;
use matchbook::prelude::*;
use rust_decimal::Decimal;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    matchbook::logging::init("matchbook=debug");

    println!("=== Matching Engine Example ===\n");

    // In-memory stores, trades echoed through the log
    let stores = InMemoryCollaborators::new();
    let collaborators = Collaborators {
        publisher: Arc::new(LoggingPublisher),
        ..stores.collaborators()
    };

    let config = EngineConfig::from_env()?.with_instrument("BTC-USD");
    let dispatcher = Dispatcher::start(config, collaborators).await?;

    println!("Started dispatcher for {:?}\n", dispatcher.instruments());

    // Add sell orders at different prices
    println!("Adding sell orders...");
    for i in 0i64..5 {
        let sell = Order::limit(
            format!("seller_{}", i),
            "BTC-USD",
            Side::Sell,
            Decimal::from(50000 + i * 100),
            Decimal::ONE,
        );
        dispatcher.submit(sell).await?;
    }

    // Add buy orders
    println!("Adding buy orders...");
    for i in 0i64..5 {
        let buy = Order::limit(
            format!("buyer_{}", i),
            "BTC-USD",
            Side::Buy,
            Decimal::from(49900 - i * 100),
            Decimal::ONE,
        );
        dispatcher.submit(buy).await?;
    }

    // Get order book snapshot
    println!("\n=== Order Book Snapshot ===");
    let snapshot = dispatcher.snapshot("BTC-USD").await?;

    println!("\nBids:");
    for (price, qty) in &snapshot.bids {
        println!("  {} @ {}", qty, price);
    }

    println!("\nAsks:");
    for (price, qty) in &snapshot.asks {
        println!("  {} @ {}", qty, price);
    }

    println!("\nSpread: {:?}", snapshot.spread);
    println!("Mid Price: {:?}", snapshot.mid_price);

    // Submit a market buy order that will sweep the first levels
    println!("\n=== Submitting Market Order ===");
    let market_buy = Order::market("market_buyer", "BTC-USD", Side::Buy, Decimal::from(2));
    let outcome = dispatcher.submit(market_buy).await?;

    println!("\nTrades:");
    for trade in &outcome.trades {
        println!(
            "  Trade: {} @ {} (qty: {})",
            trade.id, trade.price, trade.quantity
        );
    }
    println!(
        "Market order {} is {} (avg price {:?})",
        outcome.order.id,
        outcome.order.status(),
        outcome.order.average_fill_price()
    );

    // Cancel a resting bid
    let resting = dispatcher
        .submit(Order::limit("buyer_x", "BTC-USD", Side::Buy, Decimal::from(49000), Decimal::ONE))
        .await?;
    let cancelled = dispatcher.cancel("BTC-USD", resting.order.id).await?;
    println!(
        "\nCancelled {}: {:?} -> {}",
        cancelled.order.id, cancelled.state_change.from, cancelled.state_change.to
    );

    // Final snapshot
    println!("\n=== Final Order Book ===");
    let final_snapshot = dispatcher.snapshot("BTC-USD").await?;
    println!("Bids: {} levels", final_snapshot.bids.len());
    println!("Asks: {} levels", final_snapshot.asks.len());
    println!("Spread: {:?}", final_snapshot.spread);

    dispatcher.shutdown().await;

    println!("\n=== Persisted ===");
    println!("Trades: {}", stores.trades.trades().len());
    println!("Audit entries: {}", stores.audit.changes().len());
    println!("Orders: {}", stores.orders.len());

    Ok(())
}
