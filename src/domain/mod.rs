// ============================================================================
// Domain Models Module
// Contains all core domain entities and value objects
// ============================================================================

pub mod config;
pub mod order;
pub mod order_book;
pub mod state_change;
pub mod trade;

pub use config::{EngineConfig, RetryPolicy};
pub use order::{Order, OrderId, OrderType, Price, Quantity, RestingState, Side};
pub use order_book::{OrderBookSide, OrderBookSnapshot, PriceLevelBook};
pub use state_change::StateChange;
pub use trade::Trade;

// Re-export state machine
pub use order::state::OrderStatus;
