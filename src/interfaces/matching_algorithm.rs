// ============================================================================
// Matching Algorithm Interface
// Defines the contract for the crossing algorithm run by the engine
// ============================================================================

use crate::domain::{Order, OrderStatus, PriceLevelBook, Trade};
use crate::error::EngineResult;
use chrono::{DateTime, Utc};

/// Per-pass state the engine lends to the algorithm.
#[derive(Debug)]
pub struct MatchContext {
    /// Timestamp stamped on every trade of the pass
    pub now: DateTime<Utc>,
    /// Sequence the next emitted trade receives; the algorithm advances it
    pub next_trade_sequence: u64,
}

/// A resting order the pass executed against, with its status before the pass.
#[derive(Debug, Clone)]
pub struct TouchedOrder {
    pub before: OrderStatus,
    pub order: Order,
}

/// Output of one crossing pass, in emission order.
#[derive(Debug, Default)]
pub struct MatchPass {
    pub trades: Vec<Trade>,
    pub touched: Vec<TouchedOrder>,
}

/// Strategy interface for the crossing algorithm.
pub trait MatchingAlgorithm: Send + Sync {
    /// Execute `incoming` against the opposite side of `book`.
    ///
    /// Fills both sides in place and removes fully filled resting orders. The
    /// incoming order is never inserted here; resting the remainder is the
    /// engine's job.
    fn match_order(
        &self,
        incoming: &mut Order,
        book: &mut PriceLevelBook,
        ctx: &mut MatchContext,
    ) -> EngineResult<MatchPass>;

    /// Get the algorithm name for logging
    fn name(&self) -> &str;
}
