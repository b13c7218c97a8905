// ============================================================================
// Engine Module
// Contains the core matching engine business logic
// ============================================================================

mod lifecycle;
mod matching_engine;
mod price_time;

pub use lifecycle::LifecycleTracker;
pub use matching_engine::{CancelOutcome, MatchOutcome, MatchingEngine};
pub use price_time::PriceTimePriority;
