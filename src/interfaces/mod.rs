// ============================================================================
// Interfaces Module
// Contains all trait definitions and contracts
// ============================================================================

mod collaborators;
mod matching_algorithm;
pub mod memory;

pub use collaborators::{
    AuditStore, Collaborators, LoggingPublisher, NoOpPublisher, OrderStore, TradePublisher,
    TradeStore,
};
pub use matching_algorithm::{MatchContext, MatchPass, MatchingAlgorithm, TouchedOrder};
