// ============================================================================
// Dispatch Module
// Per-instrument actors, their persistence workers, and the router in front
// ============================================================================

mod actor;
mod dispatcher;
mod persistence;

pub use actor::SymbolHandle;
pub use dispatcher::Dispatcher;
pub use persistence::PersistBatch;
