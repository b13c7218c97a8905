// ============================================================================
// Dispatcher
// Routes commands to per-instrument actors and owns their lifecycle
// ============================================================================

use super::actor::{SymbolActor, SymbolHandle};
use super::persistence::with_retry;
use crate::domain::{EngineConfig, Order, OrderBookSnapshot, OrderId, OrderStatus, Side};
use crate::engine::{CancelOutcome, MatchOutcome, MatchingEngine};
use crate::error::{EngineError, EngineResult};
use crate::interfaces::Collaborators;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

struct InstrumentEntry {
    handle: SymbolHandle,
    task: JoinHandle<()>,
}

/// Entry point for order flow.
///
/// The registry only maps symbols to actor handles. Book state lives inside
/// each actor, so instruments never contend with each other.
pub struct Dispatcher {
    config: EngineConfig,
    collaborators: Collaborators,
    registry: RwLock<HashMap<String, InstrumentEntry>>,
    /// One gate per symbol so an instrument is never opened twice. Opening
    /// one instrument never waits on another's recovery.
    opening: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    closed: AtomicBool,
}

impl Dispatcher {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            collaborators,
            registry: RwLock::new(HashMap::new()),
            opening: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Build a dispatcher and eagerly open the configured instruments.
    pub async fn start(config: EngineConfig, collaborators: Collaborators) -> EngineResult<Self> {
        let dispatcher = Self::new(config, collaborators)?;
        for instrument in dispatcher.config.instruments.clone() {
            dispatcher.open_instrument(&instrument).await?;
        }
        info!(
            instruments = dispatcher.config.instruments.len(),
            "dispatcher started"
        );
        Ok(dispatcher)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Handle for `instrument`, recovering its book and starting its actor on
    /// first use.
    pub async fn open_instrument(&self, instrument: &str) -> EngineResult<SymbolHandle> {
        if let Some(handle) = self.lookup(instrument)? {
            return Ok(handle);
        }

        let gate = self.opening_gate(instrument);
        let _opening = gate.lock().await;
        if let Some(handle) = self.lookup(instrument)? {
            return Ok(handle);
        }

        let mut engine = MatchingEngine::with_price_time(instrument)
            .with_retired_capacity(self.config.retired_capacity);
        let mut stored = Vec::new();
        for side in [Side::Buy, Side::Sell] {
            let store = &self.collaborators.orders;
            let open = with_retry(&self.config.retry, instrument, "open order query", move || {
                store.query_open(instrument, side)
            })
            .await?;
            stored.extend(open);
        }
        engine.recover(stored)?;

        let (handle, task) = SymbolActor::spawn(engine, self.collaborators.clone(), &self.config);
        let rejected = {
            let mut registry = self.registry.write();
            if self.closed.load(Ordering::Acquire) {
                Some(task)
            } else {
                registry.insert(
                    instrument.to_string(),
                    InstrumentEntry {
                        handle: handle.clone(),
                        task,
                    },
                );
                None
            }
        };

        // Shutdown won the race while the book was being recovered.
        if let Some(task) = rejected {
            handle.shutdown().await;
            if let Err(e) = task.await {
                error!(instrument, error = %e, "instrument actor failed");
            }
            return Err(EngineError::InstrumentUnavailable {
                instrument: instrument.to_string(),
            });
        }

        info!(instrument, "instrument opened");
        Ok(handle)
    }

    /// Alias of [`Dispatcher::open_instrument`]
    pub async fn handle(&self, instrument: &str) -> EngineResult<SymbolHandle> {
        self.open_instrument(instrument).await
    }

    pub async fn submit(&self, order: Order) -> EngineResult<MatchOutcome> {
        order.validate()?;
        let handle = self.open_instrument(&order.instrument).await?;
        handle.submit(order).await
    }

    pub async fn cancel(&self, instrument: &str, order_id: OrderId) -> EngineResult<CancelOutcome> {
        self.open_instrument(instrument).await?.cancel(order_id).await
    }

    /// Snapshot at the configured default depth
    pub async fn snapshot(&self, instrument: &str) -> EngineResult<OrderBookSnapshot> {
        self.open_instrument(instrument)
            .await?
            .snapshot(self.config.snapshot_depth)
            .await
    }

    pub async fn order_status(
        &self,
        instrument: &str,
        order_id: OrderId,
    ) -> EngineResult<Option<OrderStatus>> {
        self.open_instrument(instrument)
            .await?
            .order_status(order_id)
            .await
    }

    /// Run the expiry sweep on every open instrument. Halted instruments are
    /// skipped.
    pub async fn expire_due(&self, now: DateTime<Utc>) -> EngineResult<Vec<CancelOutcome>> {
        let mut expired = Vec::new();
        for handle in self.handles() {
            match handle.expire_due(now).await {
                Ok(cancelled) => expired.extend(cancelled),
                Err(e @ EngineError::InstrumentHalted { .. }) => {
                    warn!(instrument = %handle.instrument(), error = %e, "skipping expiry sweep");
                },
                Err(e) => return Err(e),
            }
        }
        Ok(expired)
    }

    /// Wait for every open instrument's pending writes.
    pub async fn flush(&self) -> EngineResult<()> {
        for handle in self.handles() {
            handle.flush().await?;
        }
        Ok(())
    }

    /// Open instruments, sorted
    pub fn instruments(&self) -> Vec<String> {
        let mut instruments: Vec<String> = self.registry.read().keys().cloned().collect();
        instruments.sort();
        instruments
    }

    /// Stop every actor after it has worked off its mailbox and drained its
    /// persistence worker. Later commands fail with `InstrumentUnavailable`.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);

        let entries: Vec<(String, InstrumentEntry)> = self.registry.write().drain().collect();
        for (_, entry) in &entries {
            entry.handle.shutdown().await;
        }
        for (instrument, entry) in entries {
            if let Err(e) = entry.task.await {
                error!(instrument = %instrument, error = %e, "instrument actor failed");
            }
        }

        info!("dispatcher stopped");
    }

    fn lookup(&self, instrument: &str) -> EngineResult<Option<SymbolHandle>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::InstrumentUnavailable {
                instrument: instrument.to_string(),
            });
        }
        Ok(self
            .registry
            .read()
            .get(instrument)
            .map(|entry| entry.handle.clone()))
    }

    fn opening_gate(&self, instrument: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.opening
            .lock()
            .entry(instrument.to_string())
            .or_default()
            .clone()
    }

    fn handles(&self) -> Vec<SymbolHandle> {
        self.registry
            .read()
            .values()
            .map(|entry| entry.handle.clone())
            .collect()
    }
}
