// ============================================================================
// Persistence Worker
// Writes engine output to the collaborators off the matching path
// ============================================================================

use crate::domain::{Order, RetryPolicy, StateChange, Trade};
use crate::engine::{CancelOutcome, MatchOutcome};
use crate::error::{EngineError, EngineResult, StoreError};
use crate::interfaces::Collaborators;
use std::future::Future;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Writes produced by one engine command, in emission order.
#[derive(Debug, Clone, Default)]
pub struct PersistBatch {
    pub trades: Vec<Trade>,
    pub state_changes: Vec<StateChange>,
    pub orders: Vec<Order>,
}

impl PersistBatch {
    pub fn is_empty(&self) -> bool {
        self.trades.is_empty() && self.state_changes.is_empty() && self.orders.is_empty()
    }
}

impl From<&MatchOutcome> for PersistBatch {
    fn from(outcome: &MatchOutcome) -> Self {
        Self {
            trades: outcome.trades.clone(),
            state_changes: outcome.state_changes.to_vec(),
            orders: outcome.updated_orders().cloned().collect(),
        }
    }
}

impl From<&CancelOutcome> for PersistBatch {
    fn from(outcome: &CancelOutcome) -> Self {
        Self {
            trades: Vec::new(),
            state_changes: vec![outcome.state_change.clone()],
            orders: vec![outcome.order.clone()],
        }
    }
}

pub(crate) enum PersistMessage {
    Batch(PersistBatch),
    /// Answered once every batch queued before it has been written
    Flush(oneshot::Sender<()>),
}

/// Sending half held by the instrument actor.
pub(crate) type PersistSender = mpsc::UnboundedSender<PersistMessage>;

/// Per-instrument background writer.
///
/// Batches are written strictly in the order the actor queued them, so the
/// stores observe each order's transitions in engine order.
pub(crate) struct PersistenceWorker {
    instrument: String,
    collaborators: Collaborators,
    retry: RetryPolicy,
}

impl PersistenceWorker {
    pub(crate) fn spawn(
        instrument: String,
        collaborators: Collaborators,
        retry: RetryPolicy,
    ) -> (PersistSender, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = Self {
            instrument,
            collaborators,
            retry,
        };
        (sender, tokio::spawn(worker.run(receiver)))
    }

    /// Runs until every sender is dropped and the queue is drained.
    async fn run(self, mut receiver: mpsc::UnboundedReceiver<PersistMessage>) {
        while let Some(message) = receiver.recv().await {
            match message {
                PersistMessage::Batch(batch) => self.write(batch).await,
                PersistMessage::Flush(done) => {
                    let _ = done.send(());
                },
            }
        }
        info!(instrument = %self.instrument, "persistence worker drained");
    }

    async fn write(&self, batch: PersistBatch) {
        let PersistBatch {
            trades,
            state_changes,
            orders,
        } = batch;

        for trade in &trades {
            let store = &self.collaborators.trades;
            self.log_failure(
                with_retry(&self.retry, &self.instrument, "trade append", move || {
                    store.append(trade)
                })
                .await,
            );
        }

        for change in &state_changes {
            let store = &self.collaborators.audit;
            self.log_failure(
                with_retry(&self.retry, &self.instrument, "audit append", move || {
                    store.append(change)
                })
                .await,
            );
        }

        for order in &orders {
            let store = &self.collaborators.orders;
            self.log_failure(
                with_retry(&self.retry, &self.instrument, "order upsert", move || {
                    store.upsert(order)
                })
                .await,
            );
        }

        for trade in &trades {
            if let Err(e) = self.collaborators.publisher.publish(trade) {
                warn!(
                    instrument = %self.instrument,
                    trade_id = %trade.id,
                    error = %e,
                    "trade publish failed"
                );
            }
        }

        debug!(
            instrument = %self.instrument,
            trades = trades.len(),
            state_changes = state_changes.len(),
            orders = orders.len(),
            "batch persisted"
        );
    }

    fn log_failure(&self, result: EngineResult<()>) {
        if let Err(e) = result {
            error!(instrument = %self.instrument, error = %e, "dropping write");
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or exhausts the
/// policy's attempts. Only `StoreError::Transient` is retried.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    instrument: &str,
    operation: &'static str,
    mut call: F,
) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.backoff_for(attempt);
                warn!(
                    instrument,
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "store call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            },
            Err(source) => return Err(EngineError::PersistenceFailure { operation, source }),
        }
    }
}
