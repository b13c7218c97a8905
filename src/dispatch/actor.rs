// ============================================================================
// Instrument Actor
// One task per instrument owning its matching engine
// ============================================================================

use super::persistence::{PersistBatch, PersistMessage, PersistSender, PersistenceWorker};
use crate::domain::{EngineConfig, Order, OrderBookSnapshot, OrderId, OrderStatus};
use crate::engine::{CancelOutcome, MatchOutcome, MatchingEngine};
use crate::error::{EngineError, EngineResult};
use crate::interfaces::Collaborators;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

type Reply<T> = oneshot::Sender<EngineResult<T>>;

pub(crate) enum Command {
    Submit {
        order: Order,
        reply: Reply<MatchOutcome>,
    },
    Cancel {
        order_id: OrderId,
        reply: Reply<CancelOutcome>,
    },
    ExpireDue {
        now: DateTime<Utc>,
        reply: Reply<Vec<CancelOutcome>>,
    },
    Snapshot {
        depth: usize,
        reply: Reply<OrderBookSnapshot>,
    },
    Status {
        order_id: OrderId,
        reply: Reply<Option<OrderStatus>>,
    },
    Flush {
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Owns the engine for one instrument and applies its commands in mailbox
/// order. Engine output is handed to the persistence worker without waiting.
pub(crate) struct SymbolActor {
    engine: MatchingEngine,
    persistence: PersistSender,
    persist_task: JoinHandle<()>,
    /// Set by the first invariant violation; the engine is not touched again
    halted: Option<String>,
}

impl SymbolActor {
    pub(crate) fn spawn(
        engine: MatchingEngine,
        collaborators: Collaborators,
        config: &EngineConfig,
    ) -> (SymbolHandle, JoinHandle<()>) {
        let instrument: Arc<str> = Arc::from(engine.instrument());
        let (persistence, persist_task) =
            PersistenceWorker::spawn(instrument.to_string(), collaborators, config.retry.clone());
        let (sender, mailbox) = mpsc::channel(config.mailbox_capacity);

        let actor = Self {
            engine,
            persistence,
            persist_task,
            halted: None,
        };
        let task = tokio::spawn(actor.run(mailbox));

        (SymbolHandle { instrument, sender }, task)
    }

    async fn run(mut self, mut mailbox: mpsc::Receiver<Command>) {
        info!(
            instrument = %self.engine.instrument(),
            resting = self.engine.book().len(),
            "instrument actor started"
        );

        while let Some(command) = mailbox.recv().await {
            if matches!(command, Command::Shutdown) {
                break;
            }
            self.handle(command);
        }

        let Self {
            engine,
            persistence,
            persist_task,
            ..
        } = self;
        drop(persistence);
        if let Err(e) = persist_task.await {
            error!(instrument = %engine.instrument(), error = %e, "persistence worker failed");
        }
        info!(instrument = %engine.instrument(), "instrument actor stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Submit { order, reply } => {
                let result = self.guarded(|engine| engine.submit(order));
                if let Ok(outcome) = &result {
                    self.persist(PersistBatch::from(outcome));
                }
                let _ = reply.send(result);
            },
            Command::Cancel { order_id, reply } => {
                let result = self.guarded(|engine| engine.cancel(order_id));
                if let Ok(outcome) = &result {
                    self.persist(PersistBatch::from(outcome));
                }
                let _ = reply.send(result);
            },
            Command::ExpireDue { now, reply } => {
                let result = self.guarded(|engine| engine.expire_due(now));
                if let Ok(expired) = &result {
                    for outcome in expired {
                        self.persist(PersistBatch::from(outcome));
                    }
                }
                let _ = reply.send(result);
            },
            Command::Snapshot { depth, reply } => {
                let _ = reply.send(self.guarded(|engine| Ok(engine.snapshot(depth))));
            },
            Command::Status { order_id, reply } => {
                let _ = reply.send(self.guarded(|engine| Ok(engine.order_status(&order_id))));
            },
            Command::Flush { reply } => {
                // The worker answers once everything queued so far is written.
                let _ = self.persistence.send(PersistMessage::Flush(reply));
            },
            Command::Shutdown => {},
        }
    }

    fn guarded<T>(
        &mut self,
        op: impl FnOnce(&mut MatchingEngine) -> EngineResult<T>,
    ) -> EngineResult<T> {
        if let Some(reason) = &self.halted {
            return Err(EngineError::InstrumentHalted {
                instrument: self.engine.instrument().to_string(),
                reason: reason.clone(),
            });
        }

        let result = op(&mut self.engine);
        match &result {
            Err(e) if e.is_fatal() => {
                error!(instrument = %self.engine.instrument(), error = %e, "halting instrument");
                self.halted = Some(e.to_string());
            },
            Err(e) => debug!(instrument = %self.engine.instrument(), error = %e, "command rejected"),
            Ok(_) => {},
        }
        result
    }

    fn persist(&self, batch: PersistBatch) {
        if batch.is_empty() {
            return;
        }
        if self.persistence.send(PersistMessage::Batch(batch)).is_err() {
            error!(instrument = %self.engine.instrument(), "persistence worker gone, batch dropped");
        }
    }
}

/// Cloneable address of a running instrument actor.
#[derive(Clone)]
pub struct SymbolHandle {
    instrument: Arc<str>,
    sender: mpsc::Sender<Command>,
}

impl SymbolHandle {
    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub async fn submit(&self, order: Order) -> EngineResult<MatchOutcome> {
        self.request(|reply| Command::Submit { order, reply }).await
    }

    pub async fn cancel(&self, order_id: OrderId) -> EngineResult<CancelOutcome> {
        self.request(|reply| Command::Cancel { order_id, reply }).await
    }

    pub async fn expire_due(&self, now: DateTime<Utc>) -> EngineResult<Vec<CancelOutcome>> {
        self.request(|reply| Command::ExpireDue { now, reply }).await
    }

    pub async fn snapshot(&self, depth: usize) -> EngineResult<OrderBookSnapshot> {
        self.request(|reply| Command::Snapshot { depth, reply }).await
    }

    pub async fn order_status(&self, order_id: OrderId) -> EngineResult<Option<OrderStatus>> {
        self.request(|reply| Command::Status { order_id, reply }).await
    }

    /// Wait until every batch produced by earlier commands has been written.
    pub async fn flush(&self) -> EngineResult<()> {
        let (reply, done) = oneshot::channel();
        self.sender
            .send(Command::Flush { reply })
            .await
            .map_err(|_| self.unavailable())?;
        done.await.map_err(|_| self.unavailable())
    }

    pub(crate) async fn shutdown(&self) {
        // A closed mailbox means the actor is already gone.
        let _ = self.sender.send(Command::Shutdown).await;
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> EngineResult<T> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(command(reply))
            .await
            .map_err(|_| self.unavailable())?;
        response.await.map_err(|_| self.unavailable())?
    }

    fn unavailable(&self) -> EngineError {
        EngineError::InstrumentUnavailable {
            instrument: self.instrument.to_string(),
        }
    }
}
