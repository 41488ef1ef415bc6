//! Process-wide event bus
//!
//! Committed events fan out to whoever is interested over a tokio
//! broadcast channel. Publishing never blocks and never fails the append:
//! with no subscribers the event is simply dropped, and a lagging
//! subscriber loses the oldest events rather than stalling the writer.

use crate::store::EventEnvelope;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Fire-and-forget publish
    pub fn publish(&self, envelope: EventEnvelope) {
        let _ = self.tx.send(envelope);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Observability subscriber: logs every committed event until cancelled
pub fn spawn_event_logger(bus: &EventBus, token: CancellationToken) -> JoinHandle<()> {
    let mut subscription = bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                received = subscription.recv() => match received {
                    Ok(envelope) => info!(
                        event_type = %envelope.event_type,
                        aggregate_id = %envelope.aggregate_id,
                        version = envelope.version,
                        "event committed"
                    ),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event logger lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    })
}
