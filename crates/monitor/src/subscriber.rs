#![forbid(unsafe_code)]

use crate::domain::EventBatch;
use tracing::debug;

/// Consumer of persisted event batches. Called once per cycle that produced
/// events, on the loop's task, so implementations must not block.
pub trait EventSubscriber: Send + Sync {
    fn on_events(&self, batch: &EventBatch);
}

/// Forwards batches into a channel, for consumers on other threads.
#[derive(Debug, Clone)]
pub struct ChannelSubscriber {
    tx: flume::Sender<EventBatch>,
}

impl ChannelSubscriber {
    pub fn new(tx: flume::Sender<EventBatch>) -> Self {
        Self { tx }
    }

    /// Subscriber plus the receiving end of an unbounded channel.
    pub fn unbounded() -> (Self, flume::Receiver<EventBatch>) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, rx)
    }
}

impl EventSubscriber for ChannelSubscriber {
    fn on_events(&self, batch: &EventBatch) {
        if let Err(err) = self.tx.try_send(batch.clone()) {
            debug!(cycle = batch.cycle_id, %err, "subscriber channel rejected batch");
        }
    }
}

/// Adapts a closure.
pub struct FnSubscriber<F>(pub F);

impl<F> EventSubscriber for FnSubscriber<F>
where
    F: Fn(&EventBatch) + Send + Sync,
{
    fn on_events(&self, batch: &EventBatch) {
        (self.0)(batch)
    }
}
