//! Delivery boundary shared by live queries and geofences

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DropReason {
    /// Sink at capacity
    Full,
    /// Consumer went away
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryOutcome {
    Delivered,
    Dropped(DropReason),
}

/// Bounded event sink. `try_enqueue` must never block: the pipeline calls it
/// from inside the exclusive section.
pub trait EventSink<E>: Send + Sync {
    fn try_enqueue(&self, event: E) -> DeliveryOutcome;
}

/// Sink backed by a bounded tokio channel; the receiving task performs the
/// actual network delivery outside the exclusive section.
pub struct ChannelSink<E> {
    tx: mpsc::Sender<E>,
}

impl<E: Send> ChannelSink<E> {
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<E>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl<E: Send> EventSink<E> for ChannelSink<E> {
    fn try_enqueue(&self, event: E) -> DeliveryOutcome {
        match self.tx.try_send(event) {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(TrySendError::Full(_)) => DeliveryOutcome::Dropped(DropReason::Full),
            Err(TrySendError::Closed(_)) => DeliveryOutcome::Dropped(DropReason::Closed),
        }
    }
}

/// Delivered/dropped counts for one fan-out pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryTally {
    pub delivered: u32,
    pub dropped: u32,
}

impl DeliveryTally {
    pub fn record(&mut self, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Delivered => self.delivered += 1,
            DeliveryOutcome::Dropped(_) => self.dropped += 1,
        }
    }
}
