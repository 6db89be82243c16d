use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    VerifyingExistingTracks,
    ScanningForNewTracks,
    Idle,
}

/// Counts for one reconciliation pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Live records whose file was checked.
    pub verified: u32,
    /// Records whose fingerprint changed.
    pub updated: u32,
    pub tombstoned: u32,
    pub added: u32,
    pub exhumed: u32,
    /// Files and records passed over because of an error.
    pub skipped: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    Completed(ScanSummary),
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexEvent {
    UpdateStarted,
    UpdateProgress {
        stage: Stage,
        /// Items handled so far in this pass, across stages.
        processed: u64,
        skipped: u64,
    },
    UpdateFinished(UpdateOutcome),
}

/// Fans index events out to every live subscriber. Subscribers that have
/// dropped their receiver are forgotten on the next emit.
#[derive(Clone, Default)]
pub struct EventHub {
    subscribers: Arc<Mutex<Vec<UnboundedSender<IndexEvent>>>>,
}

impl EventHub {
    pub fn subscribe(&self) -> UnboundedReceiver<IndexEvent> {
        let (tx, rx) = unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn emit(&self, event: IndexEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_sees_each_event() {
        let hub = EventHub::default();
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();
        hub.emit(IndexEvent::UpdateStarted);

        assert_eq!(first.try_recv().unwrap(), IndexEvent::UpdateStarted);
        assert_eq!(second.try_recv().unwrap(), IndexEvent::UpdateStarted);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let hub = EventHub::default();
        let kept = hub.subscribe();
        drop(hub.subscribe());
        hub.emit(IndexEvent::UpdateStarted);
        assert_eq!(hub.subscriber_count(), 1);
        drop(kept);
    }
}
