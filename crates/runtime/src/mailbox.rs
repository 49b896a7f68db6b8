//! Per-instance mailboxes and outstanding-work tracking

use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, error, trace};

use crate::actor::ActorCell;
use crate::error::{ActorError, RuntimeError};
use crate::ids::AgentId;
use crate::message::{MessageContext, Payload};

pub(crate) type ReplySender = oneshot::Sender<Result<Payload, RuntimeError>>;

/// One queued handler invocation
pub(crate) struct Delivery {
    pub payload: Payload,
    pub context: MessageContext,
    pub reply: Option<ReplySender>,
    pub epoch: u64,
}

/// Counts queued and in-flight work across the runtime.
///
/// Every envelope and every delivery holds one unit from the moment it is
/// queued until it is handled or dropped. The epoch advances on stop; work
/// stamped with an older epoch is dropped unhandled.
pub(crate) struct WorkTracker {
    epoch: AtomicU64,
    pending: AtomicUsize,
    idle: Notify,
    first_failure: Mutex<Option<RuntimeError>>,
    ignore_unhandled_exceptions: bool,
}

impl WorkTracker {
    pub fn new(ignore_unhandled_exceptions: bool) -> Self {
        Self {
            epoch: AtomicU64::new(0),
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
            first_failure: Mutex::new(None),
            ignore_unhandled_exceptions,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        self.epoch() == epoch
    }

    pub fn advance_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn begin(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    /// Release one unit. Units released after a [`reset`](Self::reset) are
    /// ignored instead of wrapping the counter.
    pub fn finish(&self) {
        match self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        {
            Ok(1) => self.idle.notify_waiters(),
            Ok(_) => {}
            Err(_) => trace!("Work finished after the tracker was reset"),
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Forget all outstanding work
    pub fn reset(&self) {
        self.pending.store(0, Ordering::SeqCst);
        self.idle.notify_waiters();
    }

    pub async fn wait_idle(&self) {
        loop {
            // registered before the check so a concurrent finish() is not missed
            let notified = self.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn record_failure(&self, failure: RuntimeError) {
        if self.ignore_unhandled_exceptions {
            return;
        }
        let mut slot = self.first_failure.lock();
        if slot.is_none() {
            *slot = Some(failure);
        }
    }

    pub fn take_failure(&self) -> Option<RuntimeError> {
        self.first_failure.lock().take()
    }
}

/// Sending half of an instance mailbox
#[derive(Clone)]
pub(crate) struct Mailbox {
    sender: mpsc::UnboundedSender<Delivery>,
}

impl Mailbox {
    /// Spawn the worker draining this mailbox. It exits once every sender is
    /// dropped and the queue is empty.
    pub fn spawn(agent_id: AgentId, cell: Arc<dyn ActorCell>, tracker: Arc<WorkTracker>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run(agent_id, cell, receiver, tracker));
        Self { sender }
    }

    pub fn deliver(&self, delivery: Delivery) -> Result<(), Delivery> {
        self.sender.send(delivery).map_err(|e| e.0)
    }
}

async fn run(
    agent_id: AgentId,
    cell: Arc<dyn ActorCell>,
    mut receiver: mpsc::UnboundedReceiver<Delivery>,
    tracker: Arc<WorkTracker>,
) {
    debug!(agent_id = %agent_id, "Mailbox started");

    while let Some(delivery) = receiver.recv().await {
        if !tracker.is_current(delivery.epoch) {
            // dropping the reply sender abandons a pending send
            trace!(agent_id = %agent_id, "Dropping message queued before stop");
            tracker.finish();
            continue;
        }

        let Delivery {
            payload,
            context,
            reply,
            ..
        } = delivery;
        let message_type = payload.type_name();

        let result = AssertUnwindSafe(cell.handle(payload, &context))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(ActorError::Handler(format!("handler for {} panicked", message_type))));

        match reply {
            Some(reply) => {
                let outcome = result.map_err(|source| RuntimeError::Handler {
                    agent: agent_id.clone(),
                    source,
                });
                if reply.send(outcome).is_err() {
                    trace!(agent_id = %agent_id, "Sender stopped waiting for reply");
                }
            }
            None => {
                if let Err(source) = result {
                    error!(
                        agent_id = %agent_id,
                        message_type = message_type,
                        error = %source,
                        "Unhandled error in published message handler"
                    );
                    tracker.record_failure(RuntimeError::Handler {
                        agent: agent_id.clone(),
                        source,
                    });
                }
            }
        }

        tracker.finish();
    }

    debug!(agent_id = %agent_id, "Mailbox closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_idle_returns_after_last_finish() {
        let tracker = Arc::new(WorkTracker::new(true));
        tracker.begin();
        tracker.begin();

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.wait_idle().await })
        };

        tracker.finish();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        tracker.finish();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_finish_after_reset_does_not_wrap() {
        let tracker = WorkTracker::new(true);
        tracker.begin();
        tracker.begin();
        tracker.reset();

        // workers that were still running report in late
        tracker.finish();
        tracker.finish();
        assert_eq!(tracker.pending(), 0);

        tracker.begin();
        tracker.finish();
        tokio::time::timeout(Duration::from_secs(1), tracker.wait_idle())
            .await
            .expect("tracker should be idle");
    }

    #[test]
    fn test_only_first_failure_is_kept() {
        let tracker = WorkTracker::new(false);
        tracker.record_failure(RuntimeError::Internal("first".into()));
        tracker.record_failure(RuntimeError::Internal("second".into()));
        assert!(matches!(tracker.take_failure(), Some(RuntimeError::Internal(m)) if m == "first"));
        assert!(tracker.take_failure().is_none());
    }

    #[test]
    fn test_failures_ignored_when_configured() {
        let tracker = WorkTracker::new(true);
        tracker.record_failure(RuntimeError::Internal("boom".into()));
        assert!(tracker.take_failure().is_none());
    }

    #[test]
    fn test_epoch_advance_invalidates_old_work() {
        let tracker = WorkTracker::new(true);
        let stamped = tracker.epoch();
        tracker.advance_epoch();
        assert!(!tracker.is_current(stamped));
    }
}
