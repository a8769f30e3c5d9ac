//! Per-queue FIFO of visible message references with long-poll dequeue

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::message::MessageActor;

/// FIFO of message actors that are currently visible (eligible for delivery).
///
/// `enqueue` never blocks; `dequeue` long-polls up to its wait. Each enqueued
/// reference is handed to exactly one receiver. Closing the queue (on
/// DeleteQueue) wakes every blocked receiver with an empty result.
pub struct VisibleQueue {
    inner: Mutex<VecDeque<Arc<MessageActor>>>,
    notify: Notify,
    closed: AtomicBool,
}

impl Default for VisibleQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl VisibleQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Append a message reference to the tail and wake one waiting receiver.
    pub fn enqueue(&self, actor: Arc<MessageActor>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.inner.lock().push_back(actor);
        self.notify.notify_one();
    }

    /// Take up to `max` references from the head, blocking up to `wait` while
    /// the queue is empty. Returns as soon as anything is enqueued, taking as
    /// many as are present at that moment.
    pub async fn dequeue(&self, max: usize, wait: Duration) -> Vec<Arc<MessageActor>> {
        let deadline = Instant::now() + wait;

        loop {
            // Register for wakeup BEFORE checking the queue, otherwise an
            // enqueue or close that lands between the check and the wait is
            // lost.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.closed.load(Ordering::Acquire) {
                return Vec::new();
            }

            {
                let mut queue = self.inner.lock();
                if !queue.is_empty() {
                    let count = max.min(queue.len());
                    return queue.drain(..count).collect();
                }
            }

            if Instant::now() >= deadline {
                return Vec::new();
            }

            tokio::select! {
                () = &mut notified => {}
                () = tokio::time::sleep_until(deadline) => return Vec::new(),
            }
        }
    }

    /// Drop a specific message from the queue, if present. Used when a
    /// visible message is deleted or expires before anyone receives it.
    pub fn remove(&self, message_id: &str) {
        self.inner.lock().retain(|actor| actor.message_id() != message_id);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Discard all references and wake every blocked receiver. Subsequent
    /// enqueues and dequeues are no-ops returning empty.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.inner.lock().clear();
        self.notify.notify_waiters();
    }
}
