//! Per-message actor: state machine, timers, receive accounting

use std::sync::{Arc, Weak};
use std::time::Duration;

use md5::{Digest, Md5};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::visible::VisibleQueue;

/// Message lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    /// Waiting for the send delay to elapse.
    Delayed,
    /// Eligible for delivery, referenced by the visible queue.
    Visible,
    /// Leased to a receiver until the visibility timeout fires.
    InFlight,
    /// Terminated; all further operations are no-ops.
    Deleted,
}

/// Per-message settings, taken from the queue config at send time with the
/// per-send delay override applied.
#[derive(Debug, Clone)]
pub struct MessageOptions {
    pub delay: Duration,
    pub visibility_timeout: Duration,
    pub retention: Duration,
    pub max_receives: Option<u32>,
    pub dead_letter_queue: Option<String>,
}

impl Default for MessageOptions {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default(), None)
    }
}

impl MessageOptions {
    pub fn from_config(config: &QueueConfig, delay_override: Option<Duration>) -> Self {
        Self {
            delay: delay_override.unwrap_or(config.delay),
            visibility_timeout: config.visibility_timeout,
            retention: config.retention,
            max_receives: config.max_receives,
            dead_letter_queue: config.dead_letter_queue.clone(),
        }
    }
}

/// Snapshot of a message's state handed to the coordinator on receive.
#[derive(Debug, Clone)]
pub struct MessageInfo {
    pub message_id: String,
    pub body: String,
    pub body_md5: String,
    /// Seconds since epoch, set at send.
    pub sent_timestamp: i64,
    /// Seconds since epoch, set exactly once on first receive.
    pub first_receive_timestamp: Option<i64>,
    pub receive_count: u32,
    /// Receipt-handle generation; bumped on every successful receive.
    pub generation: u64,
}

/// Outcome of asking an actor to transition to in-flight.
pub enum ReceiveOutcome {
    /// The lease was granted; a visibility timer is running.
    Delivered(MessageInfo),
    /// The receive budget was exhausted; the body must be routed to the
    /// dead-letter queue (when one is configured) and the actor is gone.
    DeadLetter {
        body: String,
        target: Option<String>,
    },
    /// The message was not visible (deleted or raced away).
    Unavailable,
}

struct Inner {
    state: MessageState,
    body: String,
    body_md5: String,
    sent_timestamp: i64,
    first_receive_timestamp: Option<i64>,
    receive_count: u32,
    generation: u64,
    visibility_timeout: Duration,
    max_receives: Option<u32>,
    dead_letter_queue: Option<String>,
    /// Invalidates pending visibility timers that abort() missed.
    timer_epoch: u64,
    delay_timer: Option<JoinHandle<()>>,
    visibility_timer: Option<JoinHandle<()>>,
    retention_timer: Option<JoinHandle<()>>,
}

/// Owns one message. Operations serialize on the inner lock, so within one
/// message they are atomic and totally ordered; timers are tokio tasks that
/// re-enter through the same lock.
pub struct MessageActor {
    message_id: String,
    visible: Arc<VisibleQueue>,
    /// Handed out to timer tasks and the visible queue.
    self_weak: Weak<MessageActor>,
    inner: Mutex<Inner>,
}

impl MessageActor {
    /// Create the actor, arm its delay and retention timers, and (for
    /// zero-delay sends) enqueue it synchronously so visibility order matches
    /// send order.
    pub fn spawn(visible: Arc<VisibleQueue>, body: String, opts: MessageOptions) -> Arc<Self> {
        let body_md5 = hex::encode(Md5::digest(body.as_bytes()));
        let delayed = !opts.delay.is_zero();

        let actor = Arc::new_cyclic(|self_weak| Self {
            message_id: Uuid::new_v4().to_string(),
            visible,
            self_weak: self_weak.clone(),
            inner: Mutex::new(Inner {
                state: if delayed {
                    MessageState::Delayed
                } else {
                    MessageState::Visible
                },
                body,
                body_md5,
                sent_timestamp: now_secs(),
                first_receive_timestamp: None,
                receive_count: 0,
                generation: 0,
                visibility_timeout: opts.visibility_timeout,
                max_receives: opts.max_receives,
                dead_letter_queue: opts.dead_letter_queue,
                timer_epoch: 0,
                delay_timer: None,
                visibility_timer: None,
                retention_timer: None,
            }),
        });

        {
            let mut inner = actor.inner.lock();
            inner.retention_timer =
                Some(actor.spawn_timer(opts.retention, Self::on_retention_expired));
            if delayed {
                inner.delay_timer = Some(actor.spawn_timer(opts.delay, Self::on_delay_expired));
            }
        }

        if !delayed {
            actor.visible.enqueue(actor.clone());
        }

        actor
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Current receipt-handle generation; compared on receipt resolution.
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    pub fn body_md5(&self) -> String {
        self.inner.lock().body_md5.clone()
    }

    pub fn state(&self) -> MessageState {
        self.inner.lock().state
    }

    /// Transition VISIBLE -> IN_FLIGHT and arm the visibility timer, or
    /// consume the message for dead-lettering when its receive budget is
    /// spent. Anything but VISIBLE yields `Unavailable`.
    pub fn receive(&self, visibility_override: Option<Duration>) -> ReceiveOutcome {
        let mut inner = self.inner.lock();
        if inner.state != MessageState::Visible {
            return ReceiveOutcome::Unavailable;
        }

        inner.receive_count += 1;
        if inner.first_receive_timestamp.is_none() {
            inner.first_receive_timestamp = Some(now_secs());
        }

        if let Some(max) = inner.max_receives {
            if inner.receive_count > max {
                inner.state = MessageState::Deleted;
                inner.timer_epoch += 1;
                abort_timers(&mut inner);
                debug!(message_id = %self.message_id, receives = inner.receive_count,
                    "receive budget exhausted, dead-lettering");
                return ReceiveOutcome::DeadLetter {
                    body: std::mem::take(&mut inner.body),
                    target: inner.dead_letter_queue.clone(),
                };
            }
        }

        inner.state = MessageState::InFlight;
        inner.generation += 1;
        inner.timer_epoch += 1;

        let timeout = visibility_override.unwrap_or(inner.visibility_timeout);
        let epoch = inner.timer_epoch;
        if let Some(old) = inner
            .visibility_timer
            .replace(self.spawn_epoch_timer(timeout, epoch, Self::on_visibility_expired))
        {
            old.abort();
        }

        ReceiveOutcome::Delivered(snapshot(&self.message_id, &inner))
    }

    /// Reset the visibility lease to `timeout` from now. Zero re-enqueues the
    /// message immediately. Valid only while IN_FLIGHT.
    pub fn change_visibility(&self, timeout: Duration) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != MessageState::InFlight {
            return false;
        }

        inner.timer_epoch += 1;
        if let Some(timer) = inner.visibility_timer.take() {
            timer.abort();
        }

        if timeout.is_zero() {
            inner.state = MessageState::Visible;
            drop(inner);
            self.enqueue_self();
        } else {
            let epoch = inner.timer_epoch;
            inner.visibility_timer =
                Some(self.spawn_epoch_timer(timeout, epoch, Self::on_visibility_expired));
        }

        true
    }

    /// Terminate the actor. Idempotent; cancels all timers and detaches from
    /// the visible queue if the message was still eligible for delivery.
    pub fn delete(&self) {
        let was_visible = {
            let mut inner = self.inner.lock();
            if inner.state == MessageState::Deleted {
                return;
            }
            let was_visible = inner.state == MessageState::Visible;
            inner.state = MessageState::Deleted;
            inner.timer_epoch += 1;
            abort_timers(&mut inner);
            was_visible
        };

        if was_visible {
            self.visible.remove(&self.message_id);
        }
    }

    fn on_delay_expired(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.state != MessageState::Delayed {
                return;
            }
            inner.state = MessageState::Visible;
        }
        self.enqueue_self();
    }

    fn on_visibility_expired(&self, epoch: u64) {
        {
            let mut inner = self.inner.lock();
            if inner.state != MessageState::InFlight || inner.timer_epoch != epoch {
                return;
            }
            inner.state = MessageState::Visible;
            inner.timer_epoch += 1;
            debug!(message_id = %self.message_id, "visibility timeout expired, re-enqueueing");
        }
        self.enqueue_self();
    }

    fn on_retention_expired(&self) {
        let was_visible = {
            let mut inner = self.inner.lock();
            if inner.state == MessageState::Deleted {
                return;
            }
            let was_visible = inner.state == MessageState::Visible;
            inner.state = MessageState::Deleted;
            inner.timer_epoch += 1;
            abort_timers(&mut inner);
            debug!(message_id = %self.message_id, "retention period elapsed, discarding");
            was_visible
        };

        if was_visible {
            self.visible.remove(&self.message_id);
        }
    }

    fn enqueue_self(&self) {
        if let Some(actor) = self.self_weak.upgrade() {
            self.visible.enqueue(actor);
        }
    }

    fn spawn_timer(&self, after: Duration, on_fire: fn(&MessageActor)) -> JoinHandle<()> {
        let weak = self.self_weak.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(actor) = weak.upgrade() {
                on_fire(&actor);
            }
        })
    }

    fn spawn_epoch_timer(
        &self,
        after: Duration,
        epoch: u64,
        on_fire: fn(&MessageActor, u64),
    ) -> JoinHandle<()> {
        let weak = self.self_weak.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(actor) = weak.upgrade() {
                on_fire(&actor, epoch);
            }
        })
    }
}

fn snapshot(message_id: &str, inner: &Inner) -> MessageInfo {
    MessageInfo {
        message_id: message_id.to_string(),
        body: inner.body.clone(),
        body_md5: inner.body_md5.clone(),
        sent_timestamp: inner.sent_timestamp,
        first_receive_timestamp: inner.first_receive_timestamp,
        receive_count: inner.receive_count,
        generation: inner.generation,
    }
}

fn abort_timers(inner: &mut Inner) {
    for timer in [
        inner.delay_timer.take(),
        inner.visibility_timer.take(),
        inner.retention_timer.take(),
    ]
    .into_iter()
    .flatten()
    {
        timer.abort();
    }
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
