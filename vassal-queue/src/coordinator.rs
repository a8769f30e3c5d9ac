//! Per-queue coordinator: composes actors, the visible queue, and receipts

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::QueueConfig;
use crate::message::{MessageActor, MessageInfo, MessageOptions, MessageState, ReceiveOutcome};
use crate::receipts::ReceiptTable;
use crate::store::QueueStore;
use crate::visible::VisibleQueue;
use vassal_core::SqsError;

/// Result of a successful SendMessage.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub message_id: String,
    pub body_md5: String,
}

/// A delivered message plus the receipt handle minted for it.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub info: MessageInfo,
    pub receipt_handle: String,
}

/// ReceiveMessage parameters after boundary validation. Missing wait and
/// visibility fall back to the queue config.
#[derive(Debug, Clone, Default)]
pub struct ReceiveOptions {
    pub max_messages: usize,
    pub wait: Option<Duration>,
    pub visibility_timeout: Option<Duration>,
}

/// Top-level façade for one queue. Owns the visible queue, the receipt
/// table, and the set of live message actors (needed for DeleteQueue
/// teardown).
pub struct QueueCoordinator {
    name: String,
    url: String,
    config: QueueConfig,
    visible: Arc<VisibleQueue>,
    receipts: ReceiptTable,
    messages: Mutex<HashMap<String, Arc<MessageActor>>>,
    store: Weak<QueueStore>,
}

impl QueueCoordinator {
    pub(crate) fn new(
        name: String,
        url: String,
        config: QueueConfig,
        store: Weak<QueueStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            url,
            config,
            visible: Arc::new(VisibleQueue::new()),
            receipts: ReceiptTable::new(),
            messages: Mutex::new(HashMap::new()),
            store,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Messages currently eligible for delivery.
    pub fn visible_count(&self) -> usize {
        self.visible.len()
    }

    /// Create a message actor for `body` and register it. Zero-delay
    /// messages become visible in send order.
    pub fn send_message(
        &self,
        body: String,
        delay_override: Option<Duration>,
    ) -> Result<SendReceipt, SqsError> {
        if body.len() > self.config.max_message_bytes {
            return Err(SqsError::InvalidParameterValue(format!(
                "message body of {} bytes exceeds the maximum of {} bytes",
                body.len(),
                self.config.max_message_bytes
            )));
        }

        let opts = MessageOptions::from_config(&self.config, delay_override);
        let actor = MessageActor::spawn(self.visible.clone(), body, opts);
        let receipt = SendReceipt {
            message_id: actor.message_id().to_string(),
            body_md5: actor.body_md5(),
        };

        self.messages
            .lock()
            .insert(receipt.message_id.clone(), actor);

        info!(queue = %self.name, message_id = %receipt.message_id, "Sent message");
        Ok(receipt)
    }

    /// Long-poll the visible queue, lease each dequeued message, and mint
    /// receipt handles. Keeps polling until the wait elapses when every
    /// dequeued reference turns out to have been deleted in a race. An empty
    /// result is normal when the wait elapses or the queue is torn down.
    pub async fn receive_message(&self, opts: ReceiveOptions) -> Vec<ReceivedMessage> {
        let max = opts.max_messages.clamp(1, 10);
        let wait = opts.wait.unwrap_or(self.config.receive_wait);
        let deadline = tokio::time::Instant::now() + wait;

        let mut delivered = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let refs = self.visible.dequeue(max, remaining).await;
            if refs.is_empty() {
                break;
            }

            for actor in refs {
                match actor.receive(opts.visibility_timeout) {
                    ReceiveOutcome::Delivered(info) => {
                        let receipt_handle = self.receipts.issue(&actor, info.generation);
                        delivered.push(ReceivedMessage {
                            info,
                            receipt_handle,
                        });
                    }
                    ReceiveOutcome::DeadLetter { body, target } => {
                        self.forget(actor.message_id());
                        self.route_dead_letter(body, target);
                    }
                    ReceiveOutcome::Unavailable => {
                        if actor.state() == MessageState::Deleted {
                            self.forget(actor.message_id());
                        }
                    }
                }
            }

            if !delivered.is_empty() || tokio::time::Instant::now() >= deadline {
                break;
            }
        }

        info!(queue = %self.name, count = delivered.len(), "Received messages");
        delivered
    }

    /// Resolve the handle, terminate the actor, and revoke the handle.
    pub fn delete_message(&self, receipt_handle: &str) -> Result<(), SqsError> {
        let actor = self.receipts.resolve(receipt_handle)?;
        actor.delete();
        self.forget(actor.message_id());
        self.receipts.revoke(receipt_handle);

        info!(queue = %self.name, message_id = %actor.message_id(), "Deleted message");
        Ok(())
    }

    /// Reset the message's visibility lease. The handle stays valid.
    pub fn change_visibility(
        &self,
        receipt_handle: &str,
        timeout: Duration,
    ) -> Result<(), SqsError> {
        let actor = self.receipts.resolve(receipt_handle)?;
        if !actor.change_visibility(timeout) {
            // Valid handle but the message is no longer in flight.
            return Err(SqsError::ReceiptHandleIsInvalid(receipt_handle.to_string()));
        }
        Ok(())
    }

    /// Tear down the queue runtime: wake blocked receives with an empty
    /// result, drop all receipt handles, and terminate every owned actor.
    pub(crate) fn shutdown(&self) {
        self.visible.close();
        self.receipts.clear();

        let actors: Vec<Arc<MessageActor>> =
            self.messages.lock().drain().map(|(_, actor)| actor).collect();
        for actor in &actors {
            actor.delete();
        }
    }

    fn forget(&self, message_id: &str) {
        self.messages.lock().remove(message_id);
    }

    /// Deliver a dead-lettered body to the DLQ under a fresh message id. A
    /// missing or misconfigured DLQ drops the message; the origin queue keeps
    /// serving either way.
    fn route_dead_letter(&self, body: String, target: Option<String>) {
        let Some(target) = target else {
            warn!(queue = %self.name, "receive budget exhausted with no dead-letter queue, dropping message");
            return;
        };

        match self.store.upgrade().map(|store| store.queue_handle(&target)) {
            Some(Ok(dlq)) => match dlq.send_message(body, None) {
                Ok(receipt) => {
                    info!(queue = %self.name, dlq = %target, message_id = %receipt.message_id,
                        "Dead-lettered message");
                }
                Err(error) => {
                    warn!(queue = %self.name, dlq = %target, %error, "failed to dead-letter message");
                }
            },
            _ => {
                warn!(queue = %self.name, dlq = %target, "dead-letter queue does not exist, dropping message");
            }
        }
    }
}
