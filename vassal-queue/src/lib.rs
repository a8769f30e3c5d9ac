//! SQS queue runtime for Vassal
//!
//! Provides the in-memory queue engine with support for:
//! - CreateQueue, DeleteQueue, ListQueues, GetQueueUrl, GetQueueAttributes
//! - SendMessage, ReceiveMessage, DeleteMessage, ChangeMessageVisibility
//! - Delay and visibility timers, long polling, dead-letter routing
//!
//! Each message is owned by a [`message::MessageActor`] whose state machine
//! runs under its own lock, with tokio timer tasks posting expiry events.
//! A per-queue [`coordinator::QueueCoordinator`] composes the actors with the
//! long-pollable [`visible::VisibleQueue`] and the [`receipts::ReceiptTable`].

pub mod config;
pub mod coordinator;
pub mod handlers;
pub mod message;
pub mod receipts;
pub mod store;
pub mod visible;

pub use config::QueueConfig;
pub use coordinator::{QueueCoordinator, ReceiveOptions, ReceivedMessage, SendReceipt};
pub use handlers::handle_request;
pub use store::QueueStore;
