//! Receipt handle table: opaque handles for in-flight messages

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::message::MessageActor;
use vassal_core::SqsError;

struct Receipt {
    actor: Arc<MessageActor>,
    generation: u64,
}

/// Per-queue mapping from receipt handles to in-flight message actors.
///
/// Handles are never reused. Issuing a handle for a message drops the
/// previous one, and resolution re-checks the actor's current generation, so
/// only the handle from the latest receive is ever valid.
#[derive(Default)]
pub struct ReceiptTable {
    handles: DashMap<String, Receipt>,
    /// message_id -> newest handle, for invalidating superseded handles.
    latest: DashMap<String, String>,
}

impl ReceiptTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh handle bound to the actor at its current generation.
    pub fn issue(&self, actor: &Arc<MessageActor>, generation: u64) -> String {
        let handle = Uuid::new_v4().to_string();

        if let Some(previous) = self
            .latest
            .insert(actor.message_id().to_string(), handle.clone())
        {
            self.handles.remove(&previous);
        }
        self.handles.insert(
            handle.clone(),
            Receipt {
                actor: actor.clone(),
                generation,
            },
        );

        handle
    }

    /// Look up the actor behind a handle. Fails when the handle was never
    /// issued, was revoked, or has been superseded by a newer receive.
    pub fn resolve(&self, handle: &str) -> Result<Arc<MessageActor>, SqsError> {
        let receipt = self
            .handles
            .get(handle)
            .ok_or_else(|| SqsError::ReceiptHandleIsInvalid(handle.to_string()))?;

        if receipt.actor.generation() != receipt.generation {
            return Err(SqsError::ReceiptHandleIsInvalid(handle.to_string()));
        }

        Ok(receipt.actor.clone())
    }

    /// Idempotent removal.
    pub fn revoke(&self, handle: &str) {
        if let Some((_, receipt)) = self.handles.remove(handle) {
            self.latest
                .remove_if(receipt.actor.message_id(), |_, latest| latest == handle);
        }
    }

    pub fn clear(&self) {
        self.handles.clear();
        self.latest.clear();
    }
}
