//! Work queue boundary: at-least-once delivery with visibility timeouts.
//!
//! A dequeue leases the message for the visibility timeout; the message is
//! invisible to other consumers until the lease expires or the holder
//! deletes it with the receipt issued at dequeue time. An undeleted message
//! reappears after the timeout. That reappearance is the crash-recovery
//! mechanism, and the only cross-instance guard against double-processing.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

/// A dequeued message with the receipt that scopes its deletion.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    /// Queue-assigned message id.
    pub id: u64,
    /// Message body (for archive jobs: the job id as a quoted string).
    pub body: String,
    /// Receipt issued at dequeue time; required to delete.
    pub receipt: String,
    /// How many times this message has been dequeued (1 on first delivery).
    pub dequeue_count: u32,
}

/// Queue operations.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Append a message to the queue. Returns its id.
    async fn enqueue(&self, body: &str) -> StoreResult<u64>;

    /// Lease the next visible message for `visibility`, or `None` if the
    /// queue has no visible message.
    async fn dequeue(&self, visibility: Duration) -> StoreResult<Option<QueueMessage>>;

    /// Acknowledge a message, removing it permanently. Fails with
    /// [`StoreError::StaleReceipt`] if the lease has since passed to
    /// another consumer.
    async fn delete(&self, message: &QueueMessage) -> StoreResult<()>;
}

struct Slot {
    id: u64,
    body: String,
    visible_at: Instant,
    receipt: Option<String>,
    dequeue_count: u32,
}

/// Statistics for the in-memory queue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    /// Messages enqueued.
    pub enqueued: u64,
    /// Successful dequeues (leases granted).
    pub dequeued: u64,
    /// Messages deleted (acknowledged).
    pub deleted: u64,
    /// Leases granted beyond a message's first delivery.
    pub redeliveries: u64,
}

/// In-memory queue for tests and local mode.
pub struct MemoryQueue {
    slots: Mutex<Vec<Slot>>,
    next_id: Mutex<u64>,
    stats: Mutex<QueueStats>,
}

impl MemoryQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            next_id: Mutex::new(1),
            stats: Mutex::new(QueueStats::default()),
        }
    }

    /// Number of messages currently in the queue (visible or leased).
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    /// Returns true if the queue holds no messages at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of operation statistics.
    pub fn stats(&self) -> QueueStats {
        self.stats.lock().unwrap().clone()
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn enqueue(&self, body: &str) -> StoreResult<u64> {
        let id = {
            let mut next = self.next_id.lock().unwrap();
            let id = *next;
            *next += 1;
            id
        };

        self.slots.lock().unwrap().push(Slot {
            id,
            body: body.to_string(),
            visible_at: Instant::now(),
            receipt: None,
            dequeue_count: 0,
        });
        self.stats.lock().unwrap().enqueued += 1;

        debug!(id, "enqueued message");
        Ok(id)
    }

    async fn dequeue(&self, visibility: Duration) -> StoreResult<Option<QueueMessage>> {
        let now = Instant::now();
        let mut slots = self.slots.lock().unwrap();

        let slot = match slots.iter_mut().find(|s| s.visible_at <= now) {
            Some(slot) => slot,
            None => return Ok(None),
        };

        let receipt = Uuid::new_v4().to_string();
        slot.visible_at = now + visibility;
        slot.receipt = Some(receipt.clone());
        slot.dequeue_count += 1;

        let message = QueueMessage {
            id: slot.id,
            body: slot.body.clone(),
            receipt,
            dequeue_count: slot.dequeue_count,
        };
        let redelivery = slot.dequeue_count > 1;
        drop(slots);

        let mut stats = self.stats.lock().unwrap();
        stats.dequeued += 1;
        if redelivery {
            stats.redeliveries += 1;
        }

        debug!(
            id = message.id,
            dequeue_count = message.dequeue_count,
            "dequeued message"
        );
        Ok(Some(message))
    }

    async fn delete(&self, message: &QueueMessage) -> StoreResult<()> {
        let mut slots = self.slots.lock().unwrap();
        let index = slots.iter().position(|s| s.id == message.id);

        let index = match index {
            Some(i) => i,
            // Already deleted: another consumer finished it. Report stale.
            None => return Err(StoreError::StaleReceipt {
                message_id: message.id,
            }),
        };

        if slots[index].receipt.as_deref() != Some(message.receipt.as_str()) {
            return Err(StoreError::StaleReceipt {
                message_id: message.id,
            });
        }

        slots.remove(index);
        drop(slots);

        self.stats.lock().unwrap().deleted += 1;
        debug!(id = message.id, "deleted message");
        Ok(())
    }
}
