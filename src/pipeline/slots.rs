//! Pending slots: per-index hand-off between workers and the publisher.
//!
//! The segmenter creates a slot for every index before the unit is queued and
//! passes the [`SlotTicket`] along with the unit. Whichever worker finishes the
//! unit fulfils the ticket; dropping the ticket unfulfilled marks the index as
//! a gap. The publisher takes each slot out of the table exactly once.

use crate::pipeline::types::ReplyUnit;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Notify, oneshot};

/// Writer half of a pending slot, owned by the worker handling the index.
#[derive(Debug)]
pub struct SlotTicket {
    sequence_index: u64,
    sender: oneshot::Sender<ReplyUnit>,
}

impl SlotTicket {
    pub fn sequence_index(&self) -> u64 {
        self.sequence_index
    }

    /// Stores the finished unit and wakes the publisher.
    pub fn fulfil(self, unit: ReplyUnit) {
        if self.sender.send(unit).is_err() {
            tracing::debug!(index = self.sequence_index, "slot reader gone, result dropped");
        }
    }
}

/// Reader half of a pending slot, taken by the publisher.
#[derive(Debug)]
pub struct PendingSlot {
    pub sequence_index: u64,
    pub is_final: bool,
    ready: oneshot::Receiver<ReplyUnit>,
}

impl PendingSlot {
    /// Waits for the worker. `None` means the index produced nothing.
    pub async fn ready(self) -> Option<ReplyUnit> {
        self.ready.await.ok()
    }
}

/// Index → pending slot table for one turn.
#[derive(Debug, Default)]
pub struct SlotTable {
    slots: Mutex<HashMap<u64, PendingSlot>>,
    created: Notify,
    issued: AtomicU64,
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the slot for `sequence_index` and returns its writer half.
    pub fn create(&self, sequence_index: u64, is_final: bool) -> SlotTicket {
        let (sender, ready) = oneshot::channel();
        let slot = PendingSlot {
            sequence_index,
            is_final,
            ready,
        };
        {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.insert(sequence_index, slot);
        }
        self.issued.fetch_add(1, Ordering::SeqCst);
        self.created.notify_one();
        SlotTicket {
            sequence_index,
            sender,
        }
    }

    /// Waits until the slot for `sequence_index` exists, then removes it from the table.
    pub async fn take(&self, sequence_index: u64) -> PendingSlot {
        loop {
            // notify_one stores a permit when nobody waits, so a slot created
            // between the check and the await still wakes us.
            if let Some(slot) = self.remove(sequence_index) {
                return slot;
            }
            self.created.notified().await;
        }
    }

    fn remove(&self, sequence_index: u64) -> Option<PendingSlot> {
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&sequence_index)
    }

    /// Number of slots created so far this turn.
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }

    /// Slots created but not yet taken by the publisher.
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
