//! Bounded work queue shared by the segmenter and the worker pool.
//!
//! Capacity counts units *in flight*: enqueued and not yet acknowledged by a
//! worker. Each item carries a semaphore permit that is released when the
//! worker drops the item, which doubles as the acknowledgement.

use crate::error::{ReplyError, Result};
use crate::pipeline::slots::SlotTicket;
use crate::pipeline::types::SentenceUnit;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore, mpsc};

/// One unit of work for the enrichment pool.
#[derive(Debug)]
pub struct WorkItem {
    pub unit: SentenceUnit,
    pub ticket: SlotTicket,
    permit: OwnedSemaphorePermit,
}

impl WorkItem {
    /// Splits the item. The returned [`Ack`] must be dropped once the unit is handled.
    pub fn into_parts(self) -> (SentenceUnit, SlotTicket, Ack) {
        (
            self.unit,
            self.ticket,
            Ack {
                _permit: self.permit,
            },
        )
    }
}

/// Queue acknowledgement. Dropping it frees one unit of capacity.
#[derive(Debug)]
pub struct Ack {
    _permit: OwnedSemaphorePermit,
}

/// Cloneable handle to one turn's work queue.
///
/// `None` on the channel is the stop sentinel.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    tx: mpsc::Sender<Option<WorkItem>>,
    rx: Arc<Mutex<mpsc::Receiver<Option<WorkItem>>>>,
    in_flight: Arc<Semaphore>,
    capacity: usize,
}

impl WorkQueue {
    /// Creates a queue admitting at most `capacity` unacknowledged units.
    ///
    /// `workers` reserves channel room for the stop sentinels.
    pub fn new(capacity: usize, workers: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity + workers.max(1));
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            in_flight: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Units enqueued but not yet acknowledged.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.in_flight.available_permits()
    }

    /// Enqueues a unit, waiting while the queue is at capacity.
    pub async fn push(&self, unit: SentenceUnit, ticket: SlotTicket) -> Result<()> {
        let permit = self
            .in_flight
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ReplyError::Cancelled)?;
        let item = WorkItem {
            unit,
            ticket,
            permit,
        };
        self.tx
            .send(Some(item))
            .await
            .map_err(|_| ReplyError::TaskFailed {
                task: "worker pool".to_string(),
                message: "work queue closed".to_string(),
            })
    }

    /// Takes the next item. Returns `None` on a stop sentinel.
    pub async fn pop(&self) -> Option<WorkItem> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.flatten()
    }

    /// Waits until every enqueued unit has been acknowledged.
    pub async fn drain(&self) -> Result<()> {
        // Wait for all permits to be released
        let _permits = self
            .in_flight
            .acquire_many(self.capacity as u32)
            .await
            .map_err(|_| ReplyError::Cancelled)?;
        Ok(())
    }

    /// Sends one stop sentinel per worker.
    pub async fn stop(&self, workers: usize) {
        for _ in 0..workers {
            if self.tx.send(None).await.is_err() {
                tracing::debug!("work queue closed before all stop sentinels were sent");
                break;
            }
        }
    }
}
