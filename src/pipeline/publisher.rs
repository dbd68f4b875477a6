//! Ordered publisher station.
//!
//! Releases results strictly by index, whatever order the workers finish in.

use crate::error::{ReplyError, Result};
use crate::pipeline::slots::SlotTable;
use crate::pipeline::types::Publication;
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct Publisher {
    slots: Arc<SlotTable>,
    output: mpsc::Sender<Publication>,
    next_index: u64,
}

impl Publisher {
    pub fn new(slots: Arc<SlotTable>, output: mpsc::Sender<Publication>) -> Self {
        Self {
            slots,
            output,
            next_index: 0,
        }
    }

    /// Runs the publisher station until the final index has been released.
    ///
    /// Waits for each index's slot to exist, then for its worker. A slot whose
    /// worker produced nothing is forwarded as a gap and the cursor moves on.
    pub async fn run(mut self) -> Result<()> {
        loop {
            let slot = self.slots.take(self.next_index).await;
            let index = slot.sequence_index;
            let is_final = slot.is_final;

            let publication = match slot.ready().await {
                Some(unit) => Publication::Unit(unit),
                None => {
                    tracing::debug!(index, is_final, "nothing to publish for index");
                    Publication::Gap {
                        sequence_index: index,
                        is_final,
                    }
                }
            };

            if self.output.send(publication).await.is_err() {
                return Err(ReplyError::Cancelled);
            }
            tracing::debug!(index, "published");

            if is_final {
                return Ok(());
            }
            self.next_index += 1;
        }
    }
}
