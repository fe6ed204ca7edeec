//! Rate-change queue: historical rate segments awaiting settlement.
//!
//! Each entry says "`rate` applied up to and including `until_epoch`".
//! Entries are appended in chronological order and consumed from the front
//! by the settlement walk. They are never reordered.

use std::collections::VecDeque;

use payrail_types::{Epoch, PayrailError, RateChange, Result, TokenAmount};
use serde::{Deserialize, Serialize};

/// FIFO of [`RateChange`] records attached to one rail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateChangeQueue {
    entries: VecDeque<RateChange>,
}

impl RateChangeQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a segment that ended at `until_epoch`.
    ///
    /// # Errors
    /// Returns `InvariantViolation` if `until_epoch` precedes the tail.
    pub fn push(&mut self, rate: TokenAmount, until_epoch: Epoch) -> Result<()> {
        if let Some(tail) = self.entries.back() {
            if until_epoch < tail.until_epoch {
                return Err(PayrailError::InvariantViolation {
                    reason: format!(
                        "rate change until {until_epoch} precedes queue tail {}",
                        tail.until_epoch
                    ),
                });
            }
        }
        self.entries.push_back(RateChange { rate, until_epoch });
        Ok(())
    }

    /// Most recently pushed segment.
    #[must_use]
    pub fn tail(&self) -> Option<&RateChange> {
        self.entries.back()
    }

    /// Entry at `index` from the front.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&RateChange> {
        self.entries.get(index)
    }

    /// Drop the first `count` entries.
    pub fn pop_n(&mut self, count: usize) {
        let count = count.min(self.entries.len());
        self.entries.drain(..count);
    }

    /// Whether the tail already closes at `epoch`. Several rate changes in
    /// the same epoch share one entry.
    #[must_use]
    pub fn ends_at(&self, epoch: Epoch) -> bool {
        self.tail().is_some_and(|tail| tail.until_epoch == epoch)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of the queue, front first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<RateChange> {
        self.entries.iter().copied().collect()
    }
}
