//! Image-to-frame tracking used by the hazard check.
//!
//! Frame slots and presentation images cycle independently. A slot can be
//! free by its own host signal while a different slot is still writing the
//! image the compositor just handed back. The table remembers, per image, the
//! ticket of the frame that last wrote it so the orchestrator can wait on that
//! frame before writing the image again.
//!
//! The table only stores [`FrameTicket`]s. Whether a ticket has retired is a
//! question for the [`FrameRing`](crate::FrameRing), which keeps this type free
//! of device state and testable on its own.

use crate::error::{FrameError, FrameResult};
use crate::ring::FrameTicket;

/// Last writer of each presentation image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InFlightTable {
    entries: Vec<Option<FrameTicket>>,
}

impl InFlightTable {
    /// Creates a table for `image_count` images with every entry empty.
    pub fn new(image_count: usize) -> Self {
        Self {
            entries: vec![None; image_count],
        }
    }

    /// Number of images tracked.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the last writer of `image`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InvalidState`] if `image` is out of range.
    pub fn get(&self, image: u32) -> FrameResult<Option<FrameTicket>> {
        self.entry(image).copied()
    }

    /// Returns the previous writer of `image` if it was a different slot
    /// than `current`.
    ///
    /// A previous borrow of the same slot is never a conflict: the ring waited
    /// on it before handing the slot out again.
    pub fn conflict(&self, image: u32, current: FrameTicket) -> FrameResult<Option<FrameTicket>> {
        Ok(self
            .get(image)?
            .filter(|previous| previous.slot != current.slot))
    }

    /// Records `ticket` as the writer of `image`, returning the entry it replaced.
    pub fn record(&mut self, image: u32, ticket: FrameTicket) -> FrameResult<Option<FrameTicket>> {
        let len = self.entries.len();
        let entry = self
            .entries
            .get_mut(image as usize)
            .ok_or_else(|| out_of_range(image, len))?;
        Ok(entry.replace(ticket))
    }

    /// Clears every entry and resizes the table for a rebuilt image set.
    pub fn reset(&mut self, image_count: usize) {
        self.entries.clear();
        self.entries.resize(image_count, None);
    }

    /// Returns `true` if no image has a recorded writer.
    pub fn is_clear(&self) -> bool {
        self.entries.iter().all(Option::is_none)
    }

    /// Iterates over `(image, last writer)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (u32, Option<FrameTicket>)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i as u32, *entry))
    }

    fn entry(&self, image: u32) -> FrameResult<&Option<FrameTicket>> {
        self.entries
            .get(image as usize)
            .ok_or_else(|| out_of_range(image, self.entries.len()))
    }
}

fn out_of_range(image: u32, len: usize) -> FrameError {
    FrameError::InvalidState(format!(
        "image index {} out of range for {} tracked images",
        image, len
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket(slot: usize, serial: u64) -> FrameTicket {
        FrameTicket { slot, serial }
    }

    #[test]
    fn test_new_table_is_clear() {
        let table = InFlightTable::new(3);
        assert_eq!(table.len(), 3);
        assert!(table.is_clear());
        assert_eq!(table.get(2).unwrap(), None);
    }

    #[test]
    fn test_record_replaces_previous_writer() {
        let mut table = InFlightTable::new(2);
        assert_eq!(table.record(1, ticket(0, 1)).unwrap(), None);
        assert_eq!(table.record(1, ticket(1, 2)).unwrap(), Some(ticket(0, 1)));
        assert_eq!(table.get(1).unwrap(), Some(ticket(1, 2)));
        assert!(!table.is_clear());
    }

    #[test]
    fn test_conflict_only_across_slots() {
        let mut table = InFlightTable::new(2);
        table.record(0, ticket(0, 1)).unwrap();

        // Same slot, later borrow: the ring already waited on it.
        assert_eq!(table.conflict(0, ticket(0, 3)).unwrap(), None);
        // Different slot still pointing at the image.
        assert_eq!(table.conflict(0, ticket(2, 3)).unwrap(), Some(ticket(0, 1)));
        // Never written.
        assert_eq!(table.conflict(1, ticket(2, 3)).unwrap(), None);
    }

    #[test]
    fn test_reset_clears_and_resizes() {
        let mut table = InFlightTable::new(3);
        for i in 0..3 {
            table.record(i, ticket(i as usize % 2, u64::from(i) + 1)).unwrap();
        }

        table.reset(4);
        assert_eq!(table.len(), 4);
        assert!(table.is_clear());
        assert!(table.iter().all(|(_, entry)| entry.is_none()));

        table.reset(2);
        assert_eq!(table.len(), 2);
        assert!(table.get(3).is_err());
    }

    #[test]
    fn test_out_of_range_is_invalid_state() {
        let mut table = InFlightTable::new(1);
        assert!(matches!(table.get(1), Err(FrameError::InvalidState(_))));
        assert!(matches!(
            table.record(5, ticket(0, 1)),
            Err(FrameError::InvalidState(_))
        ));
        assert!(table.conflict(9, ticket(0, 1)).is_err());
    }
}
