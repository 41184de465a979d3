//! Active request table.
//!
//! A fixed array indexed by hardware slot. Slot numbers are the only thing
//! the chip ever reports, so every lookup starts here. Each activation gets
//! a fresh generation number so a handle kept by a caller can never reach a
//! later request that reuses the slot.

use u320_api::{HbaError, MgrState, Request, Slot};

/// Number of slots the table can track.
pub const MAX_SLOTS: usize = 256;

/// Caller handle for an active request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestId {
    /// Hardware slot.
    pub slot: Slot,
    generation: u32,
}

#[derive(Clone, Copy)]
struct Entry {
    request: Request,
    generation: u32,
    retried: bool,
}

/// Slot-indexed storage of live requests.
pub struct ActiveTable {
    entries: [Option<Entry>; MAX_SLOTS],
    limit: usize,
    next_generation: u32,
    live: usize,
}

impl ActiveTable {
    /// Creates an empty table accepting slots below `limit`.
    #[must_use]
    pub const fn new(limit: u16) -> Self {
        let limit = if limit as usize > MAX_SLOTS {
            MAX_SLOTS
        } else {
            limit as usize
        };
        Self {
            entries: [const { None }; MAX_SLOTS],
            limit,
            next_generation: 1,
            live: 0,
        }
    }

    /// Takes ownership of `request` in its slot.
    ///
    /// # Errors
    ///
    /// [`HbaError::SlotOutOfRange`] for a slot beyond the limit,
    /// [`HbaError::SlotBusy`] if a live request already occupies it.
    pub fn insert(&mut self, request: Request) -> Result<RequestId, HbaError> {
        let slot = request.slot;
        let index = usize::from(slot);
        if index >= self.limit {
            return Err(HbaError::SlotOutOfRange(slot));
        }
        if self.entries[index].is_some() {
            return Err(HbaError::SlotBusy(slot));
        }
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1).max(1);
        self.entries[index] = Some(Entry {
            request,
            generation,
            retried: false,
        });
        self.live += 1;
        Ok(RequestId { slot, generation })
    }

    /// Removes and returns the request in `slot`.
    pub fn remove(&mut self, slot: Slot) -> Option<Request> {
        let entry = self.entries.get_mut(usize::from(slot))?.take()?;
        self.live -= 1;
        Some(entry.request)
    }

    /// Returns the live request in `slot`.
    #[must_use]
    pub fn get(&self, slot: Slot) -> Option<&Request> {
        self.entries
            .get(usize::from(slot))?
            .as_ref()
            .map(|e| &e.request)
    }

    /// Returns the live request in `slot` mutably.
    pub fn get_mut(&mut self, slot: Slot) -> Option<&mut Request> {
        self.entries
            .get_mut(usize::from(slot))?
            .as_mut()
            .map(|e| &mut e.request)
    }

    /// Returns the live request `id` refers to, if it is still the same one.
    pub fn resolve(&mut self, id: RequestId) -> Option<&mut Request> {
        self.entries
            .get_mut(usize::from(id.slot))?
            .as_mut()
            .filter(|e| e.generation == id.generation)
            .map(|e| &mut e.request)
    }

    /// Returns the handle of the live request in `slot`.
    #[must_use]
    pub fn id_of(&self, slot: Slot) -> Option<RequestId> {
        self.entries
            .get(usize::from(slot))?
            .as_ref()
            .map(|e| RequestId {
                slot,
                generation: e.generation,
            })
    }

    /// Manager state of the request in `slot`.
    #[must_use]
    pub fn state(&self, slot: Slot) -> Option<MgrState> {
        self.get(slot).map(Request::state)
    }

    /// Marks the one permitted retry of `slot` as used; returns `false` if
    /// it was already used or the slot is empty.
    pub fn take_retry(&mut self, slot: Slot) -> bool {
        match self.entries.get_mut(usize::from(slot)) {
            Some(Some(entry)) if !entry.retried => {
                entry.retried = true;
                true
            }
            _ => false,
        }
    }

    /// Number of live requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live
    }

    /// Returns `true` if no request is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Lowest occupied slot at or after `from`.
    #[must_use]
    pub fn next_live(&self, from: usize) -> Option<Slot> {
        (from..self.limit)
            .find(|&i| self.entries[i].is_some())
            .and_then(|i| Slot::try_from(i).ok())
    }

    /// Iterates over occupied slots in ascending order.
    pub fn slots(&self) -> impl Iterator<Item = Slot> + '_ {
        self.entries[..self.limit]
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_some())
            .filter_map(|(i, _)| Slot::try_from(i).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use u320_api::RequestFlags;

    fn req(slot: Slot) -> Request {
        Request::new(slot, 2, 0, RequestFlags::TAGGED)
    }

    #[test]
    fn slot_exclusivity() {
        let mut table = ActiveTable::new(16);
        table.insert(req(3)).unwrap();
        assert_eq!(table.insert(req(3)), Err(HbaError::SlotBusy(3)));
        assert_eq!(table.insert(req(16)), Err(HbaError::SlotOutOfRange(16)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn stale_handles_do_not_resolve() {
        let mut table = ActiveTable::new(8);
        let old = table.insert(req(5)).unwrap();
        assert!(table.remove(5).is_some());
        let new = table.insert(req(5)).unwrap();
        assert_ne!(old, new);
        assert!(table.resolve(old).is_none());
        assert!(table.resolve(new).is_some());
        assert_eq!(table.id_of(5), Some(new));
    }

    #[test]
    fn iteration_and_retry() {
        let mut table = ActiveTable::new(8);
        for slot in [6, 1, 3] {
            table.insert(req(slot)).unwrap();
        }
        assert_eq!(table.slots().collect::<Vec<_>>(), [1, 3, 6]);
        assert_eq!(table.next_live(2), Some(3));
        assert_eq!(table.next_live(7), None);
        assert!(table.take_retry(3));
        assert!(!table.take_retry(3));
        assert!(!table.take_retry(4));
    }

    #[test]
    fn remove_out_of_range_is_none() {
        let mut table = ActiveTable::new(4);
        assert!(table.remove(900).is_none());
        assert!(table.is_empty());
    }
}
