//! In-memory key index.

use crate::types::{SequenceNumber, SlotId};
use std::collections::HashMap;

/// A key's live location in the backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IndexEntry {
    /// The slot holding the key's current record.
    pub slot: SlotId,
    /// Sequence number of that record.
    pub sequence: SequenceNumber,
}

/// The authoritative in-memory key → slot mapping.
///
/// The index is exclusively owned by the store; its key set always equals
/// the set of keys whose valid record occupies a slot in the file, with
/// each key pointing at the slot holding the highest committed sequence.
#[derive(Debug, Default)]
pub(crate) struct KeyIndex {
    map: HashMap<Vec<u8>, IndexEntry>,
}

impl KeyIndex {
    /// Creates an empty index.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Looks up a key's live location.
    pub(crate) fn get(&self, key: &[u8]) -> Option<IndexEntry> {
        self.map.get(key).copied()
    }

    /// Checks whether a key is present.
    pub(crate) fn contains_key(&self, key: &[u8]) -> bool {
        self.map.contains_key(key)
    }

    /// Points `key` at `slot`, returning the displaced entry if the key
    /// was already present.
    pub(crate) fn insert(
        &mut self,
        key: Vec<u8>,
        slot: SlotId,
        sequence: SequenceNumber,
    ) -> Option<IndexEntry> {
        self.map.insert(key, IndexEntry { slot, sequence })
    }

    /// Observes a valid record found during the rebuild scan.
    ///
    /// Only updates the mapping if this record's sequence is higher than
    /// the one currently indexed for the key. Returns the slot that lost -
    /// either the previously indexed slot or the observed one - so the
    /// caller can reclaim it; `None` for a first sighting.
    pub(crate) fn observe(
        &mut self,
        key: &[u8],
        slot: SlotId,
        sequence: SequenceNumber,
    ) -> Option<SlotId> {
        match self.map.get_mut(key) {
            Some(entry) if sequence > entry.sequence => {
                let superseded = entry.slot;
                entry.slot = slot;
                entry.sequence = sequence;
                Some(superseded)
            }
            Some(_) => Some(slot),
            None => {
                self.map.insert(key.to_vec(), IndexEntry { slot, sequence });
                None
            }
        }
    }

    /// Returns the number of live keys.
    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    /// Iterates over the live keys.
    pub(crate) fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.map.keys().map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get() {
        let mut index = KeyIndex::new();
        assert!(index.get(b"a").is_none());

        index.insert(b"a".to_vec(), SlotId::new(0), SequenceNumber::new(1));

        let entry = index.get(b"a").unwrap();
        assert_eq!(entry.slot, SlotId::new(0));
        assert_eq!(entry.sequence, SequenceNumber::new(1));
    }

    #[test]
    fn insert_returns_displaced_entry() {
        let mut index = KeyIndex::new();
        index.insert(b"a".to_vec(), SlotId::new(0), SequenceNumber::new(1));

        let old = index
            .insert(b"a".to_vec(), SlotId::new(3), SequenceNumber::new(2))
            .unwrap();
        assert_eq!(old.slot, SlotId::new(0));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn observe_first_sighting() {
        let mut index = KeyIndex::new();
        let displaced = index.observe(b"a", SlotId::new(0), SequenceNumber::new(1));
        assert!(displaced.is_none());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn observe_higher_sequence_wins() {
        let mut index = KeyIndex::new();
        index.observe(b"a", SlotId::new(0), SequenceNumber::new(1));

        let displaced = index.observe(b"a", SlotId::new(5), SequenceNumber::new(9));
        assert_eq!(displaced, Some(SlotId::new(0)));
        assert_eq!(index.get(b"a").unwrap().slot, SlotId::new(5));
    }

    #[test]
    fn observe_lower_sequence_loses() {
        let mut index = KeyIndex::new();
        index.observe(b"a", SlotId::new(5), SequenceNumber::new(9));

        let displaced = index.observe(b"a", SlotId::new(0), SequenceNumber::new(1));
        assert_eq!(displaced, Some(SlotId::new(0)));
        assert_eq!(index.get(b"a").unwrap().slot, SlotId::new(5));
    }

    #[test]
    fn keys_enumerates_live_keys() {
        let mut index = KeyIndex::new();
        index.insert(b"a".to_vec(), SlotId::new(0), SequenceNumber::new(1));
        index.insert(b"b".to_vec(), SlotId::new(1), SequenceNumber::new(2));

        let mut keys: Vec<&[u8]> = index.keys().collect();
        keys.sort();
        assert_eq!(keys, vec![b"a".as_slice(), b"b".as_slice()]);
    }
}
