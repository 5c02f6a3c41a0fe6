//! Open-addressed hash table
//!
//! The single associative container in the runtime: globals, the string
//! intern table, class method tables, and instance field tables are all this
//! type. Keys are interned-string handles, so key comparison is handle
//! equality. Linear probing with tombstones; capacity is always a power of
//! two; entries rehash at 75% load.
//!
//! Callers supply the key's hash explicitly (it is precomputed on the string
//! object); each entry remembers the hash so rehashing never goes back to
//! the heap.

use crate::heap::ObjRef;
use crate::value::Value;

const MAX_LOAD_NUM: usize = 3;
const MAX_LOAD_DEN: usize = 4;
const INITIAL_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy)]
struct Entry {
    key: Option<ObjRef>,
    hash: u32,
    value: Value,
}

impl Entry {
    const EMPTY: Entry = Entry {
        key: None,
        hash: 0,
        value: Value::Nil,
    };

    /// A tombstone is a vacated slot that keeps probe sequences intact
    fn is_tombstone(&self) -> bool {
        self.key.is_none() && self.value == Value::Bool(true)
    }
}

/// Open-addressed table from interned strings to values
#[derive(Debug, Default)]
pub struct Table {
    entries: Vec<Entry>,
    /// Live entries plus tombstones; tombstones count against load
    count: usize,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `key`; `hash` must be the key string's hash
    pub fn get(&self, key: ObjRef, hash: u32) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        let entry = &self.entries[self.find_slot(key, hash)];
        entry.key.map(|_| entry.value)
    }

    /// Insert or update; returns true when the key was not present before
    pub fn set(&mut self, key: ObjRef, hash: u32, value: Value) -> bool {
        if (self.count + 1) * MAX_LOAD_DEN > self.entries.len() * MAX_LOAD_NUM {
            self.grow();
        }
        let slot = self.find_slot(key, hash);
        let entry = &mut self.entries[slot];
        let is_new = entry.key.is_none();
        // A reused tombstone was already counted against load.
        if is_new && !entry.is_tombstone() {
            self.count += 1;
        }
        *entry = Entry {
            key: Some(key),
            hash,
            value,
        };
        is_new
    }

    /// Remove `key`, leaving a tombstone; returns true if it was present
    pub fn delete(&mut self, key: ObjRef, hash: u32) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let slot = self.find_slot(key, hash);
        let entry = &mut self.entries[slot];
        if entry.key.is_none() {
            return false;
        }
        *entry = Entry {
            key: None,
            hash: 0,
            value: Value::Bool(true),
        };
        true
    }

    /// Iterate live entries as `(key, hash, value)` triples
    pub fn iter(&self) -> impl Iterator<Item = (ObjRef, u32, Value)> + '_ {
        self.entries
            .iter()
            .filter_map(|e| e.key.map(|k| (k, e.hash, e.value)))
    }

    /// Tombstone every live entry whose key fails the predicate
    ///
    /// The intern table uses this to drop strings the collector did not mark.
    pub fn delete_where(&mut self, mut doomed: impl FnMut(ObjRef) -> bool) {
        for entry in &mut self.entries {
            if let Some(key) = entry.key {
                if doomed(key) {
                    *entry = Entry {
                        key: None,
                        hash: 0,
                        value: Value::Bool(true),
                    };
                }
            }
        }
    }

    /// Probe for a key by content hash, using `eq` to compare candidate keys
    ///
    /// This is the interner's lookup: the caller does not yet have a handle,
    /// only the would-be string's hash and bytes. Probing stops at the first
    /// truly-empty slot; tombstones are skipped.
    pub fn find_key_by(&self, hash: u32, mut eq: impl FnMut(ObjRef) -> bool) -> Option<ObjRef> {
        if self.entries.is_empty() {
            return None;
        }
        let mask = self.entries.len() - 1;
        let mut index = hash as usize & mask;
        loop {
            let entry = &self.entries[index];
            match entry.key {
                None => {
                    if !entry.is_tombstone() {
                        return None;
                    }
                }
                Some(key) => {
                    if entry.hash == hash && eq(key) {
                        return Some(key);
                    }
                }
            }
            index = (index + 1) & mask;
        }
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.key.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Backing-array footprint, for collection pacing
    pub fn capacity_bytes(&self) -> usize {
        self.entries.capacity() * std::mem::size_of::<Entry>()
    }

    /// Index of the entry for `key`: the matching slot if present, otherwise
    /// the first tombstone on the probe path, otherwise the empty slot that
    /// terminated the probe
    fn find_slot(&self, key: ObjRef, hash: u32) -> usize {
        let mask = self.entries.len() - 1;
        let mut index = hash as usize & mask;
        let mut tombstone: Option<usize> = None;
        loop {
            let entry = &self.entries[index];
            match entry.key {
                None => {
                    if entry.is_tombstone() {
                        tombstone.get_or_insert(index);
                    } else {
                        return tombstone.unwrap_or(index);
                    }
                }
                Some(k) => {
                    if k == key {
                        return index;
                    }
                }
            }
            index = (index + 1) & mask;
        }
    }

    /// Double capacity and reinsert live entries; tombstones are dropped and
    /// the count recomputed
    fn grow(&mut self) {
        let new_capacity = if self.entries.is_empty() {
            INITIAL_CAPACITY
        } else {
            self.entries.len() * 2
        };
        let old = std::mem::replace(&mut self.entries, vec![Entry::EMPTY; new_capacity]);
        self.count = 0;
        for entry in old {
            if let Some(key) = entry.key {
                let slot = self.find_slot(key, entry.hash);
                self.entries[slot] = entry;
                self.count += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Heap;

    fn key(heap: &mut Heap, s: &str) -> (ObjRef, u32) {
        let r = heap.intern(s);
        let hash = heap.string(r).hash;
        (r, hash)
    }

    #[test]
    fn set_get_and_update() {
        let mut heap = Heap::new();
        let mut table = Table::new();
        let (k, h) = key(&mut heap, "answer");

        assert!(table.set(k, h, Value::Number(41.0)));
        assert!(!table.set(k, h, Value::Number(42.0)));
        assert_eq!(table.get(k, h), Some(Value::Number(42.0)));
    }

    #[test]
    fn missing_key_is_absent() {
        let mut heap = Heap::new();
        let table = Table::new();
        let (k, h) = key(&mut heap, "ghost");
        assert_eq!(table.get(k, h), None);
    }

    #[test]
    fn delete_leaves_probe_path_intact() {
        let mut heap = Heap::new();
        let mut table = Table::new();
        let keys: Vec<(ObjRef, u32)> = (0..32).map(|i| key(&mut heap, &format!("k{i}"))).collect();
        for (i, &(k, h)) in keys.iter().enumerate() {
            table.set(k, h, Value::Number(i as f64));
        }
        let (gone, gone_hash) = keys[7];
        assert!(table.delete(gone, gone_hash));
        assert!(!table.delete(gone, gone_hash));
        assert_eq!(table.get(gone, gone_hash), None);
        // Every other entry survives the tombstone.
        for (i, &(k, h)) in keys.iter().enumerate() {
            if i != 7 {
                assert_eq!(table.get(k, h), Some(Value::Number(i as f64)));
            }
        }
    }

    #[test]
    fn tombstones_are_reused_on_insert() {
        let mut heap = Heap::new();
        let mut table = Table::new();
        let (k, h) = key(&mut heap, "slot");
        table.set(k, h, Value::Nil);
        table.delete(k, h);
        assert!(table.set(k, h, Value::Bool(true)));
        assert_eq!(table.get(k, h), Some(Value::Bool(true)));
    }

    #[test]
    fn grows_past_load_factor() {
        let mut heap = Heap::new();
        let mut table = Table::new();
        let keys: Vec<(ObjRef, u32)> =
            (0..100).map(|i| key(&mut heap, &format!("g{i}"))).collect();
        for (i, &(k, h)) in keys.iter().enumerate() {
            table.set(k, h, Value::Number(i as f64));
        }
        assert_eq!(table.len(), 100);
        for (i, &(k, h)) in keys.iter().enumerate() {
            assert_eq!(table.get(k, h), Some(Value::Number(i as f64)));
        }
    }
}
