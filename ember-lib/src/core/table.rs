//! An open addressing hash table keyed by interned strings.
//!
//! Keys are compared by identity, so callers pass the key's cached hash along with it.
//! Deleted entries leave a tombstone behind so probe sequences stay intact, and
//! tombstones count towards the load factor until the next resize.

use crate::core::memory::grow_capacity;
use crate::core::ObjRef;

const TABLE_MAX_LOAD: f64 = 0.75;

#[derive(Debug, Clone)]
pub struct Entry<V> {
    pub key: ObjRef,
    pub hash: u32,
    pub value: V,
}

#[derive(Debug, Clone)]
enum Slot<V> {
    Empty,
    Tombstone,
    Occupied(Entry<V>),
}

#[derive(Debug, Clone)]
pub struct Table<V> {
    /// occupied slots plus tombstones
    count: usize,
    slots: Vec<Slot<V>>,
}

impl<V> Default for Table<V> {
    fn default() -> Self {
        Table {
            count: 0,
            slots: Vec::new(),
        }
    }
}

impl<V> Table<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// the number of live entries
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, key: ObjRef, hash: u32) -> Option<&V> {
        if self.slots.is_empty() {
            return None;
        }
        match &self.slots[find_slot(&self.slots, key, hash)] {
            Slot::Occupied(entry) => Some(&entry.value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, key: ObjRef, hash: u32) -> Option<&mut V> {
        if self.slots.is_empty() {
            return None;
        }
        let idx = find_slot(&self.slots, key, hash);
        match &mut self.slots[idx] {
            Slot::Occupied(entry) => Some(&mut entry.value),
            _ => None,
        }
    }

    /// inserts or overwrites, returns true if the key was not present before
    pub fn set(&mut self, key: ObjRef, hash: u32, value: V) -> bool {
        if (self.count + 1) as f64 > self.slots.len() as f64 * TABLE_MAX_LOAD {
            self.adjust_capacity(grow_capacity(self.slots.len()));
        }
        let idx = find_slot(&self.slots, key, hash);
        let slot = &mut self.slots[idx];
        let is_new = !matches!(slot, Slot::Occupied(_));
        if matches!(slot, Slot::Empty) {
            self.count += 1;
        }
        *slot = Slot::Occupied(Entry { key, hash, value });
        is_new
    }

    /// removes the key, returns true if it was present
    pub fn delete(&mut self, key: ObjRef, hash: u32) -> bool {
        if self.slots.is_empty() {
            return false;
        }
        let idx = find_slot(&self.slots, key, hash);
        if let Slot::Occupied(_) = self.slots[idx] {
            self.slots[idx] = Slot::Tombstone;
            true
        } else {
            false
        }
    }

    /// finds a key by its hash and a predicate, used for interning where the
    /// content of the string is known but not its ref
    pub fn find_key(&self, hash: u32, mut pred: impl FnMut(ObjRef) -> bool) -> Option<ObjRef> {
        if self.slots.is_empty() {
            return None;
        }
        let mask = self.slots.len() - 1;
        let mut idx = hash as usize & mask;
        loop {
            match &self.slots[idx] {
                Slot::Empty => return None,
                Slot::Occupied(entry) if entry.hash == hash && pred(entry.key) => {
                    return Some(entry.key)
                }
                _ => {}
            }
            idx = (idx + 1) & mask;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry<V>> {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Occupied(entry) => Some(entry),
            _ => None,
        })
    }

    fn adjust_capacity(&mut self, capacity: usize) {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Slot::Empty);
        let old = std::mem::replace(&mut self.slots, slots);
        self.count = 0;
        for slot in old {
            if let Slot::Occupied(entry) = slot {
                let idx = find_slot(&self.slots, entry.key, entry.hash);
                self.slots[idx] = Slot::Occupied(entry);
                self.count += 1;
            }
        }
    }
}

/// Linear probing. Returns the slot holding the key, or the slot where it should be
/// inserted, which is the first tombstone passed on the way if there was one.
/// `slots` must be non empty with a power of two length, and must contain an empty slot.
fn find_slot<V>(slots: &[Slot<V>], key: ObjRef, hash: u32) -> usize {
    let mask = slots.len() - 1;
    let mut idx = hash as usize & mask;
    let mut tombstone = None;
    loop {
        match &slots[idx] {
            Slot::Empty => return tombstone.unwrap_or(idx),
            Slot::Tombstone => {
                if tombstone.is_none() {
                    tombstone = Some(idx);
                }
            }
            Slot::Occupied(entry) if entry.key == key => return idx,
            Slot::Occupied(_) => {}
        }
        idx = (idx + 1) & mask;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(i: u32) -> ObjRef {
        ObjRef(i)
    }

    #[test]
    fn set_get_delete() {
        let mut table = Table::new();
        assert!(table.set(key(1), 7, "a"));
        assert!(!table.set(key(1), 7, "b"));
        assert_eq!(table.get(key(1), 7), Some(&"b"));
        assert!(table.delete(key(1), 7));
        assert!(!table.delete(key(1), 7));
        assert_eq!(table.get(key(1), 7), None);
        assert!(table.is_empty());
    }

    #[test]
    fn colliding_hashes_probe_past_tombstones() {
        let mut table = Table::new();
        for i in 0..3 {
            table.set(key(i), 5, i);
        }
        table.delete(key(1), 5);
        assert_eq!(table.get(key(2), 5), Some(&2));
        // the tombstone is reused
        assert!(table.set(key(3), 5, 3));
        assert_eq!(table.get(key(3), 5), Some(&3));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn grows_by_doubling_and_keeps_entries() {
        let mut table = Table::new();
        for i in 0..100u32 {
            table.set(key(i), i.wrapping_mul(2654435761), i);
        }
        assert_eq!(table.len(), 100);
        assert!(table.capacity().is_power_of_two());
        assert!(table.len() as f64 <= table.capacity() as f64 * TABLE_MAX_LOAD);
        for i in 0..100u32 {
            assert_eq!(table.get(key(i), i.wrapping_mul(2654435761)), Some(&i));
        }
    }

    #[test]
    fn find_key_uses_the_predicate() {
        let mut table = Table::new();
        table.set(key(4), 9, ());
        table.set(key(5), 9, ());
        assert_eq!(table.find_key(9, |k| k == key(5)), Some(key(5)));
        assert_eq!(table.find_key(9, |_| false), None);
        assert_eq!(table.find_key(10, |_| true), None);
    }
}
