//! Direct-mapped address cache
//!
//! Each worker keeps private caches in front of the external resolver, one
//! per direction and address role. A lookup hashes the key to a single slot
//! and compares; a store overwrites whatever lived there. No eviction
//! bookkeeping, no sharing, no locks.

/// Fixed-capacity direct-mapped cache for `K`-byte keys and `V`-byte values.
///
/// Capacity 0 disables the cache: every lookup misses and stores are
/// ignored.
pub struct AddressCache<const K: usize, const V: usize> {
    slots: Vec<Slot<K, V>>,
}

#[derive(Clone, Copy)]
struct Slot<const K: usize, const V: usize> {
    key: [u8; K],
    value: [u8; V],
    occupied: bool,
}

impl<const K: usize, const V: usize> AddressCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![
                Slot {
                    key: [0; K],
                    value: [0; V],
                    occupied: false,
                };
                capacity
            ],
        }
    }

    /// FNV-1a over the key, reduced modulo capacity.
    fn slot_index(&self, key: &[u8; K]) -> usize {
        const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

        let mut hash = FNV_OFFSET;
        for &byte in key {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        (hash % self.slots.len() as u64) as usize
    }

    pub fn lookup(&self, key: &[u8; K]) -> Option<[u8; V]> {
        if self.slots.is_empty() {
            return None;
        }
        let slot = &self.slots[self.slot_index(key)];
        if slot.occupied && slot.key == *key {
            Some(slot.value)
        } else {
            None
        }
    }

    pub fn store(&mut self, key: &[u8; K], value: &[u8; V]) {
        if self.slots.is_empty() {
            return;
        }
        let index = self.slot_index(key);
        self.slots[index] = Slot {
            key: *key,
            value: *value,
            occupied: true,
        };
    }
}
