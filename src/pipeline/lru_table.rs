//! Open-addressing hash table with LRU eviction.
//!
//! # Slot search
//!
//! A key starts its search at `key % capacity` and walks forward one slot at a
//! time, wrapping at the end. The walk stops at the slot holding the key, at
//! the first empty slot (which is claimed for the key), or after visiting every
//! slot (the table is full). Entries are never removed individually, so no
//! tombstones are needed.
//!
//! # When full
//!
//! - **Growable** tables grow by a fixed step and re-insert every entry with the
//!   same search rule. If the allocation fails the table falls back to
//!   eviction.
//! - **Fixed** tables evict the entry with the oldest `last_used` stamp, put the
//!   new key in its slot and rehash at the same capacity so every search chain
//!   is valid again.
//!
//! Any rehash moves entries. [`Lookup::rehashed`] tells the caller that slot
//! indices obtained earlier are no longer valid.

/// One occupied slot.
#[derive(Debug, Clone)]
pub struct Slot<V> {
    pub key: u32,
    /// Use stamp; larger is more recent. Never zero.
    pub last_used: u64,
    pub value: V,
}

/// Result of [`LruHashTable::lookup_or_insert_with`].
#[derive(Debug)]
pub struct Lookup<V> {
    /// Slot now holding the key.
    pub index: usize,
    /// The key was not present and a new value was created.
    pub inserted: bool,
    /// Entries moved during this call; previously obtained indices are invalid.
    pub rehashed: bool,
    /// Entry removed to make room, returned for the caller to release.
    pub evicted: Option<(u32, V)>,
}

/// The key is absent and no slot can be made available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableFull {
    pub capacity: usize,
}

enum Search {
    Found(usize),
    Vacant(usize),
    Full,
}

/// Counters describing table activity since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounters {
    pub evictions: u64,
    pub rehashes: u64,
}

/// Fixed-or-growable open-addressing table keyed by `u32`.
#[derive(Debug)]
pub struct LruHashTable<V> {
    slots: Vec<Option<Slot<V>>>,
    occupied: usize,
    /// Next use stamp to hand out.
    use_counter: u64,
    initial_capacity: usize,
    /// Growth step; `None` means fixed capacity with eviction.
    growth: Option<usize>,
    counters: TableCounters,
}

impl<V> LruHashTable<V> {
    #[must_use]
    pub fn new(capacity: usize, growth: Option<usize>) -> Self {
        let mut slots = Vec::new();
        slots.resize_with(capacity, || None);
        Self {
            slots,
            occupied: 0,
            use_counter: 1,
            initial_capacity: capacity,
            growth: growth.filter(|&step| step > 0),
            counters: TableCounters::default(),
        }
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.occupied
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    #[inline]
    #[must_use]
    pub fn is_growable(&self) -> bool {
        self.growth.is_some()
    }

    #[inline]
    #[must_use]
    pub fn counters(&self) -> TableCounters {
        self.counters
    }

    /// Current value of the use counter (the stamp the next touch receives).
    #[inline]
    #[must_use]
    pub fn use_counter(&self) -> u64 {
        self.use_counter
    }

    fn next_use(&mut self) -> u64 {
        let stamp = self.use_counter;
        self.use_counter += 1;
        stamp
    }

    fn search(&self, key: u32) -> Search {
        let capacity = self.slots.len();
        if capacity == 0 {
            return Search::Full;
        }
        let base = key as usize % capacity;
        for step in 0..capacity {
            let index = (base + step) % capacity;
            match &self.slots[index] {
                Some(slot) if slot.key == key => return Search::Found(index),
                Some(_) => {}
                None => return Search::Vacant(index),
            }
        }
        Search::Full
    }

    /// Slot index of `key` without touching its use stamp.
    #[must_use]
    pub fn find(&self, key: u32) -> Option<usize> {
        match self.search(key) {
            Search::Found(index) => Some(index),
            _ => None,
        }
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Slot<V>> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Slot<V>> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    /// Occupied slots with their indices.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Slot<V>)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (i, s)))
    }

    /// Finds `key`, refreshing its use stamp, or claims a slot for it.
    ///
    /// `make` is called at most once, only when the key is inserted.
    pub fn lookup_or_insert_with<F>(&mut self, key: u32, make: F) -> Result<Lookup<V>, TableFull>
    where
        F: FnOnce() -> V,
    {
        let mut make = Some(make);
        let mut inserted = false;
        let mut rehashed = false;
        let mut evicted = None;

        loop {
            match self.search(key) {
                Search::Found(index) => {
                    let stamp = self.next_use();
                    if let Some(slot) = self.slots[index].as_mut() {
                        slot.last_used = stamp;
                    }
                    return Ok(Lookup {
                        index,
                        inserted,
                        rehashed,
                        evicted,
                    });
                }
                Search::Vacant(index) => {
                    let Some(make) = make.take() else {
                        return Err(TableFull {
                            capacity: self.capacity(),
                        });
                    };
                    let last_used = self.next_use();
                    self.slots[index] = Some(Slot {
                        key,
                        last_used,
                        value: make(),
                    });
                    self.occupied += 1;
                    return Ok(Lookup {
                        index,
                        inserted: true,
                        rehashed,
                        evicted,
                    });
                }
                Search::Full => {
                    // Unreachable once the key has been placed by an eviction.
                    if inserted {
                        return Err(TableFull {
                            capacity: self.capacity(),
                        });
                    }

                    if let Some(step) = self.growth {
                        let new_capacity = self.capacity() + step;
                        if self.rehash(new_capacity) {
                            log::debug!("Shader table grown to {new_capacity} slots");
                            rehashed = true;
                            continue;
                        }
                        log::warn!(
                            "Failed to grow shader table to {new_capacity} slots; evicting instead"
                        );
                    }

                    let Some(victim) = self.least_recently_used() else {
                        return Err(TableFull {
                            capacity: self.capacity(),
                        });
                    };
                    let Some(make) = make.take() else {
                        return Err(TableFull {
                            capacity: self.capacity(),
                        });
                    };

                    let last_used = self.next_use();
                    let old = self.slots[victim].replace(Slot {
                        key,
                        last_used,
                        value: make(),
                    });
                    evicted = old.map(|slot| (slot.key, slot.value));
                    self.counters.evictions += 1;
                    inserted = true;

                    let capacity = self.capacity();
                    if !self.rehash(capacity) {
                        // Same-size rehash only fails on allocation; rebuild in place.
                        self.rehash_in_place();
                    }
                    rehashed = true;
                }
            }
        }
    }

    /// Slot with the largest `use_counter - last_used`.
    fn least_recently_used(&self) -> Option<usize> {
        self.iter()
            .max_by_key(|(_, slot)| self.use_counter - slot.last_used)
            .map(|(index, _)| index)
    }

    /// Re-inserts every entry into a fresh array of `capacity` slots.
    ///
    /// Returns `false` (leaving the table untouched) if the allocation fails.
    fn rehash(&mut self, capacity: usize) -> bool {
        debug_assert!(capacity >= self.occupied);

        let mut slots: Vec<Option<Slot<V>>> = Vec::new();
        if slots.try_reserve_exact(capacity).is_err() {
            return false;
        }
        slots.resize_with(capacity, || None);

        let old = std::mem::replace(&mut self.slots, slots);
        for slot in old.into_iter().flatten() {
            self.place(slot);
        }
        self.counters.rehashes += 1;
        true
    }

    fn rehash_in_place(&mut self) {
        let entries: Vec<Slot<V>> = self.slots.iter_mut().filter_map(Option::take).collect();
        for slot in entries {
            self.place(slot);
        }
        self.counters.rehashes += 1;
    }

    fn place(&mut self, slot: Slot<V>) {
        let capacity = self.slots.len();
        let base = slot.key as usize % capacity;
        for step in 0..capacity {
            let index = (base + step) % capacity;
            if self.slots[index].is_none() {
                self.slots[index] = Some(slot);
                return;
            }
        }
        unreachable!("rehash target smaller than entry count");
    }

    /// Removes every entry and returns them.
    ///
    /// Growable tables shrink back to their initial capacity; fixed tables
    /// keep theirs.
    pub fn clear(&mut self) -> Vec<(u32, V)> {
        let capacity = if self.growth.is_some() {
            self.initial_capacity
        } else {
            self.slots.len()
        };
        let old = std::mem::take(&mut self.slots);
        self.slots.resize_with(capacity, || None);
        self.occupied = 0;
        self.use_counter = 1;
        old.into_iter()
            .flatten()
            .map(|slot| (slot.key, slot.value))
            .collect()
    }
}
