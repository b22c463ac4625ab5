//! LRU Hash Table Tests
//!
//! Tests for:
//! - Eviction order on a fixed 3-slot table for every insertion order
//! - Growth keeps every entry reachable
//! - clear() behaves like a cold table

use myth_shader_cache::pipeline::LruHashTable;

fn touch(table: &mut LruHashTable<u32>, key: u32) -> (bool, Option<u32>) {
    let lookup = table.lookup_or_insert_with(key, || key + 100).unwrap();
    (lookup.inserted, lookup.evicted.map(|(k, _)| k))
}

fn permutations(keys: [u32; 3]) -> Vec<[u32; 3]> {
    let [a, b, c] = keys;
    vec![
        [a, b, c],
        [a, c, b],
        [b, a, c],
        [b, c, a],
        [c, a, b],
        [c, b, a],
    ]
}

// ============================================================================
// Fixed-capacity eviction
// ============================================================================

#[test]
fn three_slot_table_evicts_least_recently_used_in_every_order() {
    for order in permutations([10, 11, 12]) {
        let mut table = LruHashTable::new(3, None);
        for key in order {
            assert_eq!(touch(&mut table, key), (true, None));
        }

        // The two most recent keys are hits.
        assert_eq!(touch(&mut table, order[1]), (false, None), "{order:?}");
        assert_eq!(touch(&mut table, order[2]), (false, None), "{order:?}");

        // A new key evicts the oldest.
        assert_eq!(touch(&mut table, 13), (true, Some(order[0])), "{order:?}");

        // Bringing the oldest back evicts the next oldest.
        assert_eq!(touch(&mut table, order[0]), (true, Some(order[1])), "{order:?}");

        assert_eq!(table.len(), 3);
        assert_eq!(table.capacity(), 3);
        assert_eq!(table.counters().evictions, 2);
    }
}

#[test]
fn eviction_rehashes_and_keeps_survivors_reachable() {
    let mut table = LruHashTable::new(3, None);
    for key in [0, 3, 6] {
        touch(&mut table, key);
    }
    let lookup = table.lookup_or_insert_with(9, || 109).unwrap();
    assert!(lookup.rehashed);
    assert_eq!(lookup.evicted, Some((0, 100)));

    for key in [3, 6, 9] {
        let index = table.find(key).unwrap();
        assert_eq!(table.get(index).unwrap().value, key + 100);
    }
    assert_eq!(table.find(0), None);
}

// ============================================================================
// Growth
// ============================================================================

#[test]
fn growable_table_never_evicts() {
    let mut table = LruHashTable::new(2, Some(2));
    for key in 0..7 {
        assert_eq!(touch(&mut table, key), (true, None));
    }
    assert_eq!(table.capacity(), 8);
    assert_eq!(table.counters().evictions, 0);
    assert_eq!(table.counters().rehashes, 3);

    for key in 0..7 {
        let (inserted, evicted) = touch(&mut table, key);
        assert!(!inserted);
        assert_eq!(evicted, None);
    }
}

// ============================================================================
// clear()
// ============================================================================

#[test]
fn cleared_table_rebuilds_like_a_cold_one() {
    let mut table = LruHashTable::new(4, None);
    touch(&mut table, 1);
    touch(&mut table, 2);

    let drained = table.clear();
    assert_eq!(drained.len(), 2);
    assert!(table.is_empty());
    assert_eq!(table.capacity(), 4);

    assert_eq!(touch(&mut table, 1), (true, None));
}
