//! Extendible hash table, used as the buffer pool's page table.

use parking_lot::Mutex;
use std::hash::{BuildHasher, BuildHasherDefault, DefaultHasher, Hash};

/// A dynamically growing hash table with a power-of-two directory and
/// per-bucket local depth.
///
/// Overflowing a bucket splits that bucket alone, doubling the directory
/// only when the bucket's local depth has caught up with the global depth.
/// A single internal mutex serialises all operations.
///
/// The hasher is a type parameter so tests can script collisions; the
/// default hasher is deterministic across runs.
pub struct ExtendibleHashTable<K, V, S = BuildHasherDefault<DefaultHasher>> {
    bucket_size: usize,
    hasher: S,
    inner: Mutex<TableInner<K, V>>,
}

struct TableInner<K, V> {
    global_depth: u32,
    num_buckets: usize,
    /// Directory of 2^global_depth entries, each an index into `buckets`.
    /// dir[i] == dir[j] iff i ≡ j (mod 2^local_depth of that bucket).
    dir: Vec<usize>,
    buckets: Vec<Bucket<K, V>>,
}

struct Bucket<K, V> {
    local_depth: u32,
    /// Entries in insertion order.
    entries: Vec<(K, V)>,
}

impl<K, V> ExtendibleHashTable<K, V, BuildHasherDefault<DefaultHasher>>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Creates a table whose buckets hold up to `bucket_size` entries.
    pub fn new(bucket_size: usize) -> Self {
        Self::with_hasher(bucket_size, BuildHasherDefault::default())
    }
}

impl<K, V, S> ExtendibleHashTable<K, V, S>
where
    K: Hash + Eq + Clone,
    V: Clone,
    S: BuildHasher,
{
    /// Creates a table with a caller-provided hasher.
    pub fn with_hasher(bucket_size: usize, hasher: S) -> Self {
        assert!(bucket_size >= 1, "bucket_size must be at least 1");
        Self {
            bucket_size,
            hasher,
            inner: Mutex::new(TableInner {
                global_depth: 0,
                num_buckets: 1,
                dir: vec![0],
                buckets: vec![Bucket {
                    local_depth: 0,
                    entries: Vec::new(),
                }],
            }),
        }
    }

    /// Directory slot for a key at the given global depth.
    fn index_of(&self, key: &K, global_depth: u32) -> usize {
        let mask = (1usize << global_depth) - 1;
        (self.hasher.hash_one(key) as usize) & mask
    }

    /// Looks up a key.
    pub fn find(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock();
        let idx = self.index_of(key, inner.global_depth);
        let bucket = &inner.buckets[inner.dir[idx]];
        bucket
            .entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Removes a key. Returns true if it was present.
    pub fn remove(&self, key: &K) -> bool {
        let mut inner = self.inner.lock();
        let idx = self.index_of(key, inner.global_depth);
        let bucket_idx = inner.dir[idx];
        let bucket = &mut inner.buckets[bucket_idx];
        if let Some(pos) = bucket.entries.iter().position(|(k, _)| k == key) {
            bucket.entries.remove(pos);
            return true;
        }
        false
    }

    /// Inserts a key-value pair, overwriting any existing value for the key.
    ///
    /// When the target bucket is full the bucket splits and insertion is
    /// retried; a split that fails to separate the colliding keys simply
    /// triggers the next split on the retry.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        loop {
            let idx = self.index_of(&key, inner.global_depth);
            let bucket_idx = inner.dir[idx];

            {
                let bucket = &mut inner.buckets[bucket_idx];
                if let Some(entry) = bucket.entries.iter_mut().find(|(k, _)| *k == key) {
                    entry.1 = value;
                    return;
                }
                if bucket.entries.len() < self.bucket_size {
                    bucket.entries.push((key, value));
                    return;
                }
            }

            let local_depth = inner.buckets[bucket_idx].local_depth;
            if local_depth == inner.global_depth {
                // Double the directory, duplicating every entry so all
                // existing aliases are preserved.
                let copy = inner.dir.clone();
                inner.dir.extend(copy);
                inner.global_depth += 1;
                log::debug!(
                    "extendible hash directory doubled to depth {}",
                    inner.global_depth
                );
            }

            // Split: the old slot becomes the low half, a fresh bucket the
            // high half, distinguished by the bit at `local_depth`.
            let old_entries = std::mem::take(&mut inner.buckets[bucket_idx].entries);
            inner.buckets[bucket_idx].local_depth = local_depth + 1;
            let high_idx = inner.buckets.len();
            inner.buckets.push(Bucket {
                local_depth: local_depth + 1,
                entries: Vec::new(),
            });
            inner.num_buckets += 1;

            let offset = idx & ((1usize << local_depth) - 1);
            let fanout = 1usize << (inner.global_depth - local_depth);
            for j in 0..fanout {
                let dir_idx = (j << local_depth) + offset;
                inner.dir[dir_idx] = if j & 1 == 0 { bucket_idx } else { high_idx };
            }

            let global_depth = inner.global_depth;
            for (k, v) in old_entries {
                let i = self.index_of(&k, global_depth);
                let b = inner.dir[i];
                inner.buckets[b].entries.push((k, v));
            }
            // Retry from the top with the refined directory.
        }
    }

    /// Returns the global depth of the directory.
    pub fn global_depth(&self) -> u32 {
        self.inner.lock().global_depth
    }

    /// Returns the local depth of the bucket at the given directory slot.
    pub fn local_depth(&self, dir_index: usize) -> u32 {
        let inner = self.inner.lock();
        inner.buckets[inner.dir[dir_index]].local_depth
    }

    /// Returns the number of distinct buckets.
    pub fn num_buckets(&self) -> usize {
        self.inner.lock().num_buckets
    }

    /// Returns the total number of entries.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        let mut seen = vec![false; inner.buckets.len()];
        let mut count = 0;
        for &b in &inner.dir {
            if !seen[b] {
                seen[b] = true;
                count += inner.buckets[b].entries.len();
            }
        }
        count
    }

    /// Returns true if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::hash::Hasher;

    /// Hashes an integer to itself, so tests can script directory slots.
    #[derive(Default, Clone)]
    struct IdentityHasher(u64);

    impl Hasher for IdentityHasher {
        fn finish(&self) -> u64 {
            self.0
        }

        fn write(&mut self, bytes: &[u8]) {
            let mut buf = [0u8; 8];
            let len = bytes.len().min(8);
            buf[..len].copy_from_slice(&bytes[..len]);
            self.0 = u64::from_le_bytes(buf);
        }

        fn write_i32(&mut self, n: i32) {
            self.0 = n as u64;
        }

        fn write_u64(&mut self, n: u64) {
            self.0 = n;
        }
    }

    type IdentityTable<V> = ExtendibleHashTable<i32, V, BuildHasherDefault<IdentityHasher>>;

    fn identity_table<V: Clone>(bucket_size: usize) -> IdentityTable<V> {
        ExtendibleHashTable::with_hasher(bucket_size, BuildHasherDefault::default())
    }

    #[test]
    fn test_hash_table_new() {
        let table: ExtendibleHashTable<i32, i32> = ExtendibleHashTable::new(4);
        assert_eq!(table.global_depth(), 0);
        assert_eq!(table.num_buckets(), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_hash_table_insert_find() {
        let table = ExtendibleHashTable::new(4);

        table.insert(1, "a");
        table.insert(2, "b");
        table.insert(3, "c");

        assert_eq!(table.find(&1), Some("a"));
        assert_eq!(table.find(&2), Some("b"));
        assert_eq!(table.find(&3), Some("c"));
        assert_eq!(table.find(&4), None);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_hash_table_overwrite() {
        let table = ExtendibleHashTable::new(4);

        table.insert(1, 10);
        table.insert(1, 20);

        assert_eq!(table.find(&1), Some(20));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_hash_table_remove() {
        let table = ExtendibleHashTable::new(4);

        table.insert(1, "a");
        assert!(table.remove(&1));
        assert_eq!(table.find(&1), None);
        assert!(!table.remove(&1));
        assert!(table.is_empty());
    }

    #[test]
    fn test_hash_table_split_separates_keys() {
        // bucket_size 1 forces a split on the second insert; keys 0 and 1
        // differ in the lowest bit so one split suffices.
        let table: IdentityTable<&str> = identity_table(1);

        table.insert(0, "even");
        table.insert(1, "odd");

        assert_eq!(table.global_depth(), 1);
        assert_eq!(table.num_buckets(), 2);
        assert_eq!(table.find(&0), Some("even"));
        assert_eq!(table.find(&1), Some("odd"));
    }

    #[test]
    fn test_hash_table_split_chain_on_colliding_low_bits() {
        // Keys 0, 4, 8 share their low two bits, so inserting 8 must split
        // repeatedly (retry loop) until depth 3 separates 4 from 0 and 8.
        let table: IdentityTable<i32> = identity_table(2);

        table.insert(0, 0);
        table.insert(4, 40);
        assert_eq!(table.global_depth(), 0);

        table.insert(8, 80);

        assert_eq!(table.global_depth(), 3);
        assert_eq!(table.local_depth(0), 3);
        assert_eq!(table.local_depth(4), 3);
        assert_eq!(table.find(&0), Some(0));
        assert_eq!(table.find(&4), Some(40));
        assert_eq!(table.find(&8), Some(80));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_hash_table_directory_aliasing() {
        // After one split at global depth 2, unsplit buckets must still be
        // reachable through both of their directory aliases.
        let table: IdentityTable<i32> = identity_table(2);

        table.insert(0, 0);
        table.insert(2, 2);
        table.insert(4, 4); // splits: 0/4 vs 2

        assert!(table.global_depth() >= 2);
        assert_eq!(table.find(&0), Some(0));
        assert_eq!(table.find(&2), Some(2));
        assert_eq!(table.find(&4), Some(4));

        // The odd-keys bucket never split, so it keeps local depth 1 and is
        // reachable through both dir[1] and dir[3].
        assert_eq!(table.global_depth(), 2);
        assert_eq!(table.local_depth(1), 1);
        assert_eq!(table.local_depth(3), 1);
    }

    #[test]
    fn test_hash_table_many_inserts() {
        let table = ExtendibleHashTable::new(4);

        for i in 0..500 {
            table.insert(i, i * 2);
        }
        assert_eq!(table.len(), 500);
        for i in 0..500 {
            assert_eq!(table.find(&i), Some(i * 2));
        }
        assert!(table.num_buckets() > 1);
    }

    #[test]
    fn test_hash_table_insert_remove_interleaved() {
        let table = ExtendibleHashTable::new(2);

        for i in 0..100 {
            table.insert(i, i);
        }
        for i in (0..100).step_by(2) {
            assert!(table.remove(&i));
        }
        for i in 0..100 {
            if i % 2 == 0 {
                assert_eq!(table.find(&i), None);
            } else {
                assert_eq!(table.find(&i), Some(i));
            }
        }
        assert_eq!(table.len(), 50);
    }

    #[test]
    fn test_hash_table_local_depth_never_exceeds_global() {
        let table = ExtendibleHashTable::new(2);
        for i in 0..200 {
            table.insert(i, i);
        }
        let global = table.global_depth();
        for slot in 0..(1usize << global) {
            assert!(table.local_depth(slot) <= global);
        }
    }
}
