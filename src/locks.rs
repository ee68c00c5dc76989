// 🔒 Locks - Per-owner serialization of read-compute-write sections
//
// Fixed number of shards, so memory stays bounded no matter how many owners
// pass through. Two owners may share a shard; that only costs concurrency.
// Every operation takes exactly one shard, so there is no lock ordering.

use parking_lot::{Mutex, MutexGuard};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

pub const DEFAULT_SHARDS: usize = 64;

pub struct ScopeLocks {
    shards: Vec<Mutex<()>>,
}

impl ScopeLocks {
    pub fn new(shards: usize) -> Self {
        let shards = shards.max(1);
        ScopeLocks {
            shards: (0..shards).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shard_of(&self, owner: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        owner.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    /// Hold the owner's shard until the guard drops
    pub fn lock(&self, owner: &str) -> MutexGuard<'_, ()> {
        self.shards[self.shard_of(owner)].lock()
    }
}

impl Default for ScopeLocks {
    fn default() -> Self {
        ScopeLocks::new(DEFAULT_SHARDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_same_owner_same_shard() {
        let locks = ScopeLocks::new(8);
        assert_eq!(locks.shard_of("alice"), locks.shard_of("alice"));
        assert!(locks.shard_of("bob") < 8);
    }

    #[test]
    fn test_zero_shards_clamped() {
        assert_eq!(ScopeLocks::new(0).shard_count(), 1);
    }

    #[test]
    fn test_lock_serializes_owner() {
        let locks = Arc::new(ScopeLocks::new(4));
        let inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    for _ in 0..100 {
                        let _guard = locks.lock("alice");
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
