//! In-memory key index.
//!
//! Maps key bytes to the locator of the newest record for that key. The
//! map is striped across a fixed number of shards, each behind its own
//! `RwLock`, so individual operations are atomic without a global lock and
//! readers on different shards never contend. Lock poisoning surfaces as
//! an error rather than panicking the calling thread.
//!
//! `replace` is the compare-and-set used by the merge job: a locator swap
//! only succeeds if the entry has not moved since the merger read it, which
//! is what lets writes proceed concurrently with compaction.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::RwLock;

use crate::error::Result;

/// Number of shards. Must be a power of two.
const SHARD_COUNT: usize = 16;

/// Identifies a record's byte range: which file, where in it, and how long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Locator {
    pub file_id: u32,
    pub offset: u64,
    pub size: u32,
}

/// Lock-striped concurrent map from key bytes to [`Locator`].
pub struct KeyIndex {
    shards: Vec<RwLock<HashMap<Vec<u8>, Locator>>>,
}

impl KeyIndex {
    pub fn new() -> Self {
        let shards = (0..SHARD_COUNT)
            .map(|_| RwLock::new(HashMap::new()))
            .collect();
        Self { shards }
    }

    fn shard(&self, key: &[u8]) -> &RwLock<HashMap<Vec<u8>, Locator>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[hasher.finish() as usize & (SHARD_COUNT - 1)]
    }

    /// Inserts or overwrites, returning the prior locator atomically.
    pub fn put(&self, key: &[u8], locator: Locator) -> Result<Option<Locator>> {
        Ok(self.shard(key).write()?.insert(key.to_vec(), locator))
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Locator>> {
        Ok(self.shard(key).read()?.get(key).copied())
    }

    /// Removes the entry, returning the prior locator atomically.
    pub fn remove(&self, key: &[u8]) -> Result<Option<Locator>> {
        Ok(self.shard(key).write()?.remove(key))
    }

    /// Compare-and-set: swaps to `new` only if the entry still equals
    /// `expected`. Returns whether the swap happened.
    pub fn replace(&self, key: &[u8], expected: Locator, new: Locator) -> Result<bool> {
        let mut shard = self.shard(key).write()?;
        Ok(match shard.get_mut(key) {
            Some(current) if *current == expected => {
                *current = new;
                true
            }
            _ => false,
        })
    }

    pub fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(self.shard(key).read()?.contains_key(key))
    }

    /// Number of live keys.
    pub fn len(&self) -> Result<usize> {
        let mut total = 0;
        for shard in &self.shards {
            total += shard.read()?.len();
        }
        Ok(total)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Releases all entries.
    pub fn close(&self) -> Result<()> {
        for shard in &self.shards {
            shard.write()?.clear();
        }
        Ok(())
    }
}

impl Default for KeyIndex {
    fn default() -> Self {
        Self::new()
    }
}
