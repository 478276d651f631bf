//! Per-file stale-byte accounting.
//!
//! Every time a record is superseded (overwrite or delete) its size is
//! charged against the file that holds it. A file whose stale total crosses
//! the configured fraction of its physical size joins the victim set; the
//! merge job elects batches of victims from there. Lock poisoning surfaces
//! as an error rather than panicking the calling thread.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::error::Result;

pub struct StaleAccountant {
    threshold_per_file: f64,
    inner: Mutex<Inner>,
}

struct Inner {
    counters: HashMap<u32, u64>,
    victims: HashSet<u32>,
}

impl StaleAccountant {
    pub fn new(threshold_per_file: f64) -> Self {
        Self {
            threshold_per_file,
            inner: Mutex::new(Inner {
                counters: HashMap::new(),
                victims: HashSet::new(),
            }),
        }
    }

    /// Charges `bytes` of superseded data against `file_id`. Crossing
    /// `threshold_per_file * file_size` moves the file into the victim set
    /// and clears its counter.
    pub fn charge(&self, file_id: u32, bytes: u32, file_size: u64) -> Result<()> {
        let mut inner = self.inner.lock()?;
        if inner.victims.contains(&file_id) {
            return Ok(());
        }

        let total = {
            let counter = inner.counters.entry(file_id).or_insert(0);
            *counter += bytes as u64;
            *counter
        };

        if file_size > 0 && total as f64 >= self.threshold_per_file * file_size as f64 {
            inner.victims.insert(file_id);
            inner.counters.remove(&file_id);
        }
        Ok(())
    }

    /// Whether a merge round is worth starting.
    pub fn has_batch(&self, min_victims: usize) -> Result<bool> {
        Ok(self.inner.lock()?.victims.len() >= min_victims)
    }

    /// Up to `n` victims, left in the set until retired. Order unspecified.
    pub fn elect_batch(&self, n: usize) -> Result<Vec<u32>> {
        let inner = self.inner.lock()?;
        Ok(inner.victims.iter().take(n).copied().collect())
    }

    /// Removes rewritten files from the victim set.
    pub fn retire(&self, ids: &[u32]) -> Result<()> {
        let mut inner = self.inner.lock()?;
        for id in ids {
            inner.victims.remove(id);
        }
        Ok(())
    }

    /// Forgets a deleted file entirely.
    pub fn drop_file(&self, file_id: u32) -> Result<()> {
        let mut inner = self.inner.lock()?;
        inner.counters.remove(&file_id);
        inner.victims.remove(&file_id);
        Ok(())
    }

    /// Current stale total for a file (zero once elected or dropped).
    pub fn stale_bytes(&self, file_id: u32) -> Result<u64> {
        Ok(self
            .inner
            .lock()?
            .counters
            .get(&file_id)
            .copied()
            .unwrap_or(0))
    }

    pub fn victim_count(&self) -> Result<usize> {
        Ok(self.inner.lock()?.victims.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charges_accumulate() {
        let stale = StaleAccountant::new(0.5);

        stale.charge(1, 100, 1000).expect("Failed to charge");
        stale.charge(1, 100, 1000).expect("Failed to charge");
        assert_eq!(stale.stale_bytes(1).expect("Failed to read"), 200);
        assert_eq!(stale.victim_count().expect("Failed to count"), 0);
    }

    #[test]
    fn test_threshold_elects_victim() {
        let stale = StaleAccountant::new(0.5);

        stale.charge(1, 400, 1000).expect("Failed to charge");
        assert_eq!(stale.victim_count().expect("Failed to count"), 0);

        // 500 of 1000 bytes stale crosses the 0.5 threshold
        stale.charge(1, 100, 1000).expect("Failed to charge");
        assert_eq!(stale.victim_count().expect("Failed to count"), 1);
        assert_eq!(stale.elect_batch(4).expect("Failed to elect"), vec![1]);
        // counter is cleared on election
        assert_eq!(stale.stale_bytes(1).expect("Failed to read"), 0);

        // further charges against an elected victim are no-ops
        stale.charge(1, 100, 1000).expect("Failed to charge");
        assert_eq!(stale.stale_bytes(1).expect("Failed to read"), 0);
        assert_eq!(stale.victim_count().expect("Failed to count"), 1);
    }

    #[test]
    fn test_batch_gating_and_retire() {
        let stale = StaleAccountant::new(0.5);

        stale.charge(1, 600, 1000).expect("Failed to charge");
        stale.charge(2, 600, 1000).expect("Failed to charge");
        stale.charge(3, 600, 1000).expect("Failed to charge");
        assert!(!stale.has_batch(4).expect("Failed to check"));
        assert!(stale.has_batch(3).expect("Failed to check"));

        let batch = stale.elect_batch(2).expect("Failed to elect");
        assert_eq!(batch.len(), 2);
        // election does not remove victims
        assert_eq!(stale.victim_count().expect("Failed to count"), 3);

        stale.retire(&batch).expect("Failed to retire");
        assert_eq!(stale.victim_count().expect("Failed to count"), 1);
    }

    #[test]
    fn test_drop_file_forgets_everything() {
        let stale = StaleAccountant::new(0.5);

        stale.charge(1, 100, 1000).expect("Failed to charge");
        stale.charge(2, 900, 1000).expect("Failed to charge");
        stale.drop_file(1).expect("Failed to drop");
        stale.drop_file(2).expect("Failed to drop");

        assert_eq!(stale.stale_bytes(1).expect("Failed to read"), 0);
        assert_eq!(stale.victim_count().expect("Failed to count"), 0);
    }
}
