use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::engine::recovery;
use crate::engine::state::EngineState;
use crate::engine::tasks::MergeTask;
use crate::error::Result;
use crate::flock::FileLock;
use crate::index::Locator;
use crate::log::{record, ActiveFile};
use crate::scheduler::Scheduler;
use crate::Error;

const LOCK_FILE: &str = "cinderkv.lock";

/// An open key/value store.
///
/// All operations take `&self`; writers are serialized internally and
/// readers run concurrently with both writers and the background merge.
pub struct Engine {
    state: Arc<EngineState>,
    scheduler: Option<Scheduler>,
    lock: Option<FileLock>,
    closed: bool,
}

impl Engine {
    /// Opens (creating if needed) the store in `config.dir`, recovering
    /// the index from disk and starting the merge job unless disabled.
    pub fn open(config: Config) -> Result<Self> {
        fs::create_dir_all(&config.dir)?;
        let lock = FileLock::acquire(config.dir.join(LOCK_FILE))?;

        let state = Arc::new(recovery::recover_state(config)?);
        let keys = state.index.len()?;

        tracing::info!(
            dir = %state.config.dir.display(),
            max_file_size = state.config.max_file_size,
            merge_disabled = state.config.merge.disabled,
            merge_interval = ?state.config.merge.interval,
            merge_threshold_per_file = state.config.merge.threshold_per_file,
            merge_threshold_file_number = state.config.merge.threshold_file_number,
            keys,
            "opened database"
        );

        let scheduler = if state.config.merge.disabled {
            None
        } else {
            let mut scheduler = Scheduler::new();
            scheduler.register(MergeTask::new(Arc::clone(&state)))?;
            Some(scheduler)
        };

        Ok(Self {
            state,
            scheduler,
            lock: Some(lock),
            closed: false,
        })
    }

    /// Opens with default configuration.
    pub fn open_dir(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::open(Config::new(dir))
    }

    /// Stores a value under a key, replacing any existing value.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let bytes = record::encode(key, value, false)?;

        let mut slot = self.state.active.lock()?;
        let loc = append_record(&self.state, &mut slot, &bytes, key, false)?;
        let prior = match self.state.index.put(key, loc)? {
            Some(prior) if prior.file_id > loc.file_id => {
                // A merge copy landed above us while we appended. Rewrite
                // the record into a file above the merge output so that
                // replay order agrees with write order.
                let moved = rewrite_above(&self.state, &mut slot, &bytes, key, false)?;
                self.state.index.put(key, moved)?;
                self.state.charge_stale(loc)?;
                Some(prior)
            }
            other => other,
        };
        if let Some(prior) = prior {
            self.state.charge_stale(prior)?;
        }
        Ok(())
    }

    /// Fetches the value for a key, or `None` if absent.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut attempts = 0;
        loop {
            let loc = match self.state.index.get(key)? {
                Some(loc) => loc,
                None => return Ok(None),
            };

            let view = self.state.file_view()?;
            let file = match view.get(&loc.file_id) {
                Some(file) => file,
                None => {
                    // The merge may have retired the file between the index
                    // lookup and the view snapshot; a moved locator means
                    // retry, an unmoved one means the store is broken.
                    attempts += 1;
                    if attempts > 3 || self.state.index.get(key)? == Some(loc) {
                        return crate::errinconsistent!("index points at missing file {}", loc.file_id);
                    }
                    continue;
                }
            };

            let buf = file.read_at(loc.offset, loc.size as usize)?;
            let record = record::decode(&buf)?;
            if record.tombstone {
                // a tombstone should never be the current locator
                return Ok(None);
            }
            return Ok(Some(record.value));
        }
    }

    /// Removes a key. The deletion is logged as a tombstone record.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let bytes = record::encode(key, &[], true)?;

        let mut slot = self.state.active.lock()?;
        let mut tomb = append_record(&self.state, &mut slot, &bytes, key, true)?;
        let prior = match self.state.index.remove(key)? {
            Some(prior) if prior.file_id > tomb.file_id => {
                // same race as in put: keep the tombstone above the merge
                // output so replay cannot resurrect the merged copy
                let moved = rewrite_above(&self.state, &mut slot, &bytes, key, true)?;
                self.state.charge_stale(tomb)?;
                tomb = moved;
                Some(prior)
            }
            other => other,
        };
        if let Some(prior) = prior {
            self.state.charge_stale(prior)?;
        }
        // tombstone bytes are stale the moment they are written
        self.state.charge_stale(tomb)?;
        Ok(())
    }

    /// Ids of all data files currently in the view. For tests.
    pub fn data_file_ids(&self) -> Result<HashSet<u32>> {
        Ok(self.state.file_view()?.keys().copied().collect())
    }

    /// Stops the merge job, seals the active file (writing its hint), and
    /// releases the directory lock.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Some(scheduler) = self.scheduler.take() {
            scheduler.shutdown();
        }

        let active = self.state.active.lock()?.take();
        if let Some(active) = active {
            active.seal()?;
        }

        self.state.index.close()?;
        self.state.clear_files()?;
        self.lock.take();

        tracing::info!(dir = %self.state.config.dir.display(), "closed database");
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &Arc<EngineState> {
        &self.state
    }

    #[cfg(test)]
    pub(crate) fn merge_now(&self) -> Result<()> {
        crate::engine::merge::run_merge(&self.state, &crate::scheduler::StopSignal::new())
    }
}

/// Best-effort close on drop. Errors are logged rather than propagated;
/// any record appended since the last seal is still recoverable by the
/// data-file scan on next open.
impl Drop for Engine {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.shutdown() {
                tracing::error!(error = %e, "close on drop failed");
            }
        }
    }
}

/// Appends encoded record bytes to the active file, rotating first if the
/// record would not fit, and returns the new locator.
fn append_record(
    state: &EngineState,
    slot: &mut Option<ActiveFile>,
    bytes: &[u8],
    key: &[u8],
    tombstone: bool,
) -> Result<Locator> {
    state.ensure_room(slot, bytes.len() as u64)?;
    let active = slot
        .as_mut()
        .ok_or_else(|| Error::Inconsistent("no active file after rotation".to_string()))?;
    let offset = active.append(bytes, key, tombstone)?;
    Ok(Locator {
        file_id: active.id(),
        offset,
        size: bytes.len() as u32,
    })
}

/// Forces a rotation and appends, guaranteeing the record lands in a file
/// id above every existing one. Used when a write races a merge copy.
fn rewrite_above(
    state: &EngineState,
    slot: &mut Option<ActiveFile>,
    bytes: &[u8],
    key: &[u8],
    tombstone: bool,
) -> Result<Locator> {
    state.rotate(slot)?;
    let active = slot
        .as_mut()
        .ok_or_else(|| Error::Inconsistent("no active file after rotation".to_string()))?;
    let offset = active.append(bytes, key, tombstone)?;
    Ok(Locator {
        file_id: active.id(),
        offset,
        size: bytes.len() as u32,
    })
}
