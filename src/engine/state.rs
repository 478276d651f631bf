use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::config::Config;
use crate::error::Result;
use crate::index::{KeyIndex, Locator};
use crate::log::{ActiveFile, DataFile};
use crate::stale::StaleAccountant;

/// All shared engine state, with fine-grained locking: the file view and
/// the active file are guarded separately, and the index and accountant
/// synchronize themselves. Lock poisoning propagates as an error on every
/// path rather than panicking.
pub(crate) struct EngineState {
    pub(crate) config: Config,
    pub(crate) index: KeyIndex,
    pub(crate) stale: StaleAccountant,

    /// fileId -> read handle, for the active file and every sealed file.
    /// Readers clone the inner `Arc` and work against that immutable
    /// snapshot; mutators build a new map and swap it in.
    files: RwLock<Arc<HashMap<u32, Arc<DataFile>>>>,

    /// The one file receiving appends. Writers are serialized here; the
    /// index update happens inside the critical section so index order
    /// equals append order.
    pub(crate) active: Mutex<Option<ActiveFile>>,

    next_file_id: AtomicU32,
}

impl EngineState {
    pub fn new(
        config: Config,
        index: KeyIndex,
        stale: StaleAccountant,
        files: HashMap<u32, Arc<DataFile>>,
        active: ActiveFile,
        next_file_id: u32,
    ) -> Self {
        Self {
            config,
            index,
            stale,
            files: RwLock::new(Arc::new(files)),
            active: Mutex::new(Some(active)),
            next_file_id: AtomicU32::new(next_file_id),
        }
    }

    /// Immutable snapshot of the file view.
    pub fn file_view(&self) -> Result<Arc<HashMap<u32, Arc<DataFile>>>> {
        Ok(Arc::clone(&*self.files.read()?))
    }

    /// Publishes a new file by swapping in a rebuilt view.
    pub fn publish_file(&self, file: Arc<DataFile>) -> Result<()> {
        let mut guard = self.files.write()?;
        let mut next = (**guard).clone();
        next.insert(file.id(), file);
        *guard = Arc::new(next);
        Ok(())
    }

    /// Removes a file from the view, returning its handle so the caller can
    /// delete it once published readers are done with their snapshot.
    pub fn unpublish_file(&self, file_id: u32) -> Result<Option<Arc<DataFile>>> {
        let mut guard = self.files.write()?;
        let mut next = (**guard).clone();
        let removed = next.remove(&file_id);
        *guard = Arc::new(next);
        Ok(removed)
    }

    pub fn clear_files(&self) -> Result<()> {
        let mut guard = self.files.write()?;
        *guard = Arc::new(HashMap::new());
        Ok(())
    }

    /// Allocates the next monotonic file id.
    pub fn next_file_id(&self) -> u32 {
        self.next_file_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn active_file_id(&self) -> Result<Option<u32>> {
        Ok(self.active.lock()?.as_ref().map(|a| a.id()))
    }

    /// Charges a superseded locator's bytes against its file. A file that
    /// has already been deleted needs no accounting.
    pub fn charge_stale(&self, prior: Locator) -> Result<()> {
        if let Some(file) = self.file_view()?.get(&prior.file_id) {
            self.stale.charge(prior.file_id, prior.size, file.size())?;
        }
        Ok(())
    }

    /// Makes sure `slot` holds an active file with room for `incoming`
    /// bytes, sealing and rotating if not. A record is never split across
    /// files; an oversized record on a fresh file is written whole.
    pub fn ensure_room(&self, slot: &mut Option<ActiveFile>, incoming: u64) -> Result<()> {
        let full = match slot.as_ref() {
            Some(active) => {
                active.write_offset() > 0
                    && active.write_offset() + incoming > self.config.max_file_size
            }
            None => true,
        };
        if full {
            self.rotate(slot)?;
        }
        Ok(())
    }

    /// Seals the current active file (if any) and installs a fresh one.
    pub fn rotate(&self, slot: &mut Option<ActiveFile>) -> Result<()> {
        if let Some(active) = slot.take() {
            active.seal()?;
        }
        let fresh = ActiveFile::create(&self.config.dir, self.next_file_id())?;
        self.publish_file(Arc::clone(fresh.shared()))?;
        *slot = Some(fresh);
        Ok(())
    }
}
