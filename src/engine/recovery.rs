use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::engine::state::EngineState;
use crate::error::Result;
use crate::index::{KeyIndex, Locator};
use crate::log::data::file_id_of;
use crate::log::{self, ActiveFile, DataFile, HintIterator};
use crate::stale::StaleAccountant;
use crate::Error;

/// Rebuilds engine state from the database directory.
///
/// Hint files are an order of magnitude cheaper to replay than data files,
/// so every sealed segment is recovered through its hint. A data file
/// without a hint sibling (the active file at crash time, or a segment
/// whose seal was interrupted before the hint rename) is scanned record by
/// record as an implicit hint stream.
pub(crate) fn recover_state(config: Config) -> Result<EngineState> {
    let dir = config.dir.clone();

    remove_leftover_tmp_files(&dir)?;

    // open every data file, ids ascending
    let mut files: BTreeMap<u32, Arc<DataFile>> = BTreeMap::new();
    for entry in std::fs::read_dir(&dir)? {
        let path = entry?.path();
        if path.extension().map_or(false, |ext| ext == "data") {
            if let Some(id) = file_id_of(&path) {
                files.insert(id, Arc::new(DataFile::open_sealed(&path)?));
            }
        }
    }

    let index = KeyIndex::new();
    let stale = StaleAccountant::new(config.merge.threshold_per_file);

    for (&id, file) in &files {
        let hint = log::hint_path(&dir, id);
        if hint.exists() {
            for entry in HintIterator::open(&hint)? {
                let entry = entry?;
                let loc = Locator {
                    file_id: id,
                    offset: entry.record_offset,
                    size: entry.record_size,
                };
                apply(&index, &stale, &files, &entry.key, loc, entry.tombstone)?;
            }
        } else {
            tracing::debug!(file_id = id, "no hint sibling, scanning data records");
            for item in file.records()? {
                match item {
                    Ok((offset, record)) => {
                        let loc = Locator {
                            file_id: id,
                            offset,
                            size: record.size(),
                        };
                        apply(&index, &stale, &files, &record.key, loc, record.tombstone)?;
                    }
                    Err(Error::Corrupt(msg)) => {
                        // torn write at the tail; everything past it is garbage
                        tracing::warn!(file_id = id, %msg, "corrupt record ends recovery scan");
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }

    let next_id = files.keys().next_back().map_or(1, |max| max + 1);
    let active = ActiveFile::create(&dir, next_id)?;

    let mut view: HashMap<u32, Arc<DataFile>> = files.into_iter().collect();
    view.insert(active.id(), Arc::clone(active.shared()));

    let keys = index.len()?;
    tracing::debug!(
        files = view.len(),
        keys,
        active_file_id = next_id,
        "recovery complete"
    );

    Ok(EngineState::new(
        config,
        index,
        stale,
        view,
        active,
        next_id + 1,
    ))
}

/// One step of hint replay, shared by the hint and data-scan paths.
/// Entries arrive in append order across files of ascending id, so the
/// last applied entry for a key is the newest record.
fn apply(
    index: &KeyIndex,
    stale: &StaleAccountant,
    files: &BTreeMap<u32, Arc<DataFile>>,
    key: &[u8],
    loc: Locator,
    tombstone: bool,
) -> Result<()> {
    let charge = |prior: Locator| -> Result<()> {
        if let Some(file) = files.get(&prior.file_id) {
            stale.charge(prior.file_id, prior.size, file.size())?;
        }
        Ok(())
    };

    let existing = index.get(key)?;
    if tombstone {
        if let Some(prior) = existing {
            index.remove(key)?;
            charge(prior)?;
        }
        // tombstone bytes are dead on arrival
        charge(loc)?;
    } else if let Some(prior) = existing {
        index.put(key, loc)?;
        charge(prior)?;
    } else {
        index.put(key, loc)?;
    }
    Ok(())
}

/// Removes `.tmp` leftovers from hint writes interrupted mid-seal. The
/// paired data file simply gets scanned instead.
fn remove_leftover_tmp_files(dir: &Path) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().map_or(false, |ext| ext == "tmp") {
            tracing::debug!(path = %path.display(), "removing leftover tmp file");
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MergeConfig;
    use crate::tmpfs::TempDir;
    use crate::Engine;
    use std::fs::OpenOptions;

    fn test_config(dir: &TempDir) -> Config {
        Config::new(dir.path()).merge(MergeConfig::default().disabled(true))
    }

    #[test]
    fn test_recover_empty_directory() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let state = recover_state(test_config(&dir)).expect("Failed to recover");

        assert!(state.index.is_empty().expect("Failed to check"));
        assert_eq!(state.active_file_id().expect("Failed to read"), Some(1));
        assert_eq!(state.file_view().expect("Failed to snapshot").len(), 1);
    }

    #[test]
    fn test_reopen_replays_hints() {
        let dir = TempDir::new().expect("Failed to create temp dir");

        let engine = Engine::open(test_config(&dir)).expect("Failed to open");
        engine.put(b"a", b"1").expect("Failed to put");
        engine.put(b"b", b"2").expect("Failed to put");
        engine.put(b"a", b"updated").expect("Failed to put");
        engine.delete(b"b").expect("Failed to delete");
        engine.close().expect("Failed to close");

        let engine = Engine::open(test_config(&dir)).expect("Failed to reopen");
        assert_eq!(
            engine.get(b"a").expect("Failed to get"),
            Some(b"updated".to_vec())
        );
        assert_eq!(engine.get(b"b").expect("Failed to get"), None);
        engine.close().expect("Failed to close");
    }

    #[test]
    fn test_crashed_active_file_is_scanned() {
        let dir = TempDir::new().expect("Failed to create temp dir");

        // simulate a crash by dropping the hint the close would have written
        let engine = Engine::open(test_config(&dir)).expect("Failed to open");
        engine.put(b"a", b"1").expect("Failed to put");
        engine.put(b"b", b"2").expect("Failed to put");
        engine.close().expect("Failed to close");
        let hint = log::hint_path(dir.path(), 1);
        assert!(hint.exists());
        std::fs::remove_file(&hint).expect("Failed to remove hint");

        let engine = Engine::open(test_config(&dir)).expect("Failed to reopen");
        assert_eq!(engine.get(b"a").expect("Failed to get"), Some(b"1".to_vec()));
        assert_eq!(engine.get(b"b").expect("Failed to get"), Some(b"2".to_vec()));
        engine.close().expect("Failed to close");
    }

    #[test]
    fn test_torn_tail_recovered_to_last_whole_record() {
        let dir = TempDir::new().expect("Failed to create temp dir");

        let engine = Engine::open(test_config(&dir)).expect("Failed to open");
        engine.put(b"a", b"first").expect("Failed to put");
        engine.put(b"b", b"second").expect("Failed to put");
        engine.close().expect("Failed to close");

        // tear the tail of the segment and drop its hint, as a crash
        // mid-append would leave things
        let data = log::data_path(dir.path(), 1);
        let len = std::fs::metadata(&data).expect("Failed to stat").len();
        let file = OpenOptions::new()
            .write(true)
            .open(&data)
            .expect("Failed to reopen");
        file.set_len(len - 5).expect("Failed to truncate");
        std::fs::remove_file(log::hint_path(dir.path(), 1)).expect("Failed to remove hint");

        let engine = Engine::open(test_config(&dir)).expect("Failed to reopen");
        assert_eq!(
            engine.get(b"a").expect("Failed to get"),
            Some(b"first".to_vec())
        );
        assert_eq!(engine.get(b"b").expect("Failed to get"), None);
        engine.close().expect("Failed to close");
    }

    #[test]
    fn test_tombstone_replay_removes_key() {
        let dir = TempDir::new().expect("Failed to create temp dir");

        let engine = Engine::open(test_config(&dir)).expect("Failed to open");
        engine.put(b"gone", b"soon").expect("Failed to put");
        engine.delete(b"gone").expect("Failed to delete");
        engine.put(b"kept", b"yes").expect("Failed to put");
        engine.close().expect("Failed to close");

        let state = recover_state(test_config(&dir)).expect("Failed to recover");
        assert_eq!(state.index.get(b"gone").expect("Failed to get"), None);
        assert!(state.index.get(b"kept").expect("Failed to get").is_some());
        assert_eq!(state.index.len().expect("Failed to count"), 1);
    }

    #[test]
    fn test_recovery_charges_stale_bytes() {
        let dir = TempDir::new().expect("Failed to create temp dir");

        let engine = Engine::open(test_config(&dir)).expect("Failed to open");
        engine.put(b"a", b"one").expect("Failed to put");
        engine.put(b"a", b"two").expect("Failed to put");
        engine.put(b"a", b"three").expect("Failed to put");
        engine.close().expect("Failed to close");

        let state = recover_state(test_config(&dir)).expect("Failed to recover");
        // the two superseded records are stale; the live one is not
        let expected =
            (crate::log::record::size_of(1, 3) + crate::log::record::size_of(1, 3)) as u64;
        assert_eq!(state.stale.stale_bytes(1).expect("Failed to read"), expected);
    }

    #[test]
    fn test_next_file_id_continues_after_max() {
        let dir = TempDir::new().expect("Failed to create temp dir");

        let engine = Engine::open(test_config(&dir)).expect("Failed to open");
        engine.put(b"a", b"1").expect("Failed to put");
        engine.close().expect("Failed to close");

        // second open creates file 2, third sees max 2 and creates 3
        let engine = Engine::open(test_config(&dir)).expect("Failed to reopen");
        engine.close().expect("Failed to close");

        let state = recover_state(test_config(&dir)).expect("Failed to recover");
        assert_eq!(state.active_file_id().expect("Failed to read"), Some(3));
    }
}
