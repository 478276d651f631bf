use std::sync::Arc;

use crate::engine::state::EngineState;
use crate::error::Result;
use crate::index::Locator;
use crate::log::{record, ActiveFile};
use crate::scheduler::StopSignal;
use crate::Error;

/// Whether enough victims have accumulated to justify a round.
pub(crate) fn needs_merge(state: &EngineState) -> Result<bool> {
    state
        .stale
        .has_batch(state.config.merge.threshold_file_number)
}

/// One merge round.
///
/// Elects a batch of victims and streams each one's records. A record is
/// copied only if it is fresh, meaning its locator still matches the index.
/// That check is what lets writes proceed concurrently with compaction:
/// anything overwritten mid-round simply fails the freshness check or the
/// locator compare-and-set and is left behind. Fully copied victims are
/// removed from the view, retired from the accountant, and deleted.
pub(crate) fn run_merge(state: &EngineState, stop: &StopSignal) -> Result<()> {
    let min = state.config.merge.threshold_file_number;
    if !state.stale.has_batch(min)? {
        return Ok(());
    }

    let mut batch = state.stale.elect_batch(min)?;
    batch.sort_unstable();
    let active_id = state.active_file_id()?;
    let view = state.file_view()?;

    tracing::debug!(victims = batch.len(), "starting merge round");

    let mut output = MergeOutput::new();
    let mut retired = 0usize;

    'victims: for id in batch {
        if Some(id) == active_id {
            // never consume the write file; it stays a victim until a later
            // round finds it sealed
            continue;
        }
        let file = match view.get(&id) {
            Some(file) => Arc::clone(file),
            None => {
                state.stale.drop_file(id)?;
                continue;
            }
        };

        for item in file.records()? {
            if stop.is_stopped() {
                break 'victims;
            }
            let (offset, rec) = match item {
                Ok(v) => v,
                Err(Error::Corrupt(msg)) => {
                    // leave the damaged file in place rather than risk
                    // dropping live records past the corruption
                    tracing::error!(file_id = id, %msg, "corrupt record in merge victim, skipping file");
                    state.stale.retire(&[id])?;
                    continue 'victims;
                }
                Err(e) => {
                    output.finish()?;
                    return Err(e);
                }
            };
            if rec.tombstone {
                continue;
            }
            let old = Locator {
                file_id: id,
                offset,
                size: rec.size(),
            };
            if state.index.get(&rec.key)? != Some(old) {
                continue; // superseded since this file was written
            }

            let new = output.append(state, &rec)?;
            if !state.index.replace(&rec.key, old, new)? {
                // a concurrent write won the race: the copy is stillborn,
                // so charge it stale and keep it out of the output's hint
                output.drop_last(state, new)?;
            }
        }

        if let Some(file) = state.unpublish_file(id)? {
            if let Err(e) = file.delete() {
                tracing::error!(file_id = id, error = %e, "failed to delete merged file");
            }
        }
        state.stale.retire(&[id])?;
        state.stale.drop_file(id)?;
        retired += 1;
    }

    output.finish()?;
    tracing::debug!(retired, "merge round complete");
    Ok(())
}

/// The data+hint pair receiving live copies, rotated like the write path.
struct MergeOutput {
    file: Option<ActiveFile>,
}

impl MergeOutput {
    fn new() -> Self {
        Self { file: None }
    }

    fn append(&mut self, state: &EngineState, rec: &record::Record) -> Result<Locator> {
        let bytes = record::encode(&rec.key, &rec.value, false)?;
        state.ensure_room(&mut self.file, bytes.len() as u64)?;
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::Inconsistent("no merge output after rotation".to_string()))?;
        let offset = file.append(&bytes, &rec.key, false)?;
        Ok(Locator {
            file_id: file.id(),
            offset,
            size: bytes.len() as u32,
        })
    }

    fn drop_last(&mut self, state: &EngineState, copy: Locator) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.drop_last_pending();
        }
        state.charge_stale(copy)
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            file.seal()?;
        }
        Ok(())
    }
}
