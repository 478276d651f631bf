use std::sync::Arc;
use std::time::Duration;

use crate::engine::merge;
use crate::engine::state::EngineState;
use crate::error::Result;
use crate::scheduler::{BackgroundTask, StopSignal};

pub(crate) struct MergeTask {
    state: Arc<EngineState>,
}

impl MergeTask {
    pub fn new(state: Arc<EngineState>) -> Self {
        Self { state }
    }
}

impl BackgroundTask for MergeTask {
    fn name(&self) -> &'static str {
        "merge"
    }

    fn interval(&self) -> Duration {
        self.state.config.merge.interval
    }

    fn execute(&self, stop: &StopSignal) -> Result<()> {
        if merge::needs_merge(&self.state)? {
            merge::run_merge(&self.state, stop)?;
        }
        Ok(())
    }
}
