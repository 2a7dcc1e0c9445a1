/// Terminal status and retention of a run
use crate::runtime::data::{RunExecutionData, RunStatus};
use crate::workflow::types::{SaveDataPolicy, WorkflowSettings};

/// Outcome flags the engine collects while running
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunFlags {
    pub crashed: bool,
    pub canceled: bool,
}

/// Final status of a run
///
/// Overrides apply in order crashed, canceled, failed (recorded error), so a
/// later flag wins. A pending `wait_till` turns any outcome into `Waiting`.
pub fn determine_status(data: &RunExecutionData, flags: RunFlags) -> RunStatus {
    let failed = data.error.is_some();

    let mut status = RunStatus::Success;
    if flags.crashed {
        status = RunStatus::Crashed;
    }
    if flags.canceled {
        status = RunStatus::Canceled;
    }
    if failed {
        status = RunStatus::Failed;
    }

    if data.wait_till.is_some() {
        status = RunStatus::Waiting;
    }
    status
}

/// Whether retention settings discard the run record
pub fn needs_delete(status: RunStatus, settings: &WorkflowSettings) -> bool {
    match status {
        RunStatus::Success => settings.save_data_success_execution == SaveDataPolicy::None,
        RunStatus::Failed | RunStatus::Crashed => settings.save_data_error_execution == SaveDataPolicy::None,
        _ => false,
    }
}
