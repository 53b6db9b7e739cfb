//! Folding server snapshots into controller state.
//!
//! Everything here is synchronous and runs inside the state channel's
//! update closure, so each function sees and leaves a consistent state.

use abstractor_client::{JobSnapshot, RemoteJobStatus, StepSnapshot};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::traits::ids::IdGenerator;
use crate::types::{
    ControllerState, ErrorDetail, ExtractionResult, JobStatus, LogEntry, LogLevel, Phase, StepId,
    StepStatus, PIPELINE_LOG_STEP,
};

/// What a snapshot did to the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Applied {
    /// Job still running.
    Progress,
    Completed,
    Failed,
    /// Snapshot was for another job or arrived after resolution.
    Ignored,
}

impl Applied {
    pub(crate) fn is_terminal(&self) -> bool {
        matches!(self, Applied::Completed | Applied::Failed)
    }
}

/// Stamps entries with time and ids.
pub(crate) struct LogStamp<'a> {
    pub ids: &'a dyn IdGenerator,
    pub now: DateTime<Utc>,
}

impl LogStamp<'_> {
    fn entry(&self, step: &str, level: LogLevel, message: impl Into<String>) -> LogEntry {
        LogEntry {
            id: self.ids.next_id(),
            timestamp: self.now,
            step: step.to_string(),
            level,
            message: message.into(),
            details: None,
            duration_ms: None,
        }
    }
}

/// Append a lifecycle entry. These are not de-duplicated.
pub(crate) fn push_log(
    state: &mut ControllerState,
    stamp: &LogStamp<'_>,
    step: &str,
    level: LogLevel,
    message: impl Into<String>,
    details: Option<String>,
) {
    let mut entry = stamp.entry(step, level, message);
    entry.details = details;
    state.logs.push(entry);
}

/// Resolve the current job as failed.
pub(crate) fn fail(state: &mut ControllerState, stamp: &LogStamp<'_>, detail: ErrorDetail) {
    if let Some(job) = state.job.as_mut() {
        job.status = JobStatus::Failed;
        job.updated_at = stamp.now;
    }

    let step = detail.step.clone();
    let message = format!("{}: {}", detail.code, detail.message);
    push_log(state, stamp, &step, LogLevel::Error, message, Some(detail.reason.clone()));

    state.error = Some(detail);
    state.phase = Phase::Failed;
}

/// Apply one authoritative snapshot.
pub(crate) fn apply_snapshot(
    state: &mut ControllerState,
    stamp: &LogStamp<'_>,
    snapshot: JobSnapshot,
) -> Applied {
    if state.phase.is_resolved() {
        return Applied::Ignored;
    }
    let Some(job) = state.job.as_ref() else {
        return Applied::Ignored;
    };
    if job.id != snapshot.job_id {
        warn!(expected = %job.id, got = %snapshot.job_id, "Snapshot for a different job ignored");
        return Applied::Ignored;
    }

    for incoming in &snapshot.steps {
        apply_step(state, stamp, incoming);
    }

    let job_id = snapshot.job_id.clone();
    if let Some(job) = state.job.as_mut() {
        job.status = snapshot.status.into();
        job.updated_at = snapshot.updated_at;
        job.error = snapshot.error.clone();
    }

    match snapshot.status {
        RemoteJobStatus::Completed => match snapshot.result {
            Some(result) => {
                let result = ExtractionResult::from_wire(&job_id, result);
                if let Some(job) = state.job.as_mut() {
                    job.result = Some(result);
                }
                state.phase = Phase::Completed;
                push_log(
                    state,
                    stamp,
                    PIPELINE_LOG_STEP,
                    LogLevel::Success,
                    "Extraction completed",
                    None,
                );
                Applied::Completed
            }
            None => {
                warn!(job_id = %job_id, "Job completed without a result");
                let detail = ErrorDetail::server(
                    PIPELINE_LOG_STEP,
                    "Job completed without a result",
                    stamp.now,
                );
                fail(state, stamp, detail);
                Applied::Failed
            }
        },
        RemoteJobStatus::Failed => {
            let failed_step = failed_step(state);
            let message = snapshot
                .error
                .unwrap_or_else(|| "Processing failed".to_string());
            let detail = ErrorDetail::pipeline_failed(failed_step, message, stamp.now);
            fail(state, stamp, detail);
            Applied::Failed
        }
        RemoteJobStatus::Started | RemoteJobStatus::Processing => Applied::Progress,
    }
}

/// The step that errored, else the one that was running.
fn failed_step(state: &ControllerState) -> Option<StepId> {
    let job = state.job.as_ref()?;
    job.steps
        .iter()
        .find(|s| s.status == StepStatus::Error)
        .or_else(|| job.current_step())
        .map(|s| s.id)
}

fn apply_step(state: &mut ControllerState, stamp: &LogStamp<'_>, incoming: &StepSnapshot) {
    let Some(id) = StepId::from_wire(&incoming.id) else {
        debug!(step = %incoming.id, "Unknown step id ignored");
        return;
    };
    let Some(step) = state
        .job
        .as_mut()
        .and_then(|job| job.steps.iter_mut().find(|s| s.id == id))
    else {
        return;
    };

    // Terminal steps stay terminal, and an errored step stays errored.
    let regresses = step.status.is_terminal() && !incoming.status.is_terminal();
    let clears_error = step.status == StepStatus::Error && incoming.status != StepStatus::Error;
    if regresses || clears_error {
        warn!(
            step = id.wire_id(),
            from = step.status.as_str(),
            to = incoming.status.as_str(),
            "Step regression ignored"
        );
        return;
    }

    step.status = incoming.status;
    step.message = incoming.message.clone();
    if !incoming.name.is_empty() {
        step.name = incoming.name.clone();
    }
    if incoming.timestamp.is_some() {
        step.timestamp = incoming.timestamp;
    }
    let step_time = step.timestamp.unwrap_or(stamp.now);

    let level = match incoming.status {
        StepStatus::Pending => return,
        StepStatus::Processing => {
            state.step_started.entry(id).or_insert(step_time);
            LogLevel::Info
        }
        StepStatus::Completed => LogLevel::Success,
        StepStatus::Error => LogLevel::Error,
    };

    if incoming.message.is_empty() {
        return;
    }
    let key = (id.wire_id().to_string(), incoming.message.clone());
    if !state.seen_logs.insert(key) {
        return;
    }

    let mut entry = stamp.entry(id.wire_id(), level, incoming.message.clone());
    if incoming.status == StepStatus::Completed {
        entry.duration_ms = state
            .step_started
            .get(&id)
            .map(|started| (step_time - *started).num_milliseconds().max(0) as u64);
    }
    debug!(step = id.wire_id(), status = incoming.status.as_str(), "Step updated");
    state.logs.push(entry);
}
