//! Observable controller state.

use std::collections::{HashMap, HashSet};

use abstractor_client::JobId;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error_detail::ErrorDetail;
use super::job::{Job, Step, StepId};
use super::log::LogEntry;
use super::result::ExtractionResult;

/// Externally visible lifecycle phase.
///
/// Push versus polling is internal to tracking and never shows up here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Submitting,
    Tracking,
    Completed,
    Failed,
}

impl Phase {
    /// Submission or tracking in flight.
    pub fn is_active(&self) -> bool {
        matches!(self, Phase::Submitting | Phase::Tracking)
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }
}

/// Snapshot published to observers after every mutation.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerState {
    pub phase: Phase,
    pub job: Option<Job>,
    pub error: Option<ErrorDetail>,
    pub logs: Vec<LogEntry>,

    /// Bumped on every `start` and `reset`; trackers holding an older
    /// value must not touch the state.
    #[serde(skip)]
    pub(crate) generation: u64,
    /// (step wire id, message) pairs already logged.
    #[serde(skip)]
    pub(crate) seen_logs: HashSet<(String, String)>,
    /// When each step was first seen processing, for log durations.
    #[serde(skip)]
    pub(crate) step_started: HashMap<StepId, DateTime<Utc>>,
}

impl ControllerState {
    pub(crate) fn idle(generation: u64) -> Self {
        Self {
            phase: Phase::Idle,
            job: None,
            error: None,
            logs: Vec::new(),
            generation,
            seen_logs: HashSet::new(),
            step_started: HashMap::new(),
        }
    }

    pub fn job_id(&self) -> Option<&JobId> {
        self.job.as_ref().map(|j| &j.id)
    }

    pub fn result(&self) -> Option<&ExtractionResult> {
        self.job.as_ref().and_then(|j| j.result.as_ref())
    }

    pub fn steps(&self) -> &[Step] {
        self.job.as_ref().map_or(&[], |j| j.steps.as_slice())
    }

    /// The single resolved view of the current job.
    pub fn resolution(&self) -> Resolution<'_> {
        if let Some(error) = &self.error {
            return Resolution::Failed(error);
        }
        match &self.job {
            Some(job) => match &job.result {
                Some(result) => Resolution::Completed(result),
                None => Resolution::InProgress(&job.steps),
            },
            None => Resolution::Idle,
        }
    }
}

impl Default for ControllerState {
    fn default() -> Self {
        Self::idle(0)
    }
}

/// Exactly one of in-progress steps, a result, or an error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution<'a> {
    Idle,
    InProgress(&'a [Step]),
    Completed(&'a ExtractionResult),
    Failed(&'a ErrorDetail),
}
