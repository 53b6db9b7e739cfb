//! Jobs and their fixed pipeline steps.

use abstractor_client::{JobId, RemoteJobStatus, SourceKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::result::ExtractionResult;

pub use abstractor_client::StepStatus;

/// The four fixed pipeline stages, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    Acquisition,
    Parsing,
    Summarization,
    Generation,
}

impl StepId {
    pub const ALL: [StepId; 4] = [
        StepId::Acquisition,
        StepId::Parsing,
        StepId::Summarization,
        StepId::Generation,
    ];

    /// Identifier used by the server.
    pub fn wire_id(&self) -> &'static str {
        match self {
            StepId::Acquisition => "scrape",
            StepId::Parsing => "parse",
            StepId::Summarization => "summarize",
            StepId::Generation => "generate",
        }
    }

    /// Parse a server step id. Older server builds used gerund names.
    pub fn from_wire(id: &str) -> Option<Self> {
        match id {
            "scrape" | "scraping" => Some(StepId::Acquisition),
            "parse" | "parsing" | "extracting" => Some(StepId::Parsing),
            "summarize" | "summarizing" => Some(StepId::Summarization),
            "generate" | "generating" => Some(StepId::Generation),
            _ => None,
        }
    }

    pub fn default_name(&self, source: SourceKind) -> &'static str {
        match (self, source) {
            (StepId::Acquisition, SourceKind::Url) => "Scraping Article",
            (StepId::Acquisition, SourceKind::Pdf) => "Processing PDF",
            (StepId::Parsing, _) => "Parsing Content",
            (StepId::Summarization, _) => "AI Summarization",
            (StepId::Generation, _) => "Creating PowerPoint",
        }
    }
}

/// One pipeline stage of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Step {
    pub id: StepId,
    pub name: String,
    pub status: StepStatus,
    pub message: String,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Step {
    pub fn pending(id: StepId, source: SourceKind) -> Self {
        Self {
            id,
            name: id.default_name(source).to_string(),
            status: StepStatus::Pending,
            message: "Waiting to start...".to_string(),
            timestamp: None,
        }
    }
}

/// The four pending steps a new job starts with.
pub fn initial_steps(source: SourceKind) -> Vec<Step> {
    StepId::ALL
        .iter()
        .map(|id| Step::pending(*id, source))
        .collect()
}

/// Overall job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    InProgress,
    Completed,
    Failed,
}

impl From<RemoteJobStatus> for JobStatus {
    fn from(status: RemoteJobStatus) -> Self {
        match status {
            RemoteJobStatus::Started => JobStatus::Created,
            RemoteJobStatus::Processing => JobStatus::InProgress,
            RemoteJobStatus::Completed => JobStatus::Completed,
            RemoteJobStatus::Failed => JobStatus::Failed,
        }
    }
}

/// A submission being tracked from creation to artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: JobId,
    pub source: SourceKind,
    pub status: JobStatus,
    pub steps: Vec<Step>,
    pub result: Option<ExtractionResult>,
    /// Raw failure message reported by the server.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(id: JobId, source: SourceKind, now: DateTime<Utc>) -> Self {
        Self {
            id,
            source,
            status: JobStatus::Created,
            steps: initial_steps(source),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn step(&self, id: StepId) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// The step currently running, else the first one not yet finished.
    pub fn current_step(&self) -> Option<&Step> {
        self.steps
            .iter()
            .find(|s| s.status == StepStatus::Processing)
            .or_else(|| self.steps.iter().find(|s| !s.status.is_terminal()))
    }

    /// Number of steps that have completed successfully.
    pub fn completed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_steps_follow_source() {
        let url_steps = initial_steps(SourceKind::Url);
        let pdf_steps = initial_steps(SourceKind::Pdf);

        assert_eq!(url_steps.len(), 4);
        assert_eq!(url_steps[0].name, "Scraping Article");
        assert_eq!(pdf_steps[0].name, "Processing PDF");
        assert!(url_steps.iter().all(|s| s.status == StepStatus::Pending));
        assert_eq!(
            url_steps.iter().map(|s| s.id).collect::<Vec<_>>(),
            StepId::ALL.to_vec()
        );
    }

    #[test]
    fn test_wire_ids_roundtrip() {
        for id in StepId::ALL {
            assert_eq!(StepId::from_wire(id.wire_id()), Some(id));
        }
        assert_eq!(StepId::from_wire("extracting"), Some(StepId::Parsing));
        assert_eq!(StepId::from_wire("upload"), None);
    }

    #[test]
    fn test_current_step() {
        let mut job = Job::new(JobId::new("j1"), SourceKind::Url, Utc::now());
        assert_eq!(job.current_step().map(|s| s.id), Some(StepId::Acquisition));

        job.steps[0].status = StepStatus::Completed;
        job.steps[1].status = StepStatus::Processing;
        assert_eq!(job.current_step().map(|s| s.id), Some(StepId::Parsing));
        assert_eq!(job.completed_steps(), 1);
    }
}
