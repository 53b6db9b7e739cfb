//! Testing utilities including mock implementations.
//!
//! These let hosts and tests drive the controller without a running job
//! service or touching the filesystem.

use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use abstractor_client::{
    default_artifact_filename, ApiError, Artifact, JobId, JobResult, JobSnapshot, MedicalIcon,
    ProgressEvent, RemoteJobStatus, SourceKind, StepSnapshot, StepStatus, Submission, Summaries,
    PPTX_CONTENT_TYPE, RESULT_SCHEMA_VERSION,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use futures::channel::mpsc;
use futures::stream::{self, StreamExt};
use tokio::sync::Notify;

use crate::traits::clock::Clock;
use crate::traits::gateway::{JobGateway, ProgressFeed};
use crate::traits::ids::IdGenerator;
use crate::traits::sink::ArtifactSink;
use crate::types::StepId;

/// Sender half for a [`MockFeed::Channel`] feed.
pub type FeedSender = mpsc::UnboundedSender<Result<ProgressEvent, ApiError>>;

/// Scripted behavior for one `open_progress_feed` call.
pub enum MockFeed {
    /// Deliver these events, then end the stream.
    Events(Vec<Result<ProgressEvent, ApiError>>),
    /// Deliver these events, then stay open forever.
    Hanging(Vec<Result<ProgressEvent, ApiError>>),
    /// Events pushed by the test through a [`FeedSender`].
    Channel(mpsc::UnboundedReceiver<Result<ProgressEvent, ApiError>>),
    /// Opening the feed fails.
    Fail(ApiError),
}

impl MockFeed {
    /// A feed the test drives by hand.
    pub fn channel() -> (FeedSender, MockFeed) {
        let (tx, rx) = mpsc::unbounded();
        (tx, MockFeed::Channel(rx))
    }

    fn open(self) -> Result<ProgressFeed, ApiError> {
        match self {
            MockFeed::Events(events) => Ok(stream::iter(events).boxed()),
            MockFeed::Hanging(events) => Ok(stream::iter(events).chain(stream::pending()).boxed()),
            MockFeed::Channel(rx) => Ok(rx.boxed()),
            MockFeed::Fail(err) => Err(err),
        }
    }
}

/// Record of a call made to the mock gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockGatewayCall {
    Submit { source: SourceKind },
    OpenFeed { job_id: JobId },
    Poll { job_id: JobId },
    FetchArtifact { job_id: JobId },
}

/// A scripted [`JobGateway`].
///
/// Clones share scripts and call history, so a test can keep one handle
/// while the controller owns another.
///
/// Defaults when nothing is scripted: submissions return `job-1`, `job-2`,
/// ...; feeds fail to open; polls fail with a network error; artifact
/// fetches return a small deck.
#[derive(Clone, Default)]
pub struct MockGateway {
    /// Scripted submission outcomes, consumed in order
    submissions: Arc<RwLock<VecDeque<Result<JobId, ApiError>>>>,

    /// Submissions wait on this before answering
    submit_gate: Arc<RwLock<Option<Arc<Notify>>>>,

    /// Scripted feeds, one per open call
    feeds: Arc<Mutex<VecDeque<MockFeed>>>,

    /// Scripted poll outcomes, consumed in order
    polls: Arc<RwLock<VecDeque<Result<JobSnapshot, ApiError>>>>,

    /// Returned once `polls` is drained
    poll_fallback: Arc<RwLock<Option<Result<JobSnapshot, ApiError>>>>,

    /// Artifact fetch outcome
    artifact: Arc<RwLock<Option<Result<Artifact, ApiError>>>>,

    submit_counter: Arc<AtomicUsize>,

    /// Call tracking for assertions
    calls: Arc<RwLock<Vec<MockGatewayCall>>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of the next submission.
    pub fn with_submission(self, outcome: Result<JobId, ApiError>) -> Self {
        self.submissions.write().unwrap().push_back(outcome);
        self
    }

    /// Hold every submission until `gate` is notified.
    pub fn with_submit_gate(self, gate: Arc<Notify>) -> Self {
        *self.submit_gate.write().unwrap() = Some(gate);
        self
    }

    /// Queue the feed returned by the next open call.
    pub fn with_feed(self, feed: MockFeed) -> Self {
        self.feeds.lock().unwrap().push_back(feed);
        self
    }

    /// Queue the outcome of the next poll.
    pub fn with_poll(self, outcome: Result<JobSnapshot, ApiError>) -> Self {
        self.polls.write().unwrap().push_back(outcome);
        self
    }

    /// Outcome of every poll after the queued ones are used up.
    pub fn with_poll_fallback(self, outcome: Result<JobSnapshot, ApiError>) -> Self {
        *self.poll_fallback.write().unwrap() = Some(outcome);
        self
    }

    pub fn with_artifact(self, outcome: Result<Artifact, ApiError>) -> Self {
        *self.artifact.write().unwrap() = Some(outcome);
        self
    }

    /// Get all calls made to this mock.
    pub fn calls(&self) -> Vec<MockGatewayCall> {
        self.calls.read().unwrap().clone()
    }

    /// Number of gateway calls of any kind.
    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }

    pub fn submit_count(&self) -> usize {
        self.count(|c| matches!(c, MockGatewayCall::Submit { .. }))
    }

    pub fn feed_count(&self) -> usize {
        self.count(|c| matches!(c, MockGatewayCall::OpenFeed { .. }))
    }

    pub fn poll_count(&self) -> usize {
        self.count(|c| matches!(c, MockGatewayCall::Poll { .. }))
    }

    pub fn fetch_count(&self) -> usize {
        self.count(|c| matches!(c, MockGatewayCall::FetchArtifact { .. }))
    }

    fn count(&self, pred: impl Fn(&MockGatewayCall) -> bool) -> usize {
        self.calls.read().unwrap().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: MockGatewayCall) {
        self.calls.write().unwrap().push(call);
    }
}

#[async_trait]
impl JobGateway for MockGateway {
    async fn submit_job(&self, submission: &Submission) -> Result<JobId, ApiError> {
        self.record(MockGatewayCall::Submit {
            source: submission.kind(),
        });

        let gate = self.submit_gate.read().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let scripted = self.submissions.write().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            let n = self.submit_counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(JobId::new(format!("job-{}", n)))
        })
    }

    async fn open_progress_feed(&self, job_id: &JobId) -> Result<ProgressFeed, ApiError> {
        self.record(MockGatewayCall::OpenFeed {
            job_id: job_id.clone(),
        });

        let scripted = self.feeds.lock().unwrap().pop_front();
        scripted
            .unwrap_or_else(|| MockFeed::Fail(ApiError::Network("no feed scripted".into())))
            .open()
    }

    async fn poll_status(&self, job_id: &JobId) -> Result<JobSnapshot, ApiError> {
        self.record(MockGatewayCall::Poll {
            job_id: job_id.clone(),
        });

        let scripted = self.polls.write().unwrap().pop_front();
        match scripted {
            Some(outcome) => outcome,
            None => self
                .poll_fallback
                .read()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Err(ApiError::Network("no poll scripted".into()))),
        }
    }

    async fn fetch_artifact(&self, job_id: &JobId) -> Result<Artifact, ApiError> {
        self.record(MockGatewayCall::FetchArtifact {
            job_id: job_id.clone(),
        });

        self.artifact
            .read()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Ok(deck(job_id)))
    }
}

/// In-memory [`ArtifactSink`].
#[derive(Clone, Default)]
pub struct MemorySink {
    saved: Arc<RwLock<Vec<Artifact>>>,
    fail_with: Arc<RwLock<Option<io::ErrorKind>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every persist call fail.
    pub fn failing(kind: io::ErrorKind) -> Self {
        let sink = Self::default();
        *sink.fail_with.write().unwrap() = Some(kind);
        sink
    }

    pub fn saved(&self) -> Vec<Artifact> {
        self.saved.read().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactSink for MemorySink {
    async fn persist(&self, artifact: &Artifact) -> io::Result<PathBuf> {
        if let Some(kind) = *self.fail_with.read().unwrap() {
            return Err(io::Error::new(kind, "sink unavailable"));
        }
        self.saved.write().unwrap().push(artifact.clone());
        Ok(PathBuf::from("memory").join(&artifact.filename))
    }
}

/// A clock that only moves when told to.
#[derive(Clone)]
pub struct FixedClock {
    now: Arc<RwLock<DateTime<Utc>>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(RwLock::new(now)),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.now.write().unwrap() += by;
    }
}

impl Default for FixedClock {
    fn default() -> Self {
        Self::new(test_epoch())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap()
    }
}

/// Ids `log-1`, `log-2`, ...
#[derive(Clone, Default)]
pub struct SequentialIds {
    next: Arc<AtomicU64>,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> String {
        format!("log-{}", self.next.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

// =============================================================================
// Snapshot builders
// =============================================================================

/// Fixed reference time used by the builders.
pub fn test_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 2, 10, 0, 0)
        .single()
        .unwrap_or_default()
}

/// One step as the server would send it.
pub fn step_snapshot(id: &str, status: StepStatus, message: &str) -> StepSnapshot {
    let name = StepId::from_wire(id)
        .map(|s| s.default_name(SourceKind::Url).to_string())
        .unwrap_or_else(|| id.to_string());
    StepSnapshot {
        id: id.to_string(),
        name,
        status,
        message: message.to_string(),
        timestamp: None,
    }
}

/// A snapshot with the given steps and no result.
pub fn snapshot(job_id: &str, status: RemoteJobStatus, steps: Vec<StepSnapshot>) -> JobSnapshot {
    JobSnapshot {
        job_id: JobId::new(job_id),
        status,
        steps,
        result: None,
        error: None,
        created_at: test_epoch(),
        updated_at: test_epoch(),
    }
}

/// Acquisition done, parsing under way.
pub fn processing_snapshot(job_id: &str) -> JobSnapshot {
    snapshot(
        job_id,
        RemoteJobStatus::Processing,
        vec![
            step_snapshot("scrape", StepStatus::Completed, "Article content retrieved successfully"),
            step_snapshot("parse", StepStatus::Processing, "Parsing and extracting information..."),
            step_snapshot("summarize", StepStatus::Pending, "Waiting to start..."),
            step_snapshot("generate", StepStatus::Pending, "Waiting to start..."),
        ],
    )
}

/// All four steps done, with a result titled `title`.
pub fn completed_snapshot(job_id: &str, title: &str) -> JobSnapshot {
    let mut snap = snapshot(
        job_id,
        RemoteJobStatus::Completed,
        vec![
            step_snapshot("scrape", StepStatus::Completed, "Article content retrieved successfully"),
            step_snapshot("parse", StepStatus::Completed, "Content parsed successfully"),
            step_snapshot("summarize", StepStatus::Completed, "Summaries generated"),
            step_snapshot("generate", StepStatus::Completed, "PowerPoint created successfully"),
        ],
    );
    snap.result = Some(job_result(title));
    snap
}

/// Failed while summarizing.
pub fn failed_snapshot(job_id: &str, error: &str) -> JobSnapshot {
    let mut snap = snapshot(
        job_id,
        RemoteJobStatus::Failed,
        vec![
            step_snapshot("scrape", StepStatus::Completed, "Article content retrieved successfully"),
            step_snapshot("parse", StepStatus::Completed, "Content parsed successfully"),
            step_snapshot("summarize", StepStatus::Error, error),
            step_snapshot("generate", StepStatus::Pending, "Waiting to start..."),
        ],
    );
    snap.error = Some(error.to_string());
    snap
}

pub fn job_result(title: &str) -> JobResult {
    JobResult {
        schema_version: RESULT_SCHEMA_VERSION,
        summaries: Summaries {
            title: Some(title.to_string()),
            population: Some("Adults aged 40-75".to_string()),
            findings: Some("Reduced risk of major cardiovascular events".to_string()),
            ..Summaries::default()
        },
        medical_icon: MedicalIcon::Cardiology,
        quality_score: Some(0.9),
        file_path: None,
        extracted_data: None,
    }
}

/// The artifact the mock gateway hands out by default.
pub fn deck(job_id: &JobId) -> Artifact {
    Artifact {
        filename: default_artifact_filename(job_id),
        content_type: Some(PPTX_CONTENT_TYPE.to_string()),
        bytes: Bytes::from_static(b"PK\x03\x04deck"),
    }
}
