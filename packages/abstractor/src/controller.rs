//! The extraction job controller.
//!
//! Owns the lifecycle of at most one job at a time and publishes every
//! change through a `watch` channel. Hosts issue actions and read
//! snapshots; nothing outside this module mutates state.
//!
//! ```text
//! Idle ──start──► Submitting ──job id──► Tracking ──► Completed | Failed
//!   ▲                 │
//!   └─reset / start───┘ (from any phase)
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use abstractor_client::{JobId, SourceKind, Submission};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{ControllerError, Result};
use crate::input::ExtractionInput;
use crate::reconcile::{fail, push_log, LogStamp};
use crate::traits::clock::{Clock, SystemClock};
use crate::traits::gateway::JobGateway;
use crate::traits::ids::{IdGenerator, UuidIds};
use crate::traits::sink::ArtifactSink;
use crate::tracker;
use crate::types::{
    export_logs, ControllerConfig, ControllerState, ErrorCode, ErrorDetail, Job, JobStatus,
    LogLevel, Phase, PIPELINE_LOG_STEP,
};

/// State shared between the controller handle and its tracker task.
pub(crate) struct Shared {
    pub(crate) gateway: Arc<dyn JobGateway>,
    sink: Arc<dyn ArtifactSink>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    pub(crate) config: ControllerConfig,
    state: watch::Sender<ControllerState>,
    session: Mutex<Session>,
}

/// Guarded by an async mutex so generation bumps and tracker spawns are
/// serialized.
#[derive(Default)]
struct Session {
    last_input: Option<ExtractionInput>,
    tracker: Option<CancellationToken>,
}

impl Session {
    fn cancel_tracker(&mut self) {
        if let Some(token) = self.tracker.take() {
            token.cancel();
        }
    }
}

impl Shared {
    /// Apply `f` if `generation` is still current. Returns `None` when the
    /// caller has been superseded.
    pub(crate) fn update<R>(
        &self,
        generation: u64,
        f: impl FnOnce(&mut ControllerState, &LogStamp<'_>) -> R,
    ) -> Option<R> {
        let mut out = None;
        self.state.send_if_modified(|state| {
            if state.generation != generation {
                return false;
            }
            let stamp = LogStamp {
                ids: self.ids.as_ref(),
                now: self.clock.now(),
            };
            out = Some(f(state, &stamp));
            true
        });
        out
    }

    /// Discard the current job and start a new generation. Caller holds the
    /// session lock.
    fn begin(&self, phase: Phase) -> u64 {
        let mut generation = 0;
        self.state.send_modify(|state| {
            generation = state.generation + 1;
            *state = ControllerState::idle(generation);
            state.phase = phase;
        });
        generation
    }

    fn current_generation(&self) -> u64 {
        self.state.borrow().generation
    }

    fn spawn_tracker(self: &Arc<Self>, session: &mut Session, job_id: JobId, generation: u64) {
        let token = CancellationToken::new();
        session.tracker = Some(token.clone());
        tokio::spawn(tracker::run(Arc::clone(self), job_id, generation, token));
    }
}

/// Builder for [`ExtractionController`].
pub struct ControllerBuilder {
    gateway: Arc<dyn JobGateway>,
    sink: Arc<dyn ArtifactSink>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    config: ControllerConfig,
}

impl ControllerBuilder {
    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_ids(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Arc::new(ids);
        self
    }

    pub fn build(self) -> ExtractionController {
        let (state, _) = watch::channel(ControllerState::default());
        ExtractionController {
            shared: Arc::new(Shared {
                gateway: self.gateway,
                sink: self.sink,
                clock: self.clock,
                ids: self.ids,
                config: self.config,
                state,
                session: Mutex::new(Session::default()),
            }),
        }
    }
}

/// Client-side controller for extraction jobs.
///
/// Cheap to clone; clones share the same job.
///
/// # Example
///
/// ```rust,ignore
/// use abstractor::{DirectorySink, ExtractionController, ExtractionInput};
/// use abstractor_client::AbstractorClient;
///
/// let controller = ExtractionController::builder(
///     AbstractorClient::from_env(),
///     DirectorySink::new("decks"),
/// )
/// .build();
///
/// let job_id = controller
///     .start(ExtractionInput::url("https://jamanetwork.com/journals/jama/fullarticle/1"))
///     .await?;
/// let state = controller.wait_until_resolved().await;
/// if state.result().is_some() {
///     controller.download(&job_id).await?;
/// }
/// ```
#[derive(Clone)]
pub struct ExtractionController {
    shared: Arc<Shared>,
}

impl ExtractionController {
    /// Start building a controller with the system clock, UUID log ids and
    /// default config.
    pub fn builder(
        gateway: impl JobGateway + 'static,
        sink: impl ArtifactSink + 'static,
    ) -> ControllerBuilder {
        ControllerBuilder {
            gateway: Arc::new(gateway),
            sink: Arc::new(sink),
            clock: Arc::new(SystemClock),
            ids: Arc::new(UuidIds),
            config: ControllerConfig::default(),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.shared.config
    }

    /// Submit a new job, discarding whatever was there before.
    ///
    /// Invalid input is rejected locally with an `INVALID_INPUT` error and no
    /// network call. On success the job is tracked in the background and its
    /// id returned.
    pub async fn start(&self, input: ExtractionInput) -> Result<JobId> {
        let validated = input.validate(self.shared.config.max_upload_bytes);

        let generation = {
            let mut session = self.shared.session.lock().await;
            session.cancel_tracker();
            match validated {
                Ok(_) => {
                    session.last_input = Some(input);
                    self.shared.begin(Phase::Submitting)
                }
                Err(_) => self.shared.begin(Phase::Idle),
            }
        };

        let submission = match validated {
            Ok(submission) => submission,
            Err(message) => {
                warn!(reason = %message, "Extraction input rejected");
                self.shared.update(generation, |state, stamp| {
                    push_log(
                        state,
                        stamp,
                        PIPELINE_LOG_STEP,
                        LogLevel::Error,
                        format!("{}: {}", ErrorCode::InvalidInput, message),
                        None,
                    );
                    state.error = Some(ErrorDetail::invalid_input(message.clone(), stamp.now));
                });
                return Err(ControllerError::InvalidInput(message));
            }
        };

        self.submit(generation, submission).await
    }

    async fn submit(&self, generation: u64, submission: Submission) -> Result<JobId> {
        let source = submission.kind();
        let description = match &submission {
            Submission::Url(url) => format!("Submitting article URL {}", url),
            Submission::File(file) => {
                format!("Uploading PDF {} ({} bytes)", file.filename, file.len())
            }
        };
        info!(source = ?source, generation, "Submitting extraction job");
        self.shared.update(generation, |state, stamp| {
            push_log(state, stamp, PIPELINE_LOG_STEP, LogLevel::Info, description, None);
        });

        let job_id = match self.shared.gateway.submit_job(&submission).await {
            Ok(job_id) => job_id,
            Err(err) => {
                warn!(error = %err, "Job submission failed");
                let recorded = self.shared.update(generation, |state, stamp| {
                    let detail = ErrorDetail::submission_failed(&err, stamp.now);
                    fail(state, stamp, detail);
                });
                return match recorded {
                    Some(()) => Err(ControllerError::SubmissionFailed(err)),
                    None => Err(ControllerError::Cancelled),
                };
            }
        };

        self.track(generation, job_id.clone(), source).await?;
        Ok(job_id)
    }

    /// Seed the job and hand it to a fresh tracker.
    async fn track(&self, generation: u64, job_id: JobId, source: SourceKind) -> Result<()> {
        let mut session = self.shared.session.lock().await;

        let seeded = self.shared.update(generation, |state, stamp| {
            state.job = Some(Job::new(job_id.clone(), source, stamp.now));
            state.phase = Phase::Tracking;
            push_log(
                state,
                stamp,
                PIPELINE_LOG_STEP,
                LogLevel::Info,
                format!("Job {} created", job_id),
                None,
            );
        });
        if seeded.is_none() {
            info!(job_id = %job_id, "Submission superseded before tracking started");
            return Err(ControllerError::Cancelled);
        }

        info!(job_id = %job_id, generation, "Tracking job");
        self.shared.spawn_tracker(&mut session, job_id, generation);
        Ok(())
    }

    /// Follow an existing job, replacing any previous subscription.
    ///
    /// Re-subscribing to the job already being tracked keeps its steps and
    /// logs; any other id starts from four pending steps.
    pub async fn subscribe(&self, job_id: JobId) {
        let mut session = self.shared.session.lock().await;
        session.cancel_tracker();

        let now = self.shared.clock.now();
        let mut generation = 0;
        self.shared.state.send_modify(|state| {
            generation = state.generation + 1;
            let same_job = state.job_id() == Some(&job_id) && !state.phase.is_resolved();
            if same_job {
                state.generation = generation;
            } else {
                *state = ControllerState::idle(generation);
                state.job = Some(Job::new(job_id.clone(), SourceKind::Url, now));
            }
            state.phase = Phase::Tracking;
        });

        info!(job_id = %job_id, generation, "Subscribed to job");
        self.shared.spawn_tracker(&mut session, job_id, generation);
    }

    /// Fetch the finished deck and hand it to the sink.
    ///
    /// Failures are logged but leave the job's resolution untouched.
    pub async fn download(&self, job_id: &JobId) -> Result<PathBuf> {
        let generation = {
            let state = self.shared.state.borrow();
            match &state.job {
                Some(job)
                    if &job.id == job_id
                        && job.status == JobStatus::Completed
                        && job.result.is_some() =>
                {
                    state.generation
                }
                _ => return Err(ControllerError::NoArtifact),
            }
        };

        self.log(generation, LogLevel::Info, "Downloading slide deck".to_string(), None);

        let artifact = match self.shared.gateway.fetch_artifact(job_id).await {
            Ok(artifact) => artifact,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Artifact download failed");
                let message = e.user_message();
                self.log(
                    generation,
                    LogLevel::Error,
                    format!("{}: {}", ErrorCode::DownloadFailed, message),
                    Some(e.to_string()),
                );
                return Err(ControllerError::DownloadFailed(message));
            }
        };

        let path = match self.shared.sink.persist(&artifact).await {
            Ok(path) => path,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Saving artifact failed");
                let message = format!("could not save {}: {}", artifact.filename, e);
                self.log(
                    generation,
                    LogLevel::Error,
                    format!("{}: {}", ErrorCode::DownloadFailed, message),
                    None,
                );
                return Err(ControllerError::DownloadFailed(message));
            }
        };

        self.log(
            generation,
            LogLevel::Success,
            format!("Slide deck saved to {}", path.display()),
            None,
        );
        Ok(path)
    }

    fn log(&self, generation: u64, level: LogLevel, message: String, details: Option<String>) {
        self.shared.update(generation, |state, stamp| {
            push_log(state, stamp, PIPELINE_LOG_STEP, level, message, details);
        });
    }

    /// Run `start` again with the last accepted input. `Ok(None)` when
    /// there is nothing to retry.
    pub async fn retry(&self) -> Result<Option<JobId>> {
        let last_input = self.shared.session.lock().await.last_input.clone();
        match last_input {
            Some(input) => {
                info!("Retrying last extraction");
                self.start(input).await.map(Some)
            }
            None => Ok(None),
        }
    }

    /// Cancel any tracking and clear all job state and logs.
    pub async fn reset(&self) {
        let mut session = self.shared.session.lock().await;
        session.cancel_tracker();
        session.last_input = None;
        let generation = self.shared.begin(Phase::Idle);
        info!(generation, "Controller reset");
    }

    /// Current state.
    pub fn snapshot(&self) -> ControllerState {
        self.shared.state.borrow().clone()
    }

    /// Receiver that sees every state change.
    pub fn watch(&self) -> watch::Receiver<ControllerState> {
        self.shared.state.subscribe()
    }

    /// Wait until nothing is in flight and return that state.
    ///
    /// Returns immediately when idle.
    pub async fn wait_until_resolved(&self) -> ControllerState {
        let mut rx = self.watch();
        let state = match rx.wait_for(|state| !state.phase.is_active()).await {
            Ok(state) => state.clone(),
            Err(_) => self.snapshot(),
        };
        state
    }

    /// Current log as plain text.
    pub fn export_logs(&self) -> String {
        export_logs(&self.shared.state.borrow().logs)
    }

    /// Generation of the current job; changes on every `start`,
    /// `subscribe` and `reset`.
    pub fn generation(&self) -> u64 {
        self.shared.current_generation()
    }
}
