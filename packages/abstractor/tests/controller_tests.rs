//! End-to-end tests for the extraction controller against the mock gateway.

use std::sync::Arc;
use std::time::Duration;

use abstractor::testing::{
    completed_snapshot, failed_snapshot, processing_snapshot, snapshot, step_snapshot, FixedClock,
    MemorySink, MockFeed, MockGateway, SequentialIds,
};
use abstractor::{
    ControllerConfig, ControllerError, ControllerState, ErrorCode, ExtractionController,
    ExtractionInput, JobStatus, LogLevel, Phase, Resolution, StepStatus,
};
use abstractor_client::{ApiError, FileUpload, JobId, ProgressEvent, RemoteJobStatus, SourceKind};
use tokio::sync::Notify;
use tokio::time::timeout;

const ARTICLE_URL: &str = "https://jamanetwork.com/journals/jama/fullarticle/2810000";

fn controller(gateway: &MockGateway, sink: &MemorySink) -> ExtractionController {
    ExtractionController::builder(gateway.clone(), sink.clone())
        .with_config(
            ControllerConfig::new()
                .with_poll_interval(Duration::from_millis(1))
                .with_max_poll_attempts(60),
        )
        .with_clock(FixedClock::default())
        .with_ids(SequentialIds::new())
        .build()
}

async fn resolved(controller: &ExtractionController) -> ControllerState {
    timeout(Duration::from_secs(5), controller.wait_until_resolved())
        .await
        .expect("job did not resolve in time")
}

async fn wait_for(controller: &ExtractionController, pred: impl FnMut(&ControllerState) -> bool) {
    let mut rx = controller.watch();
    timeout(Duration::from_secs(5), rx.wait_for(pred))
        .await
        .expect("state never matched")
        .expect("controller dropped");
}

fn snapshot_event(snapshot: abstractor_client::JobSnapshot) -> Result<ProgressEvent, ApiError> {
    Ok(ProgressEvent::Snapshot(snapshot))
}

// =============================================================================
// start
// =============================================================================

#[tokio::test]
async fn test_start_enters_submitting_then_tracking() {
    let gate = Arc::new(Notify::new());
    let gateway = MockGateway::new()
        .with_submit_gate(gate.clone())
        .with_feed(MockFeed::Hanging(vec![]));
    let controller = controller(&gateway, &MemorySink::new());

    let task = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.start(ExtractionInput::url(ARTICLE_URL)).await })
    };

    wait_for(&controller, |s| s.phase == Phase::Submitting).await;
    let submitting = controller.snapshot();
    assert!(submitting.job.is_none());
    assert!(submitting.error.is_none());

    gate.notify_one();
    let job_id = task.await.unwrap().unwrap();

    let state = controller.snapshot();
    assert_eq!(job_id, JobId::new("job-1"));
    assert_eq!(state.phase, Phase::Tracking);

    let job = state.job.unwrap();
    assert_eq!(job.source, SourceKind::Url);
    assert_eq!(job.steps.len(), 4);
    assert!(job.steps.iter().all(|s| s.status == StepStatus::Pending));
}

#[tokio::test]
async fn test_start_without_input_makes_no_network_call() {
    let gateway = MockGateway::new();
    let controller = controller(&gateway, &MemorySink::new());

    let result = controller.start(ExtractionInput::default()).await;

    assert!(matches!(result, Err(ControllerError::InvalidInput(_))));
    assert_eq!(gateway.call_count(), 0);

    let state = controller.snapshot();
    assert_eq!(state.phase, Phase::Idle);
    assert!(state.job.is_none());
    assert_eq!(state.error.unwrap().code, ErrorCode::InvalidInput);
}

#[tokio::test]
async fn test_start_with_url_and_file_rejected() {
    let gateway = MockGateway::new();
    let controller = controller(&gateway, &MemorySink::new());

    let input = ExtractionInput {
        url: Some(ARTICLE_URL.into()),
        file: Some(FileUpload::new("article.pdf", b"%PDF-1.7".to_vec())),
    };
    let result = controller.start(input).await;

    assert!(matches!(result, Err(ControllerError::InvalidInput(_))));
    assert_eq!(gateway.call_count(), 0);
}

#[tokio::test]
async fn test_pdf_submission_uses_pdf_step_names() {
    let gateway = MockGateway::new().with_feed(MockFeed::Hanging(vec![]));
    let controller = controller(&gateway, &MemorySink::new());

    let file = FileUpload::new("trial.pdf", b"%PDF-1.7 body".to_vec());
    controller.start(ExtractionInput::file(file)).await.unwrap();

    let state = controller.snapshot();
    assert_eq!(state.steps()[0].name, "Processing PDF");
    assert_eq!(state.job.unwrap().source, SourceKind::Pdf);
}

#[tokio::test]
async fn test_submission_failure_leaves_no_job() {
    let gateway =
        MockGateway::new().with_submission(Err(ApiError::Network("connection refused".into())));
    let controller = controller(&gateway, &MemorySink::new());

    let result = controller.start(ExtractionInput::url(ARTICLE_URL)).await;

    assert!(matches!(
        result,
        Err(ControllerError::SubmissionFailed(ApiError::Network(_)))
    ));
    let state = controller.snapshot();
    assert_eq!(state.phase, Phase::Failed);
    assert!(state.job_id().is_none());

    let error = state.error.unwrap();
    assert_eq!(error.code, ErrorCode::SubmissionFailed);
    assert!(!error.recovery_actions.is_empty());
    assert_eq!(gateway.feed_count(), 0);
}

// =============================================================================
// Progress feed
// =============================================================================

#[tokio::test]
async fn test_feed_updates_resolve_to_completed() {
    let gateway = MockGateway::new().with_feed(MockFeed::Events(vec![
        snapshot_event(processing_snapshot("job-1")),
        snapshot_event(snapshot(
            "job-1",
            RemoteJobStatus::Processing,
            vec![
                step_snapshot("scrape", StepStatus::Pending, "Waiting to start..."),
                step_snapshot("parse", StepStatus::Completed, "Content parsed successfully"),
                step_snapshot("summarize", StepStatus::Processing, "Generating summaries..."),
            ],
        )),
        snapshot_event(completed_snapshot("job-1", "Statins for Primary Prevention")),
    ]));
    let controller = controller(&gateway, &MemorySink::new());

    controller.start(ExtractionInput::url(ARTICLE_URL)).await.unwrap();
    let state = resolved(&controller).await;

    assert_eq!(state.phase, Phase::Completed);
    let job = state.job.as_ref().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.steps.iter().all(|s| s.status == StepStatus::Completed));
    assert!(matches!(state.resolution(), Resolution::Completed(_)));

    let result = state.result().unwrap();
    assert_eq!(result.title(), Some("Statins for Primary Prevention"));
    assert_eq!(result.artifact.filename, "va_abstract_job-1.pptx");
    assert!(state.error.is_none());
    assert_eq!(gateway.poll_count(), 0);
}

#[tokio::test]
async fn test_completed_step_never_reverts() {
    let (tx, feed) = MockFeed::channel();
    let gateway = MockGateway::new().with_feed(feed);
    let controller = controller(&gateway, &MemorySink::new());
    controller.start(ExtractionInput::url(ARTICLE_URL)).await.unwrap();

    tx.unbounded_send(snapshot_event(processing_snapshot("job-1"))).unwrap();
    wait_for(&controller, |s| {
        s.steps().first().map(|step| step.status) == Some(StepStatus::Completed)
    })
    .await;

    tx.unbounded_send(snapshot_event(snapshot(
        "job-1",
        RemoteJobStatus::Processing,
        vec![
            step_snapshot("scrape", StepStatus::Processing, "Retrying fetch..."),
            step_snapshot("parse", StepStatus::Completed, "Content parsed successfully"),
        ],
    )))
    .unwrap();
    wait_for(&controller, |s| {
        s.steps().get(1).map(|step| step.status) == Some(StepStatus::Completed)
    })
    .await;

    let state = controller.snapshot();
    assert_eq!(state.steps()[0].status, StepStatus::Completed);
    assert_eq!(state.steps()[0].message, "Article content retrieved successfully");
}

#[tokio::test]
async fn test_errored_step_never_reverts_across_polling() {
    let gateway = MockGateway::new()
        .with_feed(MockFeed::Events(vec![
            snapshot_event(snapshot(
                "job-1",
                RemoteJobStatus::Processing,
                vec![step_snapshot("scrape", StepStatus::Error, "boom")],
            )),
            Err(ApiError::Network("connection reset".into())),
        ]))
        .with_poll(Ok(snapshot(
            "job-1",
            RemoteJobStatus::Processing,
            vec![step_snapshot("scrape", StepStatus::Processing, "Fetching article...")],
        )))
        .with_poll(Ok(completed_snapshot("job-1", "Late Result")));
    let controller = controller(&gateway, &MemorySink::new());

    controller.start(ExtractionInput::url(ARTICLE_URL)).await.unwrap();
    let state = resolved(&controller).await;

    assert_eq!(gateway.poll_count(), 2);
    assert_eq!(state.steps()[0].status, StepStatus::Error);
    assert_eq!(state.steps()[0].message, "boom");
    assert_eq!(state.logs.iter().filter(|l| l.message == "boom").count(), 1);
    assert!(!state.logs.iter().any(|l| l.message == "Fetching article..."));
}

#[tokio::test]
async fn test_redelivered_snapshot_does_not_duplicate_logs() {
    let gateway = MockGateway::new().with_feed(MockFeed::Events(vec![
        snapshot_event(processing_snapshot("job-1")),
        snapshot_event(processing_snapshot("job-1")),
        snapshot_event(completed_snapshot("job-1", "Deduplicated")),
    ]));
    let controller = controller(&gateway, &MemorySink::new());

    controller.start(ExtractionInput::url(ARTICLE_URL)).await.unwrap();
    let state = resolved(&controller).await;

    let parse_processing = state
        .logs
        .iter()
        .filter(|l| l.step == "parse" && l.message == "Parsing and extracting information...")
        .count();
    assert_eq!(parse_processing, 1);

    let scrape_done = state
        .logs
        .iter()
        .filter(|l| l.step == "scrape" && l.level == LogLevel::Success)
        .count();
    assert_eq!(scrape_done, 1);
}

#[tokio::test]
async fn test_failed_snapshot_records_error_detail() {
    let gateway = MockGateway::new().with_feed(MockFeed::Events(vec![snapshot_event(
        failed_snapshot("job-1", "Summarization quota exceeded"),
    )]));
    let controller = controller(&gateway, &MemorySink::new());

    controller.start(ExtractionInput::url(ARTICLE_URL)).await.unwrap();
    let state = resolved(&controller).await;

    assert_eq!(state.phase, Phase::Failed);
    assert!(state.result().is_none());
    assert_eq!(state.job.as_ref().unwrap().status, JobStatus::Failed);

    let error = state.error.as_ref().unwrap();
    assert_eq!(error.step, "summarize");
    assert_eq!(error.code, ErrorCode::ServerError);
    assert_eq!(error.message, "Summarization quota exceeded");
    assert!(!error.recovery_actions.is_empty());
}

// =============================================================================
// Polling fallback
// =============================================================================

#[tokio::test]
async fn test_feed_error_falls_back_to_polling_until_timeout() {
    let gateway = MockGateway::new()
        .with_feed(MockFeed::Events(vec![Err(ApiError::Network(
            "connection reset".into(),
        ))]))
        .with_poll_fallback(Ok(processing_snapshot("job-1")));
    let controller = controller(&gateway, &MemorySink::new());

    controller.start(ExtractionInput::url(ARTICLE_URL)).await.unwrap();
    let state = resolved(&controller).await;

    assert_eq!(state.phase, Phase::Failed);
    assert_eq!(state.error.as_ref().unwrap().code, ErrorCode::Timeout);
    assert_eq!(gateway.poll_count(), 60);

    let feed_warning = state
        .logs
        .iter()
        .find(|l| l.level == LogLevel::Warning)
        .unwrap();
    assert!(feed_warning.message.starts_with("FEED_ERROR"));
    assert!(feed_warning.message.ends_with("checking status every 1ms"));
}

#[tokio::test]
async fn test_zero_poll_budget_still_polls_once() {
    let gateway = MockGateway::new()
        .with_feed(MockFeed::Fail(ApiError::Network("refused".into())))
        .with_poll_fallback(Ok(processing_snapshot("job-1")));
    let controller = ExtractionController::builder(gateway.clone(), MemorySink::new())
        .with_config(
            ControllerConfig::new()
                .with_poll_interval(Duration::from_millis(1))
                .with_max_poll_attempts(0),
        )
        .with_clock(FixedClock::default())
        .with_ids(SequentialIds::new())
        .build();

    controller.start(ExtractionInput::url(ARTICLE_URL)).await.unwrap();
    let state = resolved(&controller).await;

    assert_eq!(gateway.poll_count(), 1);
    assert_eq!(state.error.as_ref().unwrap().code, ErrorCode::Timeout);
    assert!(state.error.as_ref().unwrap().reason.contains("after 1 status checks"));
}

#[tokio::test]
async fn test_polling_reaches_completion() {
    let gateway = MockGateway::new()
        .with_feed(MockFeed::Fail(ApiError::Server {
            status: 502,
            message: "Bad Gateway".into(),
        }))
        .with_poll(Ok(processing_snapshot("job-1")))
        .with_poll(Err(ApiError::Timeout))
        .with_poll(Ok(completed_snapshot("job-1", "Polled Result")));
    let controller = controller(&gateway, &MemorySink::new());

    controller.start(ExtractionInput::url(ARTICLE_URL)).await.unwrap();
    let state = resolved(&controller).await;

    assert_eq!(state.phase, Phase::Completed);
    assert_eq!(state.result().unwrap().title(), Some("Polled Result"));
    assert_eq!(gateway.poll_count(), 3);
    assert!(state
        .logs
        .iter()
        .any(|l| l.message == "Status check failed (attempt 2/60)"));
}

#[tokio::test]
async fn test_in_band_stream_error_falls_back_to_polling() {
    let gateway = MockGateway::new()
        .with_feed(MockFeed::Hanging(vec![Ok(ProgressEvent::StreamError {
            message: "Job not found".into(),
        })]))
        .with_poll(Ok(completed_snapshot("job-1", "Recovered")));
    let controller = controller(&gateway, &MemorySink::new());

    controller.start(ExtractionInput::url(ARTICLE_URL)).await.unwrap();
    let state = resolved(&controller).await;

    assert_eq!(state.phase, Phase::Completed);
    assert_eq!(gateway.poll_count(), 1);
}

#[tokio::test]
async fn test_feed_closed_before_terminal_falls_back_to_polling() {
    let gateway = MockGateway::new()
        .with_feed(MockFeed::Events(vec![
            snapshot_event(processing_snapshot("job-1")),
            Ok(ProgressEvent::Closed { status: None }),
        ]))
        .with_poll(Ok(completed_snapshot("job-1", "After Close")));
    let controller = controller(&gateway, &MemorySink::new());

    controller.start(ExtractionInput::url(ARTICLE_URL)).await.unwrap();
    let state = resolved(&controller).await;

    assert_eq!(state.phase, Phase::Completed);
    assert_eq!(gateway.poll_count(), 1);
}

#[tokio::test]
async fn test_missing_job_while_polling_fails_immediately() {
    let gateway = MockGateway::new().with_poll(Err(ApiError::NotFound("Job not found".into())));
    let controller = controller(&gateway, &MemorySink::new());

    controller.start(ExtractionInput::url(ARTICLE_URL)).await.unwrap();
    let state = resolved(&controller).await;

    assert_eq!(state.phase, Phase::Failed);
    assert_eq!(state.error.as_ref().unwrap().code, ErrorCode::ServerError);
    assert_eq!(gateway.poll_count(), 1);
}

// =============================================================================
// download
// =============================================================================

#[tokio::test]
async fn test_download_requires_completed_job() {
    let gateway = MockGateway::new().with_feed(MockFeed::Hanging(vec![]));
    let sink = MemorySink::new();
    let controller = controller(&gateway, &sink);

    let before_start = controller.download(&JobId::new("job-1")).await;
    assert!(matches!(before_start, Err(ControllerError::NoArtifact)));

    let job_id = controller.start(ExtractionInput::url(ARTICLE_URL)).await.unwrap();
    let while_tracking = controller.download(&job_id).await;
    assert!(matches!(while_tracking, Err(ControllerError::NoArtifact)));

    assert_eq!(gateway.fetch_count(), 0);
    assert!(sink.saved().is_empty());
}

#[tokio::test]
async fn test_download_after_completion_fetches_once_and_persists() {
    let gateway = MockGateway::new().with_feed(MockFeed::Events(vec![snapshot_event(
        completed_snapshot("job-1", "Downloadable"),
    )]));
    let sink = MemorySink::new();
    let controller = controller(&gateway, &sink);

    let job_id = controller.start(ExtractionInput::url(ARTICLE_URL)).await.unwrap();
    resolved(&controller).await;

    let path = controller.download(&job_id).await.unwrap();

    assert_eq!(gateway.fetch_count(), 1);
    let saved = sink.saved();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].filename, "va_abstract_job-1.pptx");
    assert!(path.ends_with("va_abstract_job-1.pptx"));
}

#[tokio::test]
async fn test_download_failure_keeps_completed_resolution() {
    let gateway = MockGateway::new()
        .with_feed(MockFeed::Events(vec![snapshot_event(completed_snapshot(
            "job-1", "Kept",
        ))]))
        .with_artifact(Err(ApiError::Server {
            status: 500,
            message: "PowerPoint file not found".into(),
        }));
    let controller = controller(&gateway, &MemorySink::new());

    let job_id = controller.start(ExtractionInput::url(ARTICLE_URL)).await.unwrap();
    resolved(&controller).await;

    let result = controller.download(&job_id).await;

    assert!(matches!(result, Err(ControllerError::DownloadFailed(_))));
    let state = controller.snapshot();
    assert_eq!(state.phase, Phase::Completed);
    assert!(state.error.is_none());
    assert!(state
        .logs
        .iter()
        .any(|l| l.level == LogLevel::Error && l.message.starts_with("DOWNLOAD_FAILED")));
}

#[tokio::test]
async fn test_sink_failure_is_download_failed() {
    let gateway = MockGateway::new().with_feed(MockFeed::Events(vec![snapshot_event(
        completed_snapshot("job-1", "Unsaved"),
    )]));
    let sink = MemorySink::failing(std::io::ErrorKind::PermissionDenied);
    let controller = controller(&gateway, &sink);

    let job_id = controller.start(ExtractionInput::url(ARTICLE_URL)).await.unwrap();
    resolved(&controller).await;

    let result = controller.download(&job_id).await;

    assert!(matches!(result, Err(ControllerError::DownloadFailed(_))));
    assert_eq!(gateway.fetch_count(), 1);
}

// =============================================================================
// reset, retry and cancellation
// =============================================================================

#[tokio::test]
async fn test_reset_closes_subscription_and_clears_state() {
    let (tx, feed) = MockFeed::channel();
    let gateway = MockGateway::new().with_feed(feed);
    let controller = controller(&gateway, &MemorySink::new());

    controller.start(ExtractionInput::url(ARTICLE_URL)).await.unwrap();
    tx.unbounded_send(snapshot_event(processing_snapshot("job-1"))).unwrap();
    wait_for(&controller, |s| {
        s.steps().first().map(|step| step.status) == Some(StepStatus::Completed)
    })
    .await;

    controller.reset().await;
    let generation = controller.generation();

    // A stale event must not resurrect the discarded job.
    let _ = tx.unbounded_send(snapshot_event(completed_snapshot("job-1", "Stale")));
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The tracker dropped its end of the feed.
    assert!(tx.is_closed());

    let state = controller.snapshot();
    assert_eq!(state.phase, Phase::Idle);
    assert!(state.job.is_none());
    assert!(state.steps().is_empty());
    assert!(state.logs.is_empty());
    assert!(state.result().is_none());
    assert!(state.error.is_none());
    assert_eq!(controller.generation(), generation);
}

#[tokio::test]
async fn test_new_start_supersedes_previous_job() {
    let (first_tx, first_feed) = MockFeed::channel();
    let gateway = MockGateway::new()
        .with_feed(first_feed)
        .with_feed(MockFeed::Hanging(vec![]));
    let controller = controller(&gateway, &MemorySink::new());

    controller.start(ExtractionInput::url(ARTICLE_URL)).await.unwrap();
    let second = controller.start(ExtractionInput::url(ARTICLE_URL)).await.unwrap();
    assert_eq!(second, JobId::new("job-2"));

    let _ = first_tx.unbounded_send(snapshot_event(completed_snapshot("job-1", "Old")));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let state = controller.snapshot();
    assert_eq!(state.phase, Phase::Tracking);
    assert_eq!(state.job_id(), Some(&JobId::new("job-2")));
    assert!(state.result().is_none());
}

#[tokio::test]
async fn test_reset_during_submission_cancels_start() {
    let gate = Arc::new(Notify::new());
    let gateway = MockGateway::new().with_submit_gate(gate.clone());
    let controller = controller(&gateway, &MemorySink::new());

    let task = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.start(ExtractionInput::url(ARTICLE_URL)).await })
    };
    wait_for(&controller, |s| s.phase == Phase::Submitting).await;

    controller.reset().await;
    gate.notify_one();

    let result = task.await.unwrap();
    assert!(matches!(result, Err(ControllerError::Cancelled)));

    let state = controller.snapshot();
    assert_eq!(state.phase, Phase::Idle);
    assert!(state.job.is_none());
    assert_eq!(gateway.feed_count(), 0);
}

#[tokio::test]
async fn test_retry_resubmits_last_input() {
    let gateway = MockGateway::new()
        .with_submission(Err(ApiError::Timeout))
        .with_feed(MockFeed::Hanging(vec![]));
    let controller = controller(&gateway, &MemorySink::new());

    assert_eq!(controller.retry().await.unwrap(), None);

    let first = controller.start(ExtractionInput::url(ARTICLE_URL)).await;
    assert!(first.is_err());

    let retried = controller.retry().await.unwrap();
    assert_eq!(retried, Some(JobId::new("job-1")));
    assert_eq!(gateway.submit_count(), 2);
    assert_eq!(controller.snapshot().phase, Phase::Tracking);
}

#[tokio::test]
async fn test_retry_after_reset_is_noop() {
    let gateway = MockGateway::new().with_feed(MockFeed::Hanging(vec![]));
    let controller = controller(&gateway, &MemorySink::new());

    controller.start(ExtractionInput::url(ARTICLE_URL)).await.unwrap();
    controller.reset().await;

    assert_eq!(controller.retry().await.unwrap(), None);
    assert_eq!(gateway.submit_count(), 1);
}

#[tokio::test]
async fn test_subscribe_follows_existing_job() {
    let gateway = MockGateway::new().with_feed(MockFeed::Events(vec![snapshot_event(
        completed_snapshot("remote-7", "Subscribed"),
    )]));
    let controller = controller(&gateway, &MemorySink::new());

    controller.subscribe(JobId::new("remote-7")).await;
    let state = resolved(&controller).await;

    assert_eq!(state.phase, Phase::Completed);
    assert_eq!(state.result().unwrap().title(), Some("Subscribed"));
    assert_eq!(gateway.submit_count(), 0);
}

// =============================================================================
// Logs
// =============================================================================

#[tokio::test]
async fn test_export_logs_format() {
    let gateway = MockGateway::new().with_feed(MockFeed::Events(vec![snapshot_event(
        completed_snapshot("job-1", "Exported"),
    )]));
    let controller = controller(&gateway, &MemorySink::new());

    controller.start(ExtractionInput::url(ARTICLE_URL)).await.unwrap();
    let state = resolved(&controller).await;
    let text = controller.export_logs();

    let entries: Vec<&str> = text.split("\n\n").collect();
    assert_eq!(entries.len(), state.logs.len());
    assert_eq!(
        entries[0],
        format!(
            "[2025-03-02T10:00:00.000Z] PIPELINE - INFO: Submitting article URL {}",
            ARTICLE_URL
        )
    );
    assert_eq!(
        entries.last().copied(),
        Some("[2025-03-02T10:00:00.000Z] PIPELINE - SUCCESS: Extraction completed")
    );

    let ids: Vec<&str> = state.logs.iter().map(|l| l.id.as_str()).collect();
    assert_eq!(ids[0], "log-1");
    assert_eq!(ids[1], "log-2");
}
