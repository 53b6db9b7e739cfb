//! Gateway trait for talking to the job service.

use abstractor_client::{
    AbstractorClient, ApiError, Artifact, JobId, JobSnapshot, ProgressEvent, Submission,
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

/// A live progress feed. Ends when the server closes the connection.
pub type ProgressFeed = BoxStream<'static, Result<ProgressEvent, ApiError>>;

/// Transport operations the controller needs.
///
/// Implementations must normalize every failure into [`ApiError`] and never
/// retry on their own.
#[async_trait]
pub trait JobGateway: Send + Sync {
    /// Submit a validated input. Returns the server-assigned job id.
    async fn submit_job(&self, submission: &Submission) -> Result<JobId, ApiError>;

    /// Open the push feed for a job.
    async fn open_progress_feed(&self, job_id: &JobId) -> Result<ProgressFeed, ApiError>;

    /// Fetch the current snapshot.
    async fn poll_status(&self, job_id: &JobId) -> Result<JobSnapshot, ApiError>;

    /// Download the generated deck.
    async fn fetch_artifact(&self, job_id: &JobId) -> Result<Artifact, ApiError>;
}

#[async_trait]
impl JobGateway for AbstractorClient {
    async fn submit_job(&self, submission: &Submission) -> Result<JobId, ApiError> {
        AbstractorClient::submit_job(self, submission).await
    }

    async fn open_progress_feed(&self, job_id: &JobId) -> Result<ProgressFeed, ApiError> {
        let stream = AbstractorClient::open_progress_feed(self, job_id).await?;
        Ok(stream.boxed())
    }

    async fn poll_status(&self, job_id: &JobId) -> Result<JobSnapshot, ApiError> {
        AbstractorClient::poll_status(self, job_id).await
    }

    async fn fetch_artifact(&self, job_id: &JobId) -> Result<Artifact, ApiError> {
        AbstractorClient::fetch_artifact(self, job_id).await
    }
}
