//! Pure REST client for the article abstractor job service.
//!
//! Submits an article (URL or PDF) for processing, follows the job over a
//! server-sent event stream or by polling, and downloads the generated
//! slide deck. The client never retries; retry policy belongs to the caller.
//!
//! # Example
//!
//! ```rust,ignore
//! use abstractor_client::{AbstractorClient, Submission};
//! use futures::StreamExt;
//!
//! let client = AbstractorClient::new("http://localhost:8000");
//!
//! let job_id = client
//!     .submit_job(&Submission::Url("https://jamanetwork.com/journals/jama/article/123".into()))
//!     .await?;
//!
//! let mut feed = client.open_progress_feed(&job_id).await?;
//! while let Some(event) = feed.next().await {
//!     println!("{:?}", event?);
//! }
//!
//! let deck = client.fetch_artifact(&job_id).await?;
//! ```

pub mod error;
pub mod streaming;
pub mod types;

pub use error::{ApiError, Result};
pub use streaming::ProgressStream;
pub use types::*;

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use error::error_message_from_body;

/// Default service location for local development.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Content type of the generated slide deck.
pub const PPTX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";

const PDF_CONTENT_TYPE: &str = "application/pdf";
const API_KEY_HEADER: &str = "X-API-Key";

/// Generous default: file processing requests can take a while.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Pure abstractor API client.
#[derive(Clone)]
pub struct AbstractorClient {
    http_client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl AbstractorClient {
    /// Create a new client for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        let http_client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Create from environment variables.
    ///
    /// Reads `ABSTRACTOR_API_BASE_URL` (default [`DEFAULT_BASE_URL`]),
    /// `ABSTRACTOR_API_KEY` and `ABSTRACTOR_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let base_url =
            std::env::var("ABSTRACTOR_API_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into());
        let mut client = Self::new(base_url);

        if let Ok(key) = std::env::var("ABSTRACTOR_API_KEY") {
            client = client.with_api_key(key);
        }

        if let Ok(raw) = std::env::var("ABSTRACTOR_TIMEOUT_SECS") {
            match raw.parse::<u64>() {
                Ok(secs) => client = client.with_timeout(Duration::from_secs(secs)),
                Err(_) => warn!(value = %raw, "Ignoring invalid ABSTRACTOR_TIMEOUT_SECS"),
            }
        }

        client
    }

    /// Send `X-API-Key` with every request.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the per-request timeout for non-streaming requests.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .http_client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => builder.header(API_KEY_HEADER, key),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, operation: &'static str) -> Result<Response> {
        let response = builder.send().await.map_err(|e| {
            warn!(operation, error = %e, "Abstractor request failed");
            ApiError::from_reqwest(e)
        })?;
        check_status(response, operation).await
    }

    /// Submit a URL or PDF for processing. Returns the new job's id.
    pub async fn submit_job(&self, submission: &Submission) -> Result<JobId> {
        let form = match submission {
            Submission::Url(url) => Form::new().text("url", url.clone()),
            Submission::File(file) => {
                let content_type = file.content_type.as_deref().unwrap_or(PDF_CONTENT_TYPE);
                let part = Part::bytes(file.bytes.to_vec())
                    .file_name(file.filename.clone())
                    .mime_str(content_type)
                    .map_err(ApiError::from_reqwest)?;
                Form::new().part("file", part)
            }
        };

        let builder = self
            .request(Method::POST, "/api/extract")
            .timeout(self.timeout)
            .multipart(form);
        let response = self.send(builder, "submit_job").await?;
        let body: SubmitResponse = decode_json(response).await?;

        info!(
            job_id = %body.job_id,
            source = ?submission.kind(),
            status = body.status.as_deref().unwrap_or("unknown"),
            "Job submitted"
        );
        Ok(body.job_id)
    }

    /// Open the server-sent event stream for a job.
    ///
    /// Only the connect timeout applies; the stream stays open until the
    /// server closes it or the caller drops it.
    pub async fn open_progress_feed(&self, job_id: &JobId) -> Result<ProgressStream> {
        let builder = self
            .request(Method::GET, &job_path("/api/progress", job_id))
            .header(header::ACCEPT, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache");
        let response = self.send(builder, "open_progress_feed").await?;

        debug!(job_id = %job_id, "Progress feed opened");
        Ok(ProgressStream::new(response.bytes_stream()))
    }

    /// Fetch the current job snapshot.
    pub async fn poll_status(&self, job_id: &JobId) -> Result<JobSnapshot> {
        let builder = self
            .request(Method::GET, &job_path("/api/status", job_id))
            .timeout(self.timeout);
        let response = self.send(builder, "poll_status").await?;
        let status = response.status();
        let snapshot: JobSnapshot = decode_json(response).await?;

        snapshot
            .validate()
            .map_err(|e| ApiError::invalid_body(status, e))
    }

    /// Download the generated deck for a completed job.
    pub async fn fetch_artifact(&self, job_id: &JobId) -> Result<Artifact> {
        let builder = self
            .request(Method::GET, &job_path("/api/download", job_id))
            .timeout(self.timeout);
        let response = self.send(builder, "fetch_artifact").await?;

        let headers = response.headers();
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let filename = headers
            .get(header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_disposition_filename)
            .unwrap_or_else(|| default_artifact_filename(job_id));

        let bytes = response.bytes().await.map_err(ApiError::from_reqwest)?;

        info!(job_id = %job_id, filename = %filename, size = bytes.len(), "Artifact downloaded");
        Ok(Artifact {
            filename,
            content_type,
            bytes,
        })
    }

    /// Delete a job and its server-side files.
    pub async fn delete_job(&self, job_id: &JobId) -> Result<()> {
        let builder = self
            .request(Method::DELETE, &job_path("/api/jobs", job_id))
            .timeout(self.timeout);
        self.send(builder, "delete_job").await?;

        info!(job_id = %job_id, "Job deleted");
        Ok(())
    }

    /// Health check. Falls back to the service root when `/api/health` is absent.
    pub async fn health_check(&self) -> Result<HealthStatus> {
        let builder = self
            .request(Method::GET, "/api/health")
            .timeout(self.timeout);
        match self.send(builder, "health_check").await {
            Ok(response) => decode_json(response).await,
            Err(ApiError::NotFound(_)) => {
                let builder = self.request(Method::GET, "/").timeout(self.timeout);
                let response = self.send(builder, "health_check").await?;
                decode_json(response).await
            }
            Err(e) => Err(e),
        }
    }
}

/// Suggested local filename for a job's deck.
pub fn default_artifact_filename(job_id: &JobId) -> String {
    format!("va_abstract_{}.pptx", job_id)
}

fn job_path(prefix: &str, job_id: &JobId) -> String {
    format!("{}/{}", prefix, urlencoding::encode(job_id.as_str()))
}

async fn check_status(response: Response, operation: &'static str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_message_from_body(status, &body);
    warn!(operation, status = %status, error = %message, "Abstractor API error");
    Err(ApiError::from_status(status, message))
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status: StatusCode = response.status();
    let body = response.text().await.map_err(ApiError::from_reqwest)?;
    serde_json::from_str(&body).map_err(|e| ApiError::invalid_body(status, e))
}

/// Extract a filename from a `Content-Disposition` header.
pub fn parse_content_disposition_filename(header: &str) -> Option<String> {
    // RFC 5987 form takes precedence
    if let Some(start) = header.find("filename*=") {
        let rest = &header[start + 10..];
        if let Some(quote_start) = rest.find("''") {
            let encoded = rest[quote_start + 2..].split([';', ' ']).next()?;
            if let Ok(decoded) = urlencoding::decode(encoded) {
                let filename = decoded.trim().to_string();
                if !filename.is_empty() {
                    return Some(filename);
                }
            }
        }
    }

    let start = header.find("filename=")?;
    let rest = &header[start + 9..];
    let name = match rest.strip_prefix('"') {
        Some(quoted) => quoted.split('"').next(),
        None => rest.split([';', ' ']).next(),
    }?;

    let name = name.trim();
    (!name.is_empty()).then(|| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builder() {
        let client = AbstractorClient::new("https://abstractor.example.org/")
            .with_api_key("k-test")
            .with_timeout(Duration::from_secs(5));

        assert_eq!(client.base_url(), "https://abstractor.example.org");
        assert_eq!(client.api_key.as_deref(), Some("k-test"));
        assert_eq!(client.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_job_path_is_encoded() {
        let path = job_path("/api/status", &JobId::new("a b/c"));
        assert_eq!(path, "/api/status/a%20b%2Fc");
    }

    #[test]
    fn test_content_disposition() {
        assert_eq!(
            parse_content_disposition_filename("attachment; filename=va_abstract_j1.pptx"),
            Some("va_abstract_j1.pptx".into())
        );
        assert_eq!(
            parse_content_disposition_filename(r#"attachment; filename="deck one.pptx""#),
            Some("deck one.pptx".into())
        );
        assert_eq!(
            parse_content_disposition_filename("attachment; filename*=UTF-8''d%C3%A9ck.pptx"),
            Some("déck.pptx".into())
        );
        assert_eq!(parse_content_disposition_filename("inline"), None);
    }

    #[test]
    fn test_default_artifact_filename() {
        assert_eq!(
            default_artifact_filename(&JobId::new("42")),
            "va_abstract_42.pptx"
        );
    }
}
