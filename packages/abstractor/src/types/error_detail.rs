//! User-facing failure records.

use std::fmt;
use std::time::Duration;

use abstractor_client::ApiError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::format_interval;
use super::job::StepId;
use super::log::{CONNECTION_LOG_STEP, PIPELINE_LOG_STEP};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidInput,
    SubmissionFailed,
    /// Progress feed failed; triggers polling and is only ever logged.
    FeedError,
    Timeout,
    DownloadFailed,
    NoArtifact,
    ServerError,
    Cancelled,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::SubmissionFailed => "SUBMISSION_FAILED",
            ErrorCode::FeedError => "FEED_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::DownloadFailed => "DOWNLOAD_FAILED",
            ErrorCode::NoArtifact => "NO_ARTIFACT",
            ErrorCode::ServerError => "SERVER_ERROR",
            ErrorCode::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedLink {
    pub title: String,
    pub url: String,
}

/// Why something failed and what the user can do about it.
///
/// Always carries at least one recovery action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorDetail {
    pub step: String,
    pub code: ErrorCode,
    pub message: String,
    /// Plain-language explanation.
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    pub recovery_actions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub technical_details: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub related_links: Vec<RelatedLink>,
}

impl ErrorDetail {
    fn new(
        step: impl Into<String>,
        code: ErrorCode,
        message: impl Into<String>,
        reason: impl Into<String>,
        now: DateTime<Utc>,
        recovery_actions: &[&str],
    ) -> Self {
        Self {
            step: step.into(),
            code,
            message: message.into(),
            reason: reason.into(),
            timestamp: now,
            recovery_actions: recovery_actions.iter().map(|a| a.to_string()).collect(),
            technical_details: None,
            related_links: Vec::new(),
        }
    }

    pub fn with_technical_details(mut self, details: impl Into<String>) -> Self {
        self.technical_details = Some(details.into());
        self
    }

    pub fn with_link(mut self, title: impl Into<String>, url: impl Into<String>) -> Self {
        self.related_links.push(RelatedLink {
            title: title.into(),
            url: url.into(),
        });
        self
    }

    /// Local validation rejected the input before anything was sent.
    pub fn invalid_input(message: impl Into<String>, now: DateTime<Utc>) -> Self {
        let message = message.into();
        Self::new(
            PIPELINE_LOG_STEP,
            ErrorCode::InvalidInput,
            message.clone(),
            message,
            now,
            &[
                "Provide either an article URL or a PDF file, not both",
                "Check that the URL starts with http:// or https://",
                "Make sure the PDF is under 10MB",
            ],
        )
    }

    /// The server rejected the submission or could not be reached.
    pub fn submission_failed(err: &ApiError, now: DateTime<Utc>) -> Self {
        let actions: &[&str] = match err {
            ApiError::Network(_) => &[
                "Check your internet connection",
                "Make sure the processing service is running",
                "Retry the submission",
            ],
            ApiError::Timeout => &["Wait a moment and retry", "Try a smaller PDF"],
            ApiError::NotFound(_) => &[
                "Verify the article URL is correct",
                "Make sure the article is publicly accessible",
            ],
            ApiError::Server { status: 413, .. } => &[
                "Compress the PDF or remove images",
                "Upload a PDF under 10MB",
            ],
            ApiError::Server { .. } => {
                &["Retry in a few moments", "Contact support if it persists"]
            }
        };

        Self::new(
            PIPELINE_LOG_STEP,
            ErrorCode::SubmissionFailed,
            "Failed to submit article for processing",
            err.user_message(),
            now,
            actions,
        )
        .with_technical_details(err.to_string())
    }

    /// Polling budget ran out before the job finished.
    pub fn timeout(
        step: Option<StepId>,
        attempts: u32,
        interval: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let step = step.map_or(CONNECTION_LOG_STEP, |s| s.wire_id());
        let waited = format_interval(interval * attempts);
        Self::new(
            step,
            ErrorCode::Timeout,
            "Processing did not finish in time",
            format!(
                "No final status after {} status checks (about {}).",
                attempts, waited
            ),
            now,
            &[
                "Retry the extraction",
                "Check whether the processing service is overloaded",
            ],
        )
    }

    /// The server reported the job as failed.
    pub fn pipeline_failed(
        step: Option<StepId>,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let message = message.into();
        let (reason, actions): (&str, &[&str]) = match step {
            Some(StepId::Acquisition) => (
                "The article could not be retrieved. It may be behind a paywall, \
                 blocked, or the URL may be wrong.",
                &[
                    "Verify the URL opens in a browser",
                    "Download the article as a PDF and upload it instead",
                    "Retry the extraction",
                ],
            ),
            Some(StepId::Parsing) => (
                "The article content could not be parsed into sections.",
                &[
                    "Upload the article as a PDF",
                    "Make sure the PDF contains selectable text, not scanned images",
                ],
            ),
            Some(StepId::Summarization) => (
                "The summarization service failed to produce a summary.",
                &["Retry in a few moments", "Check the summarization service API key"],
            ),
            Some(StepId::Generation) => (
                "The slide deck could not be generated.",
                &["Retry the extraction", "Contact support if it persists"],
            ),
            None => (
                "The processing service reported a failure.",
                &["Retry the extraction"],
            ),
        };

        let detail = Self::new(
            step.map_or(PIPELINE_LOG_STEP, |s| s.wire_id()),
            ErrorCode::ServerError,
            message.clone(),
            reason,
            now,
            actions,
        )
        .with_technical_details(message);

        match step {
            Some(StepId::Acquisition) => detail.with_link("JAMA Network", "https://jamanetwork.com"),
            _ => detail,
        }
    }

    /// The server answered in a way the job cannot recover from.
    pub fn server(step: impl Into<String>, message: impl Into<String>, now: DateTime<Utc>) -> Self {
        let message = message.into();
        Self::new(
            step,
            ErrorCode::ServerError,
            message.clone(),
            "The processing service returned an unexpected response.",
            now,
            &["Retry the extraction", "Contact support if it persists"],
        )
        .with_technical_details(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_serialize_screaming() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::SubmissionFailed).unwrap(),
            "\"SUBMISSION_FAILED\""
        );
        assert_eq!(ErrorCode::Timeout.to_string(), "TIMEOUT");
    }

    #[test]
    fn test_every_constructor_has_recovery_actions() {
        let now = Utc::now();
        let details = vec![
            ErrorDetail::invalid_input("no input", now),
            ErrorDetail::submission_failed(&ApiError::Network("refused".into()), now),
            ErrorDetail::submission_failed(
                &ApiError::Server {
                    status: 413,
                    message: "too big".into(),
                },
                now,
            ),
            ErrorDetail::timeout(None, 60, Duration::from_secs(5), now),
            ErrorDetail::pipeline_failed(Some(StepId::Summarization), "quota", now),
            ErrorDetail::pipeline_failed(None, "boom", now),
            ErrorDetail::server("pipeline", "no result", now),
        ];

        for detail in details {
            assert!(!detail.recovery_actions.is_empty(), "{:?}", detail.code);
        }
    }

    #[test]
    fn test_submission_failed_explains_network() {
        let err = ApiError::Network("refused".into());
        let detail = ErrorDetail::submission_failed(&err, Utc::now());
        assert_eq!(detail.code, ErrorCode::SubmissionFailed);
        assert!(detail.reason.contains("internet connection"));
        assert!(detail.technical_details.unwrap().contains("refused"));
    }

    #[test]
    fn test_timeout_reports_budget() {
        let detail =
            ErrorDetail::timeout(Some(StepId::Parsing), 60, Duration::from_secs(5), Utc::now());
        assert_eq!(detail.step, "parse");
        assert!(detail.reason.contains("about 300s"));
    }

    #[test]
    fn test_timeout_reports_sub_second_budget() {
        let detail = ErrorDetail::timeout(None, 3, Duration::from_millis(100), Utc::now());
        assert!(detail.reason.contains("about 300ms"), "{}", detail.reason);
    }

    #[test]
    fn test_acquisition_failure_links_source() {
        let detail = ErrorDetail::pipeline_failed(Some(StepId::Acquisition), "403", Utc::now());
        assert_eq!(detail.step, "scrape");
        assert_eq!(detail.related_links[0].url, "https://jamanetwork.com");
    }
}
