//! Wire types for the abstractor job service.
//!
//! Response payloads are validated here, at the client boundary, so callers
//! never see loosely typed JSON.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Highest result schema version this client understands.
pub const RESULT_SCHEMA_VERSION: u32 = 1;

// =============================================================================
// Identifiers and submissions
// =============================================================================

/// Opaque job identifier assigned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Where the article comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Url,
    Pdf,
}

/// An uploaded PDF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl FileUpload {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            content_type: None,
            bytes: bytes.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A validated job submission: a URL or a file, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Url(String),
    File(FileUpload),
}

impl Submission {
    pub fn kind(&self) -> SourceKind {
        match self {
            Submission::Url(_) => SourceKind::Url,
            Submission::File(_) => SourceKind::Pdf,
        }
    }
}

/// Response to `POST /api/extract`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

// =============================================================================
// Progress snapshots
// =============================================================================

/// Overall job status as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteJobStatus {
    #[serde(alias = "pending", alias = "created")]
    Started,
    Processing,
    Completed,
    Failed,
}

impl RemoteJobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RemoteJobStatus::Completed | RemoteJobStatus::Failed)
    }
}

/// Status of one pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    #[serde(alias = "active")]
    Processing,
    Completed,
    #[serde(alias = "failed")]
    Error,
}

impl StepStatus {
    /// Completed and errored steps never go back.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Processing => "processing",
            StepStatus::Completed => "completed",
            StepStatus::Error => "error",
        }
    }
}

/// One step as carried in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSnapshot {
    pub id: String,
    pub name: String,
    pub status: StepStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default, deserialize_with = "timestamp::deserialize_option")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Full job state. Every snapshot is authoritative, never a delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub status: RemoteJobStatus,
    #[serde(default)]
    pub steps: Vec<StepSnapshot>,
    #[serde(default)]
    pub result: Option<JobResult>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub updated_at: DateTime<Utc>,
}

impl JobSnapshot {
    /// Reject snapshots this client cannot interpret.
    pub fn validate(self) -> std::result::Result<Self, String> {
        if let Some(result) = &self.result {
            if result.schema_version > RESULT_SCHEMA_VERSION {
                return Err(format!(
                    "unsupported result schema version {} (max {})",
                    result.schema_version, RESULT_SCHEMA_VERSION
                ));
            }
        }
        Ok(self)
    }
}

/// An event delivered on the progress feed.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Full job snapshot.
    Snapshot(JobSnapshot),
    /// Server is closing the stream after a terminal status.
    Closed { status: Option<RemoteJobStatus> },
    /// In-band stream failure reported by the server.
    StreamError { message: String },
}

// =============================================================================
// Results
// =============================================================================

fn default_schema_version() -> u32 {
    RESULT_SCHEMA_VERSION
}

/// Result payload of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub summaries: Summaries,
    #[serde(default)]
    pub medical_icon: MedicalIcon,
    #[serde(default)]
    pub quality_score: Option<f64>,
    /// Server-local path of the generated deck. Informational only.
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub extracted_data: Option<serde_json::Value>,
}

/// Summarized article fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summaries {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub population: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intervention: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setting: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_outcome: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub findings: Option<String>,
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_json::Value>,
}

impl Summaries {
    /// Named fields in display order; known fields first, then extras.
    pub fn to_fields(&self) -> IndexMap<String, String> {
        let known = [
            ("title", &self.title),
            ("population", &self.population),
            ("intervention", &self.intervention),
            ("setting", &self.setting),
            ("primary_outcome", &self.primary_outcome),
            ("findings", &self.findings),
        ];

        let mut fields: IndexMap<String, String> = known
            .into_iter()
            .filter_map(|(name, value)| value.as_ref().map(|v| (name.to_string(), v.clone())))
            .collect();

        for (name, value) in &self.extra {
            let text = match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => continue,
                other => other.to_string(),
            };
            fields.insert(name.clone(), text);
        }

        fields
    }
}

/// Specialty tag chosen by the summarizer. Unknown values fall back to
/// general medicine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MedicalIcon {
    Cardiology,
    Neurology,
    Oncology,
    InfectiousDisease,
    Surgery,
    Pharmacy,
    Endocrinology,
    Pulmonology,
    Psychiatry,
    Orthopedics,
    Dermatology,
    Gastroenterology,
    #[default]
    #[serde(other)]
    GeneralMedicine,
}

impl MedicalIcon {
    pub fn emoji(&self) -> &'static str {
        match self {
            MedicalIcon::Cardiology => "🫀",
            MedicalIcon::Neurology => "🧠",
            MedicalIcon::Oncology => "🎗️",
            MedicalIcon::InfectiousDisease => "🦠",
            MedicalIcon::Surgery => "🏥",
            MedicalIcon::Pharmacy => "💊",
            MedicalIcon::Endocrinology => "🩺",
            MedicalIcon::Pulmonology => "🫁",
            MedicalIcon::Psychiatry => "🧘",
            MedicalIcon::Orthopedics => "🦴",
            MedicalIcon::Dermatology => "🧴",
            MedicalIcon::Gastroenterology => "🫄",
            MedicalIcon::GeneralMedicine => "⚕️",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MedicalIcon::Cardiology => "cardiology",
            MedicalIcon::Neurology => "neurology",
            MedicalIcon::Oncology => "oncology",
            MedicalIcon::InfectiousDisease => "infectious_disease",
            MedicalIcon::Surgery => "surgery",
            MedicalIcon::Pharmacy => "pharmacy",
            MedicalIcon::Endocrinology => "endocrinology",
            MedicalIcon::Pulmonology => "pulmonology",
            MedicalIcon::Psychiatry => "psychiatry",
            MedicalIcon::Orthopedics => "orthopedics",
            MedicalIcon::Dermatology => "dermatology",
            MedicalIcon::Gastroenterology => "gastroenterology",
            MedicalIcon::GeneralMedicine => "general_medicine",
        }
    }
}

// =============================================================================
// Artifacts and health
// =============================================================================

/// A downloaded binary artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl Artifact {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Response from the health endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

// =============================================================================
// Timestamps
// =============================================================================

/// The server emits naive ISO-8601 (`datetime.now().isoformat()`); accept
/// that as UTC alongside RFC 3339.
pub(crate) mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{de, Deserialize, Deserializer};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp: {}", raw)))
    }

    pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(raw) => parse(&raw)
                .map(Some)
                .ok_or_else(|| de::Error::custom(format!("invalid timestamp: {}", raw))),
        }
    }
}
