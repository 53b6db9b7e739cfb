//! Completed-job results.

use abstractor_client::{default_artifact_filename, JobId, JobResult, MedicalIcon};
use indexmap::IndexMap;
use serde::Serialize;

/// Where the generated deck can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactRef {
    pub job_id: JobId,
    /// Suggested local file name.
    pub filename: String,
}

/// Summary of a completed job. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionResult {
    /// Summary fields in display order.
    pub fields: IndexMap<String, String>,
    pub classification: MedicalIcon,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
    pub artifact: ArtifactRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_data: Option<serde_json::Value>,
}

impl ExtractionResult {
    pub fn from_wire(job_id: &JobId, result: JobResult) -> Self {
        Self {
            fields: result.summaries.to_fields(),
            classification: result.medical_icon,
            quality_score: result.quality_score,
            artifact: ArtifactRef {
                job_id: job_id.clone(),
                filename: default_artifact_filename(job_id),
            },
            extracted_data: result.extracted_data,
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.fields.get("title").map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_wire() {
        let wire: JobResult = serde_json::from_str(
            r#"{"summaries": {"title": "Metformin and Dementia", "population": "Veterans over 65"},
                "medical_icon": "neurology", "quality_score": 0.82}"#,
        )
        .unwrap();

        let result = ExtractionResult::from_wire(&JobId::new("j9"), wire);

        assert_eq!(result.title(), Some("Metformin and Dementia"));
        assert_eq!(result.fields.len(), 2);
        assert_eq!(result.classification, MedicalIcon::Neurology);
        assert_eq!(result.quality_score, Some(0.82));
        assert_eq!(result.artifact.filename, "va_abstract_j9.pptx");
    }
}
