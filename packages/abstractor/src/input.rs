//! Submission input and local validation.

use abstractor_client::{FileUpload, Submission};
use url::Url;

const PDF_MAGIC: &[u8] = b"%PDF";

/// What the user asked to process: a URL or a PDF.
///
/// Both fields are optional so a host can pass whatever the user filled in;
/// [`ExtractionInput::validate`] enforces that exactly one is usable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionInput {
    pub url: Option<String>,
    pub file: Option<FileUpload>,
}

impl ExtractionInput {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            file: None,
        }
    }

    pub fn file(file: FileUpload) -> Self {
        Self {
            url: None,
            file: Some(file),
        }
    }

    /// Check local preconditions and turn the input into a submission.
    ///
    /// Blank URLs and empty files count as absent.
    pub fn validate(&self, max_upload_bytes: usize) -> Result<Submission, String> {
        let url = self
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty());
        let file = self.file.as_ref().filter(|f| !f.is_empty());

        match (url, file) {
            (None, None) => Err("Either an article URL or a PDF file must be provided".to_string()),
            (Some(_), Some(_)) => {
                Err("Provide an article URL or a PDF file, not both".to_string())
            }
            (Some(url), None) => validate_url(url).map(Submission::Url),
            (None, Some(file)) => {
                validate_file(file, max_upload_bytes)?;
                Ok(Submission::File(file.clone()))
            }
        }
    }
}

fn validate_url(raw: &str) -> Result<String, String> {
    let parsed = Url::parse(raw).map_err(|e| format!("Invalid URL '{}': {}", raw, e))?;
    match parsed.scheme() {
        "http" | "https" => Ok(raw.to_string()),
        other => Err(format!(
            "Unsupported URL scheme '{}': only http and https are accepted",
            other
        )),
    }
}

fn validate_file(file: &FileUpload, max_upload_bytes: usize) -> Result<(), String> {
    if file.len() > max_upload_bytes {
        return Err(format!(
            "File too large: {} bytes (maximum is {} bytes)",
            file.len(),
            max_upload_bytes
        ));
    }

    let named_pdf = file.filename.to_ascii_lowercase().ends_with(".pdf");
    let typed_pdf = file
        .content_type
        .as_deref()
        .is_some_and(|ct| ct.eq_ignore_ascii_case("application/pdf"));
    let magic_pdf = file.bytes.starts_with(PDF_MAGIC);

    if named_pdf || typed_pdf || magic_pdf {
        Ok(())
    } else {
        Err(format!("'{}' is not a PDF file", file.filename))
    }
}
