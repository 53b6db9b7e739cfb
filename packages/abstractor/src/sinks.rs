//! Filesystem artifact sink.

use std::io;
use std::path::{Path, PathBuf};

use abstractor_client::Artifact;
use async_trait::async_trait;
use tracing::info;

use crate::traits::sink::ArtifactSink;

const FALLBACK_FILENAME: &str = "abstract.pptx";

/// Writes artifacts into a directory, creating it when missing.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ArtifactSink for DirectorySink {
    async fn persist(&self, artifact: &Artifact) -> io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.dir.join(safe_filename(&artifact.filename));
        tokio::fs::write(&path, &artifact.bytes).await?;

        info!(path = %path.display(), size = artifact.len(), "Artifact saved");
        Ok(path)
    }
}

/// Reduce a server-supplied name to a single path component.
fn safe_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_control() || c == ':' { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.');

    if cleaned.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        cleaned.to_string()
    }
}
