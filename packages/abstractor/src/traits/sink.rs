//! Host-side persistence for downloaded artifacts.

use std::io;
use std::path::PathBuf;

use abstractor_client::Artifact;
use async_trait::async_trait;

/// Where downloaded decks end up.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Persist the artifact and return where it was written.
    async fn persist(&self, artifact: &Artifact) -> io::Result<PathBuf>;
}
