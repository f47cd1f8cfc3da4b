use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::collab::{StorageCollaborator, StorageRef};
use crate::session::AudioChunkRecord;
use crate::summary::SessionSummary;

const AUDIO_DIR: &str = "audio";
const SESSIONS_DIR: &str = "sessions";

/// Filesystem storage under one data directory:
///
/// ```text
/// <data_dir>/audio/<session_id>/<session_id>-chunk-000.wav
/// <data_dir>/sessions/<session_id>.json
/// ```
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Create the directory layout if it doesn't exist
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let root = data_dir.as_ref().to_path_buf();
        for dir in [AUDIO_DIR, SESSIONS_DIR] {
            fs::create_dir_all(root.join(dir))
                .await
                .with_context(|| format!("Failed to create {:?}", root.join(dir)))?;
        }

        info!("Local storage ready at {:?}", root);
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a reference returned by [`StorageCollaborator::store_chunk`]
    pub fn resolve(&self, storage_ref: &StorageRef) -> PathBuf {
        self.root.join(&storage_ref.0)
    }

    pub fn chunk_ref(session_id: &str, sequence: u64) -> StorageRef {
        StorageRef(format!(
            "{}/{}/{}-chunk-{:03}.wav",
            AUDIO_DIR, session_id, session_id, sequence
        ))
    }

    fn summary_path(&self, session_id: &str) -> PathBuf {
        self.root
            .join(SESSIONS_DIR)
            .join(format!("{}.json", session_id))
    }

    pub async fn load_summary(&self, session_id: &str) -> Result<SessionSummary> {
        let path = self.summary_path(session_id);
        let raw = fs::read(&path)
            .await
            .with_context(|| format!("Failed to read summary {:?}", path))?;
        serde_json::from_slice(&raw).with_context(|| format!("Invalid summary {:?}", path))
    }
}

#[async_trait::async_trait]
impl StorageCollaborator for LocalStorage {
    async fn store_chunk(
        &self,
        session_id: &str,
        chunk: &AudioChunkRecord,
        bytes: &[u8],
    ) -> Result<StorageRef> {
        let storage_ref = Self::chunk_ref(session_id, chunk.sequence);
        let path = self.resolve(&storage_ref);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }

        fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write chunk {:?}", path))?;

        debug!("Stored chunk {} ({} bytes) at {:?}", chunk.sequence, bytes.len(), path);
        Ok(storage_ref)
    }

    async fn store_summary(&self, session_id: &str, summary: &SessionSummary) -> Result<()> {
        let path = self.summary_path(session_id);
        let json = serde_json::to_vec_pretty(summary).context("Failed to encode summary")?;
        fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write summary {:?}", path))?;

        info!("Summary for {} saved to {:?}", session_id, path);
        Ok(())
    }
}
