// Integration tests for local filesystem storage

use anyhow::Result;
use chrono::{Duration, Utc};
use meeting_attendant::attendance::IdentityPolicy;
use meeting_attendant::audio::silence_wav;
use meeting_attendant::config::IdentityConfig;
use meeting_attendant::session::AudioChunkRecord;
use meeting_attendant::{
    JoinRequest, LocalStorage, Platform, Session, SessionStatus, StorageCollaborator,
    SummaryBuilder,
};
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_open_creates_layout() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path().join("data");

    let storage = LocalStorage::open(&root).await?;

    assert!(root.join("audio").is_dir());
    assert!(root.join("sessions").is_dir());
    assert_eq!(storage.root(), root.as_path());
    Ok(())
}

#[tokio::test]
async fn test_chunks_land_under_session_directory() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let storage = LocalStorage::open(temp_dir.path()).await?;

    let start = Utc::now();
    let bytes = silence_wav(std::time::Duration::from_secs(2), 8000)?;
    let record = AudioChunkRecord {
        sequence: 7,
        interval_start: start,
        interval_end: start + Duration::seconds(2),
        storage_ref: None,
        byte_size: bytes.len(),
        valid: true,
    };

    let storage_ref = storage.store_chunk("abc123", &record, &bytes).await?;

    assert_eq!(storage_ref.0, "audio/abc123/abc123-chunk-007.wav");
    let path = storage.resolve(&storage_ref);
    assert!(path.starts_with(temp_dir.path()));
    assert_eq!(std::fs::read(&path)?, bytes);
    Ok(())
}

#[tokio::test]
async fn test_summary_is_written_as_json() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let storage = LocalStorage::open(temp_dir.path()).await?;

    let request = JoinRequest::new("1:1", "https://meet.google.com/aaa-bbbb-ccc", Platform::Gmeet);
    let mut session = Session::new(&request);
    session.transition(SessionStatus::Failed)?;
    let summary = SummaryBuilder::new(Arc::new(IdentityPolicy::new(&IdentityConfig::default())))
        .build(&session)?;

    storage.store_summary(&session.id, &summary).await?;

    let path = temp_dir
        .path()
        .join("sessions")
        .join(format!("{}.json", session.id));
    let raw = std::fs::read_to_string(&path)?;
    assert!(raw.contains("\"status\": \"failed\""));
    assert!(raw.contains("\"platform\": \"gmeet\""));

    assert_eq!(storage.load_summary(&session.id).await?, summary);
    Ok(())
}
