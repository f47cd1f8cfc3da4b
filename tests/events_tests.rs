use chrono::Utc;
use meeting_attendant::{EndReason, Platform, SessionEvent, SessionStatus};

#[test]
fn test_events_are_tagged() {
    let event = SessionEvent::SessionJoined {
        session_id: "s-1".to_string(),
        meeting_id: "standup".to_string(),
        platform: Platform::Teams,
        slot: "main".to_string(),
        timestamp: Utc::now(),
    };

    let json = serde_json::to_string(&event).unwrap();
    assert!(json.contains("\"event\":\"session_joined\""));
    assert!(json.contains("\"platform\":\"teams\""));
    assert!(json.contains("\"slot\":\"main\""));
    assert_eq!(event.kind(), "session_joined");
    assert_eq!(event.session_id(), "s-1");
}

#[test]
fn test_session_ended_deserialization() {
    let json = r#"{
        "event": "session_ended",
        "session_id": "s-2",
        "status": "ended",
        "reason": "empty_session",
        "error": null,
        "timestamp": "2025-10-27T14:30:05Z"
    }"#;

    let event: SessionEvent = serde_json::from_str(json).unwrap();
    match event {
        SessionEvent::SessionEnded {
            session_id,
            status,
            reason,
            error,
            ..
        } => {
            assert_eq!(session_id, "s-2");
            assert_eq!(status, SessionStatus::Ended);
            assert_eq!(reason, Some(EndReason::EmptySession));
            assert!(error.is_none());
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn test_chunk_event_fields() {
    let event = SessionEvent::ChunkRecorded {
        session_id: "s-3".to_string(),
        sequence: 4,
        valid: false,
        byte_size: 0,
        timestamp: Utc::now(),
    };

    let json = serde_json::to_string(&event).unwrap();
    assert!(json.contains("\"sequence\":4"));
    assert!(json.contains("\"valid\":false"));
}
