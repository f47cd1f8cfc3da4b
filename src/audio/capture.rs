use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use super::chunk::{silence_wav, validate_wav};
use crate::events::SessionEvent;
use crate::session::context::{FailureStreak, LoopContext, LoopExit, LoopKind};
use crate::session::AudioChunkRecord;

/// Interval covered by chunk `sequence`. Saturates at the latest
/// representable time instead of wrapping.
fn chunk_interval(
    origin: DateTime<Utc>,
    step: ChronoDuration,
    sequence: u64,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = i32::try_from(sequence)
        .ok()
        .and_then(|n| step.checked_mul(n))
        .and_then(|offset| origin.checked_add_signed(offset))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    let end = start.checked_add_signed(step).unwrap_or(DateTime::<Utc>::MAX_UTC);
    (start, end)
}

/// Take one sample per `audio_interval` until cancelled.
///
/// Chunk `n` covers `[origin + n*T, origin + (n+1)*T)`, so consecutive chunks
/// neither gap nor overlap. Every tick produces exactly one ledger entry;
/// failed or rejected samples are kept with `valid = false`.
pub(crate) async fn run_capture_loop(ctx: LoopContext) -> LoopExit {
    let period = ctx.config.audio_interval;
    let step = ChronoDuration::milliseconds(period.as_millis() as i64);
    let origin = ctx.session.in_session_at().await.unwrap_or_else(Utc::now);

    // Burst on missed ticks so the ledger catches up with wall-clock time
    let mut ticker = time::interval_at(Instant::now() + period, period);
    let mut failures = FailureStreak::new(ctx.config.failure_escalation);

    info!(session_id = ctx.session.id(), interval_secs = period.as_secs_f64(), "Capture loop started");

    loop {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let sequence = ctx.session.reserve_chunk_sequence().await;
        let (interval_start, interval_end) = chunk_interval(origin, step, sequence);

        let (bytes, valid) = take_sample(&ctx, &mut failures, interval_start, interval_end).await;

        let mut record = AudioChunkRecord {
            sequence,
            interval_start,
            interval_end,
            storage_ref: None,
            byte_size: bytes.len(),
            valid,
        };

        let stored = ctx
            .collaborators
            .storage
            .store_chunk(ctx.session.id(), &record, &bytes)
            .await;
        match stored {
            Ok(storage_ref) => record.storage_ref = Some(storage_ref),
            Err(e) => warn!(session_id = ctx.session.id(), sequence, error = %e, "Failed to store chunk"),
        }

        debug!(session_id = ctx.session.id(), sequence, valid, bytes = record.byte_size, "Chunk recorded");

        ctx.session.append_chunk(record).await;
        ctx.emit(SessionEvent::ChunkRecorded {
            session_id: ctx.session.id().to_string(),
            sequence,
            valid,
            byte_size: bytes.len(),
            timestamp: Utc::now(),
        })
        .await;
    }

    info!(session_id = ctx.session.id(), "Capture loop stopped");
    LoopExit::Stopped(LoopKind::Capture)
}

/// Fetch and validate one sample. Collaborator failure yields a silent
/// placeholder for the interval.
async fn take_sample(
    ctx: &LoopContext,
    failures: &mut FailureStreak,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> (Vec<u8>, bool) {
    match ctx.collaborators.audio.sample(&ctx.slot, start, end).await {
        Ok(sample) => {
            failures.succeeded();
            let format_ok = if ctx.config.validate_format {
                match validate_wav(&sample.bytes, ctx.config.min_chunk) {
                    Ok(_) => true,
                    Err(e) => {
                        warn!(session_id = ctx.session.id(), error = %e, "Sample rejected");
                        false
                    }
                }
            } else {
                !sample.bytes.is_empty()
            };
            (sample.bytes, sample.valid && format_ok)
        }
        Err(e) => {
            warn!(session_id = ctx.session.id(), error = %e, "Audio capture failed, storing placeholder");
            if failures.failed() {
                ctx.escalate(LoopKind::Capture).await;
            }
            let placeholder = silence_wav(ctx.config.audio_interval, ctx.config.placeholder_sample_rate)
                .unwrap_or_else(|e| {
                    warn!(error = %e, "Failed to encode placeholder chunk");
                    Vec::new()
                });
            (placeholder, false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_intervals_are_contiguous() {
        let origin = Utc.with_ymd_and_hms(2025, 10, 27, 14, 0, 0).unwrap();
        let step = ChronoDuration::seconds(30);

        let (start, end) = chunk_interval(origin, step, 0);
        assert_eq!(start, origin);
        assert_eq!(end, origin + step);

        let (next_start, _) = chunk_interval(origin, step, 1);
        assert_eq!(next_start, end);
    }

    #[test]
    fn test_huge_sequence_saturates() {
        let origin = Utc.with_ymd_and_hms(2025, 10, 27, 14, 0, 0).unwrap();
        let step = ChronoDuration::seconds(30);

        // Would wrap to a negative offset if truncated to 32 bits
        let (start, end) = chunk_interval(origin, step, u64::from(u32::MAX) + 1);
        assert_eq!(start, DateTime::<Utc>::MAX_UTC);
        assert!(end >= start);
    }
}
