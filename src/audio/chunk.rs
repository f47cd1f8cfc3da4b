use anyhow::{Context, Result};
use std::io::Cursor;
use std::time::Duration;

use crate::error::OrchestratorError;

/// Check that `bytes` is a readable WAV file at least `min_duration` long.
/// Returns the sample's duration.
pub fn validate_wav(bytes: &[u8], min_duration: Duration) -> Result<Duration, OrchestratorError> {
    if bytes.is_empty() {
        return Err(OrchestratorError::ValidationFailed("empty audio sample".to_string()));
    }

    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| OrchestratorError::ValidationFailed(format!("not a WAV sample: {}", e)))?;

    let spec = reader.spec();
    if spec.sample_rate == 0 || spec.channels == 0 {
        return Err(OrchestratorError::ValidationFailed(format!(
            "invalid WAV header ({} Hz, {} channels)",
            spec.sample_rate, spec.channels
        )));
    }

    // duration() counts frames, i.e. samples per channel
    let duration = Duration::from_secs_f64(reader.duration() as f64 / spec.sample_rate as f64);
    if duration < min_duration {
        return Err(OrchestratorError::ValidationFailed(format!(
            "sample is {:.2}s, minimum is {:.2}s",
            duration.as_secs_f64(),
            min_duration.as_secs_f64()
        )));
    }

    Ok(duration)
}

/// Encode 16-bit mono PCM as an in-memory WAV file
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).context("Failed to create WAV writer")?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .context("Failed to write sample to WAV")?;
        }
        writer.finalize().context("Failed to finalize WAV")?;
    }

    Ok(cursor.into_inner())
}

/// Silent placeholder covering `duration`, stored when no real sample exists
pub fn silence_wav(duration: Duration, sample_rate: u32) -> Result<Vec<u8>> {
    let frames = (duration.as_secs_f64() * sample_rate as f64).round() as usize;
    encode_wav(&vec![0i16; frames], sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_has_requested_duration() {
        let bytes = silence_wav(Duration::from_secs(3), 8000).unwrap();
        let duration = validate_wav(&bytes, Duration::from_secs(1)).unwrap();
        assert_eq!(duration, Duration::from_secs(3));
    }

    #[test]
    fn test_too_short_sample_is_invalid() {
        let bytes = encode_wav(&[0i16; 400], 8000).unwrap(); // 50ms
        let err = validate_wav(&bytes, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, OrchestratorError::ValidationFailed(_)));
    }

    #[test]
    fn test_garbage_is_invalid() {
        assert!(validate_wav(b"definitely not riff data", Duration::ZERO).is_err());
        assert!(validate_wav(&[], Duration::ZERO).is_err());
    }
}
