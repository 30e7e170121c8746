use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("No audio track found")]
    NoTrack,
    #[error("Codec error: {0}")]
    Codec(String),
    #[error("Decoded stream contains no samples")]
    Empty,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mono PCM at the source sample rate.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Decode an audio file into mono samples, keeping at most `max_secs` seconds.
pub fn load_file(path: &Path, max_secs: f64) -> Result<DecodedAudio, DecodeError> {
    let file = File::open(path)?;

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    log::debug!(
        "Decoding: {}",
        path.file_name().and_then(|f| f.to_str()).unwrap_or("?")
    );
    decode_source(Box::new(file), hint, max_secs)
}

/// Decode an in-memory audio blob (container format is probed).
pub fn load_bytes(bytes: Vec<u8>, max_secs: f64) -> Result<DecodedAudio, DecodeError> {
    decode_source(Box::new(Cursor::new(bytes)), Hint::new(), max_secs)
}

fn decode_source(
    source: Box<dyn MediaSource>,
    hint: Hint,
    max_secs: f64,
) -> Result<DecodedAudio, DecodeError> {
    let mss = MediaSourceStream::new(source, MediaSourceStreamOptions::default());

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;

    let mut format = probed.format;
    let track = format.default_track().ok_or(DecodeError::NoTrack)?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| DecodeError::UnsupportedFormat("unknown sample rate".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::Codec(e.to_string()))?;

    let max_frames = (max_secs * sample_rate as f64).floor() as usize;
    let mut samples: Vec<f32> = Vec::with_capacity(max_frames.min(1 << 22));
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut max_sample_frames: usize = 0;

    while samples.len() < max_frames {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(e) => {
                end_of_stream(e)?;
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(e) => return Err(DecodeError::Codec(e.to_string())),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);
        let num_frames = decoded.capacity();
        // Reuse the buffer unless this packet is bigger than any seen so far
        if sample_buf.is_none() || num_frames > max_sample_frames {
            sample_buf = Some(SampleBuffer::<f32>::new(num_frames as u64, spec));
            max_sample_frames = num_frames;
        }
        let Some(buf) = sample_buf.as_mut() else {
            continue;
        };
        buf.copy_interleaved_ref(decoded);

        // Downmix to mono
        for frame in buf.samples().chunks(channels) {
            samples.push(frame.iter().sum::<f32>() / channels as f32);
        }
    }

    samples.truncate(max_frames);
    if samples.is_empty() {
        return Err(DecodeError::Empty);
    }

    log::debug!("Decoded {} samples @ {}Hz", samples.len(), sample_rate);

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

/// A clean end of stream is `Ok`. Anything else means the stream broke and
/// the clip must not be analyzed from what was read so far.
fn end_of_stream(err: SymphoniaError) -> Result<(), DecodeError> {
    match err {
        SymphoniaError::IoError(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(()),
        e => {
            log::warn!("Audio stream broke mid-decode: {e}");
            Err(DecodeError::Codec(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::write_sine_wav;

    #[test]
    fn test_load_file_downmixes_stereo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_sine_wav(&path, 440.0, 1.0, 22050, 2);

        let audio = load_file(&path, 30.0).unwrap();
        assert_eq!(audio.sample_rate, 22050);
        assert_eq!(audio.samples.len(), 22050);
    }

    #[test]
    fn test_load_file_truncates_to_max_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.wav");
        write_sine_wav(&path, 220.0, 3.0, 8000, 1);

        let audio = load_file(&path, 2.0).unwrap();
        assert_eq!(audio.samples.len(), 16000);
        assert!((audio.samples.len() as f64 / audio.sample_rate as f64 - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_load_bytes_matches_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        write_sine_wav(&path, 330.0, 0.5, 22050, 1);

        let from_file = load_file(&path, 30.0).unwrap();
        let from_bytes = load_bytes(std::fs::read(&path).unwrap(), 30.0).unwrap();
        assert_eq!(from_file.samples, from_bytes.samples);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_file(Path::new("/nonexistent/clip.wav"), 30.0).unwrap_err();
        assert!(matches!(err, DecodeError::Io(_)));
    }

    #[test]
    fn test_garbage_bytes_rejected() {
        let err = load_bytes(b"definitely not an audio container".to_vec(), 30.0).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_broken_stream_is_codec_error() {
        let err = end_of_stream(SymphoniaError::DecodeError("invalid frame header")).unwrap_err();
        assert!(matches!(err, DecodeError::Codec(_)));

        let io = std::io::Error::other("device gone");
        let err = end_of_stream(SymphoniaError::IoError(io)).unwrap_err();
        assert!(matches!(err, DecodeError::Codec(_)));
    }

    #[test]
    fn test_eof_ends_stream_cleanly() {
        let eof = std::io::Error::from(std::io::ErrorKind::UnexpectedEof);
        assert!(end_of_stream(SymphoniaError::IoError(eof)).is_ok());
    }
}
