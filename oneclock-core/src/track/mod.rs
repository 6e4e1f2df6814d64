//! WAV track loading.
//!
//! Tracks are parsed from an in-memory byte container (the host hands the
//! engine file contents, not a stream), converted to normalized f32 and
//! frozen behind an `Arc`. A loaded track is never mutated; replacing a
//! track publishes a new buffer (see `render::RenderCommand`).
//!
//! Only linear-PCM 16-bit WAV is accepted. A track whose sample rate does
//! not match the engine's operating rate is rejected at load time rather
//! than played back mis-timed.

use std::io::Cursor;

use tracing::info;

use crate::error::{OneClockError, Result};

/// An immutable, decoded audio track.
///
/// Samples are interleaved per channel, normalized to [-1.0, 1.0].
#[derive(Debug, Clone)]
pub struct AudioTrack {
    /// Interleaved f32 samples.
    pub samples: Vec<f32>,
    /// Channel count (>= 1).
    pub channels: u16,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioTrack {
    /// Number of frames (one frame = one sample per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Sample at (frame, channel). Out-of-range frames are silence.
    #[inline]
    pub fn sample(&self, frame: i64, channel: usize) -> f32 {
        if frame < 0 || frame as usize >= self.frames() {
            return 0.0;
        }
        self.samples[frame as usize * self.channels as usize + channel]
    }

    /// Down-mix to mono by averaging channels. Mono tracks pass through.
    pub fn downmix_mono(self) -> AudioTrack {
        if self.channels <= 1 {
            return self;
        }
        let ch = self.channels as usize;
        let frames = self.frames();
        let mut mono = Vec::with_capacity(frames);
        for f in 0..frames {
            let base = f * ch;
            let sum: f32 = self.samples[base..base + ch].iter().sum();
            mono.push(sum / ch as f32);
        }
        AudioTrack {
            samples: mono,
            channels: 1,
            sample_rate: self.sample_rate,
        }
    }
}

/// Parse a RIFF/WAVE byte container into an [`AudioTrack`].
///
/// # Errors
/// `OneClockError::TrackLoad` if the container is malformed, the format
/// chunk is missing or non-PCM, or the samples are not 16-bit integers.
pub fn load_wav(bytes: &[u8]) -> Result<AudioTrack> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| OneClockError::TrackLoad(e.to_string()))?;

    let spec = reader.spec();
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(OneClockError::TrackLoad(format!(
            "WAV must be 16-bit linear PCM, got {:?} {} bit",
            spec.sample_format, spec.bits_per_sample
        )));
    }
    if spec.channels == 0 {
        return Err(OneClockError::TrackLoad("zero channel count".into()));
    }

    let samples: Vec<f32> = reader
        .samples::<i16>()
        .map(|s| s.map(|v| v as f32 / 32768.0))
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| OneClockError::TrackLoad(e.to_string()))?;

    let track = AudioTrack {
        samples,
        channels: spec.channels,
        sample_rate: spec.sample_rate,
    };
    info!(
        frames = track.frames(),
        channels = track.channels,
        sample_rate = track.sample_rate,
        "loaded WAV track"
    );
    Ok(track)
}
