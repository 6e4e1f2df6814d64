//! cpal stream plumbing.
//!
//! # Design constraints
//!
//! Both cpal callbacks run on OS audio threads at elevated priority. They
//! **must not**:
//! - Allocate heap memory beyond reserved scratch capacity
//! - Block on a contended mutex or condvar
//! - Perform I/O (including logging)
//!
//! The output stream is the master clock. The input callback only
//! down-mixes to mono and pushes into an SPSC mic ring; the output
//! callback drains that ring each block, so capture cadence is tied to
//! the render timeline and both paths share one clock.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio
//! on macOS). Streams are therefore created, held, and dropped on the
//! engine's dedicated stream-holder thread, never moved across threads.

pub mod device;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Instant;

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    BufferSize, FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
};
use tracing::info;

use crate::{
    engine::EngineDiagnostics,
    error::{OneClockError, Result},
    render::{quantize_capture, RenderCore},
    session::SessionManager,
    transport::{self, CaptureMeta, CaptureProducer, MicConsumer, MicProducer},
};

/// Hardware stream parameters for one run.
#[derive(Debug, Clone, Copy)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub channels: u16,
    /// Requested frames per callback; 0 lets the device choose.
    pub frames_per_callback: u32,
}

impl StreamParams {
    fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            channels: self.channels,
            sample_rate: SampleRate(self.sample_rate),
            buffer_size: if self.frames_per_callback > 0 {
                BufferSize::Fixed(self.frames_per_callback)
            } else {
                BufferSize::Default
            },
        }
    }
}

/// Everything the output callback needs to hand captured input onward.
pub struct CaptureSetup {
    pub session: Arc<SessionManager>,
    /// Session id stamped on every chunk this run produces.
    pub session_id: u64,
    /// Clock position stored at `begin_session`.
    pub session_start: u64,
    pub producer: CaptureProducer,
    pub diagnostics: Arc<EngineDiagnostics>,
    /// Engine epoch for monotonic chunk timestamps.
    pub epoch: Instant,
}

/// Both live streams of a duplex run. Dropping stops and closes them.
pub struct DuplexStreams {
    _input: Stream,
    _output: Stream,
}

/// Open and start input + output streams for duplex capture.
///
/// The input stream is started before the output stream so the mic ring
/// has data by the time the first render block asks for it.
pub fn open_duplex(
    params: StreamParams,
    core: RenderCore,
    capture: CaptureSetup,
    running: Arc<AtomicBool>,
) -> Result<DuplexStreams> {
    let (mic_prod, mic_cons) = transport::create_mic_ring();

    let input = open_input(params, mic_prod, Arc::clone(&running), &capture.diagnostics)?;
    let output = open_output(params, core, Some((capture, mic_cons)), running)?;

    input
        .play()
        .map_err(|e| OneClockError::StreamOpen(e.to_string()))?;
    output
        .play()
        .map_err(|e| OneClockError::StreamOpen(e.to_string()))?;

    Ok(DuplexStreams {
        _input: input,
        _output: output,
    })
}

/// Open and start the output-only stream for two-track playback.
pub fn open_playback(
    params: StreamParams,
    core: RenderCore,
    running: Arc<AtomicBool>,
) -> Result<Stream> {
    let output = open_output(params, core, None, running)?;
    output
        .play()
        .map_err(|e| OneClockError::StreamOpen(e.to_string()))?;
    Ok(output)
}

fn open_output(
    params: StreamParams,
    mut core: RenderCore,
    capture: Option<(CaptureSetup, MicConsumer)>,
    running: Arc<AtomicBool>,
) -> Result<Stream> {
    use ringbuf::traits::Consumer;

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(OneClockError::NoOutputDevice)?;

    info!(
        device = device.name().unwrap_or_default().as_str(),
        sample_rate = params.sample_rate,
        channels = params.channels,
        frames_per_callback = params.frames_per_callback,
        "opening output stream"
    );

    let channels = params.channels as usize;
    let sample_rate = params.sample_rate;
    let mut capture = capture.map(|(setup, mic)| CaptureState {
        setup,
        mic,
        scratch: Vec::with_capacity(8192),
        pcm16: Vec::with_capacity(8192),
        input_frames: 0,
    });

    let stream = device
        .build_output_stream(
            &params.stream_config(),
            move |data: &mut [f32], _info| {
                if !running.load(Ordering::Relaxed) {
                    data.fill(0.0);
                    return;
                }

                core.render_block(data, channels);

                let Some(cap) = capture.as_mut() else { return };
                cap.setup
                    .diagnostics
                    .blocks_rendered
                    .fetch_add(1, Ordering::Relaxed);

                // Best-effort mic read: fewer frames than the block is fine.
                let num_frames = data.len() / channels;
                cap.scratch.resize(num_frames, 0.0);
                let got = cap.mic.pop_slice(&mut cap.scratch[..num_frames]);

                let clock_pos = core.cursor();
                cap.setup.session.update_last_output_frame(clock_pos);
                if got == 0 {
                    return;
                }

                let rel = clock_pos as i64 - cap.setup.session_start as i64;
                if cap.setup.session.accept_capture(cap.setup.session_id, rel) {
                    quantize_capture(&cap.scratch[..got], &mut cap.pcm16);
                    let meta = CaptureMeta {
                        num_frames: got as u32,
                        sample_rate,
                        channels: 1,
                        input_frame_pos: cap.input_frames,
                        output_frame_pos: clock_pos as i64,
                        timestamp_nanos: cap.setup.epoch.elapsed().as_nanos() as i64,
                        output_frame_pos_rel: rel,
                        session_id: cap.setup.session_id,
                    };
                    if cap.setup.producer.push(meta, &cap.pcm16) {
                        cap.setup
                            .diagnostics
                            .chunks_captured
                            .fetch_add(1, Ordering::Relaxed);
                    }
                } else {
                    cap.setup
                        .diagnostics
                        .chunks_dropped_stale
                        .fetch_add(1, Ordering::Relaxed);
                }
                cap.input_frames += got as i64;
            },
            |err| tracing::error!("output stream error: {err}"),
            None,
        )
        .map_err(|e| OneClockError::StreamOpen(e.to_string()))?;

    Ok(stream)
}

/// Per-run capture state owned by the output callback.
struct CaptureState {
    setup: CaptureSetup,
    mic: MicConsumer,
    scratch: Vec<f32>,
    pcm16: Vec<i16>,
    input_frames: i64,
}

fn open_input(
    params: StreamParams,
    producer: MicProducer,
    running: Arc<AtomicBool>,
    diagnostics: &Arc<EngineDiagnostics>,
) -> Result<Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(OneClockError::NoInputDevice)?;

    let supported = device
        .default_input_config()
        .map_err(|e| OneClockError::AudioDevice(e.to_string()))?;
    let channels = supported.channels();

    info!(
        device = device.name().unwrap_or_default().as_str(),
        channels,
        format = ?supported.sample_format(),
        "opening input stream"
    );

    let config = StreamConfig {
        channels,
        sample_rate: SampleRate(params.sample_rate),
        buffer_size: BufferSize::Default,
    };

    let stream = match supported.sample_format() {
        SampleFormat::F32 => {
            build_input_stream::<f32>(&device, &config, producer, running, diagnostics)
        }
        SampleFormat::I16 => {
            build_input_stream::<i16>(&device, &config, producer, running, diagnostics)
        }
        SampleFormat::U16 => {
            build_input_stream::<u16>(&device, &config, producer, running, diagnostics)
        }
        fmt => Err(OneClockError::StreamOpen(format!(
            "unsupported input sample format: {fmt:?}"
        ))),
    }?;

    Ok(stream)
}

/// Build an input stream that down-mixes to mono f32 and pushes into the
/// mic ring. Generic over the device's native sample type.
fn build_input_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: MicProducer,
    running: Arc<AtomicBool>,
    diagnostics: &Arc<EngineDiagnostics>,
) -> Result<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    use ringbuf::traits::Producer;

    let ch = config.channels as usize;
    let diagnostics = Arc::clone(diagnostics);
    let mut mix_buf: Vec<f32> = Vec::with_capacity(8192);

    device
        .build_input_stream(
            config,
            move |data: &[T], _info| {
                if !running.load(Ordering::Relaxed) {
                    return;
                }
                downmix_to_mono(data, ch, &mut mix_buf);
                let frames = mix_buf.len();
                let written = producer.push_slice(&mix_buf);
                if written < frames {
                    diagnostics
                        .mic_overrun_frames
                        .fetch_add((frames - written) as u64, Ordering::Relaxed);
                }
            },
            |err| tracing::error!("input stream error: {err}"),
            None,
        )
        .map_err(|e| OneClockError::StreamOpen(e.to_string()))
}

/// Convert one interleaved input block to mono f32 by averaging channels.
fn downmix_to_mono<T>(data: &[T], channels: usize, out: &mut Vec<f32>)
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let frames = data.len() / channels;
    out.resize(frames, 0.0);
    for f in 0..frames {
        let base = f * channels;
        let mut sum = 0.0f32;
        for c in 0..channels {
            sum += f32::from_sample(data[base + c]);
        }
        out[f] = sum / channels as f32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn downmix_averages_stereo_f32_frames() {
        let mut out = Vec::new();
        downmix_to_mono(&[0.2f32, 0.4, -1.0, 1.0], 2, &mut out);
        assert_eq!(out.len(), 2);
        assert_abs_diff_eq!(out[0], 0.3, epsilon = 1e-6);
        assert_abs_diff_eq!(out[1], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn downmix_converts_i16_input_to_normalized_f32() {
        let mut out = Vec::new();
        downmix_to_mono(&[0i16, i16::MAX, i16::MIN, i16::MIN], 1, &mut out);
        assert_abs_diff_eq!(out[0], 0.0, epsilon = 1e-4);
        assert_abs_diff_eq!(out[1], 1.0, epsilon = 1e-4);
        assert_abs_diff_eq!(out[2], -1.0, epsilon = 1e-4);
    }

    #[test]
    fn downmix_converts_u16_input_around_midpoint() {
        // u16 silence sits at the unsigned midpoint, not at zero.
        let mut out = Vec::new();
        downmix_to_mono(&[32_768u16, 0, u16::MAX], 1, &mut out);
        assert_abs_diff_eq!(out[0], 0.0, epsilon = 1e-4);
        assert_abs_diff_eq!(out[1], -1.0, epsilon = 1e-4);
        assert_abs_diff_eq!(out[2], 1.0, epsilon = 1e-4);
    }

    #[test]
    fn downmix_reuses_buffer_across_block_sizes() {
        let mut out = Vec::new();
        downmix_to_mono(&[0.5f32; 8], 2, &mut out);
        assert_eq!(out.len(), 4);
        downmix_to_mono(&[0.25f32; 4], 2, &mut out);
        assert_eq!(out.len(), 2);
        assert_abs_diff_eq!(out[0], 0.25, epsilon = 1e-6);
    }
}
