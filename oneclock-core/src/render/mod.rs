//! Two-track mixer and realtime render state.
//!
//! [`RenderCore::render_block`] is the body of the cpal output callback:
//! it drains pending track-swap commands, sums the reference and vocal
//! tracks into the output block, and advances the play-frame cursor that
//! serves as the shared hardware clock for both playback and capture.
//!
//! # Realtime constraints
//!
//! Nothing here blocks or allocates: gains and the vocal offset are
//! atomics read once per block, and track buffers arrive pre-built as
//! `Arc<AudioTrack>` through an SPSC command ring, so a control-thread
//! reload can never tear a buffer mid-render.

use std::sync::{
    atomic::{AtomicI64, AtomicU64, Ordering},
    Arc,
};

use atomic_float::AtomicF32;
use ringbuf::{
    traits::{Consumer, Split},
    HeapRb,
};

use crate::track::AudioTrack;

/// Live-mutable mix parameters. Written from any control thread, read
/// once per render block; a one-block-late change is imperceptible.
#[derive(Debug)]
pub struct MixerState {
    ref_gain: AtomicF32,
    voc_gain: AtomicF32,
    /// Positive: the vocal lags the reference by this many frames.
    voc_offset_frames: AtomicI64,
}

impl Default for MixerState {
    fn default() -> Self {
        Self {
            ref_gain: AtomicF32::new(1.0),
            voc_gain: AtomicF32::new(1.0),
            voc_offset_frames: AtomicI64::new(0),
        }
    }
}

impl MixerState {
    pub fn set_gains(&self, ref_gain: f32, voc_gain: f32) {
        self.ref_gain.store(ref_gain, Ordering::Relaxed);
        self.voc_gain.store(voc_gain, Ordering::Relaxed);
    }

    pub fn set_vocal_offset(&self, frames: i64) {
        self.voc_offset_frames.store(frames, Ordering::Relaxed);
    }

    pub fn gains(&self) -> (f32, f32) {
        (
            self.ref_gain.load(Ordering::Relaxed),
            self.voc_gain.load(Ordering::Relaxed),
        )
    }

    pub fn vocal_offset(&self) -> i64 {
        self.voc_offset_frames.load(Ordering::Relaxed)
    }
}

/// Control-thread → render-callback commands, applied at block boundaries.
pub enum RenderCommand {
    SetReference(Arc<AudioTrack>),
    SetVocal(Arc<AudioTrack>),
}

pub type CommandProducer = ringbuf::HeapProd<RenderCommand>;
pub type CommandConsumer = ringbuf::HeapCons<RenderCommand>;

/// Track swaps are rare; a handful of slots is plenty.
pub const COMMAND_RING_CAPACITY: usize = 16;

pub fn create_command_ring() -> (CommandProducer, CommandConsumer) {
    HeapRb::<RenderCommand>::new(COMMAND_RING_CAPACITY).split()
}

/// State owned by the output callback.
pub struct RenderCore {
    reference: Option<Arc<AudioTrack>>,
    vocal: Option<Arc<AudioTrack>>,
    mixer: Arc<MixerState>,
    commands: CommandConsumer,
    /// Monotonically increasing play-frame counter: the shared clock.
    cursor: u64,
    /// Clock position at which frame 0 of both tracks is anchored.
    anchor: u64,
    /// Cursor published after each block for control-thread reads.
    clock: Arc<AtomicU64>,
}

impl RenderCore {
    pub fn new(
        reference: Option<Arc<AudioTrack>>,
        vocal: Option<Arc<AudioTrack>>,
        mixer: Arc<MixerState>,
        commands: CommandConsumer,
        clock: Arc<AtomicU64>,
        anchor: u64,
    ) -> Self {
        Self {
            reference,
            vocal,
            mixer,
            commands,
            cursor: clock.load(Ordering::Acquire),
            anchor,
            clock,
        }
    }

    /// Current absolute clock position (frames rendered so far).
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    fn apply_commands(&mut self) {
        while let Some(cmd) = self.commands.try_pop() {
            match cmd {
                RenderCommand::SetReference(track) => self.reference = Some(track),
                RenderCommand::SetVocal(track) => self.vocal = Some(track),
            }
        }
    }

    /// Fill one output block of `out.len() / channels` frames and advance
    /// the cursor. The mixed float sum is intentionally not clamped; the
    /// hardware path is float and clipping policy belongs to quantization.
    pub fn render_block(&mut self, out: &mut [f32], channels: usize) {
        self.apply_commands();

        let (ref_gain, voc_gain) = self.mixer.gains();
        let voc_offset = self.mixer.vocal_offset();
        let num_frames = out.len() / channels;

        for i in 0..num_frames {
            let pf = self.cursor + i as u64;
            let t = pf as i64 - self.anchor as i64;
            for c in 0..channels {
                let mut sum = 0.0f32;
                if let Some(track) = &self.reference {
                    let track_ch = c % track.channels as usize;
                    sum += ref_gain * track.sample(t, track_ch);
                }
                if let Some(track) = &self.vocal {
                    sum += voc_gain * track.sample(t - voc_offset, 0);
                }
                out[i * channels + c] = sum;
            }
        }

        self.cursor += num_frames as u64;
        self.clock.store(self.cursor, Ordering::Release);
    }
}

/// Convert captured float samples to 16-bit PCM, clamping to [-1, 1]
/// before quantization so summed or hot inputs wrap into clips, not
/// integer overflow artifacts.
pub fn quantize_capture(src: &[f32], dst: &mut Vec<i16>) {
    dst.clear();
    dst.extend(
        src.iter()
            .map(|&x| (x.clamp(-1.0, 1.0) * 32767.0).round() as i16),
    );
}
