//! `DuplexEngine` — top-level lifecycle controller and control surface.
//!
//! ## Lifecycle
//!
//! ```text
//! DuplexEngine::new(config)
//!     ├─► start_duplex()     → session++, input+output streams, worker spawned
//!     │       └─► stop()     → flag down, streams dropped, threads joined, cursor = 0
//!     └─► start_two_track()  → output stream anchored at clock + lead margin
//!             └─► stop()
//! ```
//!
//! Duplex capture and two-track playback are mutually exclusive; entering
//! either mode stops the other first. `stop()` is idempotent and
//! synchronous: when it returns, no further render calls or capture
//! events can occur.
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS, so streams are opened and
//! held on a dedicated holder thread; a bounded crossbeam channel carries
//! the open result back to the caller, and another signals teardown.
//! The engine itself is `Send + Sync` — all fields use interior
//! mutability, so it can live in an `Arc` shared with host state and
//! event-forwarding tasks.

pub mod worker;

use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{
    audio::{self, CaptureSetup, StreamParams},
    error::{OneClockError, Result},
    ipc::events::{CaptureChunkEvent, EngineStatus, EngineStatusEvent, SessionSnapshot},
    render::{
        create_command_ring, CommandProducer, MixerState, RenderCommand, RenderCore,
    },
    session::SessionManager,
    track::{self, AudioTrack},
    transport::{self, WorkerSignal},
};

/// Broadcast channel capacity: 256 events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// Configuration for `DuplexEngine`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Operating sample rate (Hz). Loaded tracks must match. Default: 48000.
    pub sample_rate: u32,
    /// Output channel count. Default: 2.
    pub channels: u16,
    /// Requested frames per render callback; 0 = device default.
    pub frames_per_callback: u32,
    /// Safety margin between "now" and the two-track anchor frame, so the
    /// first audible frame is never scheduled in the past. Default: 2400
    /// (50 ms at 48 kHz).
    pub two_track_lead_frames: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            frames_per_callback: 0,
            two_track_lead_frames: 2_400,
        }
    }
}

/// Shared counters for observability. Updated with relaxed atomics from
/// the realtime callback and the worker; read by `diagnostics_snapshot`.
#[derive(Default)]
pub struct EngineDiagnostics {
    pub blocks_rendered: AtomicU64,
    pub chunks_captured: AtomicU64,
    /// Chunks dropped because a transport ring was full (drop-newest
    /// policy). Shared with the transport producer half.
    pub chunks_dropped_ring: Arc<AtomicU64>,
    /// Chunks rejected by the session gate (expected stop/start tails).
    pub chunks_dropped_stale: AtomicU64,
    /// Mic frames lost because the mic feed ring was full.
    pub mic_overrun_frames: AtomicU64,
    pub events_forwarded: AtomicU64,
}

impl EngineDiagnostics {
    pub fn reset(&self) {
        self.blocks_rendered.store(0, Ordering::Relaxed);
        self.chunks_captured.store(0, Ordering::Relaxed);
        self.chunks_dropped_ring.store(0, Ordering::Relaxed);
        self.chunks_dropped_stale.store(0, Ordering::Relaxed);
        self.mic_overrun_frames.store(0, Ordering::Relaxed);
        self.events_forwarded.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            blocks_rendered: self.blocks_rendered.load(Ordering::Relaxed),
            chunks_captured: self.chunks_captured.load(Ordering::Relaxed),
            chunks_dropped_ring: self.chunks_dropped_ring.load(Ordering::Relaxed),
            chunks_dropped_stale: self.chunks_dropped_stale.load(Ordering::Relaxed),
            mic_overrun_frames: self.mic_overrun_frames.load(Ordering::Relaxed),
            events_forwarded: self.events_forwarded.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub blocks_rendered: u64,
    pub chunks_captured: u64,
    pub chunks_dropped_ring: u64,
    pub chunks_dropped_stale: u64,
    pub mic_overrun_frames: u64,
    pub events_forwarded: u64,
}

#[derive(Default)]
struct TrackSlots {
    reference: Option<Arc<AudioTrack>>,
    vocal: Option<Arc<AudioTrack>>,
}

/// Join handles and teardown signals for the active run.
struct RunHandles {
    stop_tx: crossbeam_channel::Sender<()>,
    stream_thread: JoinHandle<()>,
    worker_thread: Option<JoinHandle<()>>,
    signal: Option<Arc<WorkerSignal>>,
}

/// The top-level engine handle. Explicitly constructed and owned by its
/// caller — there is no process-wide instance.
pub struct DuplexEngine {
    config: EngineConfig,
    status: Arc<Mutex<EngineStatus>>,
    status_tx: broadcast::Sender<EngineStatusEvent>,
    capture_tx: broadcast::Sender<CaptureChunkEvent>,
    session: Arc<SessionManager>,
    mixer: Arc<MixerState>,
    /// Canonical track slots; the render path gets `Arc` clones only.
    tracks: Mutex<TrackSlots>,
    /// Command producer into the live render callback, present while running.
    commands: Mutex<Option<CommandProducer>>,
    running: Arc<AtomicBool>,
    run: Mutex<Option<RunHandles>>,
    /// Absolute output clock position, published once per render block.
    clock: Arc<AtomicU64>,
    diagnostics: Arc<EngineDiagnostics>,
    /// Monotonic epoch for chunk timestamps.
    epoch: Instant,
}

impl DuplexEngine {
    /// Create a new engine. Does not open any streams.
    pub fn new(config: EngineConfig) -> Self {
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (capture_tx, _) = broadcast::channel(BROADCAST_CAP);

        Self {
            config,
            status: Arc::new(Mutex::new(EngineStatus::Idle)),
            status_tx,
            capture_tx,
            session: Arc::new(SessionManager::new()),
            mixer: Arc::new(MixerState::default()),
            tracks: Mutex::new(TrackSlots::default()),
            commands: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
            run: Mutex::new(None),
            clock: Arc::new(AtomicU64::new(0)),
            diagnostics: Arc::new(EngineDiagnostics::default()),
            epoch: Instant::now(),
        }
    }

    // ── Track loading ────────────────────────────────────────────────────

    /// Load the reference track from a WAV file. On failure the previously
    /// loaded track is left untouched.
    pub fn load_reference(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = std::fs::read(path)?;
        self.load_reference_bytes(&bytes)
    }

    /// Load the reference track from WAV bytes.
    pub fn load_reference_bytes(&self, bytes: &[u8]) -> Result<()> {
        let track = track::load_wav(bytes)?;
        self.validate_rate(&track, self.config.sample_rate)?;
        self.install_reference(track);
        Ok(())
    }

    /// Load the vocal track from a WAV file; multi-channel sources are
    /// down-mixed to mono. On failure the previous track is untouched.
    pub fn load_vocal(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = std::fs::read(path)?;
        self.load_vocal_bytes(&bytes)
    }

    /// Load the vocal track from WAV bytes.
    pub fn load_vocal_bytes(&self, bytes: &[u8]) -> Result<()> {
        let track = track::load_wav(bytes)?;
        self.validate_rate(&track, self.config.sample_rate)?;
        let track = Arc::new(track.downmix_mono());
        self.tracks.lock().vocal = Some(Arc::clone(&track));
        self.publish(RenderCommand::SetVocal(track));
        Ok(())
    }

    /// Which track slots are currently loaded: `(reference, vocal)`.
    pub fn tracks_loaded(&self) -> (bool, bool) {
        let t = self.tracks.lock();
        (t.reference.is_some(), t.vocal.is_some())
    }

    fn validate_rate(&self, track: &AudioTrack, expected: u32) -> Result<()> {
        if track.sample_rate != expected {
            return Err(OneClockError::SampleRateMismatch {
                expected,
                actual: track.sample_rate,
            });
        }
        Ok(())
    }

    fn install_reference(&self, track: AudioTrack) {
        let track = Arc::new(track);
        self.tracks.lock().reference = Some(Arc::clone(&track));
        self.publish(RenderCommand::SetReference(track));
    }

    /// Publish a new track buffer to the live render callback, if any.
    fn publish(&self, cmd: RenderCommand) {
        if let Some(producer) = self.commands.lock().as_mut() {
            use ringbuf::traits::Producer;
            if producer.try_push(cmd).is_err() {
                // Only possible after 16 swaps within one render block.
                warn!("render command ring full; track swap deferred to restart");
            }
        }
    }

    // ── Mix parameters ───────────────────────────────────────────────────

    /// Set both track gains; effective from the next render block.
    pub fn set_track_gains(&self, ref_gain: f32, voc_gain: f32) {
        self.mixer.set_gains(ref_gain, voc_gain);
    }

    /// Legacy single-gain entry point: sets the reference gain and leaves
    /// the vocal at unity.
    pub fn set_gain(&self, gain: f32) {
        self.mixer.set_gains(gain, 1.0);
    }

    /// Signed vocal offset in frames; positive means the vocal lags.
    pub fn set_vocal_offset(&self, frames: i64) {
        self.mixer.set_vocal_offset(frames);
    }

    // ── Mode control ─────────────────────────────────────────────────────

    /// Start duplex capture: play the reference (silence if none is
    /// loaded) while capturing the mic, both on the output stream's clock.
    ///
    /// Stops any active mode first. `reference_path`, when non-empty,
    /// (re)loads the reference track before the streams open.
    ///
    /// # Errors
    /// Track load/rate errors, or `StreamOpen`/`NoInputDevice`/
    /// `NoOutputDevice` when the hardware streams cannot be opened. No
    /// partial state is retained on failure.
    pub fn start_duplex(
        &self,
        reference_path: Option<&str>,
        sample_rate: u32,
        channels: u16,
        frames_per_callback: u32,
    ) -> Result<()> {
        self.stop();

        // The start path validates against the rate the streams will open
        // at, which may differ from the configured default rate.
        if let Some(path) = reference_path.filter(|p| !p.is_empty()) {
            let track = track::load_wav(&std::fs::read(path)?)?;
            self.validate_rate(&track, sample_rate)?;
            self.install_reference(track);
        }

        let (reference, vocal) = {
            let t = self.tracks.lock();
            (t.reference.clone(), t.vocal.clone())
        };
        for track in [&reference, &vocal].into_iter().flatten() {
            if track.sample_rate != sample_rate {
                return Err(OneClockError::SampleRateMismatch {
                    expected: sample_rate,
                    actual: track.sample_rate,
                });
            }
        }

        self.diagnostics.reset();
        let session_id = self.session.begin_session(self.clock.load(Ordering::Acquire));
        let session_start = self.session.session_start_sample_time();

        let (cmd_tx, cmd_rx) = create_command_ring();
        *self.commands.lock() = Some(cmd_tx);

        let (producer, consumer, signal) =
            transport::create(Arc::clone(&self.diagnostics.chunks_dropped_ring));

        self.running.store(true, Ordering::SeqCst);

        let anchor = self.clock.load(Ordering::Acquire);
        let core = RenderCore::new(
            reference,
            vocal,
            Arc::clone(&self.mixer),
            cmd_rx,
            Arc::clone(&self.clock),
            anchor,
        );
        let capture = CaptureSetup {
            session: Arc::clone(&self.session),
            session_id,
            session_start,
            producer,
            diagnostics: Arc::clone(&self.diagnostics),
            epoch: self.epoch,
        };
        let params = StreamParams {
            sample_rate,
            channels,
            frames_per_callback,
        };

        let (open_tx, open_rx) = crossbeam_channel::bounded::<Result<()>>(1);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);

        let running = Arc::clone(&self.running);
        let stream_thread = std::thread::Builder::new()
            .name("oneclock-streams".into())
            .spawn(move || {
                // Streams must be created AND dropped on this thread.
                let streams =
                    match audio::open_duplex(params, core, capture, Arc::clone(&running)) {
                        Ok(s) => {
                            let _ = open_tx.send(Ok(()));
                            s
                        }
                        Err(e) => {
                            let _ = open_tx.send(Err(e));
                            return;
                        }
                    };
                let _ = stop_rx.recv();
                drop(streams);
            })?;

        let worker_ctx = worker::WorkerContext {
            consumer,
            running: Arc::clone(&self.running),
            capture_tx: self.capture_tx.clone(),
            diagnostics: Arc::clone(&self.diagnostics),
        };
        let worker_thread = match std::thread::Builder::new()
            .name("oneclock-bridge".into())
            .spawn(move || worker::run(worker_ctx))
        {
            Ok(handle) => handle,
            Err(e) => {
                let _ = stop_tx.send(());
                self.abort_start(stream_thread, None, Some(&signal));
                return Err(e.into());
            }
        };

        match open_rx.recv() {
            Ok(Ok(())) => {
                *self.run.lock() = Some(RunHandles {
                    stop_tx,
                    stream_thread,
                    worker_thread: Some(worker_thread),
                    signal: Some(Arc::clone(&signal)),
                });
                self.set_status(EngineStatus::DuplexCapturing, None);
                info!(session_id, sample_rate, channels, "duplex capture started");
                Ok(())
            }
            Ok(Err(e)) => {
                self.abort_start(stream_thread, Some(worker_thread), Some(&signal));
                self.set_status(EngineStatus::Error, Some(e.to_string()));
                Err(e)
            }
            Err(_) => {
                self.abort_start(stream_thread, Some(worker_thread), Some(&signal));
                self.set_status(EngineStatus::Error, Some("stream thread died".into()));
                Err(OneClockError::Other(anyhow::anyhow!(
                    "stream thread died before reporting open result"
                )))
            }
        }
    }

    /// Start two-track playback: reference + recorded vocal, anchored a
    /// lead margin ahead of the current clock, honoring the live vocal
    /// offset. Requires both tracks loaded.
    pub fn start_two_track(&self) -> Result<()> {
        let (reference, vocal) = {
            let t = self.tracks.lock();
            (t.reference.clone(), t.vocal.clone())
        };
        let reference =
            reference.ok_or(OneClockError::InvalidState("reference track not loaded"))?;
        let vocal = vocal.ok_or(OneClockError::InvalidState("vocal track not loaded"))?;

        self.stop();
        self.diagnostics.reset();

        let (cmd_tx, cmd_rx) = create_command_ring();
        *self.commands.lock() = Some(cmd_tx);

        self.running.store(true, Ordering::SeqCst);

        let anchor = self.clock.load(Ordering::Acquire) + self.config.two_track_lead_frames;
        let core = RenderCore::new(
            Some(reference),
            Some(vocal),
            Arc::clone(&self.mixer),
            cmd_rx,
            Arc::clone(&self.clock),
            anchor,
        );
        let params = StreamParams {
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
            frames_per_callback: self.config.frames_per_callback,
        };

        let (open_tx, open_rx) = crossbeam_channel::bounded::<Result<()>>(1);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);

        let running = Arc::clone(&self.running);
        let stream_thread = std::thread::Builder::new()
            .name("oneclock-streams".into())
            .spawn(move || {
                let stream = match audio::open_playback(params, core, Arc::clone(&running)) {
                    Ok(s) => {
                        let _ = open_tx.send(Ok(()));
                        s
                    }
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };
                let _ = stop_rx.recv();
                drop(stream);
            })?;

        match open_rx.recv() {
            Ok(Ok(())) => {
                *self.run.lock() = Some(RunHandles {
                    stop_tx,
                    stream_thread,
                    worker_thread: None,
                    signal: None,
                });
                self.set_status(EngineStatus::TwoTrackPlaying, None);
                info!(anchor, "two-track playback started");
                Ok(())
            }
            Ok(Err(e)) => {
                self.abort_start(stream_thread, None, None);
                self.set_status(EngineStatus::Error, Some(e.to_string()));
                Err(e)
            }
            Err(_) => {
                self.abort_start(stream_thread, None, None);
                self.set_status(EngineStatus::Error, Some("stream thread died".into()));
                Err(OneClockError::Other(anyhow::anyhow!(
                    "stream thread died before reporting open result"
                )))
            }
        }
    }

    /// Stop whatever mode is active. Idempotent and synchronous: joins
    /// the stream holder and worker threads, then resets the play cursor,
    /// so no render call or capture event can occur after this returns.
    pub fn stop(&self) {
        let handles = self.run.lock().take();
        self.running.store(false, Ordering::SeqCst);

        let Some(mut handles) = handles else { return };

        let _ = handles.stop_tx.send(());
        if let Some(signal) = handles.signal.take() {
            signal.notify_all();
        }
        let _ = handles.stream_thread.join();
        if let Some(worker) = handles.worker_thread.take() {
            let _ = worker.join();
        }
        *self.commands.lock() = None;
        self.clock.store(0, Ordering::Release);
        self.set_status(EngineStatus::Idle, None);
        info!("engine stopped");
    }

    fn abort_start(
        &self,
        stream_thread: JoinHandle<()>,
        worker_thread: Option<JoinHandle<()>>,
        signal: Option<&Arc<WorkerSignal>>,
    ) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(signal) = signal {
            signal.notify_all();
        }
        let _ = stream_thread.join();
        if let Some(worker) = worker_thread {
            let _ = worker.join();
        }
        *self.commands.lock() = None;
    }

    // ── Introspection ────────────────────────────────────────────────────

    /// Session Manager snapshot, verbatim, for diagnostics/UI.
    pub fn session_snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    /// Current engine status (snapshot).
    pub fn status(&self) -> EngineStatus {
        *self.status.lock()
    }

    /// Subscribe to capture chunk events.
    pub fn subscribe_captures(&self) -> broadcast::Receiver<CaptureChunkEvent> {
        self.capture_tx.subscribe()
    }

    /// Subscribe to status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Snapshot of the engine counters for observability.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    fn set_status(&self, new_status: EngineStatus, detail: Option<String>) {
        *self.status.lock() = new_status;
        let _ = self.status_tx.send(EngineStatusEvent {
            status: new_status,
            detail,
        });
    }
}

impl Drop for DuplexEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
