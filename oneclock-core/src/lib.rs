//! # oneclock-core
//!
//! Realtime duplex audio engine: plays a reference track while capturing
//! the microphone, with both timelines anchored to a single hardware
//! clock — the output stream's play-frame cursor.
//!
//! ## Architecture
//!
//! ```text
//!  mic ──► input callback ──► mic ring ─┐
//!                                       ▼
//!  tracks ──► RenderCore ──► output callback ──► speakers
//!                                       │ (master clock)
//!                                       ▼
//!                         session gate + quantize
//!                                       │
//!                          meta ring + pcm ring
//!                                       ▼
//!                bridge worker ──► broadcast events ──► host
//! ```
//!
//! The host-facing surface is [`DuplexEngine`]: load tracks, start duplex
//! capture or two-track review playback, adjust gains and the vocal
//! offset live, and subscribe to capture chunk and status events.
//!
//! ## Example
//!
//! ```no_run
//! use oneclock_core::{DuplexEngine, EngineConfig};
//!
//! # fn main() -> oneclock_core::Result<()> {
//! let engine = DuplexEngine::new(EngineConfig::default());
//! engine.load_reference("backing.wav")?;
//! engine.start_duplex(None, 48_000, 2, 0)?;
//! // ... capture chunks flow via engine.subscribe_captures() ...
//! engine.stop();
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod audio;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod render;
pub mod session;
pub mod track;
pub mod transport;

pub use engine::{DiagnosticsSnapshot, DuplexEngine, EngineConfig};
pub use error::{OneClockError, Result};
pub use ipc::events::{CaptureChunkEvent, EngineStatus, EngineStatusEvent, SessionSnapshot};
pub use track::AudioTrack;
