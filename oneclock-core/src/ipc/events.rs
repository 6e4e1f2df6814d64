//! Event types emitted over the host IPC channel.
//!
//! ## Channel names
//!
//! | Event | Channel |
//! |-------|---------|
//! | `CaptureChunkEvent` | `"oneclock://capture"` |
//! | `EngineStatusEvent` | `"oneclock://status"` |

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Capture events
// ---------------------------------------------------------------------------

/// Emitted on channel `"oneclock://capture"` once per accepted capture
/// chunk. Downstream consumers (pitch detector, offset estimator) read
/// the clock fields to correlate capture with playback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureChunkEvent {
    /// 16-bit PCM payload, interleaved per channel.
    pub pcm16: Vec<i16>,
    pub num_frames: u32,
    pub sample_rate: u32,
    pub channels: u16,
    /// Input stream timeline position (total mic frames before this chunk).
    pub input_frame_pos: i64,
    /// Absolute output clock position when the chunk was produced.
    pub output_frame_pos: i64,
    /// Monotonic nanoseconds since the engine epoch.
    pub timestamp_nanos: i64,
    /// Output clock position relative to the session start.
    pub output_frame_pos_rel: i64,
    pub session_id: u64,
}

// ---------------------------------------------------------------------------
// Session snapshot
// ---------------------------------------------------------------------------

/// Diagnostic snapshot of the active capture session, returned verbatim
/// by the `get_session_snapshot` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: u64,
    /// Absolute clock position at session start.
    pub session_start_frame: u64,
    /// First accepted chunk's session-relative clock position, or 0.
    pub first_capture_output_frame: i64,
    /// Most recent clock position observed by the render callback.
    pub last_output_frame: u64,
    /// Measured round-trip latency: the default vocal offset correction
    /// a caller may feed into the mixer before cross-correlation refines it.
    pub computed_voc_offset_frames: i64,
    pub has_first_capture: bool,
}

// ---------------------------------------------------------------------------
// Engine status events
// ---------------------------------------------------------------------------

/// Emitted on channel `"oneclock://status"` when the engine state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Operating mode of the engine. Duplex capture and two-track playback
/// are mutually exclusive; entering one stops the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// No streams open.
    Idle,
    /// Playing the reference while capturing the mic.
    DuplexCapturing,
    /// Reviewing reference + recorded vocal, no capture.
    TwoTrackPlaying,
    /// Stream open failed — engine may be restarted.
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_event_serializes_with_camel_case_fields() {
        let event = CaptureChunkEvent {
            pcm16: vec![0, -1, 32767],
            num_frames: 3,
            sample_rate: 48_000,
            channels: 1,
            input_frame_pos: 960,
            output_frame_pos: 1_440,
            timestamp_nanos: 123_456_789,
            output_frame_pos_rel: 480,
            session_id: 2,
        };

        let json = serde_json::to_value(&event).expect("serialize capture event");
        assert_eq!(json["numFrames"], 3);
        assert_eq!(json["sampleRate"], 48_000);
        assert_eq!(json["inputFramePos"], 960);
        assert_eq!(json["outputFramePos"], 1_440);
        assert_eq!(json["outputFramePosRel"], 480);
        assert_eq!(json["sessionId"], 2);
        assert_eq!(json["pcm16"][2], 32767);

        let round_trip: CaptureChunkEvent =
            serde_json::from_value(json).expect("deserialize capture event");
        assert_eq!(round_trip.session_id, 2);
        assert_eq!(round_trip.pcm16, vec![0, -1, 32767]);
    }

    #[test]
    fn session_snapshot_serializes_with_camel_case_fields() {
        let snap = SessionSnapshot {
            session_id: 4,
            session_start_frame: 96_000,
            first_capture_output_frame: 1_024,
            last_output_frame: 192_000,
            computed_voc_offset_frames: 1_024,
            has_first_capture: true,
        };

        let json = serde_json::to_value(snap).expect("serialize snapshot");
        assert_eq!(json["sessionId"], 4);
        assert_eq!(json["sessionStartFrame"], 96_000);
        assert_eq!(json["computedVocOffsetFrames"], 1_024);
        assert_eq!(json["hasFirstCapture"], true);
    }

    #[test]
    fn engine_status_serializes_lowercase() {
        let event = EngineStatusEvent {
            status: EngineStatus::DuplexCapturing,
            detail: None,
        };
        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "duplexcapturing");

        let round_trip: EngineStatusEvent =
            serde_json::from_value(json).expect("deserialize status event");
        assert_eq!(round_trip.status, EngineStatus::DuplexCapturing);
    }
}
