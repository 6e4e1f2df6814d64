//! Capture session identity and clock bookkeeping.
//!
//! Duplex start/stop on consumer audio stacks is racy: tearing down an
//! input tap is asynchronous relative to in-flight realtime callbacks, so
//! a chunk produced by a just-stopped run can arrive after the next run
//! has begun. A strictly increasing session id is the discriminator: the
//! gate in [`SessionManager::accept_capture`] drops anything tagged with
//! a superseded id before it reaches the event stream.

use parking_lot::Mutex;

use crate::ipc::events::SessionSnapshot;

#[derive(Debug, Default)]
struct SessionState {
    /// Strictly increasing; 0 means no session has ever started.
    session_id: u64,
    /// Absolute hardware clock position at `begin_session`.
    session_start_sample_time: u64,
    /// Set by the first accepted chunk of the session, then latched.
    first_capture_output_frame_rel: Option<i64>,
    /// Most recent absolute clock position observed by the render callback.
    last_output_frame: u64,
    has_capture: bool,
}

/// Owns the active session. All fields update together under one mutex —
/// `begin_session` must be atomic with respect to `snapshot`.
#[derive(Debug, Default)]
pub struct SessionManager {
    inner: Mutex<SessionState>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new session at the given clock position and return its id.
    ///
    /// Ids start at 1 and increase by 1 per call. Any chunk still tagged
    /// with an older id becomes droppable the moment this returns.
    pub fn begin_session(&self, current_clock_position: u64) -> u64 {
        let mut s = self.inner.lock();
        s.session_id += 1;
        s.session_start_sample_time = current_clock_position;
        s.first_capture_output_frame_rel = None;
        s.last_output_frame = 0;
        s.has_capture = false;
        s.session_id
    }

    /// Gate a capture chunk. Returns `false` (drop it) unless the chunk
    /// belongs to the active session. The first accepted chunk latches
    /// `first_capture_output_frame_rel`; later chunks never overwrite it.
    pub fn accept_capture(&self, chunk_session_id: u64, output_frame_rel: i64) -> bool {
        let mut s = self.inner.lock();
        if chunk_session_id != s.session_id || s.session_id == 0 {
            return false;
        }
        if s.first_capture_output_frame_rel.is_none() {
            s.first_capture_output_frame_rel = Some(output_frame_rel);
            s.has_capture = true;
        }
        true
    }

    /// Record the most recent absolute clock position. Liveness only.
    pub fn update_last_output_frame(&self, frame: u64) {
        self.inner.lock().last_output_frame = frame;
    }

    /// Absolute clock position stored at session start.
    pub fn session_start_sample_time(&self) -> u64 {
        self.inner.lock().session_start_sample_time
    }

    /// Consistent snapshot of the active session.
    ///
    /// `computed_voc_offset_frames` is the measured round-trip latency for
    /// this session: `first_capture_output_frame_rel` when set, else 0.
    pub fn snapshot(&self) -> SessionSnapshot {
        let s = self.inner.lock();
        SessionSnapshot {
            session_id: s.session_id,
            session_start_frame: s.session_start_sample_time,
            first_capture_output_frame: s.first_capture_output_frame_rel.unwrap_or(0),
            last_output_frame: s.last_output_frame,
            computed_voc_offset_frames: s.first_capture_output_frame_rel.unwrap_or(0),
            has_first_capture: s.has_capture,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_increase_by_one_from_one() {
        let mgr = SessionManager::new();
        for expected in 1..=10u64 {
            assert_eq!(mgr.begin_session(expected * 100), expected);
            assert_eq!(mgr.snapshot().session_id, expected);
        }
    }

    #[test]
    fn first_capture_offset_latches_on_first_accepted_chunk() {
        let mgr = SessionManager::new();
        let id = mgr.begin_session(0);

        for rel in [300i64, 700, 900, 1_100, 1_300] {
            assert!(mgr.accept_capture(id, rel));
        }

        let snap = mgr.snapshot();
        assert_eq!(snap.first_capture_output_frame, 300);
        assert_eq!(snap.computed_voc_offset_frames, 300);
        assert!(snap.has_first_capture);
    }

    #[test]
    fn latch_resets_per_session() {
        let mgr = SessionManager::new();
        let a = mgr.begin_session(0);
        assert!(mgr.accept_capture(a, 512));
        assert_eq!(mgr.snapshot().computed_voc_offset_frames, 512);

        let b = mgr.begin_session(10_000);
        assert!(!mgr.snapshot().has_first_capture);
        assert_eq!(mgr.snapshot().computed_voc_offset_frames, 0);
        assert!(mgr.accept_capture(b, 256));
        assert_eq!(mgr.snapshot().computed_voc_offset_frames, 256);
    }

    #[test]
    fn stale_session_chunks_are_rejected() {
        let mgr = SessionManager::new();
        let old = mgr.begin_session(0);
        mgr.begin_session(5_000);

        assert!(!mgr.accept_capture(old, 100));
        assert!(!mgr.snapshot().has_first_capture);
    }

    #[test]
    fn chunks_before_any_session_are_rejected() {
        let mgr = SessionManager::new();
        assert!(!mgr.accept_capture(0, 0));
    }

    #[test]
    fn last_output_frame_tracks_latest_observation() {
        let mgr = SessionManager::new();
        mgr.begin_session(0);
        let mut prev = 0u64;
        for frame in [128u64, 256, 1_024, 4_096] {
            mgr.update_last_output_frame(frame);
            let snap = mgr.snapshot();
            assert!(snap.last_output_frame >= prev);
            prev = snap.last_output_frame;
        }
        assert_eq!(prev, 4_096);
    }
}
