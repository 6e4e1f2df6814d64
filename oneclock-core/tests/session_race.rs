//! Stop/start race coverage: chunks stamped with a superseded session id
//! must never reach the event stream, and the first-capture latch must
//! reflect only the active session, across many rapid restart cycles.

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use oneclock_core::engine::{worker, EngineDiagnostics};
use oneclock_core::ipc::events::CaptureChunkEvent;
use oneclock_core::session::SessionManager;
use oneclock_core::transport::{self, CaptureMeta, CaptureProducer};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

const CYCLES: u64 = 100;
const CHUNK_FRAMES: u32 = 16;

fn meta(session_id: u64, rel: i64) -> CaptureMeta {
    CaptureMeta {
        num_frames: CHUNK_FRAMES,
        sample_rate: 48_000,
        channels: 1,
        input_frame_pos: rel,
        output_frame_pos: rel,
        timestamp_nanos: 0,
        output_frame_pos_rel: rel,
        session_id,
    }
}

/// Mimic the output callback's gate-then-push sequence.
fn push_gated(
    session: &SessionManager,
    producer: &mut CaptureProducer,
    session_id: u64,
    rel: i64,
) -> bool {
    if !session.accept_capture(session_id, rel) {
        return false;
    }
    let pcm = vec![0i16; CHUNK_FRAMES as usize];
    assert!(producer.push(meta(session_id, rel), &pcm));
    true
}

fn drain_events(
    rx: &mut broadcast::Receiver<CaptureChunkEvent>,
    expected: usize,
    timeout: Duration,
) -> Vec<CaptureChunkEvent> {
    let start = Instant::now();
    let mut events = Vec::with_capacity(expected);
    while events.len() < expected {
        match rx.try_recv() {
            Ok(ev) => events.push(ev),
            Err(TryRecvError::Empty) => {
                if start.elapsed() >= timeout {
                    panic!(
                        "timed out with {} of {} capture events",
                        events.len(),
                        expected
                    );
                }
                thread::sleep(Duration::from_millis(2));
            }
            Err(TryRecvError::Lagged(n)) => panic!("receiver lagged by {n} events"),
            Err(TryRecvError::Closed) => panic!("capture channel closed unexpectedly"),
        }
    }
    events
}

#[test]
fn stale_session_chunks_never_reach_the_event_stream() {
    let session = Arc::new(SessionManager::new());
    let diagnostics = Arc::new(EngineDiagnostics::default());
    let (mut producer, consumer, signal) =
        transport::create(Arc::clone(&diagnostics.chunks_dropped_ring));

    let running = Arc::new(AtomicBool::new(true));
    let (capture_tx, mut capture_rx) = broadcast::channel(1024);

    let ctx = worker::WorkerContext {
        consumer,
        running: Arc::clone(&running),
        capture_tx,
        diagnostics: Arc::clone(&diagnostics),
    };
    let handle = thread::spawn(move || worker::run(ctx));

    let mut stale_rejections = 0u64;
    for cycle in 1..=CYCLES {
        let id = session.begin_session(cycle * 1_000);
        assert_eq!(id, cycle);

        // A callback from the previous run racing the restart: its chunks
        // still carry the superseded id and must be gated out.
        if cycle > 1 && !push_gated(&session, &mut producer, cycle - 1, 999) {
            stale_rejections += 1;
        }

        for rel in [100i64, 200, 300] {
            assert!(push_gated(&session, &mut producer, id, rel));
        }
    }

    let expected = (CYCLES * 3) as usize;
    let events = drain_events(&mut capture_rx, expected, Duration::from_secs(5));

    running.store(false, Ordering::SeqCst);
    signal.notify_all();
    handle.join().expect("worker thread panicked");

    assert_eq!(stale_rejections, CYCLES - 1);

    let mut per_session: HashMap<u64, Vec<i64>> = HashMap::new();
    for ev in &events {
        assert!(
            (1..=CYCLES).contains(&ev.session_id),
            "event with unknown session id {}",
            ev.session_id
        );
        assert_ne!(
            ev.output_frame_pos_rel, 999,
            "stale chunk leaked into session {}",
            ev.session_id
        );
        per_session
            .entry(ev.session_id)
            .or_default()
            .push(ev.output_frame_pos_rel);
    }
    for id in 1..=CYCLES {
        assert_eq!(per_session[&id], vec![100, 200, 300], "session {id}");
    }

    // Latch belongs to the last session's first accepted chunk.
    let snap = session.snapshot();
    assert_eq!(snap.session_id, CYCLES);
    assert!(snap.has_first_capture);
    assert_eq!(snap.first_capture_output_frame, 100);
    assert_eq!(snap.computed_voc_offset_frames, 100);

    assert_eq!(
        diagnostics.events_forwarded.load(Ordering::Relaxed),
        expected as u64
    );
}

#[test]
fn worker_forwards_tail_chunks_after_shutdown() {
    let session = Arc::new(SessionManager::new());
    let diagnostics = Arc::new(EngineDiagnostics::default());
    let (mut producer, consumer, signal) =
        transport::create(Arc::clone(&diagnostics.chunks_dropped_ring));

    let running = Arc::new(AtomicBool::new(true));
    let (capture_tx, mut capture_rx) = broadcast::channel(64);

    let id = session.begin_session(0);
    for rel in [10i64, 20, 30, 40] {
        assert!(push_gated(&session, &mut producer, id, rel));
    }

    // Shut down before the worker ever runs: the final drain must still
    // flush everything already in the rings.
    running.store(false, Ordering::SeqCst);
    let ctx = worker::WorkerContext {
        consumer,
        running,
        capture_tx,
        diagnostics,
    };
    let handle = thread::spawn(move || worker::run(ctx));
    signal.notify_all();
    handle.join().expect("worker thread panicked");

    let events = drain_events(&mut capture_rx, 4, Duration::from_secs(1));
    let rels: Vec<i64> = events.iter().map(|e| e.output_frame_pos_rel).collect();
    assert_eq!(rels, vec![10, 20, 30, 40]);
    assert!(events.iter().all(|e| e.session_id == id));
}
