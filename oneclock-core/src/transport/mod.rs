//! Capture transport: rings that move data off the realtime callback.
//!
//! Two SPSC rings (`ringbuf::HeapRb`) carry each captured block: a ring of
//! fixed-size [`CaptureMeta`] records and a ring of raw `i16` PCM samples.
//! The render callback pushes metadata first, then payload, then notifies
//! the worker through a condvar held only for the notify. The worker pops
//! a metadata record into a one-slot pending holder and consumes the
//! payload only once the full sample count is present, so a partially
//! written chunk is never dequeued.
//!
//! Overflow policy: if either ring lacks space for the whole chunk, the
//! chunk is dropped (drop-newest) and a shared counter is incremented.
//! The producer never blocks and never waits on the worker.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapRb,
};

/// Capacity of the metadata ring, in records.
pub const META_RING_CAPACITY: usize = 1024;

/// Capacity of the PCM ring, in i16 samples: 2^19 ≈ 1 MiB, ~5.5 s of
/// stereo at 48 kHz — steady-state operation never comes close.
pub const PCM_RING_CAPACITY: usize = 1 << 19;

/// Per-chunk metadata produced by the render callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureMeta {
    /// Frames actually read from the mic this block (may be < block size).
    pub num_frames: u32,
    pub sample_rate: u32,
    pub channels: u16,
    /// Total mic frames consumed before this chunk (input stream timeline).
    pub input_frame_pos: i64,
    /// Absolute output clock position when the chunk was produced.
    pub output_frame_pos: i64,
    /// Monotonic nanoseconds since the engine epoch.
    pub timestamp_nanos: i64,
    /// `output_frame_pos` relative to the session start clock position.
    pub output_frame_pos_rel: i64,
    pub session_id: u64,
}

impl CaptureMeta {
    /// Payload length implied by this record, in i16 samples.
    pub fn pcm_len(&self) -> usize {
        self.num_frames as usize * self.channels as usize
    }
}

/// A complete captured chunk, reassembled by the worker.
#[derive(Debug, Clone)]
pub struct CaptureChunk {
    pub meta: CaptureMeta,
    pub pcm: Vec<i16>,
}

/// Condvar wake-up shared by producer and worker. The realtime side only
/// ever takes the lock for the duration of a notify; the worker waits
/// with a bounded timeout as a safety net against missed notifies.
#[derive(Default)]
pub struct WorkerSignal {
    lock: Mutex<()>,
    cv: Condvar,
}

impl WorkerSignal {
    pub fn notify(&self) {
        let _guard = self.lock.lock();
        self.cv.notify_one();
    }

    pub fn notify_all(&self) {
        let _guard = self.lock.lock();
        self.cv.notify_all();
    }

    pub fn wait(&self, timeout: Duration) {
        let mut guard = self.lock.lock();
        self.cv.wait_for(&mut guard, timeout);
    }
}

/// Producer half — owned by the render callback.
pub struct CaptureProducer {
    meta: ringbuf::HeapProd<CaptureMeta>,
    pcm: ringbuf::HeapProd<i16>,
    dropped: Arc<AtomicU64>,
    signal: Arc<WorkerSignal>,
}

impl CaptureProducer {
    /// Push one chunk and wake the worker. Returns `false` if the chunk
    /// was dropped because either ring lacked space.
    pub fn push(&mut self, meta: CaptureMeta, pcm: &[i16]) -> bool {
        debug_assert_eq!(pcm.len(), meta.pcm_len());

        if self.meta.vacant_len() < 1 || self.pcm.vacant_len() < pcm.len() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        self.push_meta(meta);
        self.push_pcm(pcm);
        self.signal.notify();
        true
    }

    fn push_meta(&mut self, meta: CaptureMeta) {
        let pushed = self.meta.try_push(meta);
        debug_assert!(pushed.is_ok());
    }

    fn push_pcm(&mut self, pcm: &[i16]) {
        let written = self.pcm.push_slice(pcm);
        debug_assert_eq!(written, pcm.len());
    }
}

/// Consumer half — owned by the bridge worker thread.
pub struct CaptureConsumer {
    meta: ringbuf::HeapCons<CaptureMeta>,
    pcm: ringbuf::HeapCons<i16>,
    /// Metadata popped ahead of its payload, held until the payload lands.
    pending: Option<CaptureMeta>,
    signal: Arc<WorkerSignal>,
}

impl CaptureConsumer {
    /// Block until notified or until `timeout` elapses.
    pub fn wait(&self, timeout: Duration) {
        self.signal.wait(timeout);
    }

    /// Pop the next complete chunk, or `None` if no chunk (or only an
    /// incomplete one) is available yet.
    pub fn try_pop(&mut self) -> Option<CaptureChunk> {
        let meta = match self.pending.take() {
            Some(m) => m,
            None => self.meta.try_pop()?,
        };

        let needed = meta.pcm_len();
        if self.pcm.occupied_len() < needed {
            // Metadata landed before its payload; retry next wake.
            self.pending = Some(meta);
            return None;
        }

        let mut pcm = vec![0i16; needed];
        let popped = self.pcm.pop_slice(&mut pcm);
        debug_assert_eq!(popped, needed);
        Some(CaptureChunk { meta, pcm })
    }
}

/// Create a transport pair with the given ring capacities.
///
/// `dropped` is shared so the engine can expose the count in diagnostics.
pub fn with_capacity(
    meta_capacity: usize,
    pcm_capacity: usize,
    dropped: Arc<AtomicU64>,
) -> (CaptureProducer, CaptureConsumer, Arc<WorkerSignal>) {
    let (meta_prod, meta_cons) = HeapRb::<CaptureMeta>::new(meta_capacity).split();
    let (pcm_prod, pcm_cons) = HeapRb::<i16>::new(pcm_capacity).split();
    let signal = Arc::new(WorkerSignal::default());

    (
        CaptureProducer {
            meta: meta_prod,
            pcm: pcm_prod,
            dropped,
            signal: Arc::clone(&signal),
        },
        CaptureConsumer {
            meta: meta_cons,
            pcm: pcm_cons,
            pending: None,
            signal: Arc::clone(&signal),
        },
        signal,
    )
}

/// Create a transport pair with the default capacities.
pub fn create(
    dropped: Arc<AtomicU64>,
) -> (CaptureProducer, CaptureConsumer, Arc<WorkerSignal>) {
    with_capacity(META_RING_CAPACITY, PCM_RING_CAPACITY, dropped)
}

// ---------------------------------------------------------------------------
// Mic feed ring
// ---------------------------------------------------------------------------

/// Producer half of the mic feed — held by the cpal input callback.
pub type MicProducer = ringbuf::HeapProd<f32>;

/// Consumer half of the mic feed — drained by the output callback.
pub type MicConsumer = ringbuf::HeapCons<f32>;

/// Mic ring capacity: 2^15 mono f32 samples ≈ 680 ms at 48 kHz, far more
/// than the couple of blocks of skew between the two stream callbacks.
pub const MIC_RING_CAPACITY: usize = 1 << 15;

/// Create the mono mic feed ring connecting input and output callbacks.
pub fn create_mic_ring() -> (MicProducer, MicConsumer) {
    HeapRb::<f32>::new(MIC_RING_CAPACITY).split()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(session_id: u64, num_frames: u32, channels: u16) -> CaptureMeta {
        CaptureMeta {
            num_frames,
            sample_rate: 48_000,
            channels,
            input_frame_pos: 0,
            output_frame_pos: 0,
            timestamp_nanos: 0,
            output_frame_pos_rel: 0,
            session_id,
        }
    }

    #[test]
    fn chunk_round_trips_through_both_rings() {
        let dropped = Arc::new(AtomicU64::new(0));
        let (mut prod, mut cons, _) = create(Arc::clone(&dropped));

        let pcm: Vec<i16> = (0..128).collect();
        assert!(prod.push(meta(1, 64, 2), &pcm));

        let chunk = cons.try_pop().expect("complete chunk available");
        assert_eq!(chunk.meta.session_id, 1);
        assert_eq!(chunk.meta.num_frames, 64);
        assert_eq!(chunk.pcm, pcm);
        assert!(cons.try_pop().is_none());
        assert_eq!(dropped.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn metadata_without_payload_is_never_dequeued() {
        let dropped = Arc::new(AtomicU64::new(0));
        let (mut prod, mut cons, _) = create(dropped);

        // Metadata lands first; the payload has not been written yet.
        prod.push_meta(meta(3, 32, 1));
        assert!(cons.try_pop().is_none());
        // A second attempt must not lose the pending record.
        assert!(cons.try_pop().is_none());

        let pcm = vec![7i16; 32];
        prod.push_pcm(&pcm);
        let chunk = cons.try_pop().expect("chunk completes once payload lands");
        assert_eq!(chunk.meta.session_id, 3);
        assert_eq!(chunk.pcm, pcm);
    }

    #[test]
    fn overflow_drops_newest_and_counts() {
        let dropped = Arc::new(AtomicU64::new(0));
        // Room for exactly two 16-sample chunks in the PCM ring.
        let (mut prod, mut cons, _) = with_capacity(8, 32, Arc::clone(&dropped));

        let pcm = vec![1i16; 16];
        assert!(prod.push(meta(1, 16, 1), &pcm));
        assert!(prod.push(meta(2, 16, 1), &pcm));
        // Third chunk does not fit: dropped, earlier chunks untouched.
        assert!(!prod.push(meta(3, 16, 1), &pcm));
        assert_eq!(dropped.load(Ordering::Relaxed), 1);

        assert_eq!(cons.try_pop().unwrap().meta.session_id, 1);
        assert_eq!(cons.try_pop().unwrap().meta.session_id, 2);
        assert!(cons.try_pop().is_none());

        // Space freed: pushes succeed again.
        assert!(prod.push(meta(4, 16, 1), &pcm));
        assert_eq!(cons.try_pop().unwrap().meta.session_id, 4);
    }

    #[test]
    fn signal_wait_times_out_without_notify() {
        let dropped = Arc::new(AtomicU64::new(0));
        let (_prod, cons, _) = create(dropped);
        let started = std::time::Instant::now();
        cons.wait(Duration::from_millis(10));
        assert!(started.elapsed() >= Duration::from_millis(5));
    }
}
