//! Bridge worker: drains the capture transport into the event stream.
//!
//! One persistent thread per capture run, spawned at start and joined at
//! stop. It binds to nothing but a broadcast sender, so a slow host
//! consumer can never stall the realtime callback — the transport rings
//! are the decoupling point, and overflow there is counted, not blocked on.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::{
    engine::EngineDiagnostics,
    ipc::events::CaptureChunkEvent,
    transport::{CaptureChunk, CaptureConsumer},
};

/// Bounded wait per wake cycle: safety net against a missed notify.
const WORKER_POLL_MS: u64 = 50;

/// All context the worker needs, passed as one struct so the spawn stays tidy.
pub struct WorkerContext {
    pub consumer: CaptureConsumer,
    pub running: Arc<AtomicBool>,
    pub capture_tx: broadcast::Sender<CaptureChunkEvent>,
    pub diagnostics: Arc<EngineDiagnostics>,
}

/// Run the worker until `ctx.running` becomes false, then forward the tail.
pub fn run(mut ctx: WorkerContext) {
    info!("bridge worker started");

    while ctx.running.load(Ordering::Relaxed) {
        ctx.consumer.wait(Duration::from_millis(WORKER_POLL_MS));
        drain(&mut ctx);
    }

    // Chunks the callback pushed before the streams closed still belong
    // to their (now superseded) session; forward them and let the host
    // decide. The session gate already dropped anything stale.
    drain(&mut ctx);

    info!("bridge worker stopped");
}

fn drain(ctx: &mut WorkerContext) {
    while let Some(chunk) = ctx.consumer.try_pop() {
        let event = event_from(chunk);
        debug!(
            session_id = event.session_id,
            num_frames = event.num_frames,
            output_frame_pos_rel = event.output_frame_pos_rel,
            "forwarding capture chunk"
        );
        // Send only fails when no subscriber exists; capture is still
        // useful for session bookkeeping, so this is not an error.
        let _ = ctx.capture_tx.send(event);
        ctx.diagnostics
            .events_forwarded
            .fetch_add(1, Ordering::Relaxed);
    }
}

fn event_from(chunk: CaptureChunk) -> CaptureChunkEvent {
    let meta = chunk.meta;
    CaptureChunkEvent {
        pcm16: chunk.pcm,
        num_frames: meta.num_frames,
        sample_rate: meta.sample_rate,
        channels: meta.channels,
        input_frame_pos: meta.input_frame_pos,
        output_frame_pos: meta.output_frame_pos,
        timestamp_nanos: meta.timestamp_nanos,
        output_frame_pos_rel: meta.output_frame_pos_rel,
        session_id: meta.session_id,
    }
}
