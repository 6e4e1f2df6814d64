//! Tauri command handlers.
//!
//! Each function is registered with `tauri::Builder::invoke_handler` and
//! callable from the frontend via `invoke(...)`.

use oneclock_core::{
    audio::device::DeviceInfo,
    engine::DiagnosticsSnapshot,
    ipc::events::{EngineStatus, SessionSnapshot},
};
use tauri::State;
use tracing::info;

use crate::state::AppState;

/// Start duplex capture: reference playback plus mic capture on one clock.
///
/// `reference_path`, when given, (re)loads the reference track first.
/// Passing 0 for `frames_per_callback` lets the device pick a block size.
#[tauri::command]
pub async fn start(
    state: State<'_, AppState>,
    reference_path: Option<String>,
    sample_rate: Option<u32>,
    channels: Option<u16>,
    frames_per_callback: Option<u32>,
) -> Result<(), String> {
    if let Some(path) = reference_path.as_ref() {
        *state.reference_path.lock() = Some(path.clone());
    }
    let path = state.reference_path.lock().clone();
    state
        .engine
        .start_duplex(
            path.as_deref(),
            sample_rate.unwrap_or(48_000),
            channels.unwrap_or(2),
            frames_per_callback.unwrap_or(0),
        )
        .map_err(|e| e.to_string())
}

/// Stop whichever mode is active. Safe to call when already idle.
#[tauri::command]
pub async fn stop(state: State<'_, AppState>) -> Result<(), String> {
    state.engine.stop();
    let diag = state.engine.diagnostics_snapshot();
    info!(
        blocks_rendered = diag.blocks_rendered,
        chunks_captured = diag.chunks_captured,
        chunks_dropped_ring = diag.chunks_dropped_ring,
        chunks_dropped_stale = diag.chunks_dropped_stale,
        mic_overrun_frames = diag.mic_overrun_frames,
        "engine diagnostics snapshot on stop"
    );
    Ok(())
}

/// Load the reference (backing) track from a WAV file path.
#[tauri::command]
pub async fn load_reference(state: State<'_, AppState>, path: String) -> Result<(), String> {
    state
        .engine
        .load_reference(&path)
        .map_err(|e| e.to_string())?;
    *state.reference_path.lock() = Some(path);
    Ok(())
}

/// Load the recorded vocal track from a WAV file path.
#[tauri::command]
pub async fn load_vocal(state: State<'_, AppState>, path: String) -> Result<(), String> {
    state.engine.load_vocal(&path).map_err(|e| e.to_string())
}

/// Start two-track review playback (reference + vocal). Requires both
/// tracks loaded.
#[tauri::command]
pub async fn start_playback_two_track(state: State<'_, AppState>) -> Result<(), String> {
    state.engine.start_two_track().map_err(|e| e.to_string())
}

/// Set both mix gains. Takes effect on the next render block.
#[tauri::command]
pub async fn set_track_gains(
    state: State<'_, AppState>,
    ref_gain: f32,
    voc_gain: f32,
) -> Result<(), String> {
    state.engine.set_track_gains(ref_gain, voc_gain);
    Ok(())
}

/// Legacy single-gain control: reference gain, vocal left at unity.
#[tauri::command]
pub async fn set_gain(state: State<'_, AppState>, gain: f32) -> Result<(), String> {
    state.engine.set_gain(gain);
    Ok(())
}

/// Shift the vocal track by a signed frame count (positive = vocal lags).
#[tauri::command]
pub async fn set_vocal_offset(state: State<'_, AppState>, frames: i64) -> Result<(), String> {
    state.engine.set_vocal_offset(frames);
    Ok(())
}

/// Return the active capture session's bookkeeping snapshot.
#[tauri::command]
pub async fn get_session_snapshot(state: State<'_, AppState>) -> Result<SessionSnapshot, String> {
    Ok(state.engine.session_snapshot())
}

/// Return the current engine status.
#[tauri::command]
pub async fn get_status(state: State<'_, AppState>) -> Result<EngineStatus, String> {
    Ok(state.engine.status())
}

/// Return the engine's diagnostic counters.
#[tauri::command]
pub async fn get_diagnostics(state: State<'_, AppState>) -> Result<DiagnosticsSnapshot, String> {
    Ok(state.engine.diagnostics_snapshot())
}

/// Return a list of available audio input devices.
#[tauri::command]
pub async fn list_audio_devices(_state: State<'_, AppState>) -> Result<Vec<DeviceInfo>, String> {
    Ok(oneclock_core::audio::device::list_input_devices())
}
