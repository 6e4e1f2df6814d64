//! OneClock desktop application entry point.
//!
//! ## Runtime note
//!
//! Tauri v2 manages its own Tokio runtime internally.
//! We use `tauri::async_runtime::spawn` (not `tokio::spawn`) so our tasks
//! share Tauri's runtime and can safely call Tauri APIs.

#![cfg_attr(
    all(not(debug_assertions), target_os = "windows"),
    windows_subsystem = "windows"
)]

mod commands;
mod state;

use std::sync::Arc;

use oneclock_core::{DuplexEngine, EngineConfig};
use parking_lot::Mutex;
use state::AppState;
use tauri::Emitter;
use tracing::info;

const CAPTURE_CHANNEL: &str = "oneclock://capture";
const STATUS_CHANNEL: &str = "oneclock://status";

fn main() {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "oneclock=info".parse().unwrap()),
        )
        .init();

    info!("OneClock starting");

    // ── Engine setup ──────────────────────────────────────────────────────
    let engine = Arc::new(DuplexEngine::new(EngineConfig::default()));
    let engine_for_setup = Arc::clone(&engine);

    // ── Tauri app ─────────────────────────────────────────────────────────
    tauri::Builder::default()
        .setup(move |app| {
            let app_handle = app.handle().clone();

            // ── Forward engine events → Tauri event bus ───────────────────
            // Use tauri::async_runtime::spawn to share Tauri's Tokio runtime.

            let mut capture_rx = engine_for_setup.subscribe_captures();
            let handle1 = app_handle.clone();
            tauri::async_runtime::spawn(async move {
                loop {
                    match capture_rx.recv().await {
                        Ok(event) => {
                            if let Err(e) = handle1.emit(CAPTURE_CHANNEL, &event) {
                                tracing::warn!("emit capture chunk: {e}");
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!("capture receiver lagged by {n} events");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            });

            let mut status_rx = engine_for_setup.subscribe_status();
            let handle2 = app_handle.clone();
            tauri::async_runtime::spawn(async move {
                loop {
                    match status_rx.recv().await {
                        Ok(event) => {
                            if let Err(e) = handle2.emit(STATUS_CHANNEL, &event) {
                                tracing::warn!("emit status: {e}");
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!("status receiver lagged by {n} events");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            });

            Ok(())
        })
        .manage(AppState {
            engine: Arc::clone(&engine),
            reference_path: Arc::new(Mutex::new(None)),
        })
        .invoke_handler(tauri::generate_handler![
            commands::start,
            commands::stop,
            commands::load_reference,
            commands::load_vocal,
            commands::start_playback_two_track,
            commands::set_track_gains,
            commands::set_gain,
            commands::set_vocal_offset,
            commands::get_session_snapshot,
            commands::get_status,
            commands::get_diagnostics,
            commands::list_audio_devices,
        ])
        .run(tauri::generate_context!())
        .expect("error while running Tauri application");
}
