//! Tauri application state.
//!
//! `AppState` is managed via `app.manage(...)` and injected into command handlers
//! by Tauri's `State<'_, AppState>` extractor.

use std::sync::Arc;

use oneclock_core::DuplexEngine;
use parking_lot::Mutex;

/// Shared application state — available in every `#[tauri::command]`.
pub struct AppState {
    /// The core engine. Wrapped in `Arc` so it can be cloned into event-forwarding
    /// tasks started after setup.
    pub engine: Arc<DuplexEngine>,
    /// Last reference track path the frontend pointed us at, for restarts.
    pub reference_path: Arc<Mutex<Option<String>>>,
}
