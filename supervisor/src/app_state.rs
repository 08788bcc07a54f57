//! Shared application state types.
//!
//! This module defines the structs that own actor channels and runtime state
//! for the process, the way the original desktop app's `ActorHandles`
//! bundled its Tauri-managed state — here there's no Tauri `State<T>`
//! extractor, so `main.rs` builds one of these and hands clones of the
//! senders to the CLI dispatch and the watchdog.

use crate::protocol::{SupervisorEvent, SupervisorMsg, WatchdogMsg};
use crate::settings::SettingsBundle;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};

/// Actor message channel handles, the single thing `main.rs` constructs and
/// threads through to the CLI command dispatcher.
pub struct ActorHandles {
    pub supervisor_tx: mpsc::Sender<SupervisorMsg>,
    pub watchdog_tx: mpsc::Sender<WatchdogMsg>,
    /// One-way event bus the Swap Proxy Supervisor publishes to and the
    /// Watchdog subscribes to, breaking the cyclic coupling between the two
    /// actors (§9 Design Notes).
    pub events_tx: broadcast::Sender<SupervisorEvent>,
}

/// All persisted settings documents, loaded once at startup and shared
/// behind a single lock per document (mirrors the original `SettingsState`
/// pattern of one `RwLock<T>` per concern rather than one giant lock).
#[derive(Clone)]
pub struct SettingsState {
    pub bundle: Arc<RwLock<SettingsBundle>>,
}

impl SettingsState {
    pub fn new(bundle: SettingsBundle) -> Self {
        Self {
            bundle: Arc::new(RwLock::new(bundle)),
        }
    }
}

/// Non-persistent CLI launch overrides, analogous to the original app's
/// `LaunchOverrides` but scoped to this supervisor's flags.
#[derive(Debug, Clone, Default)]
pub struct LaunchOverrides {
    pub backend_override: Option<String>,
    pub extra_model_dirs: Vec<std::path::PathBuf>,
    pub port_override: Option<u16>,
    pub verbose: bool,
    pub no_autostart: bool,
}
