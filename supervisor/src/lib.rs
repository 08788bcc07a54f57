// =============================================================================
// Module Organization Strategy
// =============================================================================
// This crate is a headless supervisor binary rather than a desktop app, so
// there is no `commands/` dispatch table — `main.rs` owns process wiring and
// CLI subcommand dispatch directly against the actor channels declared here.
// =============================================================================

pub mod actors;
pub mod app_state;
pub mod cli;
pub mod config_emitter;
pub mod crash_handler;
pub mod error;
pub mod metadata;
pub mod paths;
pub mod planner;
pub mod platform;
pub mod process_utils;
pub mod projection;
pub mod protocol;
pub mod provisioner;
pub mod scanner;
pub mod settings;

use std::sync::OnceLock;

/// Global toggle for verbose logging, checked by the Watchdog's per-cycle
/// summary (§4.I "log only on state change, unless verbose") and anywhere
/// else the supervisor would otherwise stay silent on steady-state polling.
/// Set via `--verbose`/`CLARA_VERBOSE` and threaded through `LaunchOverrides`.
pub fn is_verbose_logging_enabled() -> bool {
    static VERBOSE_LOGS_ENABLED: OnceLock<bool> = OnceLock::new();

    *VERBOSE_LOGS_ENABLED.get_or_init(|| {
        std::env::var("CLARA_VERBOSE")
            .map(|v| {
                matches!(
                    v.trim().to_ascii_lowercase().as_str(),
                    "1" | "true" | "yes" | "on" | "debug"
                )
            })
            .unwrap_or(false)
    })
}
