//! Command-line argument parsing and launch-time overrides.
//!
//! Mirrors the original app's `cli.rs` shape (a `clap::Parser` struct plus an
//! `apply_*_overrides` function) but scoped to the supervisor's own flags and
//! subcommands instead of chat-session launch options.

use crate::app_state::LaunchOverrides;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI arguments for the Clara runtime supervisor.
#[derive(Parser, Debug, Clone)]
#[command(name = "clara-supervisor", about = "Local LLM runtime supervisor")]
pub struct CliArgs {
    /// Force a specific accelerator backend instead of auto-detecting.
    /// One of: cuda, rocm, vulkan, metal, cpu.
    #[arg(long, value_name = "BACKEND", env = "CLARA_BACKEND")]
    pub backend: Option<String>,

    /// Additional model directory to scan, beyond the bundled default.
    /// Repeatable.
    #[arg(long = "model-dir", value_name = "DIR", env = "CLARA_MODEL_DIR", value_delimiter = ',')]
    pub model_dir: Vec<PathBuf>,

    /// Port the swap proxy listens on.
    #[arg(long, value_name = "PORT", default_value_t = 8091, env = "CLARA_PORT")]
    pub port: u16,

    /// Verbose logging (state-transition and health-check detail that's
    /// normally suppressed per §4.I's "log only on state change" rule).
    #[arg(long, env = "CLARA_VERBOSE", value_parser = clap::builder::BoolishValueParser::new())]
    pub verbose: Option<bool>,

    /// Don't start the swap proxy or watchdog automatically on launch;
    /// wait for an explicit `start` subcommand.
    #[arg(long)]
    pub no_autostart: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the swap proxy (provisioning binaries and generating config first if needed).
    Start,
    /// Stop the swap proxy.
    Stop,
    /// Restart the swap proxy.
    Restart,
    /// Print current supervisor/watchdog status as JSON.
    Status,
    /// Scan configured model directories and print discovered models as JSON.
    Scan,
    /// Print platform detection, binary provisioning, and settings diagnostics as JSON.
    Diagnostics,
}

/// Apply CLI overrides into a `LaunchOverrides`, the non-persistent subset of
/// config that only lives for this process invocation.
pub fn apply_cli_overrides(args: &CliArgs) -> LaunchOverrides {
    if let Some(backend) = &args.backend {
        println!("[Launch] Backend override requested: {}", backend);
    }
    if !args.model_dir.is_empty() {
        println!("[Launch] Extra model directories: {:?}", args.model_dir);
    }

    LaunchOverrides {
        backend_override: args.backend.clone(),
        extra_model_dirs: args.model_dir.clone(),
        port_override: Some(args.port),
        verbose: args.verbose.unwrap_or(false),
        no_autostart: args.no_autostart,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_args_parse_defaults() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn default_port_is_8091() {
        let args = CliArgs::parse_from(["clara-supervisor"]);
        assert_eq!(args.port, 8091);
        assert!(!args.no_autostart);
    }

    #[test]
    fn repeated_model_dir_accumulates() {
        let args = CliArgs::parse_from([
            "clara-supervisor",
            "--model-dir",
            "/a",
            "--model-dir",
            "/b",
        ]);
        assert_eq!(args.model_dir, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
    }
}
