//! Crash handler.
//!
//! Installs a global panic hook that:
//! 1. Formats detailed crash information (timestamp, version, location, backtrace)
//! 2. Writes a crash log to `~/.clara/crash.log` (via `paths::crash_log_path`)
//! 3. Echoes the same details to stderr
//!
//! This is a headless service, so there's no dialog and no auto-restart —
//! the supervising process manager (systemd, launchd, a parent shell) owns
//! restart policy, not this binary.

use std::backtrace::Backtrace;
use std::fs;
use std::io::Write;
use std::panic::PanicHookInfo;
use std::path::PathBuf;

use crate::paths;

/// Install the global crash handler. Must be called at the very start of `main()`.
pub fn install_crash_handler() {
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let crash_details = format_crash_details(panic_info);
        let log_path = write_crash_log(&crash_details);

        eprintln!("{}", crash_details);
        if let Some(path) = &log_path {
            eprintln!("[CrashHandler] Crash log written to {:?}", path);
        }

        default_hook(panic_info);
    }));
}

/// Build detailed error message from panic info.
fn format_crash_details(panic_info: &PanicHookInfo) -> String {
    let mut details = String::new();

    details.push_str("═══════════════════════════════════════════════════════════════\n");
    details.push_str("CLARA SUPERVISOR CRASH REPORT\n");
    details.push_str("═══════════════════════════════════════════════════════════════\n");

    let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    details.push_str(&format!("Time: {}\n", timestamp));
    details.push_str(&format!("Version: {}\n", env!("CARGO_PKG_VERSION")));
    details.push_str(&format!("OS: {} {}\n", std::env::consts::OS, std::env::consts::ARCH));

    details.push_str("───────────────────────────────────────────────────────────────\n");
    details.push_str("PANIC LOCATION\n");
    details.push_str("───────────────────────────────────────────────────────────────\n");

    if let Some(location) = panic_info.location() {
        details.push_str(&format!("File: {}\n", location.file()));
        details.push_str(&format!("Line: {}, Column: {}\n", location.line(), location.column()));
    } else {
        details.push_str("Location: Unknown\n");
    }

    details.push_str("───────────────────────────────────────────────────────────────\n");
    details.push_str("ERROR MESSAGE\n");
    details.push_str("───────────────────────────────────────────────────────────────\n");

    if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
        details.push_str(s);
        details.push('\n');
    } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
        details.push_str(s);
        details.push('\n');
    } else {
        details.push_str("(unknown panic payload)\n");
    }

    details.push_str("───────────────────────────────────────────────────────────────\n");
    details.push_str("BACKTRACE\n");
    details.push_str("───────────────────────────────────────────────────────────────\n");

    let backtrace = Backtrace::force_capture();
    details.push_str(&format!("{}", backtrace));

    details
}

/// Write crash log under `~/.clara/`. Returns the path if successful.
fn write_crash_log(details: &str) -> Option<PathBuf> {
    let log_path = paths::crash_log_path();
    let parent = log_path.parent()?;

    if fs::create_dir_all(parent).is_err() {
        eprintln!("[CrashHandler] Failed to create directory: {:?}", parent);
        return None;
    }

    match fs::File::create(&log_path) {
        Ok(mut file) => {
            if file.write_all(details.as_bytes()).is_ok() {
                Some(log_path)
            } else {
                eprintln!("[CrashHandler] Failed to write crash log to {:?}", log_path);
                None
            }
        }
        Err(e) => {
            eprintln!("[CrashHandler] Failed to create crash log file {:?}: {}", log_path, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_crash_details_contains_headers() {
        let details = "═══════════════════════════════════════════════════════════════\n\
                       CLARA SUPERVISOR CRASH REPORT\n\
                       ═══════════════════════════════════════════════════════════════\n";
        assert!(details.contains("CLARA SUPERVISOR CRASH REPORT"));
    }

    #[test]
    fn write_crash_log_creates_file() {
        let test_content = "Test crash log content";
        let log_path = write_crash_log(test_content);

        assert!(log_path.is_some());
        let path = log_path.unwrap();
        assert!(path.exists());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn crash_log_path_under_clara_home() {
        let path = paths::crash_log_path();
        assert!(!path.to_string_lossy().is_empty());
    }
}
