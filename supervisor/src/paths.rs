//! Centralized path resolution for cross-platform compatibility.
//!
//! This module provides the fixed set of on-disk locations the supervisor
//! reads from and writes to. Unlike a general desktop app's config/cache/data
//! split, §6 of the spec pins every persisted document under `~/.clara/`, so
//! this module is mostly a set of named joins rather than a platform-standard
//! directory search — but it keeps the same "always go through this module"
//! discipline and writability fallback used elsewhere in this codebase.
//!
//! ## Fixed Locations
//!
//! | Purpose | Path |
//! |---------|------|
//! | Settings documents | `~/.clara/settings/` |
//! | Model files | `~/.clara/llama-models/` |
//! | Active swap-proxy config | `<user-data-dir>/llama-swap-config.yaml` |
//! | Binary directories | `<user-data-dir>/bin/<platform-tag>/` |

use std::path::PathBuf;
use tokio::fs;
use uuid::Uuid;

/// Application name used for the user-data fallback directory and crash log tag.
const APP_NAME: &str = "clara";

/// Result of attempting to get a writable directory.
#[derive(Debug, Clone)]
pub struct WritableDir {
    /// The path that was determined to be writable.
    pub path: PathBuf,
    /// Whether this is a fallback location (not the primary standard location).
    pub is_fallback: bool,
    /// Description of which fallback tier was used, if any.
    pub fallback_reason: Option<String>,
}

/// Root of `~/.clara/`. Falls back to `./.clara/` if the home directory can't
/// be resolved (headless CI, containers without `$HOME`).
pub fn clara_home() -> PathBuf {
    dirs::home_dir()
        .map(|p| p.join(".clara"))
        .unwrap_or_else(|| {
            std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(".clara")
        })
}

/// `~/.clara/settings/` — all persisted JSON documents from §6 live here.
pub fn settings_dir() -> PathBuf {
    clara_home().join("settings")
}

/// `~/.clara/settings/performance-settings.json`
pub fn performance_settings_path() -> PathBuf {
    settings_dir().join("performance-settings.json")
}

/// `~/.clara/settings/individual-model-configs.json`
pub fn model_overrides_path() -> PathBuf {
    settings_dir().join("individual-model-configs.json")
}

/// `~/.clara/settings/mmproj-mappings.json`
pub fn mmproj_mappings_path() -> PathBuf {
    settings_dir().join("mmproj-mappings.json")
}

/// `~/.clara/settings/backend-override.json`
pub fn backend_override_path() -> PathBuf {
    settings_dir().join("backend-override.json")
}

/// `~/.clara/settings/user-service-consent.json`
pub fn user_consent_path() -> PathBuf {
    settings_dir().join("user-service-consent.json")
}

/// `~/.clara/llama-models/` — the bundled/default model root. User-custom
/// roots are supplied separately (CLI `--model-dir`, repeatable).
pub fn models_dir() -> PathBuf {
    clara_home().join("llama-models")
}

/// Directory holding base (shared, accelerator-independent) binaries,
/// e.g. the swap front-end copied across accelerator directories.
pub fn binaries_base_dir() -> PathBuf {
    user_data_dir().join("bin")
}

/// Accelerator-specific binary directory: `<user-data>/bin/<platform-tag>/`.
pub fn binaries_platform_dir(platform_tag: &str) -> PathBuf {
    binaries_base_dir().join(platform_tag)
}

/// The active swap-proxy configuration file consumed by the Config Emitter
/// and the Swap Proxy Supervisor: `<user-data>/llama-swap-config.yaml`.
pub fn swap_config_path() -> PathBuf {
    user_data_dir().join("llama-swap-config.yaml")
}

/// Crash log path used by the panic hook.
pub fn crash_log_path() -> PathBuf {
    user_data_dir().join("crash.log")
}

/// Platform-standard per-user application data directory, used as the base
/// for binaries and the generated swap-proxy config (everything *not*
/// explicitly pinned under `~/.clara/` by §6).
fn user_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|p| p.join(APP_NAME))
        .unwrap_or_else(|| clara_home().join("data"))
}

/// Test whether a directory is writable by creating and removing a probe file.
async fn test_write_access(dir: &PathBuf) -> bool {
    if fs::create_dir_all(dir).await.is_err() {
        return false;
    }
    let probe = dir.join(format!(".write-test-{}", Uuid::new_v4()));
    match fs::write(&probe, b"test").await {
        Ok(_) => {
            let _ = fs::remove_file(&probe).await;
            true
        }
        Err(_) => false,
    }
}

/// Ensure a directory is writable, falling back to `~/.clara/<purpose>/` and
/// then `./.clara/<purpose>/` if the primary location is denied. Used by the
/// Settings Store and the Binary Provisioner, both of which must keep working
/// on locked-down systems rather than fail startup outright.
pub async fn ensure_writable_dir(primary: PathBuf, purpose: &str) -> WritableDir {
    if test_write_access(&primary).await {
        return WritableDir {
            path: primary,
            is_fallback: false,
            fallback_reason: None,
        };
    }

    println!("[Paths] Primary directory not writable for {}: {:?}", purpose, primary);

    if let Some(home) = dirs::home_dir() {
        let home_fallback = home.join(".clara").join(purpose);
        if test_write_access(&home_fallback).await {
            println!("[Paths] WARNING: using home fallback for {}: {:?}", purpose, home_fallback);
            return WritableDir {
                path: home_fallback,
                is_fallback: true,
                fallback_reason: Some("Primary location not writable, using home directory".to_string()),
            };
        }
    }

    if let Ok(cwd) = std::env::current_dir() {
        let cwd_fallback = cwd.join(".clara").join(purpose);
        if test_write_access(&cwd_fallback).await {
            println!("[Paths] WARNING: using CWD fallback for {}: {:?}", purpose, cwd_fallback);
            return WritableDir {
                path: cwd_fallback,
                is_fallback: true,
                fallback_reason: Some("Using current directory as fallback".to_string()),
            };
        }
    }

    println!("[Paths] CRITICAL: no writable location found for {}", purpose);
    WritableDir {
        path: primary,
        is_fallback: true,
        fallback_reason: Some("All fallback locations failed; returning unwritable primary".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_paths_are_under_clara_home() {
        let home = clara_home();
        assert!(performance_settings_path().starts_with(&home));
        assert!(model_overrides_path().starts_with(&home));
        assert!(mmproj_mappings_path().starts_with(&home));
        assert!(backend_override_path().starts_with(&home));
        assert!(user_consent_path().starts_with(&home));
        assert!(models_dir().starts_with(&home));
    }

    #[test]
    fn binaries_platform_dir_nests_under_base() {
        let base = binaries_base_dir();
        let plat = binaries_platform_dir("linux-cuda");
        assert!(plat.starts_with(&base));
        assert_eq!(plat.file_name().unwrap(), "linux-cuda");
    }

    #[tokio::test]
    async fn ensure_writable_dir_primary_success() {
        let temp = std::env::temp_dir().join(format!("clara-test-{}", Uuid::new_v4()));
        let result = ensure_writable_dir(temp.clone(), "test").await;
        assert!(!result.is_fallback);
        assert_eq!(result.path, temp);
        let _ = fs::remove_dir_all(&temp).await;
    }
}
