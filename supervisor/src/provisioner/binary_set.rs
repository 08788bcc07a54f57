//! Resolves and validates a `BinarySet` for a platform directory (§4.B).

use crate::protocol::BinarySet;
use std::path::{Path, PathBuf};

/// Fixed candidate filenames tried in order; the first existing one wins.
/// Windows carries an `.exe` suffix, everything else doesn't.
const SWAP_CANDIDATES: &[&str] = &["llama-swap.exe", "llama-swap", "swap-frontend.exe", "swap-frontend"];
const SERVER_CANDIDATES: &[&str] = &["llama-server.exe", "llama-server"];

/// Diagnostics produced when `validate()` fails, bundling everything a
/// support request needs without requiring a follow-up round trip (§4.B
/// "produce a diagnostics bundle... when validation fails").
#[derive(Debug, Clone)]
pub struct ProvisioningDiagnostics {
    pub base_dir: PathBuf,
    pub platform_dir: PathBuf,
    pub platform_dir_listing: Vec<String>,
    pub base_dir_listing: Vec<String>,
    pub attempted_paths: Vec<PathBuf>,
}

fn find_candidate(dir: &Path, candidates: &[&str]) -> Option<PathBuf> {
    candidates.iter().map(|name| dir.join(name)).find(|p| p.is_file())
}

fn list_dir(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// Try to resolve both binaries from `platform_dir`, falling back to
/// `base_dir` for whichever one isn't present there (the degraded path).
pub fn resolve(base_dir: &Path, platform_dir: &Path) -> Option<BinarySet> {
    let swap_path = find_candidate(platform_dir, SWAP_CANDIDATES).or_else(|| find_candidate(base_dir, SWAP_CANDIDATES))?;
    let server_path =
        find_candidate(platform_dir, SERVER_CANDIDATES).or_else(|| find_candidate(base_dir, SERVER_CANDIDATES))?;

    let degraded = swap_path.starts_with(base_dir) && !swap_path.starts_with(platform_dir)
        || server_path.starts_with(base_dir) && !server_path.starts_with(platform_dir);

    Some(BinarySet { swap_path, server_path, degraded })
}

/// Validate that both binaries in `set` exist and are executable. Returns
/// diagnostics on failure rather than a bare error so callers can surface a
/// complete support bundle (§4.B).
pub fn validate(set: &BinarySet, base_dir: &Path, platform_dir: &Path) -> Result<(), ProvisioningDiagnostics> {
    let missing = !set.swap_path.is_file() || !set.server_path.is_file();
    #[cfg(unix)]
    let not_executable = {
        use std::os::unix::fs::PermissionsExt;
        [&set.swap_path, &set.server_path].iter().any(|p| {
            std::fs::metadata(p).map(|m| m.permissions().mode() & 0o111 == 0).unwrap_or(true)
        })
    };
    #[cfg(not(unix))]
    let not_executable = false;

    if missing || not_executable {
        return Err(ProvisioningDiagnostics {
            base_dir: base_dir.to_path_buf(),
            platform_dir: platform_dir.to_path_buf(),
            platform_dir_listing: list_dir(platform_dir),
            base_dir_listing: list_dir(base_dir),
            attempted_paths: vec![set.swap_path.clone(), set.server_path.clone()],
        });
    }

    Ok(())
}

/// Ensure both a platform-specific and canonical copy of each binary exist,
/// so a future accelerator-directory rename doesn't break existing callers
/// (§4.B "Normalize binary names").
pub fn repair_names(platform_dir: &Path, set: &BinarySet) -> Result<(), String> {
    for (path, candidates) in [(&set.swap_path, SWAP_CANDIDATES), (&set.server_path, SERVER_CANDIDATES)] {
        let canonical = platform_dir.join(candidates[0]);
        if path != &canonical && !canonical.exists() {
            link_or_copy(path, &canonical)?;
        }
    }
    Ok(())
}

#[cfg(windows)]
fn link_or_copy(src: &Path, dest: &Path) -> Result<(), String> {
    std::fs::copy(src, dest).map(|_| ()).map_err(|e| format!("Failed to copy {:?} -> {:?}: {}", src, dest, e))
}

#[cfg(unix)]
fn link_or_copy(src: &Path, dest: &Path) -> Result<(), String> {
    std::os::unix::fs::symlink(src, dest).map_err(|e| format!("Failed to symlink {:?} -> {:?}: {}", src, dest, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"binary").unwrap();
    }

    #[test]
    fn resolves_from_platform_dir_when_present() {
        let dir = std::env::temp_dir().join(format!("clara-binset-{}", uuid::Uuid::new_v4()));
        let base = dir.join("bin");
        let plat = base.join("linux-cpu");
        touch(&plat.join(SWAP_CANDIDATES[1]));
        touch(&plat.join(SERVER_CANDIDATES[1]));

        let set = resolve(&base, &plat).unwrap();
        assert!(!set.degraded);
        assert!(set.swap_path.starts_with(&plat));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn falls_back_to_base_dir_and_marks_degraded() {
        let dir = std::env::temp_dir().join(format!("clara-binset-{}", uuid::Uuid::new_v4()));
        let base = dir.join("bin");
        let plat = base.join("linux-cuda");
        touch(&base.join(SWAP_CANDIDATES[1]));
        touch(&base.join(SERVER_CANDIDATES[1]));
        fs::create_dir_all(&plat).unwrap();

        let set = resolve(&base, &plat).unwrap();
        assert!(set.degraded);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_binaries_produce_diagnostics() {
        let dir = std::env::temp_dir().join(format!("clara-binset-{}", uuid::Uuid::new_v4()));
        let base = dir.join("bin");
        let plat = base.join("linux-cpu");
        fs::create_dir_all(&plat).unwrap();

        let set = BinarySet { swap_path: plat.join("missing-swap"), server_path: plat.join("missing-server"), degraded: false };
        let diagnostics = validate(&set, &base, &plat).unwrap_err();
        assert_eq!(diagnostics.attempted_paths.len(), 2);

        let _ = fs::remove_dir_all(&dir);
    }
}
