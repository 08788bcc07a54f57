//! Binary Provisioner (component B).
//!
//! Resolves the two binaries the Swap Proxy Supervisor needs (the swap
//! front-end and the inference server) for the detected platform/accelerator,
//! downloading and normalizing them from the upstream release feed when
//! they're missing (§4.B).

pub mod binary_set;
pub mod download;
pub mod release_index;

use crate::paths;
use crate::process_utils::mark_executable;
use crate::protocol::{Accelerator, BinarySet, PlatformInfo};
use release_index::{AssetClass, ReleaseAsset};
use std::path::Path;

const RELEASE_OWNER: &str = "ggerganov";
const RELEASE_REPO: &str = "llama.cpp";
const SWAP_RELEASE_OWNER: &str = "mostlygeek";
const SWAP_RELEASE_REPO: &str = "llama-swap";

/// Resolve (and if necessary provision) the binary set for `platform`.
/// Never returns an error for a missing accelerator-specific asset as long
/// as base-directory binaries exist to degrade to (§4.B); only a total
/// absence of usable binaries is fatal.
pub async fn ensure_binaries(client: &reqwest::Client, platform: &PlatformInfo) -> Result<BinarySet, String> {
    let base_dir = paths::binaries_base_dir();
    let platform_dir = paths::binaries_platform_dir(&platform.platform_dir);

    if let Some(set) = binary_set::resolve(&base_dir, &platform_dir) {
        if binary_set::validate(&set, &base_dir, &platform_dir).is_ok() {
            return Ok(set);
        }
    }

    download_swap_frontend(client, &base_dir).await;
    download_accelerator(client, platform.accelerator, &platform_dir).await;

    binary_set::resolve(&base_dir, &platform_dir).ok_or_else(|| {
        format!(
            "No usable binaries found after provisioning: base_dir={:?} platform_dir={:?}",
            base_dir, platform_dir
        )
    })
}

/// Validate an already-resolved `BinarySet`, producing a diagnostics bundle
/// on failure (§4.B).
pub fn validate(set: &BinarySet, platform: &PlatformInfo) -> Result<(), binary_set::ProvisioningDiagnostics> {
    let base_dir = paths::binaries_base_dir();
    let platform_dir = paths::binaries_platform_dir(&platform.platform_dir);
    binary_set::validate(set, &base_dir, &platform_dir)
}

/// Ensure both a platform-specific and canonical name exist for each binary.
pub fn repair_names(set: &BinarySet, platform: &PlatformInfo) -> Result<(), String> {
    let platform_dir = paths::binaries_platform_dir(&platform.platform_dir);
    binary_set::repair_names(&platform_dir, set)
}

/// Download the shared swap front-end into the base directory, if missing.
pub async fn download_swap_frontend(client: &reqwest::Client, base_dir: &Path) {
    let candidate = base_dir.join(if cfg!(windows) { "llama-swap.exe" } else { "llama-swap" });
    if candidate.is_file() {
        return;
    }

    let fut = async {
        let index = release_index::fetch_latest(client, SWAP_RELEASE_OWNER, SWAP_RELEASE_REPO).await?;
        let class = if cfg!(windows) { AssetClass::CpuWin } else { AssetClass::CpuLinux };
        provision_asset(client, &index.assets, class, base_dir).await
    };

    match tokio::time::timeout(download::AGGREGATE_TIMEOUT, fut).await {
        Ok(Ok(())) => println!("[Provisioner] Swap front-end provisioned into {:?}", base_dir),
        Ok(Err(e)) => println!("[Provisioner] Swap front-end provisioning failed, continuing degraded: {}", e),
        Err(_) => println!("[Provisioner] Swap front-end provisioning timed out, continuing degraded"),
    }
}

/// Download the accelerator-specific archive(s) for `accelerator` into
/// `platform_dir`. CUDA requires two assets (main + runtime); if either
/// fails, the caller falls back to base-directory binaries via
/// `binary_set::resolve`'s degrade path — this function itself never
/// raises, it only logs (§4.B "failures... never raise... degrade").
pub async fn download_accelerator(client: &reqwest::Client, accelerator: Accelerator, platform_dir: &Path) {
    use crate::protocol::Os;
    let os = if cfg!(windows) { Os::Win } else if cfg!(target_os = "macos") { Os::Mac } else { Os::Linux };
    let classes = release_index::asset_classes_for(accelerator, os);
    if classes.is_empty() {
        return;
    }

    let fut = async {
        let index = release_index::fetch_latest(client, RELEASE_OWNER, RELEASE_REPO).await?;
        for class in &classes {
            provision_asset(client, &index.assets, *class, platform_dir).await?;
        }
        Ok::<(), String>(())
    };

    match tokio::time::timeout(download::AGGREGATE_TIMEOUT, fut).await {
        Ok(Ok(())) => println!("[Provisioner] Accelerator binaries provisioned into {:?}", platform_dir),
        Ok(Err(e)) => println!("[Provisioner] Accelerator provisioning failed for {:?}, degrading to base binaries: {}", platform_dir, e),
        Err(_) => println!("[Provisioner] Accelerator provisioning timed out for {:?}, degrading to base binaries", platform_dir),
    }
}

async fn provision_asset(
    client: &reqwest::Client,
    assets: &[ReleaseAsset],
    class: AssetClass,
    dest_dir: &Path,
) -> Result<(), String> {
    let asset = release_index::find_asset(assets, class)
        .ok_or_else(|| format!("No release asset matched class {:?}", class))?;

    let archive_path = std::env::temp_dir().join(format!("clara-download-{}.zip", uuid::Uuid::new_v4()));
    download::download_to_file(client, &asset.browser_download_url, &archive_path).await?;
    let extracted = download::extract_zip(&archive_path, dest_dir).await?;
    let _ = tokio::fs::remove_file(&archive_path).await;

    for path in &extracted {
        let _ = mark_executable(path);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_owners_are_nonempty() {
        assert!(!RELEASE_OWNER.is_empty());
        assert!(!SWAP_RELEASE_OWNER.is_empty());
    }
}
