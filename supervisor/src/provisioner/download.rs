//! Bounded download + archive extraction (§4.B).
//!
//! Downloads are capped at a 2-minute per-asset timeout and a 5-minute
//! aggregate timeout across a provisioning run; archives arriving with a
//! `build/bin/` prefix are flattened during extraction, and extracted
//! binaries are marked executable on non-windows systems via
//! `process_utils::mark_executable`.

use crate::process_utils::mark_executable;
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

pub const PER_ASSET_TIMEOUT: Duration = Duration::from_secs(120);
pub const AGGREGATE_TIMEOUT: Duration = Duration::from_secs(300);

/// Download `url` to `dest_path`, bounded by `PER_ASSET_TIMEOUT`.
pub async fn download_to_file(client: &reqwest::Client, url: &str, dest_path: &Path) -> Result<(), String> {
    let fut = async {
        let response = client
            .get(url)
            .header("User-Agent", "clara-supervisor")
            .send()
            .await
            .map_err(|e| format!("Download request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(format!("Download returned status {}", response.status()));
        }

        let bytes = response.bytes().await.map_err(|e| format!("Failed reading download body: {}", e))?;

        if let Some(parent) = dest_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("Failed to create download directory {:?}: {}", parent, e))?;
        }

        let mut file = tokio::fs::File::create(dest_path)
            .await
            .map_err(|e| format!("Failed to create {:?}: {}", dest_path, e))?;
        file.write_all(&bytes).await.map_err(|e| format!("Failed writing {:?}: {}", dest_path, e))?;
        Ok(())
    };

    match tokio::time::timeout(PER_ASSET_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(format!("Download of {} timed out after {:?}", url, PER_ASSET_TIMEOUT)),
    }
}

/// Extract a zip archive into `dest_dir`, flattening a leading `build/bin/`
/// path component if present, and marking extracted files executable on
/// non-windows systems. Runs on a blocking thread since `zip` is synchronous.
pub async fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<Vec<std::path::PathBuf>, String> {
    let archive_path = archive_path.to_path_buf();
    let dest_dir = dest_dir.to_path_buf();

    let extracted = tokio::task::spawn_blocking(move || extract_zip_blocking(&archive_path, &dest_dir))
        .await
        .map_err(|e| format!("Extraction task panicked: {}", e))??;

    for path in &extracted {
        if let Err(e) = mark_executable(path) {
            println!("[Provisioner] Failed to mark {:?} executable: {}", path, e);
        }
    }

    Ok(extracted)
}

fn extract_zip_blocking(archive_path: &Path, dest_dir: &Path) -> Result<Vec<std::path::PathBuf>, String> {
    let bytes = std::fs::read(archive_path).map_err(|e| format!("Failed to read archive {:?}: {}", archive_path, e))?;
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| format!("Failed to open archive {:?}: {}", archive_path, e))?;

    std::fs::create_dir_all(dest_dir).map_err(|e| format!("Failed to create {:?}: {}", dest_dir, e))?;

    let mut extracted = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| format!("Failed reading archive entry {}: {}", i, e))?;
        if entry.is_dir() {
            continue;
        }

        let raw_name = entry.mangled_name();
        let flattened = flatten_build_bin_prefix(&raw_name);
        let out_path = dest_dir.join(&flattened);

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| format!("Failed to create {:?}: {}", parent, e))?;
        }

        let mut out_file = std::fs::File::create(&out_path).map_err(|e| format!("Failed to create {:?}: {}", out_path, e))?;
        std::io::copy(&mut entry, &mut out_file).map_err(|e| format!("Failed extracting {:?}: {}", out_path, e))?;
        extracted.push(out_path);
    }

    Ok(extracted)
}

/// Strip a leading `build/bin/` (or `build\bin\`) prefix so archives that
/// wrap the binaries in that directory land flat in the target directory
/// (§4.B "Archives arriving with a build/bin/ prefix must be flattened").
fn flatten_build_bin_prefix(path: &Path) -> std::path::PathBuf {
    let components: Vec<_> = path.components().collect();
    if components.len() >= 2 {
        let first_two: Vec<String> = components[..2]
            .iter()
            .map(|c| c.as_os_str().to_string_lossy().to_ascii_lowercase())
            .collect();
        if first_two == ["build", "bin"] {
            return components[2..].iter().collect();
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_strips_build_bin_prefix() {
        let path = Path::new("build/bin/llama-server");
        assert_eq!(flatten_build_bin_prefix(path), Path::new("llama-server"));
    }

    #[test]
    fn flatten_leaves_other_paths_untouched() {
        let path = Path::new("llama-server");
        assert_eq!(flatten_build_bin_prefix(path), Path::new("llama-server"));
    }
}
