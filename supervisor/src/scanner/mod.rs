//! Model Scanner & Namer (component D).

pub mod classify;
pub mod namer;

use crate::metadata::MetadataCache;
use crate::protocol::{ModelFile, ModelSource};
use std::path::{Path, PathBuf};
use tokio::fs;

/// One root the scanner enumerates, tagged with the `ModelSource` every file
/// found under it is stamped with.
struct Root {
    path: PathBuf,
    source: ModelSource,
}

/// Scan the union of user, bundled, and custom roots for `.gguf` files,
/// classify each, and assign globally-unique display names (§4.D). Rebuilt
/// on every call — no long-lived identity beyond `absolute_path` (§3
/// Ownership: "rebuilt on every config generation").
pub async fn scan(
    user_root: &Path,
    bundled_root: &Path,
    custom_roots: &[PathBuf],
    metadata_cache: &MetadataCache,
) -> Vec<ModelFile> {
    let mut roots = vec![
        Root { path: user_root.to_path_buf(), source: ModelSource::User },
        Root { path: bundled_root.to_path_buf(), source: ModelSource::Bundled },
    ];
    for custom in custom_roots {
        roots.push(Root { path: custom.clone(), source: ModelSource::Custom });
    }

    let mut found = Vec::new();
    for root in &roots {
        collect_gguf_files(&root.path, root.source, &mut found).await;
    }

    let candidates: Vec<namer::NamingCandidate> = found
        .iter()
        .map(|(path, size_bytes, ..)| namer::NamingCandidate {
            filename: path.file_name().map(|f| f.to_string_lossy().into_owned()).unwrap_or_default(),
            size_bytes: *size_bytes,
        })
        .collect();

    let names = namer::resolve_unique_names(&candidates);

    let mut model_files = Vec::with_capacity(found.len());
    for ((path, size_bytes, source, last_modified), display_name) in found.into_iter().zip(names) {
        let filename = path.file_name().map(|f| f.to_string_lossy().into_owned()).unwrap_or_default();
        let classification = classify::classify(&filename);
        // Metadata is populated lazily by callers that need it (the
        // Performance Planner and Projection Resolver) via `metadata_cache`,
        // keyed by this same absolute path — the scan result itself only
        // carries the facts needed for naming and classification.
        let _ = metadata_cache;

        model_files.push(ModelFile {
            absolute_path: path,
            filename,
            size_bytes,
            source,
            last_modified,
            classification,
            display_name,
        });
    }

    model_files
}

async fn collect_gguf_files(
    root: &Path,
    source: ModelSource,
    out: &mut Vec<(PathBuf, u64, ModelSource, Option<chrono::DateTime<chrono::Utc>>)>,
) {
    let mut entries = match fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(_) => return,
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let Ok(metadata) = entry.metadata().await else { continue };
        if !metadata.is_file() {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("gguf") {
            continue;
        }

        let last_modified = metadata.modified().ok().map(chrono::DateTime::<chrono::Utc>::from);
        out.push((path, metadata.len(), source, last_modified));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scan_assigns_unique_names_across_roots() {
        let base = std::env::temp_dir().join(format!("clara-scan-test-{}", uuid::Uuid::new_v4()));
        let user = base.join("user");
        let bundled = base.join("bundled");
        fs::create_dir_all(&user).await.unwrap();
        fs::create_dir_all(&bundled).await.unwrap();

        fs::write(user.join("llama-3.2-3B-Q4_K_M.gguf"), vec![0u8; 1024]).await.unwrap();
        fs::write(bundled.join("mxbai-embed-large-v1-f16.gguf"), vec![0u8; 1024]).await.unwrap();
        fs::write(user.join("not-a-model.txt"), b"ignore me").await.unwrap();

        let cache = MetadataCache::new(8);
        let files = scan(&user, &bundled, &[], &cache).await;

        assert_eq!(files.len(), 2);
        let names: Vec<&str> = files.iter().map(|f| f.display_name.as_str()).collect();
        assert!(names.contains(&"llama3.2:3b"));
        assert!(names.contains(&"mxbai-embed-large:embed"));

        let _ = fs::remove_dir_all(&base).await;
    }
}
