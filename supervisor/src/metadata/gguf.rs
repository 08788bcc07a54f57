//! GGUF header key-value extractor (component C).
//!
//! Reads the first 64 KiB of a GGUF file, verifies the magic, and streams
//! key-value pairs looking for context-length and embedding-length facts.
//! Parsing is best-effort and never panics on adversarial input — a
//! truncated or malformed length field aborts the parse cleanly and returns
//! whatever was collected so far, falling back to the filename-based
//! estimate (Table Dim-1) for anything still missing.
//!
//! Grounded on this codebase's general "never trust external byte streams"
//! discipline (see `process_utils::run_with_timeout`'s "never hang, never
//! panic" contract) applied here to file parsing instead of subprocess I/O,
//! and on `other_examples`' mutex-poisoning-tolerant cache lookup pattern
//! for the LRU wrapper below.

use crate::metadata::dim_table;
use crate::protocol::ModelMetadata;
use lru::LruCache;
use std::io::Read;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::task;

const MAGIC: &[u8; 4] = b"GGUF";
const READ_WINDOW: usize = 64 * 1024;

const CONTEXT_LENGTH_SUFFIXES: &[&str] = &[".context_length"];
const CONTEXT_LENGTH_EXACT: &[&str] = &["n_ctx", "max_position_embeddings", "context_length"];
const EMBEDDING_LENGTH_SUFFIXES: &[&str] = &[".embedding_length"];
const EMBEDDING_LENGTH_EXACT: &[&str] = &["embedding_length", "hidden_size"];

fn is_context_length_key(key: &str) -> bool {
    CONTEXT_LENGTH_EXACT.contains(&key) || CONTEXT_LENGTH_SUFFIXES.iter().any(|s| key.ends_with(s))
}

fn is_embedding_length_key(key: &str) -> bool {
    EMBEDDING_LENGTH_EXACT.contains(&key) || EMBEDDING_LENGTH_SUFFIXES.iter().any(|s| key.ends_with(s))
}

#[derive(Debug)]
enum GgufValue {
    U32(u32),
    I32(i32),
    F32(f32),
    Bool(bool),
    Str(String),
    /// Array elements are skipped, never materialized (§4.C).
    Skipped,
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        if end > self.buf.len() {
            return None;
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Some(slice)
    }

    fn u32(&mut self) -> Option<u32> {
        Some(u32::from_le_bytes(self.take(4)?.try_into().ok()?))
    }

    fn i32(&mut self) -> Option<i32> {
        Some(i32::from_le_bytes(self.take(4)?.try_into().ok()?))
    }

    fn f32(&mut self) -> Option<f32> {
        Some(f32::from_le_bytes(self.take(4)?.try_into().ok()?))
    }

    fn u64(&mut self) -> Option<u64> {
        Some(u64::from_le_bytes(self.take(8)?.try_into().ok()?))
    }

    fn gguf_string(&mut self) -> Option<String> {
        let len = self.u64()? as usize;
        let bytes = self.take(len)?;
        Some(String::from_utf8_lossy(bytes).into_owned())
    }

    fn skip_array(&mut self) -> Option<()> {
        let elem_type = self.u32()?;
        let count = self.u64()?;
        for _ in 0..count {
            self.read_value(elem_type)?;
        }
        Some(())
    }

    /// Read one value of `value_type` (the raw GGUF type tag). Nested arrays
    /// are rejected (returns `None`, aborting the parse) — out of scope for
    /// this best-effort extractor per §1 Non-goals.
    fn read_value(&mut self, value_type: u32) -> Option<GgufValue> {
        match value_type {
            4 => Some(GgufValue::U32(self.u32()?)),
            5 => Some(GgufValue::I32(self.i32()?)),
            6 => Some(GgufValue::F32(self.f32()?)),
            7 => Some(GgufValue::Bool(self.take(1)?[0] != 0)),
            8 => Some(GgufValue::Str(self.gguf_string()?)),
            9 => {
                self.skip_array()?;
                Some(GgufValue::Skipped)
            }
            // u8/i8/u16/i16/u64/i64/f64: skip by fixed width, never surfaced
            // as context/embedding facts (those are always integers the
            // u32/i32 arms already cover for every model we've seen).
            0 | 1 => {
                self.take(1)?;
                Some(GgufValue::Skipped)
            }
            2 | 3 => {
                self.take(2)?;
                Some(GgufValue::Skipped)
            }
            10 | 11 | 12 => {
                self.take(8)?;
                Some(GgufValue::Skipped)
            }
            _ => None,
        }
    }
}

fn numeric_value(value: &GgufValue) -> Option<u64> {
    match value {
        GgufValue::U32(v) => Some(*v as u64),
        GgufValue::I32(v) if *v >= 0 => Some(*v as u64),
        GgufValue::F32(v) if *v >= 0.0 => Some(*v as u64),
        _ => None,
    }
}

/// Parse a GGUF header buffer (already the first ~64 KiB of the file).
/// Never panics: any malformed length collapses the loop and returns
/// whatever facts were already recovered.
fn parse_header(buf: &[u8]) -> ModelMetadata {
    let mut metadata = ModelMetadata::default();
    let mut cursor = Cursor::new(buf);

    let Some(magic) = cursor.take(4) else { return metadata };
    if magic != MAGIC {
        return metadata;
    }

    let Some(version) = cursor.u32() else { return metadata };
    metadata.gguf_version = Some(version);

    let Some(tensor_count) = cursor.u64() else { return metadata };
    metadata.tensor_count = Some(tensor_count);

    let Some(kv_count) = cursor.u64() else { return metadata };

    for _ in 0..kv_count {
        let Some(key) = cursor.gguf_string() else { break };
        let Some(value_type) = cursor.u32() else { break };
        let Some(value) = cursor.read_value(value_type) else { break };

        if metadata.native_context_tokens.is_none() && is_context_length_key(&key) {
            metadata.native_context_tokens = numeric_value(&value);
        }
        if metadata.embedding_dimension.is_none() && is_embedding_length_key(&key) {
            metadata.embedding_dimension = numeric_value(&value);
        }
    }

    metadata
}

/// Read and parse a GGUF file's header, falling back to the filename-based
/// dimension estimate (Table Dim-1) for `embedding_dimension` when the
/// header didn't yield one. Runs the blocking file read on a dedicated
/// thread so the scanner's async loop isn't blocked on disk I/O.
pub async fn extract(path: &Path, is_embedding_classified: bool) -> ModelMetadata {
    let path_owned = path.to_path_buf();
    let header = task::spawn_blocking(move || read_window(&path_owned))
        .await
        .unwrap_or(None);

    let mut metadata = header.map(|buf| parse_header(&buf)).unwrap_or_default();

    if metadata.embedding_dimension.is_none() {
        let filename = path.file_name().map(|f| f.to_string_lossy().into_owned()).unwrap_or_default();
        metadata.embedding_dimension =
            Some(dim_table::estimate_embedding_dimension(&filename, is_embedding_classified) as u64);
    }

    metadata
}

fn read_window(path: &Path) -> Option<Vec<u8>> {
    let mut file = std::fs::File::open(path).ok()?;
    let mut buf = vec![0u8; READ_WINDOW];
    let n = file.read(&mut buf).ok()?;
    buf.truncate(n);
    Some(buf)
}

/// Per-absolute-path metadata cache (§3 "cached by absolutePath"). Wraps
/// `lru::LruCache` behind a `Mutex`; a poisoned lock (should never happen —
/// nothing in this cache's critical section can panic) falls back to an
/// unconditional miss rather than propagating the poison, the same
/// resilience pattern `other_examples`' model manager applies to its cache.
pub struct MetadataCache {
    inner: Mutex<LruCache<PathBuf, ModelMetadata>>,
}

impl MetadataCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least 1");
        Self {
            inner: Mutex::new(LruCache::new(cap)),
        }
    }

    pub fn get(&self, path: &Path) -> Option<ModelMetadata> {
        match self.inner.lock() {
            Ok(mut cache) => cache.get(&path.to_path_buf()).cloned(),
            Err(_) => None,
        }
    }

    pub fn insert(&self, path: PathBuf, metadata: ModelMetadata) {
        if let Ok(mut cache) = self.inner.lock() {
            cache.put(path, metadata);
        }
    }

    /// Extract metadata for `path`, consulting and then populating the cache.
    pub async fn get_or_extract(&self, path: &Path, is_embedding_classified: bool) -> ModelMetadata {
        if let Some(cached) = self.get(path) {
            return cached;
        }
        let metadata = extract(path, is_embedding_classified).await;
        self.insert(path.to_path_buf(), metadata.clone());
        metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_string(buf: &mut Vec<u8>, s: &str) {
        buf.extend_from_slice(&(s.len() as u64).to_le_bytes());
        buf.extend_from_slice(s.as_bytes());
    }

    fn build_minimal_gguf(context_length: u32, embedding_length: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&3u32.to_le_bytes()); // version
        buf.extend_from_slice(&0u64.to_le_bytes()); // tensor_count
        buf.extend_from_slice(&2u64.to_le_bytes()); // kv_count

        push_string(&mut buf, "llama.context_length");
        buf.extend_from_slice(&4u32.to_le_bytes()); // type = u32
        buf.extend_from_slice(&context_length.to_le_bytes());

        push_string(&mut buf, "llama.embedding_length");
        buf.extend_from_slice(&4u32.to_le_bytes());
        buf.extend_from_slice(&embedding_length.to_le_bytes());

        buf
    }

    #[test]
    fn parses_context_and_embedding_length() {
        let buf = build_minimal_gguf(8192, 4096);
        let metadata = parse_header(&buf);
        assert_eq!(metadata.native_context_tokens, Some(8192));
        assert_eq!(metadata.embedding_dimension, Some(4096));
        assert_eq!(metadata.gguf_version, Some(3));
        assert_eq!(metadata.tensor_count, Some(0));
    }

    #[test]
    fn bad_magic_returns_empty_metadata() {
        let buf = b"XXXXnonsense".to_vec();
        let metadata = parse_header(&buf);
        assert!(metadata.native_context_tokens.is_none());
        assert!(metadata.gguf_version.is_none());
    }

    #[test]
    fn truncated_buffer_never_panics() {
        let mut buf = build_minimal_gguf(8192, 4096);
        buf.truncate(buf.len() - 2);
        let metadata = parse_header(&buf);
        // Whatever was parsed before truncation should survive; the point
        // is simply that this doesn't panic.
        let _ = metadata;
    }

    #[tokio::test]
    async fn extract_falls_back_to_filename_dimension_when_header_missing() {
        let dir = std::env::temp_dir().join(format!("clara-gguf-test-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("nomic-embed-text-v1.gguf");
        tokio::fs::write(&path, b"not a real gguf file").await.unwrap();

        let metadata = extract(&path, true).await;
        assert_eq!(metadata.embedding_dimension, Some(768));
        assert!(metadata.native_context_tokens.is_none());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[test]
    fn cache_round_trips() {
        let cache = MetadataCache::new(4);
        let path = PathBuf::from("/models/test.gguf");
        assert!(cache.get(&path).is_none());

        let mut metadata = ModelMetadata::default();
        metadata.gguf_version = Some(3);
        cache.insert(path.clone(), metadata);

        let hit = cache.get(&path).unwrap();
        assert_eq!(hit.gguf_version, Some(3));
    }
}
