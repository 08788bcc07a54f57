//! Metadata Extractor (component C).

pub mod dim_table;
pub mod gguf;

pub use gguf::{extract, MetadataCache};
