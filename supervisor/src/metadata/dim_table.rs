//! Table Dim-1: filename token → assumed embedding dimension (§4.C).
//!
//! Used both as the Metadata Extractor's fallback when a GGUF header can't
//! be parsed, and directly by the Namer/Projection Resolver's compatibility
//! check when no extracted metadata exists at all.

/// First-match-wins over a fixed table, so any token that's a substring of
/// another token in this list must come first — `tinyllama` contains
/// `llama`, so it's listed ahead of it, the same ordering the Namer's
/// `FAMILY_TOKENS` uses for the identical collision.
const TOKEN_TABLE: &[(&str, u32)] = &[
    ("gemma", 2048),
    ("tinyllama", 2048),
    ("llama", 4096),
    ("qwen", 4096),
    ("mistral", 4096),
    ("phi", 2560),
    ("deepseek", 4096),
    ("nomic-embed", 768),
    ("mxbai", 1024),
    ("bge", 1024),
    ("e5", 1024),
    ("all-minilm", 384),
    ("llava", 4096),
    ("moondream", 2048),
];

/// Estimate embedding dimension from filename tokens, falling back to a
/// classification-based default (4096 for chat, 768 for embedding) when no
/// token matches.
pub fn estimate_embedding_dimension(filename: &str, is_embedding_classified: bool) -> u32 {
    let lower = filename.to_ascii_lowercase();
    for (token, dim) in TOKEN_TABLE {
        if lower.contains(token) {
            return *dim;
        }
    }
    if is_embedding_classified {
        768
    } else {
        4096
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tokens_resolve() {
        assert_eq!(estimate_embedding_dimension("llama-3.2-3B-Q4_K_M.gguf", false), 4096);
        assert_eq!(estimate_embedding_dimension("nomic-embed-text-v1.gguf", true), 768);
        assert_eq!(estimate_embedding_dimension("all-minilm-l6-v2.gguf", true), 384);
    }

    #[test]
    fn tinyllama_does_not_collide_with_llama() {
        assert_eq!(estimate_embedding_dimension("tinyllama-1.1b-chat-v1.0.Q4_K_M.gguf", false), 2048);
    }

    #[test]
    fn unknown_token_falls_back_by_classification() {
        assert_eq!(estimate_embedding_dimension("totally-unknown-model.gguf", false), 4096);
        assert_eq!(estimate_embedding_dimension("totally-unknown-model.gguf", true), 768);
    }
}
