//! Model classification rules (§4.D).

use crate::protocol::Classification;

const PROJECTION_TOKENS: &[&str] = &["mmproj", "mm-proj", "projection"];
const EMBEDDING_TOKENS: &[&str] = &[
    "embed",
    "embedding",
    "mxbai",
    "nomic",
    "bge",
    "e5",
    "sentence-transformer",
    "all-minilm",
];
const VISION_TOKENS: &[&str] = &["vl", "vision", "multimodal", "mm", "clip", "siglip"];

/// Classify a model file by filename alone, in the fixed precedence order
/// projection → embedding → vision-capable-chat → chat (§4.D). Each rule's
/// tokens are matched case-insensitively against the filename.
pub fn classify(filename: &str) -> Classification {
    let lower = filename.to_ascii_lowercase();

    if PROJECTION_TOKENS.iter().any(|t| lower.contains(t)) {
        return Classification::Projection;
    }
    if EMBEDDING_TOKENS.iter().any(|t| lower.contains(t)) {
        return Classification::Embedding;
    }
    if VISION_TOKENS.iter().any(|t| lower.contains(t)) {
        return Classification::VisionCapableChat;
    }
    Classification::Chat
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_takes_precedence() {
        assert_eq!(classify("qwen2-vl-mmproj-f16.gguf"), Classification::Projection);
    }

    #[test]
    fn embedding_tokens_classify_as_embedding() {
        assert_eq!(classify("mxbai-embed-large-v1-f16.gguf"), Classification::Embedding);
        assert_eq!(classify("nomic-embed-text-v1.5.Q4_K_M.gguf"), Classification::Embedding);
        assert_eq!(classify("bge-m3-q8_0.gguf"), Classification::Embedding);
    }

    #[test]
    fn vision_tokens_classify_as_vision_capable_chat() {
        assert_eq!(classify("qwen2-vl-7b-instruct-q4_k_m.gguf"), Classification::VisionCapableChat);
        assert_eq!(classify("llava-v1.6-mistral-7b.gguf"), Classification::Chat);
    }

    #[test]
    fn plain_chat_models_default_to_chat() {
        assert_eq!(classify("llama-3.2-3b-instruct-q4_k_m.gguf"), Classification::Chat);
    }
}
