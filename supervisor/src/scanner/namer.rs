//! Display-name generation and conflict resolution (§4.D).
//!
//! Produces a `family:size` handle per model, then — because filenames for
//! the same model at different quantizations collide on that handle by
//! design — resolves collisions by layering on quantization tag, file-size
//! bucket, version index, and finally a numeric suffix until the whole
//! batch is unique. Name uniqueness is an invariant of the emitted config
//! (§8 "Name uniqueness").

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

const GB: u64 = 1024 * 1024 * 1024;

/// Q-1: quantization tokens, ordered longest/most-specific match first.
const QUANT_TOKENS: &[&str] = &[
    "q4_k_m", "q4_k_s", "q5_k_m", "q5_k_s", "q6_k", "q8_0", "f16", "f32", "q4_0", "q4_1", "q5_0",
    "q5_1", "q2_k", "q3_k_m", "q3_k_s", "q3_k_l", "iq3_xxs", "iq3_xs", "iq3_s", "iq3_m", "iq4_xs",
    "iq4_nl", "bitnet", "1.58",
];

/// Fixed family overrides checked before the general pattern ladder.
const FIXED_OVERRIDES: &[(&str, &str)] = &[("mxbai", "mxbai-embed-large:embed")];

const FAMILY_TOKENS: &[&str] = &[
    "tinyllama",
    "llama",
    "qwen",
    "mistral",
    "gemma",
    "phi",
    "deepseek",
    "nomic-embed",
    "bge",
    "e5",
    "all-minilm",
    "llava",
    "moondream",
];

lazy_static! {
    static ref SIZE_RE: Regex = Regex::new(r"(?i)\b(\d+(?:\.\d+)?)b\b").unwrap();
    static ref IQ_RE: Regex = Regex::new(r"(?i)iq\d+_\w+").unwrap();
}

fn version_regex_for(family: &str) -> Regex {
    Regex::new(&format!(r"(?i){}[-_]?(\d+(?:\.\d+)*)", regex::escape(family))).unwrap()
}

/// Parse (family, version) from a lowercased filename using the fixed
/// family-token list, or `None` if no known family token appears.
fn parse_family_and_version(lower: &str) -> Option<(String, Option<String>)> {
    for family in FAMILY_TOKENS {
        if lower.contains(family) {
            let version = version_regex_for(family)
                .captures(lower)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string());
            return Some((family.to_string(), version));
        }
    }
    None
}

fn parse_size_token(lower: &str) -> Option<String> {
    SIZE_RE.captures(lower).and_then(|c| c.get(1)).map(|m| format!("{}b", m.as_str()))
}

fn size_bucket_fallback(size_bytes: u64) -> &'static str {
    if size_bytes == 0 {
        "unknown"
    } else if size_bytes >= 12 * GB {
        "large"
    } else if size_bytes >= 3 * GB {
        "medium"
    } else {
        "small"
    }
}

/// Q-1 quantization token detected in the filename, longest-match first.
fn parse_quant_tag(lower: &str) -> Option<String> {
    for token in QUANT_TOKENS {
        if lower.contains(token) {
            return Some(token.to_string());
        }
    }
    if let Some(m) = IQ_RE.find(lower) {
        return Some(m.as_str().to_string());
    }
    None
}

/// Conflict-resolution file-size bucket (xs/s/m/l/xl), distinct from the
/// first-pass large/medium/small/unknown fallback.
fn conflict_size_bucket(size_bytes: u64) -> &'static str {
    if size_bytes < 1 * GB {
        "xs"
    } else if size_bytes < 3 * GB {
        "s"
    } else if size_bytes < 6 * GB {
        "m"
    } else if size_bytes < 12 * GB {
        "l"
    } else {
        "xl"
    }
}

/// First-pass display name for one file, before any conflict resolution.
pub fn first_pass_name(filename: &str, size_bytes: u64) -> String {
    let lower = filename.to_ascii_lowercase();

    for (token, fixed_name) in FIXED_OVERRIDES {
        if lower.contains(token) {
            return fixed_name.to_string();
        }
    }

    let (family, version) = parse_family_and_version(&lower)
        .unwrap_or_else(|| ("unknown".to_string(), None));
    let handle = match version {
        Some(v) => format!("{}{}", family, v),
        None => family,
    };

    let size = parse_size_token(&lower).unwrap_or_else(|| size_bucket_fallback(size_bytes).to_string());

    format!("{}:{}", handle, size)
}

/// A file queued for naming: its first-pass name, filename (for quant/size
/// lookups), and byte size (for the size-bucket resolution tier).
pub struct NamingCandidate {
    pub filename: String,
    pub size_bytes: u64,
}

/// Assign globally-unique display names across a batch of files, in order.
/// Returns names aligned index-for-index with `candidates`.
pub fn resolve_unique_names(candidates: &[NamingCandidate]) -> Vec<String> {
    let first_pass: Vec<String> = candidates
        .iter()
        .map(|c| first_pass_name(&c.filename, c.size_bytes))
        .collect();

    let mut counts: HashMap<String, usize> = HashMap::new();
    for name in &first_pass {
        *counts.entry(name.clone()).or_insert(0) += 1;
    }

    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut resolved = Vec::with_capacity(candidates.len());

    for (candidate, base_name) in candidates.iter().zip(first_pass.iter()) {
        if counts.get(base_name).copied().unwrap_or(0) <= 1 {
            resolved.push(base_name.clone());
            continue;
        }

        let lower = candidate.filename.to_ascii_lowercase();
        let mut candidate_name = base_name.clone();

        if let Some(quant) = parse_quant_tag(&lower) {
            candidate_name = format!("{}-{}", base_name, quant);
        }

        if resolved.contains(&candidate_name) {
            candidate_name = format!("{}-{}", candidate_name, conflict_size_bucket(candidate.size_bytes));
        }

        if resolved.contains(&candidate_name) {
            let idx = seen.entry(base_name.clone()).or_insert(0);
            *idx += 1;
            candidate_name = format!("{}-v{}", candidate_name, idx);
        }

        let mut suffix = 2;
        while resolved.contains(&candidate_name) {
            candidate_name = format!("{}-{}", base_name, suffix);
            suffix += 1;
        }

        resolved.push(candidate_name);
    }

    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_override_matches_mxbai() {
        assert_eq!(
            first_pass_name("mxbai-embed-large-v1-f16.gguf", 500_000_000),
            "mxbai-embed-large:embed"
        );
    }

    #[test]
    fn family_version_and_size_parse() {
        assert_eq!(first_pass_name("llama-3.2-3B-Q4_K_M.gguf", 3 * GB), "llama3.2:3b");
    }

    #[test]
    fn unknown_family_falls_back() {
        let name = first_pass_name("totally-custom-model.gguf", 2 * GB);
        assert!(name.starts_with("unknown:"));
    }

    #[test]
    fn conflict_resolution_appends_quant_tag() {
        let candidates = vec![
            NamingCandidate { filename: "llama-3.2-3B-Q4_K_M.gguf".into(), size_bytes: 3 * GB },
            NamingCandidate { filename: "llama-3.2-3B-Q8_0.gguf".into(), size_bytes: 3 * GB },
            NamingCandidate { filename: "llama-3.2-3B-f16.gguf".into(), size_bytes: 3 * GB },
        ];
        let names = resolve_unique_names(&candidates);

        assert_eq!(names.len(), 3);
        let unique: std::collections::HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), 3, "names must be globally unique: {:?}", names);
        assert!(names.contains(&"llama3.2:3b-q4_k_m".to_string()));
        assert!(names.contains(&"llama3.2:3b-q8_0".to_string()));
        assert!(names.contains(&"llama3.2:3b-f16".to_string()));
    }

    #[test]
    fn non_conflicting_names_pass_through_unmodified() {
        let candidates = vec![
            NamingCandidate { filename: "llama-3.2-3B-Q4_K_M.gguf".into(), size_bytes: 3 * GB },
            NamingCandidate { filename: "qwen2.5-7B-Q4_K_M.gguf".into(), size_bytes: 7 * GB },
        ];
        let names = resolve_unique_names(&candidates);
        assert_eq!(names[0], "llama3.2:3b");
        assert_eq!(names[1], "qwen2.5:7b");
    }
}
