//! Projection Resolver (component E).
//!
//! Matches a vision-capable chat model to its companion `.mmproj` file. The
//! persisted mapping store is a gate, not a hint (§9 Design Notes): if the
//! user has ever saved any mapping, heuristics are disabled entirely for
//! every model, not just the ones with an explicit entry.

use crate::protocol::{Classification, ModelFile, ProjectionMappingEntry};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const VISION_TAGGED_FAMILIES: &[&str] = &["gemma"];

/// Families known to ship vision variants, used only for tier-3 bundled
/// fallback eligibility — classification itself already determines which
/// models need a projection at all.
pub fn is_vision_tagged_family(display_name: &str) -> bool {
    VISION_TAGGED_FAMILIES
        .iter()
        .any(|f| display_name.to_ascii_lowercase().starts_with(f))
}

fn normalized_base_name(filename: &str) -> String {
    let mut name = filename.to_ascii_lowercase();
    if let Some(stripped) = name.strip_suffix(".gguf") {
        name = stripped.to_string();
    }

    let suffix_re = Regex::new(r"(?i)(-instruct|-chat|-it)$").unwrap();
    let quant_re = Regex::new(
        r"(?i)[-_](q4_k_m|q4_k_s|q5_k_m|q5_k_s|q6_k|q8_0|f16|f32|q4_0|q4_1|q5_0|q5_1|q2_k|q3_k_m|q3_k_s|q3_k_l|iq\d+_\w+)$",
    )
    .unwrap();
    let proj_re = Regex::new(r"(?i)[-_]?(mmproj|mm-proj|projection)$").unwrap();

    // Strip in the order these suffixes typically stack: quant, then
    // instruct/chat tag, then projection marker, repeating once since a
    // filename might carry at most one of each.
    for re in [&quant_re, &suffix_re, &proj_re] {
        if let Some(m) = re.find(&name) {
            name.truncate(m.start());
        }
    }

    name
}

fn names_match(a: &str, b: &str) -> bool {
    a == b || a.contains(b) || b.contains(a)
}

/// Resolve the projection path for one vision-capable chat model. `models`
/// is the full scanned set (to search for projection-classified companions
/// in tier 2); `mappings` is the persisted store; `bundled_generic` is the
/// base-directory fallback projection for tier 3, if one exists.
pub fn resolve(
    model: &ModelFile,
    all_models: &[ModelFile],
    mappings: &HashMap<String, ProjectionMappingEntry>,
    bundled_generic: Option<&Path>,
) -> Option<PathBuf> {
    if !matches!(model.classification, Classification::VisionCapableChat) {
        return None;
    }

    // Tier 1: the mapping store, if non-empty anywhere, is authoritative —
    // heuristics are skipped even when this specific model has no entry.
    if !mappings.is_empty() {
        let key = model.absolute_path.to_string_lossy().to_string();
        return mappings.get(&key).map(|entry| entry.projection_path.clone());
    }

    // Tier 2: normalized base-name match against any projection-classified
    // file in the same scan.
    let target_base = normalized_base_name(&model.filename);
    let heuristic_match = all_models
        .iter()
        .filter(|m| matches!(m.classification, Classification::Projection))
        .find(|m| names_match(&normalized_base_name(&m.filename), &target_base));
    if let Some(found) = heuristic_match {
        return Some(found.absolute_path.clone());
    }

    // Tier 3: bundled generic fallback. The function already only reaches
    // here for vision-capable-chat models (the early return above), which
    // per §4.E is itself sufficient eligibility; `is_vision_tagged_family`
    // exists for callers that want to pre-filter before an expensive scan.
    if let Some(generic) = bundled_generic {
        println!(
            "[Projection] Using bundled generic projection for {} (dimension match not verified)",
            model.display_name
        );
        return Some(generic.to_path_buf());
    }

    None
}

/// Dimension compatibility check, used by the UI rather than the
/// auto-resolver (§4.E).
pub fn dimensions_compatible(a: Option<u64>, b: Option<u64>) -> bool {
    matches!((a, b), (Some(x), Some(y)) if x == y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ModelSource;

    fn model(filename: &str, classification: Classification) -> ModelFile {
        ModelFile {
            absolute_path: PathBuf::from(format!("/models/{}", filename)),
            filename: filename.to_string(),
            size_bytes: 1024,
            source: ModelSource::User,
            last_modified: None,
            classification,
            display_name: filename.to_string(),
        }
    }

    #[test]
    fn normalized_base_name_strips_known_suffixes() {
        assert_eq!(normalized_base_name("qwen2-vl-7b-instruct-q4_k_m.gguf"), "qwen2-vl-7b");
        assert_eq!(normalized_base_name("qwen2-vl-7b-mmproj-f16.gguf"), "qwen2-vl-7b");
    }

    #[test]
    fn mapping_store_is_authoritative_when_nonempty() {
        let vision_model = model("qwen2-vl-7b-instruct-q4_k_m.gguf", Classification::VisionCapableChat);
        let proj_model = model("qwen2-vl-7b-mmproj-f16.gguf", Classification::Projection);
        let all = vec![vision_model.clone(), proj_model.clone()];

        let mappings = HashMap::new();
        // Empty mapping store: tier 2 heuristic should fire.
        let resolved = resolve(&vision_model, &all, &mappings, None);
        assert_eq!(resolved, Some(proj_model.absolute_path.clone()));

        // Non-empty mapping store for a *different* model disables the
        // heuristic entirely, even for this model.
        let mut mappings_for_other = HashMap::new();
        mappings_for_other.insert(
            "/models/some-other-model.gguf".to_string(),
            ProjectionMappingEntry {
                projection_path: PathBuf::from("/models/other-mmproj.gguf"),
                projection_name: "other".to_string(),
                origin_is_manual: true,
            },
        );
        let resolved = resolve(&vision_model, &all, &mappings_for_other, None);
        assert_eq!(resolved, None);
    }

    #[test]
    fn bundled_fallback_used_when_no_heuristic_match() {
        let vision_model = model("llava-vl-7b.gguf", Classification::VisionCapableChat);
        let generic = PathBuf::from("/bundled/generic-mmproj.gguf");
        let resolved = resolve(&vision_model, &[vision_model.clone()], &HashMap::new(), Some(&generic));
        assert_eq!(resolved, Some(generic));
    }

    #[test]
    fn vision_tagged_family_detection() {
        assert!(is_vision_tagged_family("gemma3:4b"));
        assert!(!is_vision_tagged_family("llama3.2:3b"));
    }

    #[test]
    fn dimensions_compatible_requires_both_present_and_equal() {
        assert!(dimensions_compatible(Some(4096), Some(4096)));
        assert!(!dimensions_compatible(Some(4096), Some(2048)));
        assert!(!dimensions_compatible(None, Some(2048)));
    }
}
