//! Settings & Overrides Store (component J).
//!
//! Owns every persisted document named in §6: performance settings,
//! per-model overrides, projection mappings, the backend override, and user
//! consent. Other components read through [`SettingsBundle`] and submit
//! updates via its save methods — none of them touch files directly, the
//! way the original `settings.rs` centralized all config I/O behind
//! `load_settings`/`save_settings`.

pub mod store;

use crate::paths;
use crate::protocol::{PerModelOverride, PerformanceSettings, ProjectionMappingEntry, UserConsent};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `~/.clara/settings/backend-override.json` (§6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendOverride {
    pub backend_id: Option<String>,
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
    pub platform: Option<String>,
    pub architecture: Option<String>,
}

/// All five persisted documents, loaded once at startup and shared behind
/// `app_state::SettingsState`.
#[derive(Debug, Clone, Default)]
pub struct SettingsBundle {
    pub performance: PerformanceSettings,
    /// Keyed by `ModelFile::display_name`.
    pub model_overrides: HashMap<String, PerModelOverride>,
    /// Keyed by main model's absolute path (as a string, for JSON-map friendliness).
    pub mmproj_mappings: HashMap<String, ProjectionMappingEntry>,
    pub backend_override: BackendOverride,
    pub consent: UserConsent,
}

impl SettingsBundle {
    /// Load every document, falling back to defaults for any that are
    /// missing or unreadable (§7 "corrupt model metadata"-style policy
    /// applied uniformly to settings: never block startup on a bad file).
    pub async fn load() -> Self {
        let performance = store::load_or_default(&paths::performance_settings_path()).await;
        let model_overrides = store::load_or_default(&paths::model_overrides_path()).await;
        let mmproj_mappings = store::load_or_default(&paths::mmproj_mappings_path()).await;
        let backend_override = store::load_or_default(&paths::backend_override_path()).await;
        let consent = store::load_or_default(&paths::user_consent_path()).await;

        Self {
            performance,
            model_overrides,
            mmproj_mappings,
            backend_override,
            consent,
        }
    }

    pub async fn save_performance(&self) -> Result<(), String> {
        store::save_with_backup(&paths::performance_settings_path(), &self.performance).await
    }

    pub async fn save_model_overrides(&self) -> Result<(), String> {
        store::save_with_backup(&paths::model_overrides_path(), &self.model_overrides).await
    }

    pub async fn save_mmproj_mappings(&self) -> Result<(), String> {
        store::save_with_backup(&paths::mmproj_mappings_path(), &self.mmproj_mappings).await
    }

    pub async fn save_backend_override(&self) -> Result<(), String> {
        store::save_with_backup(&paths::backend_override_path(), &self.backend_override).await
    }

    pub async fn save_consent(&self) -> Result<(), String> {
        store::save_with_backup(&paths::user_consent_path(), &self.consent).await
    }

    /// Effective settings for a model: global performance settings with any
    /// per-model override fields layered on top (§3 PerModelOverride,
    /// §4.F precedence: per-model > user-global > auto-calculated).
    pub fn effective_performance(&self, display_name: &str) -> PerformanceSettings {
        let mut effective = self.performance.clone();
        let Some(o) = self.model_overrides.get(display_name) else {
            return effective;
        };

        if let Some(v) = o.threads {
            effective.threads = Some(v);
        }
        if let Some(v) = o.max_context_size {
            effective.max_context_size = Some(v);
        }
        if let Some(v) = o.parallel_sequences {
            effective.parallel_sequences = v;
        }
        if let Some(v) = o.flash_attention {
            effective.flash_attention = v;
        }
        if let Some(v) = o.optimize_first_token {
            effective.optimize_first_token = v;
        }
        if let Some(v) = o.keep_tokens {
            effective.keep_tokens = Some(v);
        }
        if let Some(v) = o.defrag_threshold {
            effective.defrag_threshold = Some(v);
        }
        if let Some(v) = o.kv_cache_type {
            effective.kv_cache_type = v;
        }
        if let Some(v) = o.gpu_layers {
            effective.gpu_layers = Some(v);
        }
        if let Some(v) = o.batch_size {
            effective.batch_size = Some(v);
        }
        if let Some(v) = o.ubatch_size {
            effective.ubatch_size = Some(v);
        }
        if let Some(v) = o.memory_lock {
            effective.memory_lock = v;
        }
        if let Some(v) = o.enable_continuous_batching {
            effective.enable_continuous_batching = v;
        }

        effective
    }

    /// Whether a given watchdog service key is allowed to run, per the
    /// consent gate (§4.I): essential service always monitored; others only
    /// when consented and explicitly flagged.
    pub fn service_enabled(&self, key: crate::protocol::ServiceKey) -> bool {
        if key.is_essential() {
            return true;
        }
        if !self.consent.has_consented {
            return false;
        }
        if self.consent.onboarding_mode && !self.consent.auto_start_services {
            return false;
        }
        self.consent
            .per_service_flags
            .get(key.as_str())
            .copied()
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{KvCacheType, ServiceKey};

    #[test]
    fn per_model_override_layers_over_global() {
        let mut bundle = SettingsBundle::default();
        bundle.performance.flash_attention = true;
        bundle.performance.kv_cache_type = KvCacheType::Q8_0;
        bundle.model_overrides.insert(
            "llama3.2:3b-q4_k_m".to_string(),
            PerModelOverride {
                flash_attention: Some(false),
                kv_cache_type: Some(KvCacheType::F16),
                ..Default::default()
            },
        );

        let effective = bundle.effective_performance("llama3.2:3b-q4_k_m");
        assert!(!effective.flash_attention);
        assert_eq!(effective.kv_cache_type, KvCacheType::F16);

        let unaffected = bundle.effective_performance("other-model");
        assert!(unaffected.flash_attention);
    }

    #[test]
    fn essential_service_always_enabled_without_consent() {
        let bundle = SettingsBundle::default();
        assert!(bundle.service_enabled(ServiceKey::SwapProxy));
        assert!(!bundle.service_enabled(ServiceKey::ContainerRuntime));
    }

    #[test]
    fn consented_flagged_service_is_enabled() {
        let mut bundle = SettingsBundle::default();
        bundle.consent.has_consented = true;
        bundle
            .consent
            .per_service_flags
            .insert(ServiceKey::AuxIndexer.as_str().to_string(), true);
        assert!(bundle.service_enabled(ServiceKey::AuxIndexer));
        assert!(!bundle.service_enabled(ServiceKey::ContainerRuntime));
    }

    #[test]
    fn onboarding_without_autostart_disables_non_essential() {
        let mut bundle = SettingsBundle::default();
        bundle.consent.has_consented = true;
        bundle.consent.onboarding_mode = true;
        bundle.consent.auto_start_services = false;
        bundle
            .consent
            .per_service_flags
            .insert(ServiceKey::AuxIndexer.as_str().to_string(), true);
        assert!(!bundle.service_enabled(ServiceKey::AuxIndexer));
    }
}
