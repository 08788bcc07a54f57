//! Shared domain types and actor message envelopes (§3 Data Model).
//!
//! This is the cross-cutting vocabulary every component imports: the actors
//! in `actors/` speak these message enums, the stores in `settings/` persist
//! these structs, and the CLI surfaces these as JSON.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::oneshot;

// ============================================================================
// Platform / accelerator (component A)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Mac,
    Linux,
    Win,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accelerator {
    Cuda,
    Rocm,
    Vulkan,
    Metal,
    Cpu,
}

impl Accelerator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Accelerator::Cuda => "cuda",
            Accelerator::Rocm => "rocm",
            Accelerator::Vulkan => "vulkan",
            Accelerator::Metal => "metal",
            Accelerator::Cpu => "cpu",
        }
    }
}

impl std::fmt::Display for Accelerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// GPU memory class used by the Performance Planner's VRAM-reservation ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuClass {
    Dedicated,
    AppleSilicon,
    Integrated,
    Disabled,
}

/// Detected platform + accelerator, computed once at startup (§3 PlatformInfo).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub os: Os,
    pub arch: String,
    pub accelerator: Accelerator,
    /// Filesystem tag used to name the accelerator's binary directory,
    /// e.g. `"linux-cuda"`, `"mac-metal"`, `"win-cpu"`.
    pub platform_dir: String,
    pub gpu_class: GpuClass,
    /// Estimated GPU memory in MB (vendor-reported when available, else the
    /// RAM-derived estimate of the §4.A table).
    pub estimated_gpu_mb: u64,
}

/// Resolved binary paths, required before the swap proxy can be spawned
/// (§3 BinarySet).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinarySet {
    pub swap_path: PathBuf,
    pub server_path: PathBuf,
    /// True if provisioning fell back to base-directory binaries instead of
    /// the accelerator-specific ones (degraded but usable).
    pub degraded: bool,
}

// ============================================================================
// Model files / classification (component D)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelSource {
    User,
    Bundled,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Classification {
    Chat,
    Embedding,
    Projection,
    VisionCapableChat,
}

impl Classification {
    pub fn is_embedding(&self) -> bool {
        matches!(self, Classification::Embedding)
    }

    pub fn is_chat_family(&self) -> bool {
        matches!(self, Classification::Chat | Classification::VisionCapableChat)
    }
}

/// A discovered `.gguf` file (§3 ModelFile). Rebuilt on every scan; no
/// long-lived identity beyond `absolute_path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelFile {
    pub absolute_path: PathBuf,
    pub filename: String,
    pub size_bytes: u64,
    pub source: ModelSource,
    pub last_modified: Option<chrono::DateTime<chrono::Utc>>,
    pub classification: Classification,
    pub display_name: String,
}

/// Extracted GGUF header facts (§3 ModelMetadata), cached by absolute path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub native_context_tokens: Option<u64>,
    pub embedding_dimension: Option<u64>,
    pub gguf_version: Option<u32>,
    pub tensor_count: Option<u64>,
}

// ============================================================================
// Projection mapping (component E)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionMappingEntry {
    pub projection_path: PathBuf,
    pub projection_name: String,
    pub origin_is_manual: bool,
}

// ============================================================================
// Performance settings (component F / J)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KvCacheType {
    F16,
    Q8_0,
    Q4_0,
}

impl Default for KvCacheType {
    fn default() -> Self {
        KvCacheType::Q8_0
    }
}

impl KvCacheType {
    pub fn as_flag_value(&self) -> &'static str {
        match self {
            KvCacheType::F16 => "f16",
            KvCacheType::Q8_0 => "q8_0",
            KvCacheType::Q4_0 => "q4_0",
        }
    }
}

/// Global performance settings (§3 PerformanceSettings). `None` numeric
/// fields mean "auto-calculate" throughout the Performance Planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSettings {
    pub threads: Option<u32>,
    pub max_context_size: Option<u64>,
    pub parallel_sequences: u32,
    pub flash_attention: bool,
    pub optimize_first_token: bool,
    pub keep_tokens: Option<u64>,
    pub defrag_threshold: Option<f32>,
    pub kv_cache_type: KvCacheType,
    pub gpu_layers: Option<u32>,
    pub batch_size: Option<u32>,
    pub ubatch_size: Option<u32>,
    pub memory_lock: bool,
    pub enable_continuous_batching: bool,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            threads: None,
            max_context_size: None,
            parallel_sequences: 1,
            flash_attention: true,
            optimize_first_token: false,
            keep_tokens: None,
            defrag_threshold: None,
            kv_cache_type: KvCacheType::default(),
            gpu_layers: None,
            batch_size: None,
            ubatch_size: None,
            memory_lock: true,
            enable_continuous_batching: true,
        }
    }
}

/// Same shape as `PerformanceSettings` but scoped to one display name; every
/// `Some` field replaces the global value for that model (§3 PerModelOverride).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerModelOverride {
    pub threads: Option<u32>,
    pub max_context_size: Option<u64>,
    pub parallel_sequences: Option<u32>,
    pub flash_attention: Option<bool>,
    pub optimize_first_token: Option<bool>,
    pub keep_tokens: Option<u64>,
    pub defrag_threshold: Option<f32>,
    pub kv_cache_type: Option<KvCacheType>,
    pub gpu_layers: Option<u32>,
    pub batch_size: Option<u32>,
    pub ubatch_size: Option<u32>,
    pub memory_lock: Option<bool>,
    pub enable_continuous_batching: Option<bool>,
}

// ============================================================================
// Consent (component I)
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConsent {
    pub has_consented: bool,
    /// Per-service opt-in flags, keyed by `ServiceKey::as_str()`.
    pub per_service_flags: std::collections::HashMap<String, bool>,
    pub onboarding_mode: bool,
    pub auto_start_services: bool,
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

// ============================================================================
// Watchdog (component I)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceKey {
    /// The swap proxy itself — always monitored, even without consent.
    SwapProxy,
    ContainerRuntime,
    AuxIndexer,
}

impl ServiceKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKey::SwapProxy => "swap_proxy",
            ServiceKey::ContainerRuntime => "container_runtime",
            ServiceKey::AuxIndexer => "aux_indexer",
        }
    }

    pub fn human_name(&self) -> &'static str {
        match self {
            ServiceKey::SwapProxy => "Model Swap Proxy",
            ServiceKey::ContainerRuntime => "Container Runtime",
            ServiceKey::AuxIndexer => "Background Indexer",
        }
    }

    pub fn is_essential(&self) -> bool {
        matches!(self, ServiceKey::SwapProxy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Unknown,
    Starting,
    Healthy,
    Degraded,
    Failed,
    Error,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub key: ServiceKey,
    pub human_name: String,
    pub status: ServiceStatus,
    pub enabled: bool,
    pub last_check_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_healthy_at: Option<chrono::DateTime<chrono::Utc>>,
    pub failure_count: u32,
    pub is_retrying: bool,
    pub grace_period_logged: bool,
}

impl ServiceRecord {
    pub fn new(key: ServiceKey, enabled: bool) -> Self {
        Self {
            key,
            human_name: key.human_name().to_string(),
            status: ServiceStatus::Unknown,
            enabled,
            last_check_at: None,
            last_healthy_at: None,
            failure_count: 0,
            is_retrying: false,
            grace_period_logged: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthMetric {
    pub state_change_count: u64,
    pub total_downtime_ms: u64,
    pub last_healthy_at: Option<chrono::DateTime<chrono::Utc>>,
    pub restart_count: u64,
}

// ============================================================================
// Swap Proxy Supervisor state machine (component H)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorPhase {
    Idle,
    Starting,
    Running,
    Stopping,
    Failed,
}

/// User-visible startup progress message (§3 StartupPhase / §4.H ordering).
pub type StartupPhase = &'static str;

pub const STARTUP_PHASES: &[StartupPhase] = &[
    "initializing",
    "checking GPU/binaries",
    "cleaning prior processes",
    "macOS security check",
    "verifying binaries",
    "generating config",
    "verifying config",
    "checking port",
    "launching",
    "verifying health",
    "ready",
];

/// Status payload returned by `getStatus()` / `getStatusWithHealthCheck()` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorStatus {
    pub is_running: bool,
    pub is_starting: bool,
    pub starting_duration_ms: Option<u64>,
    pub is_stuck: bool,
    pub current_startup_phase: Option<String>,
    pub port: Option<u16>,
    pub pid: Option<u32>,
    pub api_url: Option<String>,
    pub current_backend_name: Option<String>,
}

/// Commands the CLI/IPC surface sends to the Swap Proxy Supervisor actor.
#[derive(Debug)]
pub enum SupervisorMsg {
    Start {
        skip_config_generation: bool,
        reply: oneshot::Sender<Result<SupervisorStatus, String>>,
    },
    Stop {
        reply: oneshot::Sender<Result<(), String>>,
    },
    Restart {
        skip_config_regeneration: bool,
        reply: oneshot::Sender<Result<SupervisorStatus, String>>,
    },
    GetStatus {
        with_health_check: bool,
        reply: oneshot::Sender<SupervisorStatus>,
    },
    ForceReconfigure {
        reply: oneshot::Sender<Result<(), String>>,
    },
}

/// Events the supervisor publishes for the Watchdog to subscribe to
/// (§9 "one-way message passing" resolution of the cyclic coupling).
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    PhaseChanged(StartupPhase),
    Ready { port: u16, pid: u32 },
    Stopped,
    HealthOk,
    HealthFailed(String),
}

// ============================================================================
// Watchdog messages
// ============================================================================

#[derive(Debug)]
pub enum WatchdogMsg {
    SignalSetupComplete,
    GetSnapshot {
        reply: oneshot::Sender<Vec<ServiceRecord>>,
    },
    GetMetrics {
        reply: oneshot::Sender<std::collections::HashMap<ServiceKey, HealthMetric>>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accelerator_display_matches_flag_value() {
        assert_eq!(Accelerator::Cuda.to_string(), "cuda");
        assert_eq!(Accelerator::Cpu.to_string(), "cpu");
    }

    #[test]
    fn service_key_essential_is_only_swap_proxy() {
        assert!(ServiceKey::SwapProxy.is_essential());
        assert!(!ServiceKey::ContainerRuntime.is_essential());
        assert!(!ServiceKey::AuxIndexer.is_essential());
    }

    #[test]
    fn classification_groups() {
        assert!(Classification::Chat.is_chat_family());
        assert!(Classification::VisionCapableChat.is_chat_family());
        assert!(!Classification::Embedding.is_chat_family());
        assert!(Classification::Embedding.is_embedding());
    }
}
