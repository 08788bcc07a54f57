//! Performance Planner (component F).
//!
//! Computes per-model launch flags from saved settings, detected hardware,
//! and GGUF metadata, and renders the inference-server command line (§6).
//! Grounded on `other_examples`' `calculate_optimal_gpu_layers`-style
//! per-layer-memory estimation for the GPU-layer fit loop below.

use crate::protocol::{
    Classification, GpuClass, KvCacheType, ModelFile, ModelMetadata, PerformanceSettings, PlatformInfo,
};
use regex::Regex;
use std::path::PathBuf;

const DEFAULT_CONTEXT: u64 = 8192;

/// Fully-resolved launch parameters for one model, ready to render into a
/// command line or to inspect from tests/diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchPlan {
    pub threads: u32,
    pub threads_batch: Option<u32>,
    pub gpu_layers: u32,
    pub context_size: Option<u64>,
    pub batch_size: u32,
    pub ubatch_size: u32,
    pub keep_tokens: u64,
    pub defrag_threshold: f32,
    pub flash_attention: bool,
    pub memory_lock: bool,
    pub continuous_batching: bool,
    pub kv_cache_type: KvCacheType,
    pub no_warmup: bool,
    pub port: u16,
    pub is_embedding: bool,
    pub mmproj_path: Option<PathBuf>,
}

fn parse_total_layers(filename: &str) -> u32 {
    let re = Regex::new(r"(?i)(\d+(?:\.\d+)?)b").unwrap();
    let Some(params_b) = re
        .captures(filename)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
    else {
        return 100;
    };

    if params_b <= 1.5 {
        22
    } else if params_b <= 3.5 {
        26
    } else if params_b <= 8.0 {
        32
    } else if params_b <= 15.0 {
        40
    } else if params_b <= 35.0 {
        60
    } else if params_b <= 75.0 {
        80
    } else {
        100
    }
}

fn vram_reserve_ratio(gpu_class: GpuClass) -> f64 {
    match gpu_class {
        GpuClass::Dedicated => 0.20,
        GpuClass::AppleSilicon => 0.30,
        GpuClass::Integrated => 0.40,
        GpuClass::Disabled => 1.0,
    }
}

fn estimate_gpu_layers(model: &ModelFile, platform: &PlatformInfo) -> u32 {
    if platform.accelerator == crate::protocol::Accelerator::Cpu {
        return 0;
    }
    let estimated_vram_bytes = platform.estimated_gpu_mb as u64 * 1024 * 1024;
    if estimated_vram_bytes < 1024 * 1024 * 1024 {
        return 0;
    }

    let total_layers = parse_total_layers(&model.filename);
    if total_layers == 0 || model.size_bytes == 0 {
        return 0;
    }
    let per_layer_bytes = model.size_bytes / total_layers as u64;
    if per_layer_bytes == 0 {
        return total_layers;
    }

    let usable_ratio = 1.0 - vram_reserve_ratio(platform.gpu_class);
    let usable_bytes = (estimated_vram_bytes as f64 * usable_ratio) as u64;
    let fitted = (usable_bytes / per_layer_bytes) as u32;

    fitted.min(total_layers)
}

fn thread_count(cpu_cores: u32, override_threads: Option<u32>) -> u32 {
    override_threads.unwrap_or_else(|| (cpu_cores / 2).clamp(4, 8))
}

fn batch_defaults(size_bytes: u64) -> (u32, u32) {
    const GB: u64 = 1024 * 1024 * 1024;
    if size_bytes <= 4 * GB {
        (256, 64)
    } else if size_bytes <= 8 * GB {
        (512, 128)
    } else {
        (1024, 256)
    }
}

/// Compute the full launch plan for `model` given detected hardware and the
/// effective (already per-model-layered) performance settings.
pub fn plan(
    model: &ModelFile,
    metadata: &ModelMetadata,
    platform: &PlatformInfo,
    settings: &PerformanceSettings,
    cpu_cores: u32,
    mmproj_path: Option<PathBuf>,
) -> LaunchPlan {
    let is_embedding = model.classification.is_embedding();

    let threads = thread_count(cpu_cores, settings.threads);
    let gpu_layers = settings.gpu_layers.unwrap_or_else(|| estimate_gpu_layers(model, platform));

    let mut context_size = if is_embedding {
        None
    } else {
        Some(
            settings
                .max_context_size
                .or(metadata.native_context_tokens)
                .unwrap_or(DEFAULT_CONTEXT),
        )
    };

    let (default_batch, default_ubatch) = batch_defaults(model.size_bytes);
    let batch_size = settings.batch_size.unwrap_or(default_batch);
    let ubatch_size = settings.ubatch_size.unwrap_or(default_ubatch);

    let ctx_for_keep = context_size.unwrap_or(DEFAULT_CONTEXT);
    let mut keep_tokens = settings.keep_tokens.unwrap_or_else(|| 1024.min(ctx_for_keep / 4));
    let mut defrag_threshold = settings.defrag_threshold.unwrap_or(0.1);
    let mut continuous_batching = settings.enable_continuous_batching;
    let mut threads_batch = None;
    let mut no_warmup = false;

    if settings.optimize_first_token {
        threads_batch = Some((threads / 2).max(1));
        no_warmup = true;
        if !is_embedding {
            context_size = Some(context_size.unwrap_or(DEFAULT_CONTEXT).min(DEFAULT_CONTEXT));
        }
        defrag_threshold = 0.05;
        continuous_batching = false;
        keep_tokens = keep_tokens.min(context_size.unwrap_or(DEFAULT_CONTEXT) / 4);
    }

    let port = if is_embedding { 9998 } else { 9999 };

    LaunchPlan {
        threads,
        threads_batch,
        gpu_layers,
        context_size,
        batch_size,
        ubatch_size,
        keep_tokens,
        defrag_threshold,
        flash_attention: settings.flash_attention,
        memory_lock: settings.memory_lock,
        continuous_batching,
        kv_cache_type: settings.kv_cache_type,
        no_warmup,
        port,
        is_embedding,
        mmproj_path,
    }
}

/// Render the inference-server command line (§6), in the flag order the
/// spec lists them.
pub fn build_command_line(binary_path: &str, model_path: &str, plan: &LaunchPlan) -> Vec<String> {
    let mut args = vec![binary_path.to_string(), "-m".to_string(), model_path.to_string()];
    args.push("--port".to_string());
    args.push(plan.port.to_string());
    args.push("--jinja".to_string());

    if plan.gpu_layers > 0 {
        args.push("--n-gpu-layers".to_string());
        args.push(plan.gpu_layers.to_string());
    }

    if let Some(mmproj) = &plan.mmproj_path {
        args.push("--mmproj".to_string());
        args.push(mmproj.to_string_lossy().into_owned());
    }

    if plan.is_embedding {
        args.push("--pooling".to_string());
        args.push("mean".to_string());
        args.push("--embeddings".to_string());
    }

    args.push("--threads".to_string());
    args.push(plan.threads.to_string());

    if let Some(ctx) = plan.context_size {
        args.push("--ctx-size".to_string());
        args.push(ctx.to_string());
    }

    args.push("--batch-size".to_string());
    args.push(plan.batch_size.to_string());
    args.push("--ubatch-size".to_string());
    args.push(plan.ubatch_size.to_string());
    args.push("--keep".to_string());
    args.push(plan.keep_tokens.to_string());
    args.push("--defrag-thold".to_string());
    args.push(plan.defrag_threshold.to_string());

    if plan.memory_lock {
        args.push("--mlock".to_string());
    }

    args.push("--parallel".to_string());
    args.push("1".to_string());

    if plan.flash_attention {
        args.push("--flash-attn".to_string());
    }

    if plan.continuous_batching && plan.threads_batch.is_none() {
        args.push("--cont-batching".to_string());
    }

    if plan.kv_cache_type != KvCacheType::F16 {
        args.push("--cache-type-k".to_string());
        args.push(plan.kv_cache_type.as_flag_value().to_string());
        args.push("--cache-type-v".to_string());
        args.push(plan.kv_cache_type.as_flag_value().to_string());
    }

    if let Some(threads_batch) = plan.threads_batch {
        args.push("--threads-batch".to_string());
        args.push(threads_batch.to_string());
    }
    if plan.no_warmup {
        args.push("--no-warmup".to_string());
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Accelerator, ModelSource, Os};

    fn platform(accelerator: Accelerator, gpu_class: GpuClass, mb: u64) -> PlatformInfo {
        PlatformInfo {
            os: Os::Linux,
            arch: "x86_64".to_string(),
            accelerator,
            platform_dir: "linux-cuda".to_string(),
            gpu_class,
            estimated_gpu_mb: mb,
        }
    }

    fn model(filename: &str, size_bytes: u64, classification: Classification) -> ModelFile {
        ModelFile {
            absolute_path: PathBuf::from(format!("/models/{}", filename)),
            filename: filename.to_string(),
            size_bytes,
            source: ModelSource::User,
            last_modified: None,
            classification,
            display_name: filename.to_string(),
        }
    }

    #[test]
    fn embedding_model_omits_context_and_sets_embedding_port() {
        let m = model("mxbai-embed-large-v1-f16.gguf", 500_000_000, Classification::Embedding);
        let plat = platform(Accelerator::Cpu, GpuClass::Disabled, 1024);
        let settings = PerformanceSettings::default();
        let plan = plan(&m, &ModelMetadata::default(), &plat, &settings, 8, None);

        assert_eq!(plan.port, 9998);
        assert!(plan.context_size.is_none());

        let args = build_command_line("/bin/llama-server", "/models/x.gguf", &plan);
        assert!(args.contains(&"--embeddings".to_string()));
        assert!(args.contains(&"--pooling".to_string()));
        assert!(!args.contains(&"--ctx-size".to_string()));
    }

    #[test]
    fn chat_model_uses_default_context_when_no_override_or_metadata() {
        let m = model("llama-3.2-3B-Q4_K_M.gguf", 3 * 1024 * 1024 * 1024, Classification::Chat);
        let plat = platform(Accelerator::Cpu, GpuClass::Disabled, 1024);
        let settings = PerformanceSettings::default();
        let plan = plan(&m, &ModelMetadata::default(), &plat, &settings, 8, None);

        assert_eq!(plan.context_size, Some(DEFAULT_CONTEXT));
        assert_eq!(plan.port, 9999);
        assert_eq!(plan.gpu_layers, 0, "cpu accelerator must offload zero layers");
    }

    #[test]
    fn gpu_layers_fit_within_estimated_vram() {
        let m = model("llama-3.2-3B-Q4_K_M.gguf", 3 * 1024 * 1024 * 1024, Classification::Chat);
        let plat = platform(Accelerator::Cuda, GpuClass::Dedicated, 8192);
        let settings = PerformanceSettings::default();
        let plan = plan(&m, &ModelMetadata::default(), &plat, &settings, 8, None);

        assert!(plan.gpu_layers > 0);
        assert!(plan.gpu_layers <= 26, "3B model estimate caps total layers at 26");
    }

    #[test]
    fn ttft_mode_halves_threads_batch_and_disables_continuous_batching() {
        let m = model("llama-3.2-3B-Q4_K_M.gguf", 3 * 1024 * 1024 * 1024, Classification::Chat);
        let plat = platform(Accelerator::Cpu, GpuClass::Disabled, 1024);
        let mut settings = PerformanceSettings::default();
        settings.optimize_first_token = true;
        let plan = plan(&m, &ModelMetadata::default(), &plat, &settings, 8, None);

        assert!(!plan.continuous_batching);
        assert!(plan.no_warmup);
        assert_eq!(plan.defrag_threshold, 0.05);
        assert!(plan.threads_batch.is_some());
    }

    #[test]
    fn non_default_kv_cache_emits_both_flags() {
        let m = model("llama-3.2-3B-Q4_K_M.gguf", 3 * 1024 * 1024 * 1024, Classification::Chat);
        let plat = platform(Accelerator::Cpu, GpuClass::Disabled, 1024);
        let settings = PerformanceSettings::default();
        let plan = plan(&m, &ModelMetadata::default(), &plat, &settings, 8, None);
        let args = build_command_line("/bin/llama-server", "/models/x.gguf", &plan);
        assert!(args.contains(&"--cache-type-k".to_string()));
        assert!(args.contains(&"--cache-type-v".to_string()));
    }
}
