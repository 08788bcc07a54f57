//! Platform Probe (component A).
//!
//! Detects OS/arch, enumerates GPUs via vendor tools, and picks an
//! accelerator class. Grounded on the original `process_utils.rs`'s
//! `run_with_timeout` helper for the "never hang on a vendor tool" rule and
//! on `other_examples`' VRAM-estimation heuristics for the RAM-derived
//! fallback table.

use crate::process_utils::run_with_timeout;
use crate::protocol::{Accelerator, GpuClass, Os, PlatformInfo};
use std::time::Duration;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

fn current_os() -> Os {
    match std::env::consts::OS {
        "macos" => Os::Mac,
        "windows" => Os::Win,
        _ => Os::Linux,
    }
}

fn platform_dir_tag(os: Os, accelerator: Accelerator) -> String {
    let os_tag = match os {
        Os::Mac => "mac",
        Os::Linux => "linux",
        Os::Win => "win",
    };
    format!("{}-{}", os_tag, accelerator.as_str())
}

/// Detect the platform and pick an accelerator, honoring `backend_override`
/// if it names a value the caller has already confirmed is available
/// (§4.A precedence rule 1 — the caller, the Binary Provisioner, is the one
/// that knows whether an override names an available binary directory).
pub async fn detect(backend_override: Option<&str>) -> PlatformInfo {
    let os = current_os();
    let arch = std::env::consts::ARCH.to_string();

    let accelerator = if let Some(forced) = backend_override.and_then(parse_accelerator) {
        forced
    } else {
        probe_accelerator(os, &arch).await
    };

    let gpu_class = classify_gpu(os, accelerator);
    let estimated_gpu_mb = estimate_gpu_mb(os, gpu_class).await;
    let platform_dir = platform_dir_tag(os, accelerator);

    PlatformInfo {
        os,
        arch,
        accelerator,
        platform_dir,
        gpu_class,
        estimated_gpu_mb,
    }
}

fn parse_accelerator(raw: &str) -> Option<Accelerator> {
    match raw.to_ascii_lowercase().as_str() {
        "cuda" => Some(Accelerator::Cuda),
        "rocm" => Some(Accelerator::Rocm),
        "vulkan" => Some(Accelerator::Vulkan),
        "metal" => Some(Accelerator::Metal),
        "cpu" => Some(Accelerator::Cpu),
        _ => None,
    }
}

/// Vendor probe precedence chain (§4.A rule 2). Never panics; any probe
/// failure or timeout falls through to the next test, defaulting to cpu.
async fn probe_accelerator(os: Os, arch: &str) -> Accelerator {
    if os == Os::Mac {
        return if arch == "aarch64" {
            Accelerator::Metal
        } else {
            Accelerator::Cpu
        };
    }

    if probe_nvidia().await {
        return Accelerator::Cuda;
    }
    if os == Os::Win && probe_amd_windows().await {
        return Accelerator::Rocm;
    }
    if probe_vulkan().await {
        return Accelerator::Vulkan;
    }
    Accelerator::Cpu
}

async fn probe_nvidia() -> bool {
    let mut cmd = tokio::process::Command::new("nvidia-smi");
    cmd.args(["--query-gpu=count", "--format=csv,noheader"]);
    match run_with_timeout(cmd, PROBE_TIMEOUT).await {
        Some(out) => out.lines().next().map(|l| !l.trim().is_empty()).unwrap_or(false),
        None => false,
    }
}

async fn probe_amd_windows() -> bool {
    let mut cmd = tokio::process::Command::new("wmic");
    cmd.args(["path", "win32_VideoController", "get", "name"]);
    match run_with_timeout(cmd, PROBE_TIMEOUT).await {
        Some(out) => {
            let upper = out.to_ascii_uppercase();
            upper.contains("AMD") || upper.contains("RADEON")
        }
        None => false,
    }
}

async fn probe_vulkan() -> bool {
    let cmd = tokio::process::Command::new("vulkaninfo");
    run_with_timeout(cmd, PROBE_TIMEOUT).await.is_some()
}

fn classify_gpu(os: Os, accelerator: Accelerator) -> GpuClass {
    match (os, accelerator) {
        (Os::Mac, Accelerator::Metal) => GpuClass::AppleSilicon,
        (Os::Mac, Accelerator::Cpu) => GpuClass::Integrated,
        (_, Accelerator::Cpu) => GpuClass::Disabled,
        _ => GpuClass::Dedicated,
    }
}

/// GPU memory estimation table (§4.A). Vendor probes that already resolved
/// CUDA/ROCm are treated as dedicated-class estimates derived from system
/// RAM, same as the fallback path — querying exact vendor VRAM figures is
/// out of scope for this probe (see §1 Non-goals: no GPU driver bindings).
async fn estimate_gpu_mb(os: Os, gpu_class: GpuClass) -> u64 {
    let ram_gb = system_ram_gb();

    match (os, gpu_class) {
        (Os::Mac, GpuClass::AppleSilicon) => {
            if ram_gb >= 32 {
                16384
            } else if ram_gb >= 16 {
                8192
            } else {
                4096
            }
        }
        (_, GpuClass::Disabled) => 1024,
        _ => {
            if ram_gb >= 16 {
                4096
            } else if ram_gb >= 8 {
                2048
            } else {
                1024
            }
        }
    }
}

/// Best-effort system RAM in GB. Falls back to a conservative 8 GB estimate
/// if the platform doesn't expose it through the probes this crate uses.
fn system_ram_gb() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo") {
            for line in meminfo.lines() {
                if let Some(rest) = line.strip_prefix("MemTotal:") {
                    if let Some(kb_str) = rest.trim().split_whitespace().next() {
                        if let Ok(kb) = kb_str.parse::<u64>() {
                            return kb / 1024 / 1024;
                        }
                    }
                }
            }
        }
    }
    8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_dir_tag_combines_os_and_accelerator() {
        assert_eq!(platform_dir_tag(Os::Linux, Accelerator::Cuda), "linux-cuda");
        assert_eq!(platform_dir_tag(Os::Mac, Accelerator::Metal), "mac-metal");
        assert_eq!(platform_dir_tag(Os::Win, Accelerator::Cpu), "win-cpu");
    }

    #[test]
    fn parse_accelerator_accepts_known_names() {
        assert_eq!(parse_accelerator("CUDA"), Some(Accelerator::Cuda));
        assert_eq!(parse_accelerator("bogus"), None);
    }

    #[test]
    fn classify_gpu_disables_for_cpu_accelerator() {
        assert_eq!(classify_gpu(Os::Linux, Accelerator::Cpu), GpuClass::Disabled);
        assert_eq!(classify_gpu(Os::Win, Accelerator::Cpu), GpuClass::Disabled);
        assert_eq!(classify_gpu(Os::Mac, Accelerator::Metal), GpuClass::AppleSilicon);
    }

    #[test]
    fn classify_gpu_mac_x64_is_integrated_not_disabled() {
        assert_eq!(classify_gpu(Os::Mac, Accelerator::Cpu), GpuClass::Integrated);
    }

    #[tokio::test]
    async fn detect_never_panics_and_has_a_platform_dir() {
        let info = detect(None).await;
        assert!(!info.platform_dir.is_empty());
    }

    #[tokio::test]
    async fn detect_honors_backend_override() {
        let info = detect(Some("cpu")).await;
        assert_eq!(info.accelerator, Accelerator::Cpu);
    }
}
