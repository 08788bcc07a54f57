//! Upstream release index client and Table Match-1 asset matcher (§4.B, §6).

use crate::protocol::Accelerator;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseIndex {
    pub tag_name: String,
    pub assets: Vec<ReleaseAsset>,
}

/// Fetch the latest release for `owner/repo` from the GitHub API.
pub async fn fetch_latest(client: &reqwest::Client, owner: &str, repo: &str) -> Result<ReleaseIndex, String> {
    let url = format!("https://api.github.com/repos/{}/{}/releases/latest", owner, repo);
    let response = client
        .get(&url)
        .header("User-Agent", "clara-supervisor")
        .timeout(Duration::from_secs(30))
        .send()
        .await
        .map_err(|e| format!("Failed to fetch release index: {}", e))?;

    if !response.status().is_success() {
        return Err(format!("Release index returned status {}", response.status()));
    }

    response
        .json::<ReleaseIndex>()
        .await
        .map_err(|e| format!("Failed to parse release index: {}", e))
}

/// The asset "class" this provisioner downloads binaries for (§4.B Table
/// Match-1). Distinct from `Accelerator` because CUDA needs two assets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetClass {
    CudaMain,
    CudaRuntime,
    Rocm,
    VulkanWin,
    VulkanLinux,
    CpuWin,
    CpuLinux,
}

struct Matcher {
    class: AssetClass,
    positive: &'static [&'static str],
    negative: &'static [&'static str],
}

const MATCHERS: &[Matcher] = &[
    Matcher { class: AssetClass::CudaMain, positive: &["bin-win-cuda", ".zip"], negative: &["cudart"] },
    Matcher { class: AssetClass::CudaRuntime, positive: &["cudart", "bin-win-cuda"], negative: &[] },
    Matcher { class: AssetClass::Rocm, positive: &["bin-win-hip-radeon"], negative: &[] },
    Matcher { class: AssetClass::CpuWin, positive: &["bin-win-cpu", "x64"], negative: &[] },
    Matcher { class: AssetClass::VulkanLinux, positive: &["ubuntu", "vulkan"], negative: &[] },
    Matcher { class: AssetClass::CpuLinux, positive: &["ubuntu"], negative: &["vulkan", "cuda", "rocm"] },
];

/// Find the first asset matching `class`'s positive/negative token rules
/// (§4.B Table Match-1). `"vulkan"` on its own (not linux-tagged) matches
/// generically across platforms per the table's `vulkan + platform` rule.
pub fn find_asset<'a>(assets: &'a [ReleaseAsset], class: AssetClass) -> Option<&'a ReleaseAsset> {
    if class == AssetClass::VulkanWin {
        return assets.iter().find(|a| {
            let lower = a.name.to_ascii_lowercase();
            lower.contains("vulkan") && lower.contains("win")
        });
    }

    let matcher = MATCHERS.iter().find(|m| m.class == class)?;
    assets.iter().find(|a| {
        let lower = a.name.to_ascii_lowercase();
        matcher.positive.iter().all(|p| lower.contains(p)) && !matcher.negative.iter().any(|n| lower.contains(n))
    })
}

/// Map a detected accelerator + OS to the asset class(es) the provisioner
/// needs. CUDA yields two classes (main + runtime, §4.B "dual download").
pub fn asset_classes_for(accelerator: Accelerator, os: crate::protocol::Os) -> Vec<AssetClass> {
    use crate::protocol::Os;
    match (accelerator, os) {
        (Accelerator::Cuda, _) => vec![AssetClass::CudaMain, AssetClass::CudaRuntime],
        (Accelerator::Rocm, _) => vec![AssetClass::Rocm],
        (Accelerator::Vulkan, Os::Win) => vec![AssetClass::VulkanWin],
        (Accelerator::Vulkan, _) => vec![AssetClass::VulkanLinux],
        (Accelerator::Cpu, Os::Win) => vec![AssetClass::CpuWin],
        (Accelerator::Cpu, _) => vec![AssetClass::CpuLinux],
        (Accelerator::Metal, _) => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(name: &str) -> ReleaseAsset {
        ReleaseAsset { name: name.to_string(), browser_download_url: format!("https://example.test/{}", name) }
    }

    #[test]
    fn cuda_main_excludes_runtime_archive() {
        let assets = vec![
            asset("llama-bin-win-cuda-12.4.zip"),
            asset("cudart-bin-win-cuda-12.4.zip"),
        ];
        let found = find_asset(&assets, AssetClass::CudaMain).unwrap();
        assert_eq!(found.name, "llama-bin-win-cuda-12.4.zip");
    }

    #[test]
    fn cuda_runtime_matches_cudart_asset() {
        let assets = vec![asset("llama-bin-win-cuda-12.4.zip"), asset("cudart-bin-win-cuda-12.4.zip")];
        let found = find_asset(&assets, AssetClass::CudaRuntime).unwrap();
        assert_eq!(found.name, "cudart-bin-win-cuda-12.4.zip");
    }

    #[test]
    fn linux_cpu_excludes_vulkan_and_cuda_variants() {
        let assets = vec![
            asset("llama-bin-ubuntu-vulkan-x64.zip"),
            asset("llama-bin-ubuntu-x64.zip"),
        ];
        let found = find_asset(&assets, AssetClass::CpuLinux).unwrap();
        assert_eq!(found.name, "llama-bin-ubuntu-x64.zip");
    }

    #[test]
    fn asset_classes_for_cuda_yields_dual_download() {
        let classes = asset_classes_for(Accelerator::Cuda, crate::protocol::Os::Win);
        assert_eq!(classes, vec![AssetClass::CudaMain, AssetClass::CudaRuntime]);
    }
}
