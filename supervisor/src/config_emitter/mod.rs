//! Config Emitter (component G).
//!
//! Serializes the planned model set into the swap proxy's declarative YAML
//! configuration (§6) and performs the write-then-verify dance the swap
//! proxy's filesystem-watch reload depends on (§4.G, §5 "Config generation
//! performs a write, then a 1.5 s wait, then a length-verification read").
//!
//! No YAML crate is pulled in for this: the document is a small, fixed
//! dialect (flat scalar maps plus one multi-line block scalar for `cmd`),
//! so it's hand-rendered the same way this codebase already hand-renders
//! its other small structured-text outputs rather than reaching for a
//! general-purpose serializer for a handful of fixed keys.

use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::time::sleep;

/// One entry under the `models:` map.
#[derive(Debug, Clone)]
pub struct ModelConfigEntry {
    pub name: String,
    pub proxy: String,
    /// Full command line, first element is the binary path.
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub ttl: u64,
}

/// The two predefined groups (§4.G).
pub struct Groups {
    pub embedding_models: Vec<String>,
    pub regular_models: Vec<String>,
}

fn yaml_quote(raw: &str) -> String {
    format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
}

fn indent_block(text: &str, spaces: usize) -> String {
    let prefix = " ".repeat(spaces);
    text.lines().map(|l| format!("{}{}", prefix, l)).collect::<Vec<_>>().join("\n")
}

/// Render the full declarative document.
pub fn render(health_check_timeout_secs: u64, log_level: &str, models: &[ModelConfigEntry], groups: &Groups) -> String {
    let mut out = String::new();
    out.push_str(&format!("healthCheckTimeout: {}\n", health_check_timeout_secs));
    out.push_str(&format!("logLevel: {}\n", log_level));
    out.push_str("models:\n");

    for entry in models {
        out.push_str(&format!("  {}:\n", yaml_quote(&entry.name)));
        out.push_str(&format!("    proxy: {}\n", yaml_quote(&entry.proxy)));
        out.push_str("    cmd: |\n");
        out.push_str(&indent_block(&entry.cmd.join(" \\\n  "), 6));
        out.push('\n');
        out.push_str("    env:\n");
        for kv in &entry.env {
            out.push_str(&format!("      - {}\n", yaml_quote(kv)));
        }
        out.push_str(&format!("    ttl: {}\n", entry.ttl));
    }

    out.push_str("groups:\n");
    out.push_str("  embedding_models:\n");
    out.push_str("    swap: false\n");
    out.push_str("    exclusive: false\n");
    out.push_str("    persistent: true\n");
    out.push_str("    members:\n");
    for name in &groups.embedding_models {
        out.push_str(&format!("      - {}\n", yaml_quote(name)));
    }
    out.push_str("  regular_models:\n");
    out.push_str("    swap: true\n");
    out.push_str("    exclusive: true\n");
    out.push_str("    members:\n");
    for name in &groups.regular_models {
        out.push_str(&format!("      - {}\n", yaml_quote(name)));
    }

    out
}

/// Write the config to `path` and verify it landed (§4.G, §5). On a
/// short-read mismatch, wait an additional 2 s before declaring success —
/// this defends against OS-level flush latency observed during repeated
/// restart cycles, not against a genuinely failed write.
pub async fn write_and_verify(path: &Path, content: &str) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("Failed to create config directory {:?}: {}", parent, e))?;
    }

    fs::write(path, content)
        .await
        .map_err(|e| format!("Failed to write config {:?}: {}", path, e))?;

    sleep(Duration::from_millis(1500)).await;

    let written_len = verify_len(path).await?;
    let minimum = (content.len() * 9) / 10;

    if written_len < minimum {
        println!(
            "[ConfigEmitter] Short read verifying {:?} ({} < {} expected), waiting for flush",
            path, written_len, minimum
        );
        sleep(Duration::from_secs(2)).await;
        let retried_len = verify_len(path).await?;
        if retried_len < minimum {
            return Err(format!(
                "Config write verification failed for {:?}: wrote {} bytes, read back {}",
                path,
                content.len(),
                retried_len
            ));
        }
    }

    // Callers that spawn the swap proxy off the back of this must still
    // observe a further quiescence window (§5); that wait lives in the
    // Swap Proxy Supervisor's start sequence, not here, since only it knows
    // whether it's about to spawn.
    Ok(())
}

async fn verify_len(path: &Path) -> Result<usize, String> {
    fs::read_to_string(path)
        .await
        .map(|s| s.len())
        .map_err(|e| format!("Failed to read back {:?}: {}", path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_groups_with_correct_flags() {
        let models = vec![ModelConfigEntry {
            name: "llama3.2:3b-q4_k_m".to_string(),
            proxy: "http://127.0.0.1:9999".to_string(),
            cmd: vec!["/bin/llama-server".to_string(), "-m".to_string(), "/models/x.gguf".to_string()],
            env: vec!["GGML_LOG_LEVEL=error".to_string()],
            ttl: 300,
        }];
        let groups = Groups {
            embedding_models: vec![],
            regular_models: vec!["llama3.2:3b-q4_k_m".to_string()],
        };

        let doc = render(120, "info", &models, &groups);
        assert!(doc.contains("swap: true"));
        assert!(doc.contains("exclusive: true"));
        assert!(doc.contains("persistent: true"));
        assert!(doc.contains("llama3.2:3b-q4_k_m"));
    }

    #[tokio::test]
    async fn write_and_verify_round_trips() {
        let dir = std::env::temp_dir().join(format!("clara-config-test-{}", uuid::Uuid::new_v4()));
        let path = dir.join("llama-swap-config.yaml");
        let content = "healthCheckTimeout: 120\nlogLevel: info\nmodels: {}\n";

        write_and_verify(&path, content).await.unwrap();
        let read_back = fs::read_to_string(&path).await.unwrap();
        assert_eq!(read_back, content);

        let _ = fs::remove_dir_all(&dir).await;
    }
}
