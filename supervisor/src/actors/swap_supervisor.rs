//! Swap Proxy Supervisor (component H).
//!
//! Owns the swap proxy child process end to end: config generation, spawn,
//! health verification, the two automatic start-retry rules, the 30 s
//! process-monitor poll, and graceful/forced shutdown. Modeled as an explicit
//! tagged state machine per the "ad-hoc feature flags" design note (§9) —
//! `handleFlashAttentionRequired`/`needsPortRetry` become two distinct
//! transitions out of `failed-during-start` rather than booleans threaded
//! through every call site.

use crate::app_state::SettingsState;
use crate::config_emitter::{self, Groups, ModelConfigEntry};
use crate::paths;
use crate::planner::{self, LaunchPlan};
use crate::process_utils::{force_kill_tree, kill_processes_on_port, pid_is_alive, HideConsoleWindow};
use crate::protocol::{
    BinarySet, ModelFile, ModelMetadata, PlatformInfo, SupervisorEvent, SupervisorMsg, SupervisorPhase,
    SupervisorStatus, STARTUP_PHASES,
};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot};

const STARTING_JOIN_TIMEOUT: Duration = Duration::from_secs(30);
const STUCK_THRESHOLD: Duration = Duration::from_secs(120);
const HEALTH_WAIT: Duration = Duration::from_secs(10);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(8);
const PORT_RETRY_WAIT: Duration = Duration::from_secs(5);
const CONFIG_QUIESCENCE: Duration = Duration::from_secs(2);

/// One resolved model ready to be planned and emitted into the config.
pub struct PlannedModel {
    pub file: ModelFile,
    pub metadata: ModelMetadata,
    pub mmproj_path: Option<std::path::PathBuf>,
}

pub struct SwapSupervisorActor {
    phase: SupervisorPhase,
    started_at: Option<Instant>,
    phase_cursor: usize,
    child: Option<tokio::process::Child>,
    pid: Option<u32>,
    port: u16,
    flash_attention_retried: bool,
    port_retry_attempted: bool,
    start_waiters: Vec<oneshot::Sender<Result<SupervisorStatus, String>>>,
    events_tx: broadcast::Sender<SupervisorEvent>,
    http_client: reqwest::Client,
    settings: SettingsState,
    platform: PlatformInfo,
    binaries: BinarySet,
    models: Vec<PlannedModel>,
    cpu_cores: u32,
}

impl SwapSupervisorActor {
    pub fn new(
        events_tx: broadcast::Sender<SupervisorEvent>,
        http_client: reqwest::Client,
        settings: SettingsState,
        platform: PlatformInfo,
        binaries: BinarySet,
        port: u16,
        cpu_cores: u32,
    ) -> Self {
        Self {
            phase: SupervisorPhase::Idle,
            started_at: None,
            phase_cursor: 0,
            child: None,
            pid: None,
            port,
            flash_attention_retried: false,
            port_retry_attempted: false,
            start_waiters: Vec::new(),
            events_tx,
            http_client,
            settings,
            platform,
            binaries,
            models: Vec::new(),
            cpu_cores,
        }
    }

    /// Replace the planned model set used for config generation. Called by
    /// the CLI's `scan` path / `forceReconfigure()` before a (re)start.
    pub fn set_models(&mut self, models: Vec<PlannedModel>) {
        self.models = models;
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<SupervisorMsg>) {
        let mut stuck_check = tokio::time::interval(Duration::from_secs(10));
        let mut process_monitor = tokio::time::interval(Duration::from_secs(30));

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(msg) => self.handle_msg(msg).await,
                        None => break,
                    }
                }
                _ = stuck_check.tick() => self.check_stuck().await,
                _ = process_monitor.tick() => self.poll_process().await,
            }
        }

        self.shutdown().await;
    }

    async fn handle_msg(&mut self, msg: SupervisorMsg) {
        match msg {
            SupervisorMsg::Start { skip_config_generation, reply } => {
                self.handle_start(skip_config_generation, reply).await;
            }
            SupervisorMsg::Stop { reply } => {
                self.shutdown().await;
                let _ = reply.send(Ok(()));
            }
            SupervisorMsg::Restart { skip_config_regeneration, reply } => {
                self.shutdown().await;
                self.handle_start(skip_config_regeneration, reply).await;
            }
            SupervisorMsg::GetStatus { with_health_check, reply } => {
                let status = if with_health_check { self.status_with_health_check().await } else { self.status() };
                let _ = reply.send(status);
            }
            SupervisorMsg::ForceReconfigure { reply } => {
                let result = self.generate_and_verify_config().await;
                let _ = reply.send(result);
            }
        }
    }

    fn status(&self) -> SupervisorStatus {
        SupervisorStatus {
            is_running: self.phase == SupervisorPhase::Running,
            is_starting: self.phase == SupervisorPhase::Starting,
            starting_duration_ms: self.started_at.map(|t| t.elapsed().as_millis() as u64),
            is_stuck: self.phase == SupervisorPhase::Starting
                && self.started_at.is_some_and(|t| t.elapsed() > STUCK_THRESHOLD),
            current_startup_phase: STARTUP_PHASES.get(self.phase_cursor).map(|s| s.to_string()),
            port: if self.phase == SupervisorPhase::Running { Some(self.port) } else { None },
            pid: self.pid,
            api_url: if self.phase == SupervisorPhase::Running {
                Some(format!("http://127.0.0.1:{}", self.port))
            } else {
                None
            },
            current_backend_name: Some(self.platform.accelerator.to_string()),
        }
    }

    async fn status_with_health_check(&mut self) -> SupervisorStatus {
        if self.phase == SupervisorPhase::Running && !self.probe_health().await {
            println!("[SwapSupervisor] Health check failed for a running proxy");
            let _ = self.events_tx.send(SupervisorEvent::HealthFailed("health probe failed".to_string()));
        }
        self.status()
    }

    async fn handle_start(&mut self, skip_config_generation: bool, reply: oneshot::Sender<Result<SupervisorStatus, String>>) {
        match self.phase {
            SupervisorPhase::Running => {
                let _ = reply.send(Ok(self.status()));
            }
            SupervisorPhase::Starting => {
                // Concurrent start requests join the in-flight attempt rather
                // than re-triggering one (§4.H, §5 "at most one start attempt").
                self.start_waiters.push(reply);
            }
            _ => {
                self.started_at = Some(Instant::now());
                self.phase = SupervisorPhase::Starting;
                self.phase_cursor = 0;
                // Each start attempt gets its own shot at both automatic
                // retry rules (§4.H "each attempted at most once per
                // start") — a prior attempt's exhausted retries must not
                // carry over and permanently disable these for later starts.
                self.flash_attention_retried = false;
                self.port_retry_attempted = false;
                self.start_waiters.push(reply);
                let result = self.run_start_sequence(skip_config_generation).await;
                self.finish_start(result);
            }
        }
    }

    fn finish_start(&mut self, result: Result<SupervisorStatus, String>) {
        match &result {
            Ok(_) => {
                self.phase = SupervisorPhase::Running;
                let _ = self.events_tx.send(SupervisorEvent::Ready {
                    port: self.port,
                    pid: self.pid.unwrap_or_default(),
                });
            }
            Err(e) => {
                self.phase = SupervisorPhase::Failed;
                println!("[SwapSupervisor] Start failed: {}", e);
            }
        }
        for waiter in self.start_waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }

    fn advance_phase(&mut self, label: &'static str) {
        if let Some(idx) = STARTUP_PHASES.iter().position(|p| *p == label) {
            self.phase_cursor = idx;
        }
        println!("[SwapSupervisor] Phase: {}", label);
        let _ = self.events_tx.send(SupervisorEvent::PhaseChanged(label));
    }

    async fn run_start_sequence(&mut self, skip_config_generation: bool) -> Result<SupervisorStatus, String> {
        self.advance_phase("initializing");

        self.advance_phase("checking GPU/binaries");
        if !self.binaries.swap_path.is_file() || !self.binaries.server_path.is_file() {
            return Err("required binaries are missing".to_string());
        }

        self.advance_phase("cleaning prior processes");
        kill_processes_on_port(self.port).await;

        if cfg!(target_os = "macos") {
            self.advance_phase("macOS security check");
        }

        self.advance_phase("verifying binaries");

        if !skip_config_generation {
            self.advance_phase("generating config");
            self.generate_config().await?;
            self.advance_phase("verifying config");
            tokio::time::sleep(CONFIG_QUIESCENCE).await;
        }

        self.advance_phase("checking port");

        self.advance_phase("launching");
        self.spawn_child().await?;

        self.advance_phase("verifying health");
        self.verify_health_with_retries().await?;

        self.advance_phase("ready");
        Ok(self.status())
    }

    async fn generate_and_verify_config(&self) -> Result<(), String> {
        self.generate_config().await?;
        tokio::time::sleep(CONFIG_QUIESCENCE).await;
        Ok(())
    }

    async fn generate_config(&self) -> Result<(), String> {
        let bundle = self.settings.bundle.read().await;
        let mut entries = Vec::new();
        let mut embedding_names = Vec::new();
        let mut regular_names = Vec::new();

        for planned in &self.models {
            let effective = bundle.effective_performance(&planned.file.display_name);
            let plan: LaunchPlan = planner::plan(
                &planned.file,
                &planned.metadata,
                &self.platform,
                &effective,
                self.cpu_cores,
                planned.mmproj_path.clone(),
            );
            let cmd = planner::build_command_line(
                &self.binaries.server_path.to_string_lossy(),
                &planned.file.absolute_path.to_string_lossy(),
                &plan,
            );

            let is_embedding = planned.file.classification.is_embedding();
            if is_embedding {
                embedding_names.push(planned.file.display_name.clone());
            } else {
                regular_names.push(planned.file.display_name.clone());
            }

            entries.push(ModelConfigEntry {
                name: planned.file.display_name.clone(),
                proxy: format!("http://127.0.0.1:{}", plan.port),
                cmd,
                env: vec!["GGML_LOG_LEVEL=error".to_string()],
                ttl: if is_embedding { 0 } else { 300 },
            });
        }

        let groups = Groups { embedding_models: embedding_names, regular_models: regular_names };
        let doc = config_emitter::render(120, "info", &entries, &groups);
        config_emitter::write_and_verify(&paths::swap_config_path(), &doc).await
    }

    /// Spawn the swap proxy, applying each of the two §4.H retry rules at
    /// most once. A `for` loop over the fixed attempt budget (one initial
    /// attempt + at most two retries) avoids modeling this as recursion.
    async fn spawn_child(&mut self) -> Result<(), String> {
        for _ in 0..3 {
            let mut cmd = tokio::process::Command::new(&self.binaries.swap_path);
            cmd.arg("-config")
                .arg(paths::swap_config_path())
                .arg("-listen")
                .arg(format!("127.0.0.1:{}", self.port))
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::piped());
            cmd.hide_console_window();

            let mut child = cmd.spawn().map_err(|e| format!("Failed to spawn swap proxy: {}", e))?;
            self.pid = child.id();

            let stdout = child.stdout.take();
            let stderr = child.stderr.take();
            self.child = Some(child);

            if let Some(stdout) = stdout {
                tokio::spawn(stream_progress(stdout));
            }

            let needs_retry = if let Some(stderr) = stderr { watch_stderr_for_retry_signature(stderr).await } else { None };

            match needs_retry {
                Some(RetryReason::FlashAttention) if !self.flash_attention_retried => {
                    self.flash_attention_retried = true;
                    println!("[SwapSupervisor] flash_attn required, forcing it on and regenerating config");
                    {
                        let mut bundle = self.settings.bundle.write().await;
                        bundle.performance.flash_attention = true;
                        let _ = bundle.save_performance().await;
                    }
                    self.force_kill_child().await;
                    self.generate_config().await?;
                    tokio::time::sleep(CONFIG_QUIESCENCE).await;
                    continue;
                }
                Some(RetryReason::PortInUse) if !self.port_retry_attempted => {
                    self.port_retry_attempted = true;
                    println!("[SwapSupervisor] port {} in use, clearing owners and retrying", self.port);
                    self.force_kill_child().await;
                    kill_processes_on_port(self.port).await;
                    tokio::time::sleep(PORT_RETRY_WAIT).await;
                    continue;
                }
                _ => return Ok(()),
            }
        }
        Ok(())
    }

    async fn verify_health_with_retries(&mut self) -> Result<(), String> {
        let url = format!("http://127.0.0.1:{}/v1/models", self.port);
        let deadline = Instant::now() + HEALTH_WAIT;
        loop {
            if let Ok(resp) = self.http_client.get(&url).send().await {
                if resp.status().is_success() {
                    let _ = self.events_tx.send(SupervisorEvent::HealthOk);
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                let msg = "swap proxy did not become healthy within 10s".to_string();
                let _ = self.events_tx.send(SupervisorEvent::HealthFailed(msg.clone()));
                return Err(msg);
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    async fn probe_health(&self) -> bool {
        let url = format!("http://127.0.0.1:{}/v1/models", self.port);
        matches!(self.http_client.get(&url).send().await, Ok(resp) if resp.status().is_success())
    }

    async fn force_kill_child(&mut self) {
        if let Some(mut child) = self.child.take() {
            force_kill_tree(&mut child).await;
        }
        self.pid = None;
    }

    async fn check_stuck(&mut self) {
        if self.phase != SupervisorPhase::Starting {
            return;
        }
        let Some(started) = self.started_at else { return };
        if started.elapsed() <= STUCK_THRESHOLD {
            return;
        }

        println!("[SwapSupervisor] starting phase stuck past {:?}, forcing reset", STUCK_THRESHOLD);
        self.force_kill_child().await;
        kill_processes_on_port(self.port).await;
        self.phase = SupervisorPhase::Idle;
        self.flash_attention_retried = false;
        self.port_retry_attempted = false;

        let result = self.run_start_sequence(false).await;
        self.finish_start(result);
    }

    async fn poll_process(&mut self) {
        if self.phase != SupervisorPhase::Running {
            return;
        }
        let Some(pid) = self.pid else { return };
        if !pid_is_alive(pid) {
            println!("[SwapSupervisor] proxy process {} is gone, returning to idle", pid);
            self.child = None;
            self.pid = None;
            self.phase = SupervisorPhase::Idle;
            let _ = self.events_tx.send(SupervisorEvent::Stopped);
        } else if !self.probe_health().await {
            println!("[SwapSupervisor] soft health probe failed for pid {} (logged only)", pid);
        }
    }

    async fn shutdown(&mut self) {
        if self.phase == SupervisorPhase::Idle && self.child.is_none() {
            return;
        }
        self.phase = SupervisorPhase::Stopping;

        if let Some(mut child) = self.child.take() {
            if let Some(pid) = child.id() {
                #[cfg(unix)]
                // SAFETY: SIGTERM on a PID this actor owns exclusively.
                unsafe {
                    libc::kill(pid as i32, libc::SIGTERM);
                }
                #[cfg(windows)]
                let _ = pid;
            }

            match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(_) => {}
                Err(_) => force_kill_tree(&mut child).await,
            }
        }

        self.pid = None;
        self.phase = SupervisorPhase::Idle;
        self.flash_attention_retried = false;
        self.port_retry_attempted = false;
        let _ = self.events_tx.send(SupervisorEvent::Stopped);
    }
}

enum RetryReason {
    FlashAttention,
    PortInUse,
}

/// Watch stderr for the two retry signatures (§4.H rules 1/2) without
/// blocking the startup sequence on a process that runs fine and simply
/// keeps its stderr open: the scan itself runs in a background task and this
/// function only waits up to a short window for it to report a match,
/// continuing to drain the pipe afterwards so the child never blocks on a
/// full stderr buffer.
async fn watch_stderr_for_retry_signature(stderr: tokio::process::ChildStderr) -> Option<RetryReason> {
    let (tx, mut rx) = tokio::sync::mpsc::channel(1);
    tokio::spawn(classify_stderr(stderr, tx));

    tokio::select! {
        reason = rx.recv() => reason,
        _ = tokio::time::sleep(Duration::from_secs(5)) => None,
    }
}

async fn classify_stderr(stderr: tokio::process::ChildStderr, tx: mpsc::Sender<RetryReason>) {
    use tokio::io::{AsyncBufReadExt, BufReader};
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.contains("V cache quantization requires flash_attn") || line.contains("failed to create context with model") {
            let _ = tx.send(RetryReason::FlashAttention).await;
        } else if line.contains("address already in use") || line.contains("bind: address in use") {
            let _ = tx.send(RetryReason::PortInUse).await;
        }
    }
}

/// Table P-1: parse stdout progress lines into log-only events. Never blocks
/// startup on what it finds (§9 "do not block startup on parse results").
async fn stream_progress(stdout: tokio::process::ChildStdout) {
    use tokio::io::{AsyncBufReadExt, BufReader};
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(event) = parse_progress_line(&line) {
            println!("[SwapSupervisor] progress: {}", event);
        }
    }
}

fn parse_progress_line(line: &str) -> Option<String> {
    if let Some(idx) = line.find("progress = ") {
        return Some(format!("context-loading {}", &line[idx + "progress = ".len()..]));
    }
    if line.contains("kv cache rm") {
        return Some("memory-optimization".to_string());
    }
    if let Some(idx) = line.find("Chat format:") {
        return Some(format!("initialization {}", &line[idx..]));
    }
    if line.contains("loading model") || line.contains("warming up") {
        return Some("model-loading".to_string());
    }
    if line.contains("launch_slot_") && line.contains("processing task") {
        return Some("task-start".to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_context_progress_line() {
        let line = "prompt processing progress hint progress = 0.42";
        assert_eq!(parse_progress_line(line).unwrap(), "context-loading 0.42");
    }

    #[test]
    fn parses_chat_format_line() {
        let line = "ggml: Chat format: chatml";
        assert_eq!(parse_progress_line(line).unwrap(), "initialization Chat format: chatml");
    }

    #[test]
    fn unrelated_lines_produce_no_event() {
        assert!(parse_progress_line("hello world").is_none());
    }

    #[test]
    fn stuck_threshold_is_two_minutes() {
        assert_eq!(STUCK_THRESHOLD, Duration::from_secs(120));
    }
}
