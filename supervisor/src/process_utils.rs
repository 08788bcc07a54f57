//! Process utilities for cross-platform process spawning and lifecycle control.
//!
//! On Windows, console applications spawn with a visible command prompt
//! window by default; this module hides those windows the way the original
//! desktop app hid them for its CLI subprocesses. It also collects the
//! vendor-specific "kill everything bound to a port" and "is this PID still
//! alive" primitives the Swap Proxy Supervisor and Watchdog both need
//! (§4.H, §4.I).

use std::time::Duration;

/// Windows creation flag to prevent console window creation.
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Extension trait to hide console windows when spawning processes on Windows.
/// On non-Windows platforms, this is a no-op.
pub trait HideConsoleWindow {
    fn hide_console_window(&mut self) -> &mut Self;
}

#[cfg(windows)]
impl HideConsoleWindow for std::process::Command {
    fn hide_console_window(&mut self) -> &mut Self {
        use std::os::windows::process::CommandExt;
        self.creation_flags(CREATE_NO_WINDOW)
    }
}

#[cfg(windows)]
impl HideConsoleWindow for tokio::process::Command {
    fn hide_console_window(&mut self) -> &mut Self {
        use std::os::windows::process::CommandExt;
        self.creation_flags(CREATE_NO_WINDOW)
    }
}

#[cfg(not(windows))]
impl HideConsoleWindow for std::process::Command {
    fn hide_console_window(&mut self) -> &mut Self {
        self
    }
}

#[cfg(not(windows))]
impl HideConsoleWindow for tokio::process::Command {
    fn hide_console_window(&mut self) -> &mut Self {
        self
    }
}

/// Run a short-lived child process with a hard deadline, returning its stdout
/// (lossy UTF-8) on a zero exit code. Used by the Platform Probe (3s timeout)
/// and by release-asset download helper commands. Never panics; I/O errors
/// and timeouts both collapse to `None` so callers can fall through to the
/// next probe in a precedence chain.
pub async fn run_with_timeout(
    mut cmd: tokio::process::Command,
    timeout: Duration,
) -> Option<String> {
    cmd.hide_console_window();
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) if output.status.success() => {
            Some(String::from_utf8_lossy(&output.stdout).to_string())
        }
        Ok(Ok(_)) | Ok(Err(_)) | Err(_) => None,
    }
}

/// Check whether a process is still alive via a zero-signal probe (unix) or
/// a process-list query (windows). Never errors: an inconclusive check is
/// reported as "not alive" so the monitor defaults to treating the child as
/// gone rather than leaking a supervision slot.
#[cfg(unix)]
pub fn pid_is_alive(pid: u32) -> bool {
    // SAFETY: signal 0 performs no action beyond an existence/permission check.
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(windows)]
pub fn pid_is_alive(pid: u32) -> bool {
    let output = std::process::Command::new("tasklist")
        .args(["/FI", &format!("PID eq {}", pid), "/NH"])
        .hide_console_window()
        .output();
    match output {
        Ok(out) => String::from_utf8_lossy(&out.stdout).contains(&pid.to_string()),
        Err(_) => false,
    }
}

/// Kill every process bound to `port` on the loopback interface. Used by the
/// Swap Proxy Supervisor's EADDRINUSE retry rule (§4.H rule 2). Best-effort:
/// logs and continues on any step failure rather than propagating, matching
/// the "background optional work" error policy of §7.
pub async fn kill_processes_on_port(port: u16) {
    #[cfg(windows)]
    {
        kill_processes_on_port_windows(port).await;
    }
    #[cfg(not(windows))]
    {
        kill_processes_on_port_unix(port).await;
    }
}

#[cfg(windows)]
async fn kill_processes_on_port_windows(port: u16) {
    let mut netstat = tokio::process::Command::new("netstat");
    netstat.args(["-ano"]);
    let Some(output) = run_with_timeout(netstat, Duration::from_secs(5)).await else {
        println!("[ProcessUtils] netstat failed while hunting for port {} owners", port);
        return;
    };

    let needle = format!(":{} ", port);
    let mut pids = std::collections::HashSet::new();
    for line in output.lines() {
        if line.contains(&needle) {
            if let Some(pid) = line.split_whitespace().last() {
                if let Ok(pid) = pid.parse::<u32>() {
                    pids.insert(pid);
                }
            }
        }
    }

    for pid in pids {
        println!("[ProcessUtils] Killing PID {} bound to port {}", pid, port);
        let mut taskkill = tokio::process::Command::new("taskkill");
        taskkill.args(["/PID", &pid.to_string(), "/F", "/T"]);
        let _ = run_with_timeout(taskkill, Duration::from_secs(5)).await;
    }
}

#[cfg(not(windows))]
async fn kill_processes_on_port_unix(port: u16) {
    let mut lsof = tokio::process::Command::new("lsof");
    lsof.args(["-t", &format!("-i:{}", port)]);
    let Some(output) = run_with_timeout(lsof, Duration::from_secs(5)).await else {
        println!("[ProcessUtils] lsof failed while hunting for port {} owners", port);
        return;
    };

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(pid) = line.parse::<u32>() else { continue };
        println!("[ProcessUtils] Killing PID {} bound to port {}", pid, port);
        let mut kill = tokio::process::Command::new("kill");
        kill.args(["-9", &pid.to_string()]);
        let _ = run_with_timeout(kill, Duration::from_secs(5)).await;
    }
}

/// Force-kill a child process, escalating to the platform's tree-kill utility
/// if the direct kill fails (§4.H shutdown rule: "on windows, if native
/// force-kill fails, invoke the platform's tree-kill utility as a last
/// resort").
pub async fn force_kill_tree(child: &mut tokio::process::Child) {
    if let Err(e) = child.start_kill() {
        println!("[ProcessUtils] Native kill failed: {e}, falling back to tree-kill");
        if let Some(pid) = child.id() {
            tree_kill(pid).await;
        }
        return;
    }
    let _ = child.wait().await;
}

#[cfg(windows)]
async fn tree_kill(pid: u32) {
    let mut cmd = tokio::process::Command::new("taskkill");
    cmd.args(["/PID", &pid.to_string(), "/F", "/T"]);
    let _ = run_with_timeout(cmd, Duration::from_secs(5)).await;
}

#[cfg(not(windows))]
async fn tree_kill(pid: u32) {
    let mut cmd = tokio::process::Command::new("pkill");
    cmd.args(["-9", "-P", &pid.to_string()]);
    let _ = run_with_timeout(cmd, Duration::from_secs(5)).await;
    // SAFETY: SIGKILL on a PID whose lifecycle we own.
    unsafe {
        libc::kill(pid as i32, libc::SIGKILL);
    }
}

/// Mark a file executable on non-windows systems (chmod +x). Windows has no
/// equivalent permission bit; extracted `.exe` files are runnable as-is.
#[cfg(unix)]
pub fn mark_executable(path: &std::path::Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o111);
    std::fs::set_permissions(path, perms)
}

#[cfg(windows)]
pub fn mark_executable(_path: &std::path::Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert!(pid_is_alive(std::process::id()));
    }

    #[test]
    fn bogus_pid_is_not_alive() {
        // A PID this large is never assigned on any supported platform.
        assert!(!pid_is_alive(u32::MAX - 1));
    }
}
