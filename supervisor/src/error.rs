//! Error taxonomy shared across subsystems (§7).
//!
//! Internal helpers return `Result<T, SupervisorError>` so callers can match
//! on `kind()` instead of string-sniffing; the public/CLI boundary then
//! collapses this into `Result<T, String>` the way existing commands in this
//! codebase already do (`save_settings`, `auto_tool_search_for_prompt`).

use std::fmt;

/// Error kinds from §7's taxonomy. Each variant documents the recovery
/// policy a caller is expected to apply — most of these are *not* meant to
/// abort the caller, only the ones marked "critical path" are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network download, release-index fetch, health probe timeout.
    /// Policy: bounded retry, then degrade-but-continue.
    TransientIo,
    /// Missing accelerator asset, extraction failure.
    /// Policy: fall back to base-directory binaries; escalate only if those
    /// are also missing.
    BinaryProvisioning,
    /// Port-in-use, flash-attention-required during swap proxy startup.
    /// Policy: single automatic retry, then report with a remediation hint.
    RuntimeStartup,
    /// `starting` phase exceeded 120s.
    /// Policy: force-reset and restart.
    StuckState,
    /// Post-write config length verification mismatch.
    /// Policy: additional quiescence wait, then continue.
    ConfigConsistency,
    /// Unreadable or truncated GGUF header.
    /// Policy: skip extraction, fall back to filename heuristics.
    CorruptMetadata,
    /// No consent document, or consent withheld.
    /// Policy: restrict watchdog to the essential service.
    ConsentMissing,
    /// Binary validation, config write, or health verification failed on the
    /// critical start path with no remaining fallback.
    CriticalStartPath,
}

impl ErrorKind {
    /// Whether this kind represents a critical-start-path failure that must
    /// surface to the caller rather than be swallowed (§7 propagation rule).
    pub fn is_critical(&self) -> bool {
        matches!(self, ErrorKind::CriticalStartPath | ErrorKind::StuckState)
    }
}

/// A structured supervisor error: a kind plus a human-readable message and an
/// optional remediation hint (surfaced verbatim in CLI/IPC error payloads).
#[derive(Debug, Clone)]
pub struct SupervisorError {
    pub kind: ErrorKind,
    pub message: String,
    pub remediation: Option<String>,
}

impl SupervisorError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            remediation: None,
        }
    }

    pub fn with_remediation(mut self, hint: impl Into<String>) -> Self {
        self.remediation = Some(hint.into());
        self
    }
}

impl fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(hint) = &self.remediation {
            write!(f, " (hint: {})", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for SupervisorError {}

impl From<std::io::Error> for SupervisorError {
    fn from(e: std::io::Error) -> Self {
        SupervisorError::new(ErrorKind::TransientIo, e.to_string())
    }
}

impl From<SupervisorError> for String {
    fn from(e: SupervisorError) -> Self {
        e.to_string()
    }
}

/// A structured result with an optional diagnostics bundle, mirroring the
/// `{success, error, diagnostics?}` shape §7 mandates for the critical start
/// path (binary validation, config write, proxy spawn, health verification).
#[derive(Debug, Clone, serde::Serialize)]
pub struct OperationOutcome<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<serde_json::Value>,
}

impl<T> OperationOutcome<T> {
    pub fn ok(value: T) -> Self {
        Self { success: true, value: Some(value), error: None, diagnostics: None }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self { success: false, value: None, error: Some(error.into()), diagnostics: None }
    }

    pub fn with_diagnostics(mut self, diagnostics: serde_json::Value) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_start_path_is_critical() {
        assert!(ErrorKind::CriticalStartPath.is_critical());
        assert!(ErrorKind::StuckState.is_critical());
        assert!(!ErrorKind::TransientIo.is_critical());
        assert!(!ErrorKind::BinaryProvisioning.is_critical());
    }

    #[test]
    fn display_includes_remediation_hint() {
        let err = SupervisorError::new(ErrorKind::RuntimeStartup, "port in use")
            .with_remediation("free port 8091 and retry");
        let rendered = err.to_string();
        assert!(rendered.contains("port in use"));
        assert!(rendered.contains("free port 8091"));
    }
}
