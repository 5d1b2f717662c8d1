// ABOUTME: Diagnostics accumulator for non-fatal warnings during a run.
// ABOUTME: Teardown problems are recorded and logged here instead of failing the run.

/// Collects non-fatal warnings raised while tearing down sessions and hops.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    /// Record a warning, auto-logging it via tracing.
    pub fn warn(&mut self, warning: Warning) {
        tracing::warn!(kind = ?warning.kind, "{}", warning.message);
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// A non-fatal warning.
#[derive(Debug, Clone)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    /// A hop could not be disconnected cleanly.
    pub fn hop_disconnect(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::HopDisconnect,
            message: message.into(),
        }
    }

    /// The session channel could not be closed cleanly.
    pub fn session_close(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::SessionClose,
            message: message.into(),
        }
    }

    /// Copying a remote output stream to the caller failed.
    pub fn stream_copy(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::StreamCopy,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    HopDisconnect,
    SessionClose,
    StreamCopy,
}
