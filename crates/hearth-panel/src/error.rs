use std::time::Duration;

/// Failure taxonomy of the tracking core.
///
/// `RequestRejected` is fatal and surfaced once, without polling.
/// `ProbeFailed` is transient: a failed poll tick is logged and retried
/// until the operation ceiling. `Timeout` is inconclusive, not a proven
/// failure of the underlying operation (the process may converge later).
#[derive(Debug, thiserror::Error)]
pub enum PanelError {
    #[error("backend rejected {action}: HTTP {status}: {message}")]
    RequestRejected {
        action: String,
        status: u16,
        message: String,
    },

    #[error("probe failed: {0}")]
    ProbeFailed(String),

    #[error("installation failed: {0}")]
    InstallFailed(String),

    #[error("timed out after {elapsed:?} without reaching the target state")]
    Timeout { elapsed: Duration },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl PanelError {
    /// Whether polling may continue past this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ProbeFailed(_) | Self::Transport(_) | Self::Decode(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_is_fatal_probe_failure_is_not() {
        let rejected = PanelError::RequestRejected {
            action: "start".to_string(),
            status: 409,
            message: "already running".to_string(),
        };
        assert!(!rejected.is_transient());
        assert!(PanelError::ProbeFailed("connection reset".to_string()).is_transient());
    }

    #[test]
    fn messages_are_renderable() {
        let e = PanelError::Timeout {
            elapsed: Duration::from_secs(150),
        };
        assert!(e.to_string().contains("150s"));
    }
}
