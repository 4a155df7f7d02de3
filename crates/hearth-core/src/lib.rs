use std::fmt;

/// Backend-assigned identifier of a managed game-server instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ServerId(pub String);

impl ServerId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for ServerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Authoritative lifecycle state as reported by `GET /servers/{id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Running,
    Stopped,
}

impl ServerStatus {
    pub fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }
}

/// User-triggered lifecycle action tracked to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Install,
    Start,
    Stop,
    Restart,
}

impl OperationKind {
    /// Path segment of the triggering `POST /servers/{id}/{action}` request.
    pub fn action_path(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
        }
    }

    /// The authoritative status that resolves the operation.
    ///
    /// Install has no status target: it resolves through file/progress
    /// probes instead (see the installation monitor).
    pub fn target_status(self) -> Option<ServerStatus> {
        match self {
            Self::Start | Self::Restart => Some(ServerStatus::Running),
            Self::Stop => Some(ServerStatus::Stopped),
            Self::Install => None,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.action_path())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationPhase {
    Idle,
    Running,
    Polling,
    Resolved,
    TimedOut,
}

/// Snapshot of the one tracked operation for a server.
///
/// Exactly one non-idle operation may exist per server at a time; the
/// tracker owns all mutation, consumers only read snapshots.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OperationState {
    pub kind: Option<OperationKind>,
    pub phase: OperationPhase,
    pub attempts: u32,
    pub started_at_unix_ms: u64,
}

impl OperationState {
    pub fn idle() -> Self {
        Self {
            kind: None,
            phase: OperationPhase::Idle,
            attempts: 0,
            started_at_unix_ms: 0,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.phase == OperationPhase::Idle
    }

    /// Terminal phases stay visible until the next operation starts.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.phase,
            OperationPhase::Resolved | OperationPhase::TimedOut
        )
    }
}

impl Default for OperationState {
    fn default() -> Self {
        Self::idle()
    }
}
