use std::sync::Arc;
use std::time::Duration;

use hearth_core::ServerId;
use tokio::sync::watch;

use crate::api::Backend;
use crate::poll::{PollConfig, PollSession, Tick};

/// One performance sample for a running server.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PerfSample {
    #[serde(alias = "cpuPercent")]
    pub cpu_percent: f64,
    #[serde(alias = "memoryBytes", alias = "memory")]
    pub memory_bytes: u64,
    #[serde(alias = "uptimeSeconds")]
    pub uptime_seconds: u64,
}

/// Spawns the performance sampling session for a running server.
///
/// Runs until cancelled (server stopped, navigation, teardown). Every
/// probe failure is soft: a panel without fresh metrics still renders,
/// so there is nothing terminal to surface here.
pub fn metrics_session(
    backend: Arc<dyn Backend>,
    server: ServerId,
    interval: Duration,
    tx: watch::Sender<Option<PerfSample>>,
) -> PollSession {
    PollSession::spawn(PollConfig::every(interval), move |_| {
        let backend = backend.clone();
        let server = server.clone();
        let tx = tx.clone();
        async move {
            let sample = backend.performance(&server).await?;
            let _ = tx.send(Some(sample));
            Ok(Tick::Continue)
        }
    })
}
