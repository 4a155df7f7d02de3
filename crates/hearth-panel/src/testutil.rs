//! Scripted backend for exercising trackers without a live REST API.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use hearth_core::{OperationKind, ServerId, ServerStatus};

use crate::api::{Backend, ServerSummary};
use crate::error::PanelError;
use crate::metrics::PerfSample;
use crate::progress::RawProgress;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Probe answers are popped from per-endpoint scripts; when a script
/// runs dry the fallback answer repeats forever.
pub(crate) struct ScriptedBackend {
    statuses: Mutex<VecDeque<Result<ServerStatus, String>>>,
    fallback_status: Mutex<ServerStatus>,
    reject_trigger: Mutex<Option<(u16, String)>>,
    trigger_delay: Mutex<Option<Duration>>,
    triggered: Mutex<Vec<OperationKind>>,
    pub status_calls: AtomicU32,

    files: Mutex<VecDeque<bool>>,
    fallback_files: Mutex<bool>,
    pub files_calls: AtomicU32,

    install_progress: Mutex<VecDeque<RawProgress>>,
    fallback_progress: Mutex<RawProgress>,
    pub progress_calls: AtomicU32,

    output: Mutex<Vec<serde_json::Value>>,
    console_reply: Mutex<Vec<serde_json::Value>>,
    pub output_calls: AtomicU32,
    pub perf_calls: AtomicU32,
}

impl ScriptedBackend {
    fn new(status: ServerStatus) -> Self {
        Self {
            statuses: Mutex::new(VecDeque::new()),
            fallback_status: Mutex::new(status),
            reject_trigger: Mutex::new(None),
            trigger_delay: Mutex::new(None),
            triggered: Mutex::new(Vec::new()),
            status_calls: AtomicU32::new(0),
            files: Mutex::new(VecDeque::new()),
            fallback_files: Mutex::new(false),
            files_calls: AtomicU32::new(0),
            install_progress: Mutex::new(VecDeque::new()),
            fallback_progress: Mutex::new(RawProgress::default()),
            progress_calls: AtomicU32::new(0),
            output: Mutex::new(Vec::new()),
            console_reply: Mutex::new(Vec::new()),
            output_calls: AtomicU32::new(0),
            perf_calls: AtomicU32::new(0),
        }
    }

    pub fn stopped() -> Self {
        Self::new(ServerStatus::Stopped)
    }

    pub fn running() -> Self {
        Self::new(ServerStatus::Running)
    }

    pub fn script_statuses(
        &self,
        script: impl IntoIterator<Item = Result<ServerStatus, String>>,
    ) {
        lock(&self.statuses).extend(script);
    }

    pub fn reject_next_trigger(&self, status: u16, message: &str) {
        *lock(&self.reject_trigger) = Some((status, message.to_string()));
    }

    /// Makes every trigger request hang for `delay` before answering.
    pub fn set_trigger_delay(&self, delay: Duration) {
        *lock(&self.trigger_delay) = Some(delay);
    }

    pub fn triggered(&self) -> Vec<OperationKind> {
        lock(&self.triggered).clone()
    }

    pub fn script_files(&self, script: impl IntoIterator<Item = bool>) {
        lock(&self.files).extend(script);
    }

    pub fn set_fallback_files(&self, present: bool) {
        *lock(&self.fallback_files) = present;
    }

    pub fn script_progress(&self, script: impl IntoIterator<Item = RawProgress>) {
        lock(&self.install_progress).extend(script);
    }

    pub fn set_fallback_progress(&self, raw: RawProgress) {
        *lock(&self.fallback_progress) = raw;
    }

    pub fn set_output(&self, values: Vec<serde_json::Value>) {
        *lock(&self.output) = values;
    }

    pub fn set_console_reply(&self, values: Vec<serde_json::Value>) {
        *lock(&self.console_reply) = values;
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn server_summary(&self, _id: &ServerId) -> Result<ServerSummary, PanelError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let next = lock(&self.statuses).pop_front();
        match next {
            Some(Ok(status)) => Ok(ServerSummary { status, name: None }),
            Some(Err(msg)) => Err(PanelError::ProbeFailed(msg)),
            None => Ok(ServerSummary {
                status: *lock(&self.fallback_status),
                name: None,
            }),
        }
    }

    async fn trigger(&self, _id: &ServerId, kind: OperationKind) -> Result<(), PanelError> {
        let delay = *lock(&self.trigger_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some((status, message)) = lock(&self.reject_trigger).take() {
            return Err(PanelError::RequestRejected {
                action: kind.to_string(),
                status,
                message,
            });
        }
        lock(&self.triggered).push(kind);
        Ok(())
    }

    async fn files_present(&self, _id: &ServerId) -> Result<bool, PanelError> {
        self.files_calls.fetch_add(1, Ordering::SeqCst);
        let next = lock(&self.files).pop_front();
        Ok(next.unwrap_or(*lock(&self.fallback_files)))
    }

    async fn download_progress(&self, id: &ServerId) -> Result<RawProgress, PanelError> {
        self.installation_progress(id).await
    }

    async fn installation_progress(&self, _id: &ServerId) -> Result<RawProgress, PanelError> {
        self.progress_calls.fetch_add(1, Ordering::SeqCst);
        let next = lock(&self.install_progress).pop_front();
        Ok(next.unwrap_or_else(|| lock(&self.fallback_progress).clone()))
    }

    async fn realtime_output(&self, _id: &ServerId) -> Result<Vec<serde_json::Value>, PanelError> {
        self.output_calls.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.output).clone())
    }

    async fn send_console(
        &self,
        _id: &ServerId,
        _command: &str,
    ) -> Result<Vec<serde_json::Value>, PanelError> {
        Ok(lock(&self.console_reply).clone())
    }

    async fn performance(&self, _id: &ServerId) -> Result<PerfSample, PanelError> {
        let n = self.perf_calls.fetch_add(1, Ordering::SeqCst);
        Ok(PerfSample {
            cpu_percent: 10.0,
            memory_bytes: 256 * 1024 * 1024,
            uptime_seconds: u64::from(n),
        })
    }
}
