use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use hearth_core::{OperationKind, OperationPhase, OperationState, ServerId};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::api::Backend;
use crate::config::PanelConfig;
use crate::error::PanelError;
use crate::operation::now_unix_ms;
use crate::poll::{PollConfig, PollEnd, PollSession, Tick};
use crate::progress::{ProgressSnapshot, ProgressStatus, normalize};

#[derive(Debug, Clone, Copy)]
pub struct InstallConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl From<&PanelConfig> for InstallConfig {
    fn from(cfg: &PanelConfig) -> Self {
        Self {
            interval: cfg.install_interval,
            max_attempts: cfg.install_max_attempts,
        }
    }
}

// Epoch and token move together under one lock, same contract as the
// operation tracker's slot.
struct Slot {
    epoch: u64,
    token: Option<CancellationToken>,
}

struct Inner {
    server: ServerId,
    backend: Arc<dyn Backend>,
    cfg: InstallConfig,
    state_tx: watch::Sender<OperationState>,
    progress_tx: watch::Sender<ProgressSnapshot>,
    slot: Mutex<Slot>,
}

/// Tracks an installation, which has no single authoritative "done"
/// signal: the file-existence probe and the progress endpoint are
/// polled together, and the first one to affirm completion wins. A
/// progress payload with status `error` is terminal failure regardless
/// of file state. When the attempt ceiling is hit, one last file check
/// runs before timeout is declared, because the backend may have
/// finished just after the final progress probe.
#[derive(Clone)]
pub struct InstallationMonitor {
    inner: Arc<Inner>,
}

impl InstallationMonitor {
    pub fn new(server: ServerId, backend: Arc<dyn Backend>, cfg: InstallConfig) -> Self {
        let (state_tx, _) = watch::channel(OperationState::idle());
        let (progress_tx, _) = watch::channel(ProgressSnapshot::idle());
        Self {
            inner: Arc::new(Inner {
                server,
                backend,
                cfg,
                state_tx,
                progress_tx,
                slot: Mutex::new(Slot {
                    epoch: 0,
                    token: None,
                }),
            }),
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<OperationState> {
        self.inner.state_tx.subscribe()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<ProgressSnapshot> {
        self.inner.progress_tx.subscribe()
    }

    pub fn state(&self) -> OperationState {
        self.inner.state_tx.borrow().clone()
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.inner.progress_tx.borrow().clone()
    }

    pub fn cancel(&self) {
        self.preempt();
        let _ = self.inner.state_tx.send(OperationState::idle());
    }

    fn preempt(&self) -> u64 {
        let mut slot = lock(&self.inner.slot);
        if let Some(token) = slot.token.take() {
            token.cancel();
        }
        slot.epoch += 1;
        slot.epoch
    }

    /// Issues the install request and begins the paired probing.
    pub async fn start(&self) -> Result<(), PanelError> {
        let inner = &self.inner;
        // Claim the slot before the trigger await so a preemption that
        // lands mid-request finds this token and stops a duplicate
        // poller from being spawned.
        let (epoch, token) = {
            let mut slot = lock(&inner.slot);
            if let Some(old) = slot.token.take() {
                old.cancel();
            }
            slot.epoch += 1;
            let token = CancellationToken::new();
            slot.token = Some(token.clone());
            (slot.epoch, token)
        };
        let _ = inner.state_tx.send(OperationState {
            kind: Some(OperationKind::Install),
            phase: OperationPhase::Running,
            attempts: 0,
            started_at_unix_ms: now_unix_ms(),
        });
        let _ = inner.progress_tx.send(ProgressSnapshot::idle());

        if let Err(err) = inner
            .backend
            .trigger(&inner.server, OperationKind::Install)
            .await
        {
            tracing::warn!(server = %inner.server, error = %err, "install rejected");
            let mut slot = lock(&inner.slot);
            if slot.epoch == epoch {
                slot.token = None;
                let _ = inner.state_tx.send(OperationState::idle());
            }
            return Err(err);
        }
        if token.is_cancelled() {
            // Preempted while the request was in flight.
            return Ok(());
        }

        let poll_cfg = PollConfig::every(inner.cfg.interval).with_max_attempts(inner.cfg.max_attempts);
        let started = tokio::time::Instant::now();

        let session = {
            let monitor = self.clone();
            PollSession::spawn_with_token(token.clone(), poll_cfg, move |attempt| {
                let monitor = monitor.clone();
                async move {
                    let inner = &monitor.inner;
                    {
                        let slot = lock(&inner.slot);
                        if slot.epoch != epoch {
                            return Ok(Tick::Continue);
                        }
                        inner.state_tx.send_modify(|s| {
                            s.phase = OperationPhase::Polling;
                            s.attempts = attempt;
                        });
                    }

                    let files = inner.backend.files_present(&inner.server).await;
                    match inner.backend.installation_progress(&inner.server).await {
                        Ok(raw) => {
                            let snapshot = normalize(&raw, Some(started.elapsed()));
                            let status = snapshot.status;
                            let message = snapshot.message.clone();
                            {
                                let slot = lock(&inner.slot);
                                if slot.epoch == epoch {
                                    let _ = inner.progress_tx.send(snapshot);
                                }
                            }
                            match status {
                                // A reported error is terminal even when
                                // files have already landed on disk.
                                ProgressStatus::Error => {
                                    Ok(Tick::Fail(PanelError::InstallFailed(
                                        if message.is_empty() {
                                            "backend reported an installation error".to_string()
                                        } else {
                                            message
                                        },
                                    )))
                                }
                                ProgressStatus::Complete => Ok(Tick::Complete),
                                _ => match files {
                                    Ok(true) => Ok(Tick::Complete),
                                    Ok(false) => Ok(Tick::Continue),
                                    // Progress was readable; a failed file
                                    // probe is only a soft failure.
                                    Err(err) => Err(err),
                                },
                            }
                        }
                        // Progress unreadable; files on disk still
                        // settle the install on their own.
                        Err(err) => match files {
                            Ok(true) => Ok(Tick::Complete),
                            _ => Err(err),
                        },
                    }
                }
            })
        };

        let monitor = self.clone();
        tokio::spawn(async move {
            let end = session.join().await;
            monitor.finish(epoch, end).await;
        });

        Ok(())
    }

    async fn finish(&self, epoch: u64, end: PollEnd) {
        let inner = &self.inner;
        {
            let mut slot = lock(&inner.slot);
            if slot.epoch != epoch {
                return;
            }
            slot.token = None;
        }

        match end {
            PollEnd::Completed => self.resolve(),
            PollEnd::Failed(err) => {
                tracing::error!(server = %inner.server, error = %err, "installation failed");
                inner.progress_tx.send_modify(|p| {
                    p.status = ProgressStatus::Error;
                    if p.message.is_empty() {
                        p.message = err.to_string();
                    }
                    p.eta_seconds = None;
                });
                let _ = inner.state_tx.send(OperationState::idle());
            }
            PollEnd::MaxAttempts | PollEnd::TimedOut => {
                // The backend may have finished right after the last
                // progress probe; give the file check the final word.
                if matches!(inner.backend.files_present(&inner.server).await, Ok(true)) {
                    self.resolve();
                } else {
                    tracing::warn!(server = %inner.server, "installation timed out");
                    inner
                        .state_tx
                        .send_modify(|s| s.phase = OperationPhase::TimedOut);
                }
            }
            PollEnd::Cancelled => {}
        }
    }

    fn resolve(&self) {
        let inner = &self.inner;
        tracing::info!(server = %inner.server, "installation complete");
        inner.progress_tx.send_modify(|p| {
            p.status = ProgressStatus::Complete;
            p.progress = 100.0;
            p.eta_seconds = None;
        });
        inner
            .state_tx
            .send_modify(|s| s.phase = OperationPhase::Resolved);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
