use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hearth_core::{OperationKind, OperationPhase, OperationState, ServerId};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::api::Backend;
use crate::config::PanelConfig;
use crate::error::PanelError;
use crate::poll::{PollConfig, PollEnd, PollSession, Tick};

pub(crate) fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub type ResolvedHook = Arc<dyn Fn(&ServerId, OperationKind) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct TrackerConfig {
    pub status_interval: Duration,
    pub operation_timeout: Duration,
    pub restart_grace: Duration,
}

impl From<&PanelConfig> for TrackerConfig {
    fn from(cfg: &PanelConfig) -> Self {
        Self {
            status_interval: cfg.status_interval,
            operation_timeout: cfg.operation_timeout,
            restart_grace: cfg.restart_grace,
        }
    }
}

// The live-operation slot. Epoch and token move together under one
// lock: a preemption that cancels the token always bumps the epoch in
// the same critical section, so "token cancelled" and "epoch moved" are
// the same event. Bumped on every start; late ticks and completion
// handlers from a preempted operation compare epochs before touching
// state.
struct Slot {
    epoch: u64,
    token: Option<CancellationToken>,
}

struct Inner {
    server: ServerId,
    backend: Arc<dyn Backend>,
    cfg: TrackerConfig,
    state_tx: watch::Sender<OperationState>,
    slot: Mutex<Slot>,
    on_resolved: Mutex<Option<ResolvedHook>>,
}

/// Drives one start/stop/restart operation per server to completion.
///
/// `Idle → Running → Polling → {Resolved | TimedOut}`; the terminal
/// phase stays visible in the watch channel until acknowledged via
/// `clear()` or preempted by the next `start()`. Exactly one terminal
/// event is surfaced per operation. Install is tracked by the
/// installation monitor, which reconciles probes this tracker does not
/// know about.
#[derive(Clone)]
pub struct OperationTracker {
    inner: Arc<Inner>,
}

impl OperationTracker {
    pub fn new(server: ServerId, backend: Arc<dyn Backend>, cfg: TrackerConfig) -> Self {
        let (state_tx, _) = watch::channel(OperationState::idle());
        Self {
            inner: Arc::new(Inner {
                server,
                backend,
                cfg,
                state_tx,
                slot: Mutex::new(Slot {
                    epoch: 0,
                    token: None,
                }),
                on_resolved: Mutex::new(None),
            }),
        }
    }

    /// Fires after an operation resolves, once per resolution. Used to
    /// kick off dependent work (metrics polling, state refresh).
    pub fn set_resolved_hook(&self, hook: ResolvedHook) {
        *lock(&self.inner.on_resolved) = Some(hook);
    }

    pub fn subscribe(&self) -> watch::Receiver<OperationState> {
        self.inner.state_tx.subscribe()
    }

    pub fn state(&self) -> OperationState {
        self.inner.state_tx.borrow().clone()
    }

    /// Acknowledges a surfaced terminal phase.
    pub fn clear(&self) {
        self.inner.state_tx.send_if_modified(|s| {
            if s.is_terminal() {
                *s = OperationState::idle();
                true
            } else {
                false
            }
        });
    }

    /// Cancels the in-flight operation, if any. Idempotent.
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

    /// Issues the triggering request and, on acceptance, polls the
    /// authoritative status until it matches the operation's target.
    ///
    /// A rejected request is returned immediately and never retried.
    /// Any prior non-idle operation is forcibly preempted first.
    pub async fn start(&self, kind: OperationKind) -> Result<(), PanelError> {
        let Some(target) = kind.target_status() else {
            return Err(PanelError::ProbeFailed(
                "install is tracked by the installation monitor".to_string(),
            ));
        };

        let inner = &self.inner;
        // Claim the slot before the trigger await: a preemption landing
        // while the request is still in flight must find this token, or
        // it cannot stop us from spawning a duplicate poller later.
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
            kind: Some(kind),
            phase: OperationPhase::Running,
            attempts: 0,
            started_at_unix_ms: now_unix_ms(),
        });

        if let Err(err) = inner.backend.trigger(&inner.server, kind).await {
            tracing::warn!(server = %inner.server, op = %kind, error = %err, "request rejected");
            let mut slot = lock(&inner.slot);
            if slot.epoch == epoch {
                slot.token = None;
                let _ = inner.state_tx.send(OperationState::idle());
            }
            return Err(err);
        }
        if token.is_cancelled() {
            // Preempted while the trigger request was in flight; the
            // state belongs to the successor now.
            return Ok(());
        }

        let mut poll_cfg = PollConfig::every(inner.cfg.status_interval)
            .with_deadline(inner.cfg.operation_timeout);
        if kind == OperationKind::Restart {
            // Give the old process a moment to report `stopped` before
            // looking for `running` again.
            poll_cfg = poll_cfg.with_start_delay(inner.cfg.restart_grace);
        }

        let session = {
            let tracker = self.clone();
            PollSession::spawn_with_token(token.clone(), poll_cfg, move |attempt| {
                let tracker = tracker.clone();
                async move {
                    let inner = &tracker.inner;
                    {
                        // Epoch check and write share the slot lock, so
                        // a tick racing its own preemption can never
                        // scribble on the successor's state.
                        let slot = lock(&inner.slot);
                        if slot.epoch != epoch {
                            return Ok(Tick::Continue);
                        }
                        inner.state_tx.send_modify(|s| {
                            s.phase = OperationPhase::Polling;
                            s.attempts = attempt;
                        });
                    }
                    let summary = inner.backend.server_summary(&inner.server).await?;
                    if summary.status == target {
                        Ok(Tick::Complete)
                    } else {
                        Ok(Tick::Continue)
                    }
                }
            })
        };

        let tracker = self.clone();
        tokio::spawn(async move {
            let end = session.join().await;
            tracker.finish(epoch, kind, end);
        });

        Ok(())
    }

    fn finish(&self, epoch: u64, kind: OperationKind, end: PollEnd) {
        let inner = &self.inner;
        {
            let mut slot = lock(&inner.slot);
            if slot.epoch != epoch {
                // Preempted; the new operation owns the state now.
                return;
            }
            slot.token = None;
        }

        match end {
            PollEnd::Completed => {
                inner
                    .state_tx
                    .send_modify(|s| s.phase = OperationPhase::Resolved);
                tracing::info!(server = %inner.server, op = %kind, "operation resolved");
                if let Some(hook) = lock(&inner.on_resolved).clone() {
                    hook(&inner.server, kind);
                }
            }
            PollEnd::TimedOut | PollEnd::MaxAttempts => {
                // Inconclusive: the underlying process may still
                // converge after the ceiling.
                tracing::warn!(server = %inner.server, op = %kind, "operation timed out");
                inner
                    .state_tx
                    .send_modify(|s| s.phase = OperationPhase::TimedOut);
            }
            PollEnd::Failed(err) => {
                // Unreachable today: status probes only ever continue or
                // complete. Kept as an idle reset rather than a timeout
                // so a terminal probe failure, if one is ever added,
                // does not masquerade as the ceiling.
                tracing::error!(server = %inner.server, op = %kind, error = %err, "operation failed");
                let _ = inner.state_tx.send(OperationState::idle());
            }
            PollEnd::Cancelled => {}
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
