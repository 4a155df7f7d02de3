use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use hearth_core::ServerId;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::PanelError;

/// Verdict of one poll check.
#[derive(Debug)]
pub enum Tick {
    /// Keep polling.
    Continue,
    /// Target reached, stop polling.
    Complete,
    /// Explicit terminal failure, stop polling. A check that instead
    /// returns `Err` is a soft failure and is retried.
    Fail(PanelError),
}

#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    /// Hard wall-clock ceiling, measured from spawn (including any
    /// start delay and time spent inside checks).
    pub deadline: Option<Duration>,
    pub max_attempts: Option<u32>,
    /// Grace period before the first check.
    pub start_delay: Option<Duration>,
}

impl PollConfig {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
            max_attempts: None,
            start_delay: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_max_attempts(mut self, cap: u32) -> Self {
        self.max_attempts = Some(cap);
        self
    }

    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = Some(delay);
        self
    }
}

/// Terminal outcome of a session. Delivered exactly once via `join`.
#[derive(Debug)]
pub enum PollEnd {
    Completed,
    Failed(PanelError),
    /// Deadline elapsed without terminal resolution.
    TimedOut,
    /// Attempt cap reached without terminal resolution.
    MaxAttempts,
    Cancelled,
}

/// A bounded polling task: runs `check` every `interval` until it
/// signals done, fails terminally, hits the attempt cap, hits the
/// deadline, or is cancelled.
///
/// Ticks are strictly serialized: the next check never starts before
/// the previous one settles, so a slow backend cannot accumulate
/// in-flight probes. Cancellation is cooperative and prompt: once
/// `cancel()` returns no further check is invoked, and the result of
/// an in-flight check is discarded. Dropping the session cancels it.
#[derive(Debug)]
pub struct PollSession {
    token: CancellationToken,
    handle: Option<JoinHandle<PollEnd>>,
}

impl PollSession {
    pub fn spawn<F, Fut>(cfg: PollConfig, check: F) -> Self
    where
        F: FnMut(u32) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Tick, PanelError>> + Send + 'static,
    {
        Self::spawn_with_token(CancellationToken::new(), cfg, check)
    }

    /// Runs the session under a caller-supplied token, so the owner can
    /// hold a cancellation handle before the session exists. A token
    /// that is already cancelled yields `PollEnd::Cancelled` without
    /// running a single check.
    pub fn spawn_with_token<F, Fut>(token: CancellationToken, cfg: PollConfig, check: F) -> Self
    where
        F: FnMut(u32) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Tick, PanelError>> + Send + 'static,
    {
        let cancelled = token.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                // Biased so a cancel observed between ticks always wins
                // over starting another check.
                biased;
                _ = cancelled.cancelled() => PollEnd::Cancelled,
                end = run(cfg, check) => end,
            }
        });
        Self {
            token,
            handle: Some(handle),
        }
    }

    /// Idempotent; safe to call any number of times.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Token observed by the session; lets an owner cancel after the
    /// session itself has been handed off.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Waits for the terminal outcome.
    pub async fn join(mut self) -> PollEnd {
        match self.handle.take() {
            Some(handle) => handle.await.unwrap_or(PollEnd::Cancelled),
            None => PollEnd::Cancelled,
        }
    }
}

impl Drop for PollSession {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn until_deadline<F: Future>(fut: F, deadline: Option<Instant>) -> Option<F::Output> {
    match deadline {
        Some(at) => tokio::time::timeout_at(at, fut).await.ok(),
        None => Some(fut.await),
    }
}

async fn run<F, Fut>(cfg: PollConfig, mut check: F) -> PollEnd
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Tick, PanelError>>,
{
    let deadline = cfg.deadline.map(|d| Instant::now() + d);

    if let Some(delay) = cfg.start_delay
        && until_deadline(tokio::time::sleep(delay), deadline)
            .await
            .is_none()
    {
        return PollEnd::TimedOut;
    }

    let mut ticker = tokio::time::interval(cfg.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut attempts = 0u32;
    loop {
        if until_deadline(ticker.tick(), deadline).await.is_none() {
            return PollEnd::TimedOut;
        }

        attempts += 1;
        match until_deadline(check(attempts), deadline).await {
            None => return PollEnd::TimedOut,
            Some(Ok(Tick::Continue)) => {}
            Some(Ok(Tick::Complete)) => return PollEnd::Completed,
            Some(Ok(Tick::Fail(err))) => return PollEnd::Failed(err),
            Some(Err(err)) => {
                tracing::warn!(attempt = attempts, error = %err, "poll check failed, retrying");
            }
        }

        if let Some(cap) = cfg.max_attempts
            && attempts >= cap
        {
            return PollEnd::MaxAttempts;
        }
    }
}

/// What a session is polling for; part of the at-most-one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollPurpose {
    Operation,
    Install,
    Logs,
    Metrics,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PollKey {
    pub server: ServerId,
    pub purpose: PollPurpose,
}

/// Owns every live session for a panel context, at most one per key.
///
/// Installing a session under an occupied key cancels the incumbent
/// first, and dropping the registry cancels everything it owns. This is
/// what makes server navigation and context teardown leak-free.
#[derive(Debug, Default)]
pub struct PollRegistry {
    sessions: Mutex<HashMap<PollKey, PollSession>>,
}

impl PollRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, key: PollKey, session: PollSession) {
        let mut map = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        map.retain(|_, s| !s.is_finished());
        // Dropping the incumbent cancels it.
        map.insert(key, session);
    }

    pub fn cancel(&self, key: &PollKey) {
        let mut map = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(key);
    }

    pub fn cancel_server(&self, server: &ServerId) {
        let mut map = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        map.retain(|key, _| &key.server != server);
    }

    pub fn cancel_all(&self) {
        let mut map = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        map.clear();
    }

    pub fn is_active(&self, key: &PollKey) -> bool {
        let map = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        map.get(key).is_some_and(|s| !s.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use super::*;

    fn counting_check(
        counter: Arc<AtomicU32>,
    ) -> impl FnMut(u32) -> std::future::Ready<Result<Tick, PanelError>> + Send {
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(Tick::Continue))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_fires_exactly_once_and_stops_ticks() {
        let counter = Arc::new(AtomicU32::new(0));
        let cfg = PollConfig::every(Duration::from_millis(100))
            .with_deadline(Duration::from_millis(250));
        let session = PollSession::spawn(cfg, counting_check(counter.clone()));

        let end = session.join().await;
        assert!(matches!(end, PollEnd::TimedOut));

        // Ticks at 0ms, 100ms, 200ms; the deadline lands before 300ms.
        let seen = counter.load(Ordering::SeqCst);
        assert_eq!(seen, 3);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(counter.load(Ordering::SeqCst), seen, "ticks after timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent_and_halts_checks() {
        let counter = Arc::new(AtomicU32::new(0));
        let cfg = PollConfig::every(Duration::from_millis(100));
        let session = PollSession::spawn(cfg, counting_check(counter.clone()));

        tokio::time::sleep(Duration::from_millis(350)).await;
        session.cancel();
        session.cancel();
        let seen = counter.load(Ordering::SeqCst);
        assert!(seen >= 1);

        let end = session.join().await;
        assert!(matches!(end, PollEnd::Cancelled));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(counter.load(Ordering::SeqCst), seen, "ticks after cancel");
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_discards_an_in_flight_check() {
        let cfg = PollConfig::every(Duration::from_millis(100));
        let session = PollSession::spawn(cfg, |_| std::future::pending());

        tokio::time::sleep(Duration::from_millis(50)).await;
        session.cancel();
        let end = session.join().await;
        assert!(matches!(end, PollEnd::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn a_pre_cancelled_token_runs_no_checks() {
        let counter = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();
        token.cancel();
        let cfg = PollConfig::every(Duration::from_millis(100));
        let session = PollSession::spawn_with_token(token, cfg, counting_check(counter.clone()));
        assert!(matches!(session.join().await, PollEnd::Cancelled));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn completes_when_a_check_signals_done() {
        let cfg = PollConfig::every(Duration::from_millis(100));
        let session = PollSession::spawn(cfg, |attempt| async move {
            if attempt >= 3 {
                Ok(Tick::Complete)
            } else {
                Ok(Tick::Continue)
            }
        });
        assert!(matches!(session.join().await, PollEnd::Completed));
    }

    #[tokio::test(start_paused = true)]
    async fn soft_failures_are_retried_terminal_failures_are_not() {
        let cfg = PollConfig::every(Duration::from_millis(100));
        let session = PollSession::spawn(cfg, |attempt| async move {
            match attempt {
                1 => Err(PanelError::ProbeFailed("flaky".to_string())),
                2 => Ok(Tick::Continue),
                _ => Ok(Tick::Fail(PanelError::InstallFailed("corrupt".to_string()))),
            }
        });
        assert!(matches!(
            session.join().await,
            PollEnd::Failed(PanelError::InstallFailed(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_cap_ends_the_session() {
        let counter = Arc::new(AtomicU32::new(0));
        let cfg = PollConfig::every(Duration::from_millis(100)).with_max_attempts(5);
        let session = PollSession::spawn(cfg, counting_check(counter.clone()));
        assert!(matches!(session.join().await, PollEnd::MaxAttempts));
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn start_delay_defers_the_first_check() {
        let counter = Arc::new(AtomicU32::new(0));
        let cfg = PollConfig::every(Duration::from_millis(100))
            .with_start_delay(Duration::from_millis(500));
        let session = PollSession::spawn(cfg, counting_check(counter.clone()));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(counter.load(Ordering::SeqCst) >= 1);
        session.cancel();
        session.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn checks_never_overlap() {
        let in_flight = Arc::new(AtomicBool::new(false));
        let overlapped = Arc::new(AtomicBool::new(false));
        let cfg = PollConfig::every(Duration::from_millis(100)).with_max_attempts(5);

        let (flight, seen) = (in_flight.clone(), overlapped.clone());
        let session = PollSession::spawn(cfg, move |_| {
            let (flight, seen) = (flight.clone(), seen.clone());
            async move {
                if flight.swap(true, Ordering::SeqCst) {
                    seen.store(true, Ordering::SeqCst);
                }
                // Deliberately slower than the interval.
                tokio::time::sleep(Duration::from_millis(250)).await;
                flight.store(false, Ordering::SeqCst);
                Ok(Tick::Continue)
            }
        });

        session.join().await;
        assert!(!overlapped.load(Ordering::SeqCst), "two checks ran at once");
    }

    #[tokio::test(start_paused = true)]
    async fn registry_replaces_and_cancels_the_incumbent() {
        let registry = PollRegistry::new();
        let key = PollKey {
            server: ServerId::from("s1"),
            purpose: PollPurpose::Operation,
        };

        let first = Arc::new(AtomicU32::new(0));
        let cfg = PollConfig::every(Duration::from_millis(100));
        registry.install(key.clone(), PollSession::spawn(cfg, counting_check(first.clone())));
        tokio::time::sleep(Duration::from_millis(250)).await;
        let before = first.load(Ordering::SeqCst);
        assert!(before >= 1);

        let second = Arc::new(AtomicU32::new(0));
        registry.install(key.clone(), PollSession::spawn(cfg, counting_check(second.clone())));
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(first.load(Ordering::SeqCst), before, "incumbent kept ticking");
        assert!(second.load(Ordering::SeqCst) >= 1);
        assert!(registry.is_active(&key));

        registry.cancel(&key);
        assert!(!registry.is_active(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_a_server_stops_all_its_sessions() {
        let registry = PollRegistry::new();
        let cfg = PollConfig::every(Duration::from_millis(100));
        let ticks = Arc::new(AtomicU32::new(0));
        for purpose in [PollPurpose::Logs, PollPurpose::Metrics] {
            let key = PollKey {
                server: ServerId::from("s1"),
                purpose,
            };
            registry.install(key, PollSession::spawn(cfg, counting_check(ticks.clone())));
        }
        let other = PollKey {
            server: ServerId::from("s2"),
            purpose: PollPurpose::Logs,
        };
        let other_ticks = Arc::new(AtomicU32::new(0));
        registry.install(other.clone(), PollSession::spawn(cfg, counting_check(other_ticks.clone())));

        tokio::time::sleep(Duration::from_millis(150)).await;
        registry.cancel_server(&ServerId::from("s1"));
        let frozen = ticks.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), frozen);
        assert!(other_ticks.load(Ordering::SeqCst) > 1, "unrelated server affected");
        assert!(registry.is_active(&other));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_registry_cancels_everything() {
        let ticks = Arc::new(AtomicU32::new(0));
        {
            let registry = PollRegistry::new();
            let key = PollKey {
                server: ServerId::from("s1"),
                purpose: PollPurpose::Logs,
            };
            let cfg = PollConfig::every(Duration::from_millis(100));
            registry.install(key, PollSession::spawn(cfg, counting_check(ticks.clone())));
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        let frozen = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), frozen);
    }
}
