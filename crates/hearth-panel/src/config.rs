use std::time::Duration;

const DEFAULT_STATUS_POLL_MS: u64 = 2000;
const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 150_000;
const DEFAULT_INSTALL_POLL_MS: u64 = 3000;
const DEFAULT_INSTALL_MAX_ATTEMPTS: u32 = 60;
const DEFAULT_RESTART_GRACE_MS: u64 = 5000;
const DEFAULT_METRICS_POLL_MS: u64 = 2000;
const DEFAULT_LOG_POLL_MS: u64 = 2000;
const DEFAULT_LOG_MAX_LINES: usize = 1000;
const DEFAULT_HTTP_TIMEOUT_MS: u64 = 10_000;

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse::<u64>().ok())
}

fn env_ms(name: &str, min: u64, max: u64, default: u64) -> Duration {
    Duration::from_millis(clamped(env_u64(name), min, max, default))
}

fn clamped(v: Option<u64>, min: u64, max: u64, default: u64) -> u64 {
    v.map(|v| v.clamp(min, max)).unwrap_or(default)
}

/// Tunables of the polling core. Every knob has an environment override
/// with a clamped range so a misconfigured deployment cannot spin-poll
/// the backend or hold operations open forever.
#[derive(Debug, Clone)]
pub struct PanelConfig {
    /// Cadence of authoritative status probes while an operation polls.
    pub status_interval: Duration,
    /// Hard ceiling for start/stop/restart convergence.
    pub operation_timeout: Duration,
    /// Cadence of the paired install probes.
    pub install_interval: Duration,
    /// Install attempt cap (~3 minutes at the default cadence).
    pub install_max_attempts: u32,
    /// Delay before restart polling begins, so the old process has a
    /// chance to report `stopped` before we look for `running`.
    pub restart_grace: Duration,
    /// Cadence of performance sampling while the server runs.
    pub metrics_interval: Duration,
    /// Cadence of realtime-output fetches.
    pub log_interval: Duration,
    /// In-memory console buffer cap, oldest lines evicted first.
    pub log_max_lines: usize,
    /// Per-request transport timeout.
    pub http_timeout: Duration,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            status_interval: env_ms("HEARTH_STATUS_POLL_MS", 250, 60_000, DEFAULT_STATUS_POLL_MS),
            operation_timeout: env_ms(
                "HEARTH_OPERATION_TIMEOUT_MS",
                5000,
                30 * 60 * 1000,
                DEFAULT_OPERATION_TIMEOUT_MS,
            ),
            install_interval: env_ms("HEARTH_INSTALL_POLL_MS", 500, 60_000, DEFAULT_INSTALL_POLL_MS),
            install_max_attempts: clamped(
                env_u64("HEARTH_INSTALL_MAX_ATTEMPTS"),
                1,
                1000,
                u64::from(DEFAULT_INSTALL_MAX_ATTEMPTS),
            ) as u32,
            restart_grace: env_ms("HEARTH_RESTART_GRACE_MS", 0, 60_000, DEFAULT_RESTART_GRACE_MS),
            metrics_interval: env_ms("HEARTH_METRICS_POLL_MS", 250, 60_000, DEFAULT_METRICS_POLL_MS),
            log_interval: env_ms("HEARTH_LOG_POLL_MS", 250, 60_000, DEFAULT_LOG_POLL_MS),
            log_max_lines: clamped(
                env_u64("HEARTH_LOG_MAX_LINES"),
                100,
                50_000,
                DEFAULT_LOG_MAX_LINES as u64,
            ) as usize,
            http_timeout: env_ms("HEARTH_HTTP_TIMEOUT_MS", 1000, 120_000, DEFAULT_HTTP_TIMEOUT_MS),
        }
    }
}
