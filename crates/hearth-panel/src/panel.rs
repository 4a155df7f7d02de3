use std::sync::{Arc, Mutex, MutexGuard};

use hearth_core::{OperationKind, OperationState, ServerId, ServerStatus};
use tokio::sync::watch;

use crate::api::{Backend, ServerSummary};
use crate::config::PanelConfig;
use crate::console::Console;
use crate::error::PanelError;
use crate::install::{InstallConfig, InstallationMonitor};
use crate::logs::LogRecord;
use crate::metrics::{PerfSample, metrics_session};
use crate::operation::{OperationTracker, TrackerConfig};
use crate::poll::{PollConfig, PollKey, PollPurpose, PollRegistry, PollSession, Tick};
use crate::presence::Presence;
use crate::progress::ProgressSnapshot;

/// Everything the panel tracks for one server, wired together: the
/// operation tracker, the installation monitor, console/log polling,
/// presence derivation and performance sampling.
///
/// The panel owns every timer it creates. Dropping it (navigation to a
/// different server, context teardown) cancels all of them; none may
/// outlive the panel.
pub struct ServerPanel {
    server: ServerId,
    backend: Arc<dyn Backend>,
    cfg: PanelConfig,
    tracker: OperationTracker,
    installer: InstallationMonitor,
    registry: Arc<PollRegistry>,
    console: Arc<Mutex<Console>>,
    summary_tx: watch::Sender<Option<ServerSummary>>,
    logs_tx: watch::Sender<Vec<LogRecord>>,
    presence_tx: watch::Sender<Presence>,
    metrics_tx: watch::Sender<Option<PerfSample>>,
}

impl ServerPanel {
    pub fn new(server: ServerId, backend: Arc<dyn Backend>, cfg: PanelConfig) -> Self {
        let tracker =
            OperationTracker::new(server.clone(), backend.clone(), TrackerConfig::from(&cfg));
        let installer =
            InstallationMonitor::new(server.clone(), backend.clone(), InstallConfig::from(&cfg));
        let registry = Arc::new(PollRegistry::new());
        let (summary_tx, _) = watch::channel(None);
        let (logs_tx, _) = watch::channel(Vec::new());
        let (presence_tx, _) = watch::channel(Presence::default());
        let (metrics_tx, _) = watch::channel(None);
        let console = Arc::new(Mutex::new(Console::new(cfg.log_max_lines)));

        let panel = Self {
            server,
            backend,
            cfg,
            tracker,
            installer,
            registry,
            console,
            summary_tx,
            logs_tx,
            presence_tx,
            metrics_tx,
        };
        panel.wire_resolution_hook();
        panel
    }

    // Post-resolution side effects: refresh the authoritative record,
    // and start or stop performance sampling depending on where the
    // server landed.
    fn wire_resolution_hook(&self) {
        let backend = self.backend.clone();
        let registry = self.registry.clone();
        let summary_tx = self.summary_tx.clone();
        let metrics_tx = self.metrics_tx.clone();
        let interval = self.cfg.metrics_interval;

        self.tracker.set_resolved_hook(Arc::new(move |server, kind| {
            let key = PollKey {
                server: server.clone(),
                purpose: PollPurpose::Metrics,
            };
            match kind.target_status() {
                Some(ServerStatus::Running) => {
                    let session = metrics_session(
                        backend.clone(),
                        server.clone(),
                        interval,
                        metrics_tx.clone(),
                    );
                    registry.install(key, session);
                }
                Some(ServerStatus::Stopped) | None => {
                    registry.cancel(&key);
                    let _ = metrics_tx.send(None);
                }
            }

            let backend = backend.clone();
            let server = server.clone();
            let summary_tx = summary_tx.clone();
            tokio::spawn(async move {
                match backend.server_summary(&server).await {
                    Ok(summary) => {
                        let _ = summary_tx.send(Some(summary));
                    }
                    Err(err) => {
                        tracing::debug!(server = %server, error = %err, "summary refresh failed");
                    }
                }
            });
        }));
    }

    /// Starts a lifecycle operation; install routes to the monitor.
    pub async fn start_operation(&self, kind: OperationKind) -> Result<(), PanelError> {
        match kind {
            OperationKind::Install => self.installer.start().await,
            _ => self.tracker.start(kind).await,
        }
    }

    /// Begins (or restarts) realtime-output polling for this server.
    pub fn begin_console_polling(&self) {
        let key = PollKey {
            server: self.server.clone(),
            purpose: PollPurpose::Logs,
        };
        let backend = self.backend.clone();
        let server = self.server.clone();
        let console = self.console.clone();
        let logs_tx = self.logs_tx.clone();
        let presence_tx = self.presence_tx.clone();

        let session = PollSession::spawn(PollConfig::every(self.cfg.log_interval), move |_| {
            let backend = backend.clone();
            let server = server.clone();
            let console = console.clone();
            let logs_tx = logs_tx.clone();
            let presence_tx = presence_tx.clone();
            async move {
                let values = backend.realtime_output(&server).await?;
                let mut console = lock(&console);
                let presence_change = console.sync_output(&values);
                let _ = logs_tx.send(console.records());
                drop(console);
                if let Some(presence) = presence_change {
                    let _ = presence_tx.send(presence);
                }
                Ok(Tick::Continue)
            }
        });
        self.registry.install(key, session);
    }

    /// Sends a console command; the echo and any response are merged
    /// into the log buffer immediately rather than waiting for the next
    /// realtime-output fetch.
    pub async fn send_command(&self, command: &str) -> Result<(), PanelError> {
        let output = self.backend.send_console(&self.server, command).await?;
        let mut console = lock(&self.console);
        let presence_change = console.record_command(command, &output);
        let _ = self.logs_tx.send(console.records());
        drop(console);
        if let Some(presence) = presence_change {
            let _ = self.presence_tx.send(presence);
        }
        Ok(())
    }

    pub fn server(&self) -> &ServerId {
        &self.server
    }

    pub fn operation(&self) -> OperationState {
        // Install publishes through its own channel; a non-idle install
        // takes precedence for display.
        let install = self.installer.state();
        if install.is_idle() {
            self.tracker.state()
        } else {
            install
        }
    }

    pub fn subscribe_operation(&self) -> watch::Receiver<OperationState> {
        self.tracker.subscribe()
    }

    pub fn subscribe_install(&self) -> watch::Receiver<OperationState> {
        self.installer.subscribe_state()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<ProgressSnapshot> {
        self.installer.subscribe_progress()
    }

    pub fn subscribe_summary(&self) -> watch::Receiver<Option<ServerSummary>> {
        self.summary_tx.subscribe()
    }

    pub fn subscribe_logs(&self) -> watch::Receiver<Vec<LogRecord>> {
        self.logs_tx.subscribe()
    }

    pub fn subscribe_presence(&self) -> watch::Receiver<Presence> {
        self.presence_tx.subscribe()
    }

    pub fn subscribe_metrics(&self) -> watch::Receiver<Option<PerfSample>> {
        self.metrics_tx.subscribe()
    }

    /// Cancels every owned session and tracker. Idempotent; also runs
    /// on drop.
    pub fn shutdown(&self) {
        self.tracker.cancel();
        self.installer.cancel();
        self.registry.cancel_all();
    }
}

impl Drop for ServerPanel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
