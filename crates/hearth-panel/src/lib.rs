//! Operation tracking and log-derived state for a game-server admin
//! panel.
//!
//! The backend exposes no push channel, so everything ephemeral is
//! reconciled by polling: lifecycle operations (install/start/stop/
//! restart) are driven to completion with bounded poll sessions, raw
//! console output is classified into a typed taxonomy, and the online
//! player set and install progress are re-derived from the log stream
//! on every update. Consumers subscribe to watch channels and render
//! snapshots; they never mutate tracker state directly.

pub mod api;
pub mod config;
pub mod console;
pub mod error;
pub mod install;
pub mod logs;
pub mod metrics;
pub mod operation;
pub mod panel;
pub mod poll;
pub mod presence;
pub mod progress;

#[cfg(test)]
pub(crate) mod testutil;

pub use api::{ApiClient, Backend, ServerSummary};
pub use config::PanelConfig;
pub use console::Console;
pub use error::PanelError;
pub use install::InstallationMonitor;
pub use logs::{LogKind, LogRecord, classify, strip_ansi};
pub use metrics::PerfSample;
pub use operation::OperationTracker;
pub use panel::ServerPanel;
pub use poll::{PollConfig, PollEnd, PollRegistry, PollSession, Tick};
pub use presence::{Presence, PresenceFeed, track};
pub use progress::{ProgressSnapshot, ProgressStatus, RawProgress};

pub use hearth_core::{OperationKind, OperationPhase, OperationState, ServerId, ServerStatus};
