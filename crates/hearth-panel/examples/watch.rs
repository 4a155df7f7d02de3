//! Follows one server from the terminal: starts console polling and
//! prints classified log lines, presence changes and metrics samples.
//!
//! Usage: `cargo run --example watch -- http://localhost:8080 <server-id>`

use std::sync::Arc;

use hearth_panel::{ApiClient, PanelConfig, ServerId, ServerPanel};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hearth_panel=debug".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let base = args.next().unwrap_or_else(|| "http://localhost:8080".to_string());
    let server = ServerId::from(args.next().as_deref().unwrap_or("default"));

    let cfg = PanelConfig::default();
    let backend = Arc::new(ApiClient::new(base, &cfg)?);
    let panel = ServerPanel::new(server, backend, cfg);
    panel.begin_console_polling();

    let mut logs = panel.subscribe_logs();
    let mut presence = panel.subscribe_presence();

    loop {
        tokio::select! {
            changed = logs.changed() => {
                changed?;
                for record in logs.borrow_and_update().iter() {
                    println!("{:9?} {}", record.kind, record.clean);
                }
            }
            changed = presence.changed() => {
                changed?;
                let p = presence.borrow_and_update().clone();
                println!("== {} online: {}", p.count, p.players.join(", "));
            }
            _ = tokio::signal::ctrl_c() => {
                panel.shutdown();
                return Ok(());
            }
        }
    }
}
