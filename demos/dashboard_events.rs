//! Follow a dashboard server's live notifications.
//!
//! Connects to `$DASHBOARD_WS_URL` (or the local default), logs every lifecycle event and
//! decoded dashboard notification, and disconnects cleanly on Ctrl-C.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=info,dashboard_realtime=debug cargo run --example dashboard_events
//! ```

use std::env;

use dashboard_realtime::dashboard::{self, Notification};
use dashboard_realtime::ws::config::Config;
use dashboard_realtime::ws::{ConnectionManager, ConnectionState, Event};
use dashboard_realtime::{DEFAULT_ENDPOINT, ENDPOINT_VAR};
use futures::StreamExt as _;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let endpoint = env::var(ENDPOINT_VAR).unwrap_or_else(|_| DEFAULT_ENDPOINT.to_owned());
    let connection = ConnectionManager::new(&endpoint, Config::default())?;

    let _subscriptions = dashboard::subscribe(&connection, |notification, timestamp| {
        let at = timestamp.and_then(|t| t.to_datetime());
        match notification {
            Notification::ProjectUpdated(update) => {
                info!(at = ?at, project = %update.project, "Project updated");
            }
            Notification::TopicChanged(change) => {
                info!(at = ?at, project_id = change.project_id, "Topic changed");
            }
            Notification::ScanStarted(scan) => {
                info!(scan_id = %scan.scan_id, scan_type = %scan.scan_type, "Scan started");
            }
            Notification::ScanProgress(progress) => {
                info!(
                    scan_id = %progress.scan_id,
                    progress = progress.progress,
                    current = %progress.current,
                    "Scan progress"
                );
            }
            Notification::ScanCompleted(done) => {
                info!(scan_id = %done.scan_id, result = %done.result, "Scan completed");
            }
            _ => {}
        }
    });

    // Ask for a refresh as soon as the connection opens; queued until then.
    connection.send_json(&serde_json::json!({"action": "subscribe", "channel": "projects"}))?;

    info!(%endpoint, "Connecting");
    connection.connect()?;

    let mut events = Box::pin(connection.events());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, disconnecting");
                connection.disconnect()?;
                break;
            }
            event = events.next() => {
                match event {
                    Some(Ok(Event::Connected)) => info!(state = %connection.state(), "Connected"),
                    Some(Ok(Event::Disconnected(close))) => {
                        warn!(code = close.code, reason = %close.reason, "Disconnected");
                    }
                    Some(Ok(Event::Reconnecting { attempt, delay })) => {
                        info!(attempt, ?delay, "Reconnecting");
                    }
                    Some(Ok(Event::MaxAttemptsReached)) => {
                        warn!("Giving up; restart to try again");
                        break;
                    }
                    Some(Ok(Event::Error { message })) => warn!(%message, "Connection error"),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => warn!(error = %e, "Event stream error"),
                    None => break,
                }
            }
        }
    }

    // Let the close handshake finish before the runtime shuts down.
    let mut state = connection.state_receiver();
    _ = state
        .wait_for(|state| *state == ConnectionState::Disconnected)
        .await;

    Ok(())
}
