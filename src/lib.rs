pub mod api;
pub mod clock;
pub mod config;
pub mod core_state;
pub mod countdown;
pub mod models;
pub mod poller;
pub mod presentation;
pub mod push;
pub mod session;
pub mod storage;
pub mod task;
pub mod token;

#[cfg(test)]
mod test_backend;

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use api::{ClientError, HttpQueueApi};
use clock::SystemClock;
use config::ClientConfig;
use core_state::UiEvent;
use session::QueueSession;
use storage::{LocalStore, KEY_TOKEN};

/// Run a session against the configured backend until Ctrl-C, logging
/// every UI event and the dashboard whenever state changes.
pub async fn run() -> Result<(), ClientError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let config = ClientConfig::from_env();
    let store = LocalStore::new(&config.storage_dir);
    let token = match std::env::var("CAREQUEUE_TOKEN") {
        Ok(token) if !token.trim().is_empty() => {
            store.save(KEY_TOKEN, &token);
            Some(token)
        }
        _ => store.load::<String>(KEY_TOKEN),
    };

    let api = HttpQueueApi::new(&config, token.clone())?;
    tracing::info!(api = api.base_url(), socket = %config.socket_url, "Backend configured");
    let session = QueueSession::start(&config, api, Arc::new(SystemClock), token.as_deref())?;
    let mut events = session.subscribe();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(UiEvent::Toast(toast)) => {
                    tracing::info!(level = ?toast.level, "{}", toast.message);
                }
                Ok(UiEvent::Changed(topic)) => {
                    tracing::debug!(?topic, "State changed");
                    log_dashboard(&session);
                }
                Ok(UiEvent::Countdown { kind, remaining_seconds }) => {
                    tracing::trace!(%kind, remaining_seconds, "Countdown tick");
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "UI event stream lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    session.shutdown();
    Ok(())
}

fn log_dashboard(session: &QueueSession) {
    let dashboard = match session.dashboard() {
        Ok(dashboard) => dashboard,
        Err(e) => {
            tracing::debug!(error = %e, "Dashboard unavailable");
            return;
        }
    };
    for banner in &dashboard.banners {
        tracing::info!(kind = %banner.kind, countdown = %banner.countdown_label, "{}: {}", banner.title, banner.detail);
    }
    for view in &dashboard.today {
        tracing::info!(
            appointment_id = %view.appointment_id,
            hospital = %view.hospital_name,
            status = %view.status,
            queue_number = ?view.queue_number,
            patients_ahead = ?view.patients_ahead,
            wait_minutes = ?view.estimated_wait_minutes,
            tentative = view.tentative,
            "{}",
            view.urgency_message.unwrap_or("Waiting in queue")
        );
    }
    if dashboard.unread_notifications > 0 || dashboard.unread_reminders > 0 {
        tracing::info!(
            notifications = dashboard.unread_notifications,
            reminders = dashboard.unread_reminders,
            "Unread items"
        );
    }
}
