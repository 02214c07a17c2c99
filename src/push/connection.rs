//! Push channel connection.
//!
//! One WebSocket to the backend, joined to the user's room. Text frames are
//! parsed into [`PushEvent`]s and forwarded over an mpsc channel; the
//! receiving side (the session dispatcher) owns all state changes.
//!
//! On a drop the connection retries with exponential backoff plus jitter.
//! A successful connect resets the attempt counter. After
//! `max_retries` consecutive failures it reports [`ConnectionStatus::GaveUp`]
//! and stops; polling keeps the views current from then on.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;

use super::events::{ClientFrame, PushEvent};
use crate::api::ClientError;
use crate::config::ReconnectionPolicy;
use crate::task::BackgroundTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    GaveUp,
}

/// What the connection task sends to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    Event(PushEvent),
    Status(ConnectionStatus),
}

enum Exit {
    /// Shutdown requested, or nobody is listening any more.
    Stop,
    /// Connected, then the socket went away.
    Dropped,
}

pub struct PushConnection {
    task: BackgroundTask,
}

impl PushConnection {
    /// Connect to `url`, join `room` and forward events into `tx`.
    pub fn spawn(
        url: String,
        room: String,
        policy: ReconnectionPolicy,
        tx: mpsc::Sender<PushMessage>,
    ) -> Self {
        let task = BackgroundTask::spawn("push", move |shutdown| {
            run_connection(url, room, policy, tx, shutdown)
        });
        Self { task }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

async fn run_connection(
    url: String,
    room: String,
    policy: ReconnectionPolicy,
    tx: mpsc::Sender<PushMessage>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut attempt: u32 = 0;

    loop {
        match connect_once(&url, &room, &tx, &mut shutdown).await {
            Ok(Exit::Stop) => return,
            Ok(Exit::Dropped) => {
                attempt = 0;
                tracing::info!("Push channel closed, reconnecting");
                if tx.send(PushMessage::Status(ConnectionStatus::Disconnected)).await.is_err() {
                    return;
                }
            }
            Err(e) => tracing::warn!(attempt, error = %e, "Push channel connect failed"),
        }

        attempt += 1;
        if attempt > policy.max_retries {
            tracing::warn!(retries = policy.max_retries, "Push channel giving up");
            let _ = tx.send(PushMessage::Status(ConnectionStatus::GaveUp)).await;
            return;
        }

        let delay = policy.base_delay(attempt) + jitter(policy.jitter_ms);
        tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Push reconnect scheduled");
        tokio::select! {
            _ = &mut shutdown => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

fn jitter(max_ms: u32) -> Duration {
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(u64::from(rand::thread_rng().gen_range(0..=max_ms)))
}

async fn connect_once(
    url: &str,
    room: &str,
    tx: &mpsc::Sender<PushMessage>,
    shutdown: &mut oneshot::Receiver<()>,
) -> Result<Exit, ClientError> {
    let (mut ws, _) = tokio::select! {
        _ = &mut *shutdown => return Ok(Exit::Stop),
        connected = tokio_tungstenite::connect_async(url) => {
            connected.map_err(|e| ClientError::Socket(e.to_string()))?
        }
    };

    let join = ClientFrame::Join(room.to_string())
        .to_text()
        .map_err(|e| ClientError::Socket(e.to_string()))?;
    ws.send(Message::Text(join))
        .await
        .map_err(|e| ClientError::Socket(e.to_string()))?;
    tracing::info!(room, "Push channel connected");

    if tx.send(PushMessage::Status(ConnectionStatus::Connected)).await.is_err() {
        return Ok(Exit::Stop);
    }

    loop {
        tokio::select! {
            _ = &mut *shutdown => {
                let _ = ws.close(None).await;
                return Ok(Exit::Stop);
            }
            frame = ws.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => match PushEvent::parse(&text) {
                        Ok(Some(event)) => {
                            if tx.send(PushMessage::Event(event)).await.is_err() {
                                return Ok(Exit::Stop);
                            }
                        }
                        Ok(None) => {}
                        Err(e) => tracing::warn!(error = %e, "Malformed push frame ignored"),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if ws.send(Message::Pong(data)).await.is_err() {
                            return Ok(Exit::Dropped);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(Exit::Dropped),
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "Push channel read error");
                        return Ok(Exit::Dropped);
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}
