//! In-process backend for tests: REST endpoints plus a push WebSocket,
//! served by axum on an ephemeral port.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::config::{ClientConfig, ReconnectionPolicy, DEFAULT_AUTH_HEADER};

#[derive(Debug, Clone)]
pub(crate) enum PushFrame {
    Text(String),
    Close,
}

pub(crate) struct MockState {
    pub appointments: Mutex<Vec<Value>>,
    pub live_queue: Mutex<HashMap<String, Value>>,
    pub seen_tokens: Mutex<Vec<String>>,
    pub joins: Mutex<Vec<String>>,
    pub cancelled: Mutex<Vec<(String, Option<String>)>>,
    pub completed: Mutex<Vec<String>>,
    pub booked: Mutex<Vec<Value>>,
    pub list_calls: AtomicUsize,
    pub live_queue_calls: AtomicUsize,
    pub ws_connections: AtomicUsize,
    pub fail_list: Mutex<Option<u16>>,
    pub list_delay: Mutex<Duration>,
    push_tx: broadcast::Sender<PushFrame>,
}

pub(crate) struct MockBackend {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl MockBackend {
    pub async fn start() -> Self {
        let (push_tx, _) = broadcast::channel(64);
        let state = Arc::new(MockState {
            appointments: Mutex::new(Vec::new()),
            live_queue: Mutex::new(HashMap::new()),
            seen_tokens: Mutex::new(Vec::new()),
            joins: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            completed: Mutex::new(Vec::new()),
            booked: Mutex::new(Vec::new()),
            list_calls: AtomicUsize::new(0),
            live_queue_calls: AtomicUsize::new(0),
            ws_connections: AtomicUsize::new(0),
            fail_list: Mutex::new(None),
            list_delay: Mutex::new(Duration::ZERO),
            push_tx,
        });

        let app = Router::new()
            .route("/api/appointments/my", get(list_appointments))
            .route("/api/appointments", post(book_appointment))
            .route("/api/appointments/peak-hours", get(peak_hours))
            .route("/api/appointments/:id/live-queue", get(live_queue))
            .route("/api/appointments/:id/cancel", put(cancel_appointment))
            .route("/api/appointments/:id/complete", put(complete_appointment))
            .route("/ws", get(ws_upgrade))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state, handle }
    }

    pub fn api_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    pub fn socket_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Session config pointing at this backend, with fast polling.
    pub fn config(&self, storage_dir: &std::path::Path) -> ClientConfig {
        ClientConfig {
            api_base_url: self.api_url(),
            socket_url: self.socket_url(),
            auth_header: DEFAULT_AUTH_HEADER.to_string(),
            storage_dir: storage_dir.to_path_buf(),
            appointment_poll_interval: Duration::from_secs(30),
            live_queue_poll_interval: Duration::from_secs(15),
            request_timeout: Duration::from_secs(5),
            reconnect: ReconnectionPolicy {
                initial_delay_ms: 50,
                max_delay_ms: 200,
                max_retries: 5,
                jitter_ms: 10,
            },
        }
    }

    pub fn set_appointments(&self, appointments: Vec<Value>) {
        *self.state.appointments.lock().unwrap() = appointments;
    }

    /// Hold every appointment list response for `delay`.
    pub fn set_list_delay(&self, delay: Duration) {
        *self.state.list_delay.lock().unwrap() = delay;
    }

    pub fn set_live_queue(&self, appointment_id: &str, snapshot: Value) {
        self.state
            .live_queue
            .lock()
            .unwrap()
            .insert(appointment_id.to_string(), snapshot);
    }

    /// Send a push frame `{"event": .., "data": ..}` to every connected socket.
    pub fn push(&self, event: &str, data: Value) {
        let frame = json!({ "event": event, "data": data }).to_string();
        let _ = self.state.push_tx.send(PushFrame::Text(frame));
    }

    pub fn push_raw(&self, text: &str) {
        let _ = self.state.push_tx.send(PushFrame::Text(text.to_string()));
    }

    pub fn drop_sockets(&self) {
        let _ = self.state.push_tx.send(PushFrame::Close);
    }

    pub fn joins(&self) -> Vec<String> {
        self.state.joins.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> usize {
        self.state.list_calls.load(Ordering::SeqCst)
    }
}

fn record_token(state: &MockState, headers: &HeaderMap) -> bool {
    match headers.get(DEFAULT_AUTH_HEADER).and_then(|v| v.to_str().ok()) {
        Some(token) => {
            state.seen_tokens.lock().unwrap().push(token.to_string());
            true
        }
        None => false,
    }
}

async fn list_appointments(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    state.list_calls.fetch_add(1, Ordering::SeqCst);
    let delay = *state.list_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    if !record_token(&state, &headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"message": "No token"})));
    }
    if let Some(status) = *state.fail_list.lock().unwrap() {
        let code = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (code, Json(json!({"message": "boom"})));
    }
    let appointments = state.appointments.lock().unwrap().clone();
    (StatusCode::OK, Json(json!({ "appointments": appointments })))
}

async fn live_queue(
    State(state): State<Arc<MockState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    state.live_queue_calls.fetch_add(1, Ordering::SeqCst);
    match state.live_queue.lock().unwrap().get(&id) {
        Some(snapshot) => (StatusCode::OK, Json(snapshot.clone())),
        None => (StatusCode::NOT_FOUND, Json(json!({"message": "Not found"}))),
    }
}

async fn book_appointment(
    State(state): State<Arc<MockState>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    state.booked.lock().unwrap().push(body.clone());
    let created = json!({
        "_id": "new-1",
        "hospital": body["hospitalId"],
        "appointmentDate": format!("{}T09:00:00Z", body["appointmentDate"].as_str().unwrap_or("2026-01-01")),
        "status": "PENDING",
        "appointmentType": body["type"],
    });
    (StatusCode::CREATED, Json(json!({ "appointment": created })))
}

async fn cancel_appointment(
    State(state): State<Arc<MockState>>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let reason = body["reason"].as_str().map(str::to_string);
    state.cancelled.lock().unwrap().push((id, reason));
    Json(json!({"message": "Appointment cancelled"}))
}

async fn complete_appointment(
    State(state): State<Arc<MockState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    state.completed.lock().unwrap().push(id);
    Json(json!({"message": "Appointment completed"}))
}

async fn peak_hours(Query(query): Query<HashMap<String, String>>) -> impl IntoResponse {
    let peak = query.get("hospitalId").map(String::as_str) == Some("busy");
    Json(json!({
        "isPeakHour": peak,
        "expectedWaitMinutes": if peak { 45 } else { 10 },
        "suggestedTimeSlots": if peak { vec!["14:00", "15:30"] } else { vec![] },
    }))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<MockState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<MockState>) {
    state.ws_connections.fetch_add(1, Ordering::SeqCst);
    let mut frames = state.push_tx.subscribe();
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let parsed: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
                        if parsed["event"] == "join" {
                            if let Some(room) = parsed["data"].as_str() {
                                state.joins.lock().unwrap().push(room.to_string());
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    _ => {}
                }
            }
            frame = frames.recv() => {
                match frame {
                    Ok(PushFrame::Text(text)) => {
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Ok(PushFrame::Close) | Err(_) => {
                        let _ = sink.close().await;
                        break;
                    }
                }
            }
        }
    }
}

/// Poll `cond` every 25ms for up to `timeout`.
pub(crate) async fn eventually(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    cond()
}
