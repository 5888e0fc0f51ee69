use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use jobpulse_client_core::auth::{MemoryCredentialStore, StoreExt};
use jobpulse_client_core::config::ClientConfig;
use jobpulse_client_core::dashboard::Dashboard;
use jobpulse_client_core::notify::{ChannelNotifier, Notice, NoticeLevel};
use jobpulse_client_core::session::SessionManager;
use jobpulse_client_core::sync::{ChannelState, FallbackOutcome};

const TOKEN: &str = "jwt-good";
const ENGINE_OPEN: &str = r#"0{"sid":"engine-1","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;

#[derive(Clone)]
struct StubState {
    frames: mpsc::UnboundedSender<String>,
    reject_socket: Arc<AtomicBool>,
}

async fn verify(headers: HeaderMap) -> Response {
    let authorized = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        == Some("Bearer jwt-good");
    if !authorized {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "message": "invalid token" })))
            .into_response();
    }
    Json(json!({
        "_id": "u-1",
        "name": "Ada",
        "email": "ada@example.com",
        "discord_webhook": "https://discord.com/api/webhooks/1/abc",
    }))
    .into_response()
}

async fn emails() -> Json<Value> {
    Json(json!({
        "success": true,
        "emails": [{ "id": 7, "company": "Initech", "status": "Rejected" }],
    }))
}

async fn socket_io(ws: WebSocketUpgrade, State(state): State<StubState>) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn send_text(socket: &mut WebSocket, text: impl Into<String>) -> bool {
    socket.send(WsMessage::Text(text.into())).await.is_ok()
}

/// Minimal Socket.IO v4 server: handshake, auth, then one snapshot and one
/// overlapping push once the client registers.
async fn serve_socket(mut socket: WebSocket, state: StubState) {
    if !send_text(&mut socket, ENGINE_OPEN).await {
        return;
    }
    while let Some(Ok(message)) = socket.recv().await {
        let WsMessage::Text(text) = message else {
            continue;
        };
        let _ = state.frames.send(text.clone());

        if let Some(auth) = text.strip_prefix("40") {
            let token = serde_json::from_str::<Value>(auth)
                .ok()
                .and_then(|value| value.get("token").and_then(Value::as_str).map(str::to_owned));
            let reply = if token.as_deref() == Some(TOKEN)
                && !state.reject_socket.load(Ordering::SeqCst)
            {
                r#"40{"sid":"socket-1"}"#
            } else {
                r#"44{"message":"unauthorized"}"#
            };
            if !send_text(&mut socket, reply).await {
                return;
            }
        } else if let Some(event) = text.strip_prefix("42") {
            let packet: Value = serde_json::from_str(event).unwrap_or(Value::Null);
            if packet[0] != "register" {
                continue;
            }
            let snapshot = json!(["initialEmails", [{ "id": 1, "company": "Acme" }]]);
            let push = json!([
                "newEmails",
                [{ "id": "1", "company": "Acme" }, { "id": 2, "company": "Globex" }]
            ]);
            for frame in [format!("42{snapshot}"), "2".to_string(), format!("42{push}")] {
                if !send_text(&mut socket, frame).await {
                    return;
                }
            }
        }
    }
}

struct Stub {
    config: ClientConfig,
    frames: mpsc::UnboundedReceiver<String>,
    reject_socket: Arc<AtomicBool>,
    _shutdown: oneshot::Sender<()>,
}

impl Stub {
    async fn expect_frame(&mut self, wanted: &str) {
        loop {
            let frame = timeout(Duration::from_secs(5), self.frames.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for frame {wanted}"))
                .expect("frame channel closed");
            if frame == wanted {
                return;
            }
        }
    }
}

async fn spawn_stub() -> Stub {
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let reject_socket = Arc::new(AtomicBool::new(false));
    let state = StubState {
        frames: frames_tx,
        reject_socket: reject_socket.clone(),
    };
    let router = Router::new()
        .route("/auth/verify", get(verify))
        .route("/job/emails", get(emails))
        .route("/socket.io/", get(socket_io))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener bind");
    let addr = listener.local_addr().expect("local addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });

    Stub {
        config: ClientConfig::for_backend(&format!("http://{addr}"), "test-key").expect("config"),
        frames: frames_rx,
        reject_socket,
        _shutdown: shutdown_tx,
    }
}

async fn signed_in(config: &ClientConfig) -> (SessionManager, mpsc::UnboundedReceiver<Notice>) {
    let store = Arc::new(MemoryCredentialStore::new());
    store.set_token(TOKEN).expect("seed token");
    let (notifier, notices) = ChannelNotifier::new();
    let session = SessionManager::new(config, store, Arc::new(notifier)).expect("session");
    assert!(session.initialize().await.authenticated);
    (session, notices)
}

#[test_timeout::tokio_timeout_test]
async fn pushed_records_merge_without_duplicates() {
    let mut stub = spawn_stub().await;
    let (session, mut notices) = signed_in(&stub.config).await;

    let mut dashboard = Dashboard::new(session, &stub.config);
    assert!(!dashboard.needs_webhook_banner());
    dashboard.mount().expect("mount");
    let mut records = dashboard.records().expect("records");

    stub.expect_frame(r#"40{"token":"jwt-good"}"#).await;
    stub.expect_frame(r#"42["register","u-1",false]"#).await;

    let merged = records
        .wait_for(|records| records.len() == 2)
        .await
        .expect("records channel")
        .clone();
    let ids: Vec<_> = merged.iter().map(|record| record.id.to_string()).collect();
    assert_eq!(ids, vec!["1", "2"]);
    assert_eq!(merged[1].company, "Globex");

    let notice = timeout(Duration::from_secs(5), notices.recv())
        .await
        .expect("notice")
        .expect("notice channel");
    assert_eq!(notice.level, NoticeLevel::Info);
    assert_eq!(notice.message, "1 new application update");

    stub.expect_frame("3").await;
    assert_eq!(dashboard.channel_state(), Some(ChannelState::Receiving));

    dashboard.teardown().await;
    stub.expect_frame("41").await;
    assert!(!dashboard.is_mounted());
}

#[test_timeout::tokio_timeout_test]
async fn rejected_channel_falls_back_to_snapshot() {
    let stub = spawn_stub().await;
    stub.reject_socket.store(true, Ordering::SeqCst);
    let config = stub.config.clone().with_fallback_delay(Duration::from_millis(200));
    let (session, _notices) = signed_in(&config).await;

    let mut dashboard = Dashboard::new(session, &config);
    dashboard.mount().expect("mount");
    let mut state = dashboard.sync_handle().expect("handle").state();
    let mut records = dashboard.records().expect("records");

    state
        .wait_for(|state| *state == ChannelState::Error)
        .await
        .expect("state channel");
    let snapshot = records
        .wait_for(|records| !records.is_empty())
        .await
        .expect("records channel")
        .clone();

    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].company, "Initech");
    let handle = dashboard.sync_handle().expect("handle");
    let outcome = loop {
        if let Some(outcome) = handle.fallback_outcome() {
            break outcome;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    assert_eq!(outcome, FallbackOutcome::Fetched(1));
    dashboard.teardown().await;
}
