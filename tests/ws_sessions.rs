//! WebSocket session tests against an in-process gateway.
//!
//! Covers the realtime contract: snapshot on connect, select/deselect with
//! direct replies, broadcast to other viewers of the same function, and the
//! abandoned-cart release on disconnect.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use cinemax::cache::{CacheStore, MemoryCache};
use cinemax::config::AppConfig;
use cinemax::gateway::{self, state::AppState};
use cinemax::models::{Function, FunctionState, Hall, User};
use cinemax::purchase::{MockPaymentGateway, PaymentGateway};
use cinemax::store::DurableStore;

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct TestServer {
    state: Arc<AppState>,
    port: u16,
}

async fn start_server() -> TestServer {
    let mut config = AppConfig::from_env();
    config.jwt_secret = "ws-test-secret".into();
    config.session_buffer = 64;

    let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());
    let store = DurableStore::in_memory();
    let payment: Arc<dyn PaymentGateway> = Arc::new(MockPaymentGateway::approving());

    let (state, tasks) = AppState::assemble(config, cache, store, payment);
    tokio::spawn(tasks.hub_service.run());
    tokio::spawn(tasks.dispatcher.run());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server_state = state.clone();
    tokio::spawn(async move {
        gateway::run_server(server_state, listener).await.unwrap();
    });

    TestServer { state, port }
}

async fn seed_function(state: &AppState) -> Function {
    let function = Function {
        id: Uuid::new_v4(),
        film_id: Uuid::new_v4(),
        hall: Hall::grid("h1", "Sala 1", 2, 10),
        starts_at: Utc::now() + ChronoDuration::hours(1),
        ends_at: Utc::now() + ChronoDuration::hours(3),
        base_price: 25_000,
        vip_price: None,
        language: "es".into(),
        subtitles: true,
        state: FunctionState::Scheduled,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    state.store.functions.upsert(&function).await.unwrap();
    function
}

async fn seed_user(state: &AppState, email: &str) -> (User, String) {
    let user = User::new(email.into(), "WS Tester".into(), "hash".into());
    state.store.users.insert(&user).await.unwrap();
    let token = state.auth.issue_token(&user).unwrap();
    (user, token)
}

async fn connect(server: &TestServer, function: &Function, token: &str) -> WsStream {
    let url = format!(
        "ws://127.0.0.1:{}/ws/functions/{}?token={}",
        server.port, function.id, token
    );
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

/// Read the next JSON text frame, skipping pings, within two seconds.
async fn next_json(stream: &mut WsStream) -> Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let msg = tokio::time::timeout_at(deadline, stream.next())
            .await
            .expect("timed out waiting for message")
            .expect("stream ended")
            .expect("socket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn send_json(stream: &mut WsStream, value: Value) {
    stream
        .send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_snapshot_on_connect() {
    let server = start_server().await;
    let function = seed_function(&server.state).await;
    let (_user, token) = seed_user(&server.state, "ws1@example.com").await;

    let mut client = connect(&server, &function, &token).await;
    let established = next_json(&mut client).await;
    assert_eq!(established["type"], "connection_established");
    assert_eq!(established["function"], function.id.to_string());
    assert_eq!(
        established["seat_map"]["seats"].as_array().unwrap().len(),
        20
    );
    assert_eq!(established["seat_map"]["occupancy"]["occupied"], 0);
}

#[tokio::test]
async fn test_rejects_bad_token_and_unknown_function() {
    let server = start_server().await;
    let function = seed_function(&server.state).await;
    let (_user, token) = seed_user(&server.state, "ws2@example.com").await;

    let bad_token = format!(
        "ws://127.0.0.1:{}/ws/functions/{}?token=garbage",
        server.port, function.id
    );
    assert!(tokio_tungstenite::connect_async(bad_token).await.is_err());

    let unknown_function = format!(
        "ws://127.0.0.1:{}/ws/functions/{}?token={}",
        server.port,
        Uuid::new_v4(),
        token
    );
    assert!(tokio_tungstenite::connect_async(unknown_function).await.is_err());
}

#[tokio::test]
async fn test_select_broadcast_and_conflict() {
    let server = start_server().await;
    let function = seed_function(&server.state).await;
    let (_u1, token1) = seed_user(&server.state, "viewer@example.com").await;
    let (_u2, token2) = seed_user(&server.state, "picker@example.com").await;

    let mut viewer = connect(&server, &function, &token1).await;
    let mut picker = connect(&server, &function, &token2).await;
    next_json(&mut viewer).await; // connection_established
    next_json(&mut picker).await;

    // Picker selects A7: direct confirmation plus broadcast to the viewer
    send_json(&mut picker, json!({"action": "select", "seats": ["A7"]})).await;
    let confirmed = next_json(&mut picker).await;
    assert_eq!(confirmed["type"], "selection_confirmed");
    assert_eq!(confirmed["seats"][0], "A7");
    assert!(confirmed["expires_at"].is_string());

    let held = next_json(&mut viewer).await;
    assert_eq!(held["type"], "seat_held");
    assert_eq!(held["seats"][0], "A7");

    // Viewer tries the same seat: failure with the conflict listed, and no
    // broadcast echo back to the picker
    send_json(&mut viewer, json!({"action": "select", "seats": ["A7"]})).await;
    let failed = next_json(&mut viewer).await;
    assert_eq!(failed["type"], "selection_failed");
    assert_eq!(failed["code"], "SEAT_UNAVAILABLE");
    assert_eq!(failed["conflicts"][0], "A7");

    // Deselect frees the seat for everyone
    send_json(&mut picker, json!({"action": "deselect", "seats": ["A7"]})).await;
    let released = next_json(&mut viewer).await;
    assert_eq!(released["type"], "seat_released");
    assert_eq!(released["seats"][0], "A7");
}

#[tokio::test]
async fn test_disconnect_releases_session_holds() {
    let server = start_server().await;
    let function = seed_function(&server.state).await;
    let (_u1, token1) = seed_user(&server.state, "stay@example.com").await;
    let (_u2, token2) = seed_user(&server.state, "leave@example.com").await;

    let mut viewer = connect(&server, &function, &token1).await;
    let mut leaver = connect(&server, &function, &token2).await;
    next_json(&mut viewer).await;
    next_json(&mut leaver).await;

    send_json(&mut leaver, json!({"action": "select", "seats": ["A3", "A4"]})).await;
    next_json(&mut leaver).await; // selection_confirmed
    let held = next_json(&mut viewer).await;
    assert_eq!(held["type"], "seat_held");

    // Abandoned cart: closing the socket releases the session's holds
    leaver.close(None).await.unwrap();

    let released = next_json(&mut viewer).await;
    assert_eq!(released["type"], "seat_released");
    let mut seats: Vec<String> = released["seats"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s.as_str().unwrap().to_string())
        .collect();
    seats.sort();
    assert_eq!(seats, vec!["A3".to_string(), "A4".to_string()]);

    // And the inventory agrees
    let map = server.state.inventory.query_map(&function).await.unwrap();
    assert_eq!(map.occupancy.occupied, 0);
}

#[tokio::test]
async fn test_malformed_message_gets_error_reply() {
    let server = start_server().await;
    let function = seed_function(&server.state).await;
    let (_user, token) = seed_user(&server.state, "ws3@example.com").await;

    let mut client = connect(&server, &function, &token).await;
    next_json(&mut client).await;

    send_json(&mut client, json!({"action": "explode"})).await;
    let error = next_json(&mut client).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "BAD_MESSAGE");

    // Malformed seat codes come back as a selection failure
    send_json(&mut client, json!({"action": "select", "seats": ["??"]})).await;
    let failed = next_json(&mut client).await;
    assert_eq!(failed["type"], "selection_failed");
    assert_eq!(failed["code"], "INVALID_SEAT");
}
