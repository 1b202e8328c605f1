//! Gateway integration tests: start a real gateway and talk to it over HTTP and WS.
//!
//! Run with: `cargo test -p liverelay-gateway --test integration`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use liverelay_core::config::{Config, SessionConfig};
use liverelay_core::{EventSender, Params, Producer, SessionId};
use liverelay_gateway::connection::{
    CLOSE_ALREADY_ATTACHED, CLOSE_BAD_HANDSHAKE, CLOSE_UNKNOWN_SESSION,
};
use liverelay_gateway::GatewayState;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Producer driven by query params:
/// - `mode=script&xs=1,2`: enqueue `{"x": n}` for each value, then finish.
/// - `mode=hold`: push `{"tick": n}` every 20ms until the client goes away.
/// - `mode=fail`: fail the initial computation.
struct TestProducer {
    disconnects: Arc<AtomicUsize>,
}

impl Producer for TestProducer {
    type Output = serde_json::Value;
    type Event = serde_json::Value;

    fn produce(
        &self,
        params: &Params,
        events: EventSender<serde_json::Value>,
    ) -> anyhow::Result<serde_json::Value> {
        match params.get_string("mode", "script").as_str() {
            "script" => {
                let xs = params.get_string("xs", "");
                for x in xs.split(',').filter(|s| !s.is_empty()) {
                    let x: i64 = x.parse()?;
                    events.send(json!({ "x": x }))?;
                }
                Ok(json!({ "mode": "script" }))
            }
            "hold" => {
                let disconnects = self.disconnects.clone();
                tokio::spawn(async move {
                    let mut tick = 0u64;
                    loop {
                        tokio::select! {
                            () = events.closed() => break,
                            () = tokio::time::sleep(Duration::from_millis(20)) => {
                                if events.send(json!({ "tick": tick })).is_err() {
                                    break;
                                }
                                tick += 1;
                            }
                        }
                    }
                    disconnects.fetch_add(1, Ordering::SeqCst);
                });
                Ok(json!({ "mode": "hold" }))
            }
            _ => anyhow::bail!("producer exploded"),
        }
    }
}

struct TestGateway {
    state: Arc<GatewayState<TestProducer>>,
    disconnects: Arc<AtomicUsize>,
    port: u16,
}

/// Build a gateway on an ephemeral port and serve it in the background.
async fn start_test_gateway() -> TestGateway {
    start_test_gateway_with(Config::default()).await
}

async fn start_test_gateway_with(config: Config) -> TestGateway {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let disconnects = Arc::new(AtomicUsize::new(0));
    let producer = TestProducer {
        disconnects: disconnects.clone(),
    };
    let state = Arc::new(GatewayState::new(Arc::new(config), producer));

    let state_clone = state.clone();
    tokio::spawn(async move {
        let _ = liverelay_gateway::serve(listener, state_clone).await;
    });

    TestGateway {
        state,
        disconnects,
        port,
    }
}

async fn open_session(port: u16, query: &str) -> (SessionId, serde_json::Value) {
    let body: serde_json::Value = reqwest::get(format!("http://127.0.0.1:{port}/api/session?{query}"))
        .await
        .expect("session request failed")
        .json()
        .await
        .unwrap();
    let id = body["session_id"].as_str().unwrap().parse().unwrap();
    (id, body["data"].clone())
}

async fn connect(port: u16) -> Client {
    let (ws, _) = connect_async(format!("ws://127.0.0.1:{port}/socket"))
        .await
        .expect("WS connect failed");
    ws
}

async fn attach(port: u16, session_id: &str) -> Client {
    let mut ws = connect(port).await;
    ws.send(Message::Text(session_id.to_string().into()))
        .await
        .unwrap();
    ws
}

async fn next_message(ws: &mut Client) -> Message {
    tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for a message")
        .expect("stream ended")
        .expect("WS error")
}

async fn next_json(ws: &mut Client) -> serde_json::Value {
    let msg = next_message(ws).await;
    serde_json::from_str(msg.to_text().unwrap()).unwrap()
}

async fn expect_close_code(ws: &mut Client) -> u16 {
    match next_message(ws).await {
        Message::Close(Some(frame)) => u16::from(frame.code),
        other => panic!("expected close frame, got {other:?}"),
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not met in time");
}

#[tokio::test]
async fn test_health_endpoint() {
    let gw = start_test_gateway().await;

    let resp = reqwest::get(format!("http://127.0.0.1:{}/health", gw.port))
        .await
        .expect("Health request failed");

    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
    assert_eq!(body["sessions"], 0);
}

#[tokio::test]
async fn test_end_to_end_two_events_in_order() {
    let gw = start_test_gateway().await;
    let (id, data) = open_session(gw.port, "xs=1,2").await;
    assert_eq!(data["mode"], "script");

    let mut ws = attach(gw.port, &id.to_string()).await;
    assert_eq!(next_json(&mut ws).await, json!({ "x": 1 }));
    assert_eq!(next_json(&mut ws).await, json!({ "x": 2 }));
    assert_eq!(expect_close_code(&mut ws).await, 1000);

    wait_until(|| gw.state.sessions.lookup(&id).is_none()).await;
}

#[tokio::test]
async fn test_unknown_session_is_rejected_fast() {
    let gw = start_test_gateway().await;
    let (other, _) = open_session(gw.port, "xs=7").await;

    let mut ws = attach(gw.port, &SessionId::new().to_string()).await;
    assert_eq!(expect_close_code(&mut ws).await, CLOSE_UNKNOWN_SESSION);

    let mut ws = attach(gw.port, "definitely-not-a-session").await;
    assert_eq!(expect_close_code(&mut ws).await, CLOSE_UNKNOWN_SESSION);

    // The failed attaches leave the registered session untouched.
    assert!(gw.state.sessions.lookup(&other).is_some());
    let mut ws = attach(gw.port, &other.to_string()).await;
    assert_eq!(next_json(&mut ws).await, json!({ "x": 7 }));
}

#[tokio::test]
async fn test_silent_client_hits_handshake_timeout() {
    let config = Config {
        session: Some(SessionConfig {
            handshake_timeout_secs: Some(1),
            pending_ttl_secs: None,
            sweep_interval_secs: None,
        }),
        ..Config::default()
    };
    let gw = start_test_gateway_with(config).await;
    let (other, _) = open_session(gw.port, "xs=3").await;

    let mut silent = connect(gw.port).await;
    assert_eq!(expect_close_code(&mut silent).await, CLOSE_BAD_HANDSHAKE);

    // The registered session is still attachable afterwards.
    assert!(gw.state.sessions.lookup(&other).is_some_and(|s| !s.attached));
    let mut ws = attach(gw.port, &other.to_string()).await;
    assert_eq!(next_json(&mut ws).await, json!({ "x": 3 }));
    assert_eq!(expect_close_code(&mut ws).await, 1000);
}

#[tokio::test]
async fn test_binary_first_frame_is_bad_handshake() {
    let gw = start_test_gateway().await;
    let (other, _) = open_session(gw.port, "xs=4").await;

    let mut ws = connect(gw.port).await;
    ws.send(Message::Binary(other.to_string().into_bytes().into()))
        .await
        .unwrap();
    assert_eq!(expect_close_code(&mut ws).await, CLOSE_BAD_HANDSHAKE);

    assert!(gw.state.sessions.lookup(&other).is_some_and(|s| !s.attached));
}

#[tokio::test]
async fn test_repeated_query_key_keeps_first_value() {
    let gw = start_test_gateway().await;
    let (id, data) = open_session(gw.port, "mode=script&xs=5&xs=6").await;
    assert_eq!(data["mode"], "script");

    let mut ws = attach(gw.port, &id.to_string()).await;
    assert_eq!(next_json(&mut ws).await, json!({ "x": 5 }));
    assert_eq!(expect_close_code(&mut ws).await, 1000);
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let gw = start_test_gateway().await;
    let (a, _) = open_session(gw.port, "xs=1,2,3").await;
    let (b, _) = open_session(gw.port, "xs=10,20").await;

    let mut ws_b = attach(gw.port, &b.to_string()).await;
    let mut ws_a = attach(gw.port, &a.to_string()).await;

    for x in [1, 2, 3] {
        assert_eq!(next_json(&mut ws_a).await, json!({ "x": x }));
    }
    assert_eq!(expect_close_code(&mut ws_a).await, 1000);

    for x in [10, 20] {
        assert_eq!(next_json(&mut ws_b).await, json!({ "x": x }));
    }
    assert_eq!(expect_close_code(&mut ws_b).await, 1000);
}

#[tokio::test]
async fn test_live_ticks_and_disconnect_signal() {
    let gw = start_test_gateway().await;
    let (id, _) = open_session(gw.port, "mode=hold").await;

    let mut ws = attach(gw.port, &id.to_string()).await;
    let first = next_json(&mut ws).await["tick"].as_u64().unwrap();
    let second = next_json(&mut ws).await["tick"].as_u64().unwrap();
    assert_eq!(second, first + 1);

    ws.close(None).await.ok();
    drop(ws);

    wait_until(|| gw.disconnects.load(Ordering::SeqCst) == 1).await;
    wait_until(|| gw.state.sessions.lookup(&id).is_none()).await;
}

#[tokio::test]
async fn test_second_attach_is_rejected() {
    let gw = start_test_gateway().await;
    let (id, _) = open_session(gw.port, "mode=hold").await;

    let mut first = attach(gw.port, &id.to_string()).await;
    wait_until(|| gw.state.sessions.lookup(&id).is_some_and(|s| s.attached)).await;

    let mut second = attach(gw.port, &id.to_string()).await;
    assert_eq!(expect_close_code(&mut second).await, CLOSE_ALREADY_ATTACHED);

    // The original relay keeps streaming.
    assert!(next_json(&mut first).await["tick"].is_u64());
    first.close(None).await.ok();
}

#[tokio::test]
async fn test_producer_failure_returns_error_payload() {
    let gw = start_test_gateway().await;

    let resp = reqwest::get(format!("http://127.0.0.1:{}/api/session?mode=fail", gw.port))
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("producer exploded"));
    assert_eq!(body["kind"], "producer");

    let page = reqwest::get(format!("http://127.0.0.1:{}/?mode=fail", gw.port))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(page.starts_with("ERROR"));

    assert!(gw.state.sessions.is_empty());
}

#[tokio::test]
async fn test_page_embeds_registered_session() {
    let gw = start_test_gateway().await;

    let page = reqwest::get(format!("http://127.0.0.1:{}/?xs=5", gw.port))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    let marker = "socket.send(\"";
    let start = page.find(marker).expect("page should send the session id") + marker.len();
    let id: SessionId = page[start..start + 36].parse().unwrap();
    assert!(gw.state.sessions.lookup(&id).is_some());

    let mut ws = attach(gw.port, &id.to_string()).await;
    assert_eq!(next_json(&mut ws).await, json!({ "x": 5 }));
}
