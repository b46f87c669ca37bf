//! End-to-end tests for the `/ws` push channel over a real socket.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common::{EngineScript, TestApp};
use futures::{SinkExt, StreamExt};
use imagine_api::notifications::EventForwarder;
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Serve the app on an ephemeral port with the event forwarder running.
async fn serve(app: &TestApp) -> (SocketAddr, CancellationToken) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let router = app.app();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let cancel = CancellationToken::new();
    tokio::spawn(
        EventForwarder::new(
            Arc::clone(&app.state.ws_manager),
            Arc::clone(&app.state.registry),
        )
        .run(app.state.event_bus.subscribe(), cancel.clone()),
    );
    (addr, cancel)
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    client
}

/// Next JSON text frame, skipping pings.
async fn next_json(client: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

// ---------------------------------------------------------------------------
// Test: a new connection receives the current status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connect_receives_status() {
    let app = common::build_test_app(EngineScript::Succeed);
    let (addr, _cancel) = serve(&app).await;

    let mut client = connect(addr).await;
    assert_eq!(next_json(&mut client).await, json!({"type": "status", "job": null}));
}

// ---------------------------------------------------------------------------
// Test: request_status is answered, including unknown ids
// ---------------------------------------------------------------------------

#[tokio::test]
async fn request_status_is_answered() {
    let app = common::build_test_app(EngineScript::Succeed);
    let job_id = app.state.generation.submit("a cat", 2).unwrap();
    app.wait_terminal(job_id).await;
    let (addr, _cancel) = serve(&app).await;

    let mut client = connect(addr).await;
    let greeting = next_json(&mut client).await;
    assert_eq!(greeting["job"]["job_id"], job_id.to_string());

    client
        .send(Message::Text(
            json!({"type": "request_status", "job_id": job_id}).to_string(),
        ))
        .await
        .unwrap();
    let reply = next_json(&mut client).await;
    assert_eq!(reply["type"], "status");
    assert_eq!(reply["job"]["status"], "completed");

    client
        .send(Message::Text(
            json!({"type": "request_status", "job_id": "nope"}).to_string(),
        ))
        .await
        .unwrap();
    let reply = next_json(&mut client).await;
    assert!(reply["job"].is_null());
    assert!(reply["error"].is_string());
}

// ---------------------------------------------------------------------------
// Test: job events are pushed in order, ending with exactly one terminal event
// ---------------------------------------------------------------------------

#[tokio::test]
async fn job_events_are_pushed_in_order() {
    let app = common::build_test_app(EngineScript::Succeed);
    let (addr, _cancel) = serve(&app).await;

    let mut client = connect(addr).await;
    assert_eq!(next_json(&mut client).await["type"], "status");
    // Wait until the connection is registered before submitting.
    for _ in 0..100 {
        if app.state.ws_manager.connection_count().await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let job_id = app.state.generation.submit("a heron", 3).unwrap();

    let mut types = Vec::new();
    let mut last_step = 0;
    loop {
        let event = next_json(&mut client).await;
        assert_eq!(event["job_id"], job_id.to_string());
        let kind = event["type"].as_str().unwrap().to_string();
        if kind == "progress" {
            let step = event["current_step"].as_u64().unwrap();
            assert!(step > last_step);
            last_step = step;
        }
        let terminal = kind == "completed" || kind == "error";
        types.push(kind);
        if terminal {
            break;
        }
    }

    assert_eq!(types.first().map(String::as_str), Some("job_started"));
    assert_eq!(types.last().map(String::as_str), Some("completed"));
    assert_eq!(last_step, 3);
}
