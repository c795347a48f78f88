//! Black-box tests over the real HTTP surface: POST an order, follow the
//! WebSocket stream, and verify the late-connect and rejection paths.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use dexflow::adapters::{MemoryStore, OrderStore};
use dexflow::api::{create_router, AppState};
use dexflow::config::RouterConfig;
use dexflow::queue::{JobQueue, MemoryJobQueue, QueueLimits};
use dexflow::router::DexRouter;
use dexflow::services::{ConnectionRegistry, WorkerPool, WorkerSettings};

/// Boot the full engine (in-memory backends, seeded fast router) and serve
/// it on an ephemeral port.
async fn spawn_engine() -> SocketAddr {
    let limits = QueueLimits {
        max_throughput: 1000,
        window: Duration::from_secs(60),
        concurrency: 10,
        max_attempts: 3,
        base_delay: Duration::from_millis(20),
    };

    let store: Arc<dyn OrderStore> = Arc::new(MemoryStore::new());
    let queue: Arc<dyn JobQueue> = Arc::new(MemoryJobQueue::new(limits));
    let registry = Arc::new(ConnectionRegistry::new());
    let router = Arc::new(DexRouter::with_seed(
        RouterConfig {
            quote_latency_min_ms: 20,
            quote_latency_max_ms: 40,
            execution_latency_min_ms: 20,
            execution_latency_max_ms: 40,
            failure_rate: 0.0,
            seed: None,
        },
        42,
    ));

    let pool = WorkerPool::new(
        Arc::clone(&store),
        Arc::clone(&queue),
        router,
        Arc::clone(&registry),
        WorkerSettings {
            workers: 10,
            build_delay: Duration::from_millis(50),
            close_grace: Duration::from_millis(100),
            max_attempts: 3,
        },
    );
    pool.spawn();

    let app = create_router(AppState::new(store, queue, registry));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn market_order_body() -> Value {
    json!({
        "orderType": "market",
        "tokenIn": "SOL",
        "tokenOut": "USDC",
        "amountIn": 1,
        "slippage": 0.01,
    })
}

async fn post_order(client: &reqwest::Client, addr: SocketAddr, body: Value) -> reqwest::Response {
    client
        .post(format!("http://{addr}/api/orders/execute"))
        .json(&body)
        .send()
        .await
        .unwrap()
}

/// Read JSON text frames until the server closes the socket.
async fn read_frames(
    ws: &mut (impl Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin),
) -> Vec<Value> {
    let mut frames = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(10), ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                frames.push(serde_json::from_str(&text).unwrap());
            }
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => break,
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(_))) => break,
            Err(_) => panic!("stream never closed"),
        }
    }
    frames
}

async fn wait_for_status(
    client: &reqwest::Client,
    addr: SocketAddr,
    order_id: &str,
    expected: &str,
) -> Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let order: Value = client
            .get(format!("http://{addr}/api/orders/{order_id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if order["status"] == expected {
            return order;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "order never reached {expected}: {order}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn submit_then_stream_to_confirmation() {
    let addr = spawn_engine().await;
    let client = reqwest::Client::new();

    let response = post_order(&client, addr, market_order_body()).await;
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.unwrap();
    let order_id = body["orderId"].as_str().unwrap().to_string();
    assert_eq!(
        body["websocketUrl"].as_str().unwrap(),
        format!("/api/orders/{order_id}/stream")
    );
    assert!(body["message"].as_str().is_some());
    assert!(body["instructions"].as_str().is_some());

    let (mut ws, _) = connect_async(format!("ws://{addr}/api/orders/{order_id}/stream"))
        .await
        .unwrap();
    let frames = read_frames(&mut ws).await;
    assert!(!frames.is_empty());

    // The anchor frame reflects the status at connect time; everything
    // after follows the machine in order, ending confirmed.
    let anchor = &frames[0];
    assert!(anchor["message"].as_str().unwrap().contains("Connected"));

    let rank = |status: &str| match status {
        "pending" => 0,
        "routing" => 1,
        "building" => 2,
        "submitted" => 3,
        "confirmed" => 4,
        other => panic!("unexpected status {other}"),
    };
    let observed: Vec<&str> = frames.iter().map(|f| f["status"].as_str().unwrap()).collect();
    for pair in observed.windows(2) {
        assert!(rank(pair[0]) <= rank(pair[1]), "out of order: {observed:?}");
    }

    let last = frames.last().unwrap();
    assert_eq!(last["status"], "confirmed");
    assert!(last["data"]["tx_hash"].as_str().unwrap().starts_with("mock_tx_"));
    assert!(!last["data"]["executed_price"].is_null());
    assert!(!last["data"]["amount_out"].is_null());

    let stored = wait_for_status(&client, addr, &order_id, "confirmed").await;
    // Client-facing symbol preserved end to end.
    assert_eq!(stored["tokenIn"], "SOL");
    assert!(!stored["txHash"].is_null());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn late_stream_connect_replays_terminal_state() {
    let addr = spawn_engine().await;
    let client = reqwest::Client::new();

    let response = post_order(&client, addr, market_order_body()).await;
    let body: Value = response.json().await.unwrap();
    let order_id = body["orderId"].as_str().unwrap().to_string();

    wait_for_status(&client, addr, &order_id, "confirmed").await;

    let (mut ws, _) = connect_async(format!("ws://{addr}/api/orders/{order_id}/stream"))
        .await
        .unwrap();
    let frames = read_frames(&mut ws).await;

    // Exactly one anchor plus one terminal replay, then close.
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0]["status"], "confirmed");
    assert!(frames[0]["message"].as_str().is_some());
    assert_eq!(frames[1]["status"], "confirmed");
    assert!(frames[1]["data"]["tx_hash"].as_str().is_some());
    let dex = frames[1]["data"]["dex_used"].as_str().unwrap();
    assert!(dex == "raydium" || dex == "meteora");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn non_market_order_is_rejected_without_enqueue() {
    let addr = spawn_engine().await;
    let client = reqwest::Client::new();

    let mut body = market_order_body();
    body["orderType"] = json!("limit");

    let response = post_order(&client, addr, body).await;
    assert_eq!(response.status(), 400);
    let error: Value = response.json().await.unwrap();
    assert_eq!(
        error["error"],
        "Only market orders are supported in this implementation"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn missing_fields_and_bad_amounts_are_rejected() {
    let addr = spawn_engine().await;
    let client = reqwest::Client::new();

    let mut body = market_order_body();
    body.as_object_mut().unwrap().remove("tokenIn");
    let response = post_order(&client, addr, body).await;
    assert_eq!(response.status(), 400);

    let mut body = market_order_body();
    body["amountIn"] = json!(-1);
    let response = post_order(&client, addr, body).await;
    assert_eq!(response.status(), 400);
    let error: Value = response.json().await.unwrap();
    assert_eq!(error["error"], "amountIn must be positive");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unknown_order_queries_and_streams() {
    let addr = spawn_engine().await;
    let client = reqwest::Client::new();
    let missing = uuid::Uuid::new_v4();

    let response = client
        .get(format!("http://{addr}/api/orders/{missing}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let (mut ws, _) = connect_async(format!("ws://{addr}/api/orders/{missing}/stream"))
        .await
        .unwrap();
    let frames = read_frames(&mut ws).await;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["error"], "Order not found");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn health_reports_active_connections() {
    let addr = spawn_engine().await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("http://{addr}/api/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(health["status"], "ok");
    assert!(health["timestamp"].as_str().is_some());
    assert!(health["queue"]["active_connections"].is_number());
}
