//! Integration test: webhook → store → publish → WebSocket subscriber on a private channel.
//! Starts the gateway on a free port; the server task is left running when the test ends.

use beacon::config::{Config, GatewayAuthMode};
use beacon::gateway::{self, WsRequest};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SECRET: &str = "hook-secret";
const TOKEN: &str = "gw-token";

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

async fn start_gateway() -> u16 {
    let port = free_port();
    let mut config = Config::default();
    config.gateway.port = port;
    config.gateway.auth.mode = GatewayAuthMode::Token;
    config.gateway.auth.token = Some(TOKEN.to_string());
    config.channels.telegram.webhook_secret = Some(SECRET.to_string());
    config.authorization.super_users = vec!["owner".to_string()];
    tokio::spawn(async move {
        let _ = gateway::run_gateway(config).await;
    });

    let url = format!("http://127.0.0.1:{}/", port);
    let client = reqwest::Client::new();
    for _ in 0..100 {
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return port;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("gateway on port {} did not come up within 5s", port);
}

async fn next_json(ws: &mut Ws) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("frame within 5s")
            .expect("socket open")
            .expect("valid frame");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("JSON frame");
        }
    }
}

/// Send a request and return its response, skipping event frames.
async fn request(ws: &mut Ws, id: &str, method: &str, params: Value) -> Value {
    let req = serde_json::to_string(&WsRequest::new(id, method, params)).expect("encode request");
    ws.send(Message::Text(req)).await.expect("send request");
    loop {
        let frame = next_json(ws).await;
        if frame["type"] == "res" && frame["id"] == id {
            return frame;
        }
    }
}

async fn next_event(ws: &mut Ws) -> Value {
    loop {
        let frame = next_json(ws).await;
        if frame["type"] == "event" {
            return frame;
        }
    }
}

async fn connect_as(port: u16, user: &str) -> (Ws, Value) {
    let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{}/ws", port))
        .await
        .expect("ws connect");
    let hello = request(
        &mut ws,
        "c",
        "connect",
        json!({ "user": user, "auth": { "token": TOKEN } }),
    )
    .await;
    (ws, hello)
}

async fn post_webhook(port: u16, secret: &str, body: &str) -> reqwest::StatusCode {
    reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/telegram/webhook", port))
        .header("X-Telegram-Bot-Api-Secret-Token", secret)
        .header("Content-Type", "application/json")
        .body(body.to_string())
        .send()
        .await
        .expect("webhook request")
        .status()
}

#[tokio::test]
async fn webhook_message_reaches_authorized_dashboard_subscriber() {
    let port = start_gateway().await;
    let (mut ws, hello) = connect_as(port, "owner").await;
    assert_eq!(hello["ok"], true);
    assert_eq!(hello["payload"]["user"], "owner");
    assert_eq!(hello["payload"]["developerMode"]["enabled"], true);
    assert_eq!(hello["payload"]["developerMode"]["rule"], "authorization-override");

    let sub = request(&mut ws, "s", "subscribe", json!({ "channel": "private-dashboard" })).await;
    assert_eq!(sub["ok"], true, "{sub}");

    let body = r#"{"update_id":5,"message":{"chat":{"id":42},"text":"hello"}}"#;
    assert_eq!(post_webhook(port, SECRET, body).await, reqwest::StatusCode::OK);

    let event = next_event(&mut ws).await;
    assert_eq!(event["event"], "message.received");
    assert_eq!(event["channel"], "private-dashboard");
    assert_eq!(event["payload"], json!({}));

    let recent = request(&mut ws, "r", "messages.recent", json!({ "limit": 5 })).await;
    let messages = recent["payload"]["messages"].as_array().expect("messages array");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["provider"], "telegram");
    assert_eq!(messages[0]["payload"]["message"]["text"], "hello");

    let id = messages[0]["id"].as_str().unwrap().to_string();
    let got = request(&mut ws, "g", "messages.get", json!({ "id": id })).await;
    assert_eq!(got["payload"]["message"]["id"], id.as_str());
}

#[tokio::test]
async fn guests_are_refused_private_dashboard() {
    let port = start_gateway().await;
    let (mut ws, hello) = connect_as(port, "guest").await;
    assert_eq!(hello["ok"], true);
    // the gateway resolves global debug from BEACON_DEBUG, so the expected rule follows the env
    let expected_rule = if beacon::config::resolve_debug_mode(&Config::default()) {
        "global-debug"
    } else {
        "default-false"
    };
    assert_eq!(hello["payload"]["developerMode"]["rule"], expected_rule);

    let sub = request(&mut ws, "s", "subscribe", json!({ "channel": "private-dashboard" })).await;
    assert_eq!(sub["ok"], false);
    assert!(sub["error"].as_str().unwrap().starts_with("forbidden"));

    let recent = request(&mut ws, "r", "messages.recent", json!({})).await;
    assert_eq!(recent["ok"], false);

    let public = request(&mut ws, "p", "subscribe", json!({ "channel": "announcements" })).await;
    assert_eq!(public["ok"], true);
}

#[tokio::test]
async fn webhook_rejects_bad_secret_and_bad_body() {
    let port = start_gateway().await;
    let body = r#"{"update_id":1}"#;
    assert_eq!(post_webhook(port, "wrong", body).await, reqwest::StatusCode::FORBIDDEN);
    assert_eq!(
        post_webhook(port, SECRET, "{\"nope\":true}").await,
        reqwest::StatusCode::BAD_REQUEST
    );
}

#[tokio::test]
async fn requests_before_connect_are_refused() {
    let port = start_gateway().await;
    let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{}/ws", port))
        .await
        .expect("ws connect");
    let res = request(&mut ws, "1", "flags", json!({})).await;
    assert_eq!(res["ok"], false);
    assert_eq!(res["error"], "connect required");

    let res = request(
        &mut ws,
        "2",
        "connect",
        json!({ "user": "owner", "auth": { "token": "wrong" } }),
    )
    .await;
    assert_eq!(res["error"], "unauthorized: gateway token mismatch");
}

#[tokio::test]
async fn connect_outside_supported_protocol_range_is_refused() {
    let port = start_gateway().await;
    let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{}/ws", port))
        .await
        .expect("ws connect");
    let res = request(
        &mut ws,
        "1",
        "connect",
        json!({ "user": "owner", "minProtocol": 5, "maxProtocol": 7, "auth": { "token": TOKEN } }),
    )
    .await;
    assert_eq!(res["ok"], false);
    assert!(res["error"].as_str().unwrap().starts_with("protocol mismatch"), "{res}");

    let res = request(
        &mut ws,
        "2",
        "connect",
        json!({ "user": "owner", "minProtocol": 1, "maxProtocol": 1, "auth": { "token": TOKEN } }),
    )
    .await;
    assert_eq!(res["ok"], true);
    assert_eq!(res["payload"]["protocol"], 1);
}
