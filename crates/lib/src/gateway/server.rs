//! Gateway HTTP + WebSocket server (single port).

use crate::authz::{Authorization, ChannelAuthorizer, ChannelName, StaticAuthorization};
use crate::broadcast::{BroadcastHub, EventPublisher, MessageReceived, PublishReport, SHUTDOWN_EVENT_JSON};
use crate::config::{self, Config};
use crate::flags::{self, FeatureFlagDecision};
use crate::gateway::protocol::{
    ChannelParams, ConnectParams, GetMessageParams, HelloOk, HelloPolicy, RecentParams, WsRequest,
    WsResponse,
};
use crate::providers::{parse_update, InboundMessage, TelegramClient, TELEGRAM_PROVIDER};
use crate::store::{InboundMessageRecord, MessageStore};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

const PROTOCOL_VERSION: u32 = 1;

const RECENT_DEFAULT_LIMIT: usize = 20;
const RECENT_MAX_LIMIT: usize = 200;

/// When auth mode is token and a token is configured, returns it for connect validation.
fn require_connect_token(config: &Config) -> Option<String> {
    if config.gateway.auth.mode == config::GatewayAuthMode::Token {
        config::resolve_gateway_token(config)
    } else {
        None
    }
}

/// Shared state for the gateway (config, authorization, hub, publisher, store).
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    /// When Some, WebSocket connect must provide params.auth.token matching this.
    pub required_token: Option<String>,
    /// Global debug switch, resolved once at startup.
    pub debug_mode: bool,
    pub authorization: Arc<dyn Authorization>,
    /// Channel transport; subscribers attach here, the publisher delivers here.
    pub hub: Arc<BroadcastHub>,
    pub publisher: EventPublisher,
    pub store: Arc<MessageStore>,
    /// Sender for inbound provider messages (webhook POSTs). The ingestion task receives.
    pub inbound_tx: mpsc::Sender<InboundMessage>,
}

impl GatewayState {
    /// Build state from config, resolving global debug from config and BEACON_DEBUG.
    /// The returned receiver must be drained by [`run_ingestion`].
    pub fn new(config: Config) -> (Self, mpsc::Receiver<InboundMessage>) {
        let debug_mode = config::resolve_debug_mode(&config);
        Self::with_debug(config, debug_mode)
    }

    /// Build state with an already resolved global debug switch.
    pub fn with_debug(config: Config, debug_mode: bool) -> (Self, mpsc::Receiver<InboundMessage>) {
        let authorization: Arc<dyn Authorization> =
            Arc::new(StaticAuthorization::from_config(&config.authorization));
        let authorizer = Arc::new(ChannelAuthorizer::from_config(
            &config.authorization,
            authorization.clone(),
        ));
        log::info!(
            "private channel families: {:?}",
            authorizer.families()
        );
        let hub = Arc::new(BroadcastHub::new(authorizer, config.broadcast.capacity));
        let publisher = EventPublisher::new(hub.clone(), config.broadcast.delivery_timeout());
        let store = Arc::new(MessageStore::new(config.broadcast.retain_messages));
        let (inbound_tx, inbound_rx) = mpsc::channel::<InboundMessage>(64);
        let state = Self {
            required_token: require_connect_token(&config),
            config: Arc::new(config),
            debug_mode,
            authorization,
            hub,
            publisher,
            store,
            inbound_tx,
        };
        (state, inbound_rx)
    }

    /// Developer mode for `user`, resolved fresh on every call.
    pub fn developer_mode(&self, user: &str) -> FeatureFlagDecision {
        flags::developer_mode(self.authorization.as_ref(), user, self.debug_mode)
    }

    /// Persist one inbound message and publish it exactly once on the dashboard channel.
    pub async fn ingest(&self, msg: InboundMessage) -> PublishReport {
        let record = self.store.persist(msg.provider, msg.payload).await;
        let broadcast = &self.config.broadcast;
        let event = MessageReceived::new(&record, broadcast.dashboard_channel.clone())
            .with_fields(broadcast.message_fields.iter().copied());
        let report = self.publisher.publish(&event).await;
        let published = event.record();
        if report.is_complete() {
            log::debug!("ingest: {} from {} published", published.id, published.provider);
        } else {
            log::warn!(
                "ingest: {} published with {} failed channel(s)",
                published.id,
                report.failures.len()
            );
        }
        report
    }
}

/// Drain inbound messages: persist and publish each one.
pub async fn run_ingestion(state: GatewayState, mut inbound_rx: mpsc::Receiver<InboundMessage>) {
    while let Some(msg) = inbound_rx.recv().await {
        state.ingest(msg).await;
    }
    log::debug!("ingestion task stopped");
}

/// HTTP routes: health, WebSocket, and the Telegram webhook.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/ws", get(ws_handler))
        .route("/telegram/webhook", post(telegram_webhook))
        .with_state(state)
}

/// Run the gateway server; binds to config.gateway.bind:config.gateway.port.
/// When bind is not loopback, a gateway token must be configured or startup fails.
/// Blocks until shutdown (e.g. Ctrl+C).
pub async fn run_gateway(config: Config) -> Result<()> {
    config.validate()?;
    let bind = config.gateway.bind.trim().to_string();
    if !config::is_loopback_bind(&bind) {
        let token = config::resolve_gateway_token(&config);
        if token.is_none() || config.gateway.auth.mode != config::GatewayAuthMode::Token {
            anyhow::bail!(
                "refusing to bind gateway to {} without auth (set gateway.auth.mode to \"token\" and gateway.auth.token or BEACON_GATEWAY_TOKEN)",
                bind
            );
        }
    }

    let telegram_token = config::resolve_telegram_token(&config);
    let webhook_url = config.channels.telegram.webhook_url.clone();
    let webhook_secret = config::resolve_webhook_secret(&config);
    let port = config.gateway.port;

    let (state, inbound_rx) = GatewayState::new(config);
    if state.debug_mode {
        log::info!("global debug enabled: developer mode is on for every user");
    }
    tokio::spawn(run_ingestion(state.clone(), inbound_rx));

    let telegram_webhook_for_shutdown: Option<Arc<TelegramClient>> =
        match (telegram_token, webhook_url) {
            (Some(token), Some(url)) => {
                let telegram = Arc::new(TelegramClient::new(token));
                if let Err(e) = telegram.set_webhook(&url, webhook_secret.as_deref()).await {
                    log::warn!("telegram set_webhook failed: {}", e);
                } else {
                    log::info!("telegram webhook registered: {}", url);
                }
                Some(telegram)
            }
            (None, Some(url)) => {
                log::info!(
                    "telegram webhook url {} configured without bot token; expecting it to be registered already",
                    url
                );
                None
            }
            _ => None,
        };

    let hub = state.hub.clone();
    let app = router(state);

    let bind_addr = format!("{}:{}", bind, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(hub, telegram_webhook_for_shutdown))
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
/// Closes the hub (clients get a shutdown event) and removes the Telegram webhook if we registered it.
async fn shutdown_signal(hub: Arc<BroadcastHub>, telegram_webhook: Option<Arc<TelegramClient>>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, broadcasting shutdown and draining connections");

    hub.shutdown();

    if let Some(t) = telegram_webhook {
        if let Err(e) = t.delete_webhook().await {
            log::debug!("telegram delete_webhook on shutdown: {}", e);
        }
    }
}

/// POST /telegram/webhook: receives Telegram update JSON; verifies optional secret, pushes InboundMessage.
async fn telegram_webhook(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if let Some(expected) = config::resolve_webhook_secret(&state.config) {
        let provided = headers
            .get("X-Telegram-Bot-Api-Secret-Token")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if provided != expected.as_str() {
            return StatusCode::FORBIDDEN;
        }
    }
    let payload = match parse_update(&body) {
        Ok(p) => p,
        Err(e) => {
            log::debug!("telegram webhook: rejecting body: {}", e);
            return StatusCode::BAD_REQUEST;
        }
    };
    let inbound = InboundMessage {
        provider: TELEGRAM_PROVIDER.to_string(),
        payload,
    };
    if state.inbound_tx.send(inbound).await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::OK
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "protocol": PROTOCOL_VERSION,
        "port": state.config.gateway.port,
    }))
}

/// GET /ws upgrades to WebSocket. First request must be connect; we reply with hello-ok.
async fn ws_handler(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Per-socket state: the connected user and its channel forwarders.
struct Connection {
    user: Option<String>,
    /// Forwarding tasks (hub subscription → frame_tx), one per attached channel.
    subscriptions: HashMap<ChannelName, JoinHandle<()>>,
    frame_tx: mpsc::Sender<String>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        for (_, task) in self.subscriptions.drain() {
            task.abort();
        }
    }
}

async fn send_json<T: Serialize>(socket: &mut WebSocket, value: &T) -> Result<(), axum::Error> {
    socket
        .send(Message::Text(serde_json::to_string(value).unwrap_or_default()))
        .await
}

async fn handle_socket(mut socket: WebSocket, state: GatewayState) {
    let mut notices = state.hub.notices();
    let (frame_tx, mut frame_rx) = mpsc::channel::<String>(state.config.broadcast.capacity.max(1));
    let mut conn = Connection {
        user: None,
        subscriptions: HashMap::new(),
        frame_tx,
    };

    loop {
        tokio::select! {
            biased;

            notice = notices.recv() => {
                match notice {
                    Ok(text) => {
                        let is_shutdown = text == SHUTDOWN_EVENT_JSON;
                        let _ = socket.send(Message::Text(text)).await;
                        if is_shutdown {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::debug!("ws client lagged {} notices", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            Some(frame) = frame_rx.recv() => {
                if socket.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                let Message::Text(text) = msg else { continue };
                let Ok(req): Result<WsRequest, _> = serde_json::from_str(&text) else { continue };

                if req.typ != "req" {
                    continue;
                }
                let res = handle_request(&state, &mut conn, &req).await;
                if send_json(&mut socket, &res).await.is_err() {
                    break;
                }
            }
        }
    }

    match conn.user {
        Some(ref user) => log::debug!("ws client {:?} disconnected", user),
        None => log::debug!("ws client disconnected before sending connect"),
    }
}

async fn handle_request(state: &GatewayState, conn: &mut Connection, req: &WsRequest) -> WsResponse {
    match req.method.as_str() {
        "connect" => return connect(state, conn, req),
        "health" => {
            return WsResponse::ok(
                &req.id,
                json!({ "runtime": "running", "protocol": PROTOCOL_VERSION }),
            )
        }
        _ => {}
    }
    let Some(user) = conn.user.clone() else {
        return WsResponse::err(&req.id, "connect required");
    };

    match req.method.as_str() {
        "subscribe" => {
            let Ok(params) = serde_json::from_value::<ChannelParams>(req.params.clone()) else {
                return WsResponse::err(&req.id, "invalid subscribe params");
            };
            let channel = params.channel;
            if conn.subscriptions.contains_key(&channel) {
                return WsResponse::ok(&req.id, json!({ "channel": channel, "subscribed": true }));
            }
            let Some(mut sub) = state.hub.attach(&user, &channel).await else {
                return WsResponse::err(&req.id, format!("forbidden: not authorized for {}", channel));
            };
            let tx = conn.frame_tx.clone();
            let task = tokio::spawn(async move {
                while let Some(frame) = sub.recv().await {
                    if tx.send(frame).await.is_err() {
                        break;
                    }
                }
                log::debug!("forwarder for {} stopped", sub.channel());
            });
            conn.subscriptions.insert(channel.clone(), task);
            WsResponse::ok(&req.id, json!({ "channel": channel, "subscribed": true }))
        }
        "unsubscribe" => {
            let Ok(params) = serde_json::from_value::<ChannelParams>(req.params.clone()) else {
                return WsResponse::err(&req.id, "invalid unsubscribe params");
            };
            if let Some(task) = conn.subscriptions.remove(&params.channel) {
                task.abort();
            }
            WsResponse::ok(&req.id, json!({ "channel": params.channel, "subscribed": false }))
        }
        "flags" => WsResponse::ok(
            &req.id,
            json!({ "developerMode": state.developer_mode(&user) }),
        ),
        "status" => {
            let auth_mode = if state.required_token.is_some() {
                "token"
            } else {
                "none"
            };
            let decision = state.developer_mode(&user);
            let mut payload = json!({
                "runtime": "running",
                "protocol": PROTOCOL_VERSION,
                "port": state.config.gateway.port,
                "auth": auth_mode,
                "user": user,
                "developerMode": decision,
            });
            if decision.enabled {
                let retained = state.store.len().await;
                let mut channels: Vec<&ChannelName> = conn.subscriptions.keys().collect();
                channels.sort();
                payload["developer"] = json!({
                    "bind": state.config.gateway.bind,
                    "globalDebug": state.debug_mode,
                    "channelFamilies": state.hub.authorizer().families(),
                    "subscriptions": channels,
                    "retainedMessages": retained,
                    "messageFields": state.config.broadcast.message_fields,
                });
            }
            WsResponse::ok(&req.id, payload)
        }
        "messages.recent" => {
            if !may_read_messages(state, &user) {
                return WsResponse::err(&req.id, "forbidden: not authorized for messages");
            }
            let params: RecentParams = serde_json::from_value(req.params.clone()).unwrap_or_default();
            let limit = params
                .limit
                .unwrap_or(RECENT_DEFAULT_LIMIT)
                .min(RECENT_MAX_LIMIT);
            let records = state.store.recent(limit).await;
            let messages: Vec<&InboundMessageRecord> = records.iter().map(|r| r.as_ref()).collect();
            WsResponse::ok(&req.id, json!({ "messages": messages }))
        }
        "messages.get" => {
            if !may_read_messages(state, &user) {
                return WsResponse::err(&req.id, "forbidden: not authorized for messages");
            }
            let Ok(params) = serde_json::from_value::<GetMessageParams>(req.params.clone()) else {
                return WsResponse::err(&req.id, "invalid messages.get params");
            };
            match state.store.get(&params.id).await {
                Some(record) => WsResponse::ok(&req.id, json!({ "message": record.as_ref() })),
                None => WsResponse::err(&req.id, "message not found"),
            }
        }
        _ => WsResponse::err(&req.id, format!("unknown method: {}", req.method)),
    }
}

/// Stored records are readable by whoever may attach to the dashboard channel.
fn may_read_messages(state: &GatewayState, user: &str) -> bool {
    state
        .hub
        .authorizer()
        .authorize(user, &state.config.broadcast.dashboard_channel)
}

fn connect(state: &GatewayState, conn: &mut Connection, req: &WsRequest) -> WsResponse {
    if conn.user.is_some() {
        return WsResponse::err(&req.id, "already connected");
    }
    let params: ConnectParams = match serde_json::from_value(req.params.clone()) {
        Ok(p) => p,
        Err(_) => return WsResponse::err(&req.id, "invalid connect params"),
    };
    if let Some(ref required) = state.required_token {
        let provided = params.auth.token.as_deref().unwrap_or("").trim();
        if provided.is_empty() {
            return WsResponse::err(
                &req.id,
                "unauthorized: gateway token missing (set BEACON_GATEWAY_TOKEN or gateway.auth.token)",
            );
        }
        if provided != required {
            return WsResponse::err(&req.id, "unauthorized: gateway token mismatch");
        }
    }
    let user = params.user.trim().to_string();
    if user.is_empty() {
        return WsResponse::err(&req.id, "invalid connect params: user is required");
    }
    let protocol = params
        .max_protocol
        .unwrap_or(PROTOCOL_VERSION)
        .min(PROTOCOL_VERSION);
    if protocol < params.min_protocol.unwrap_or(1) {
        return WsResponse::err(
            &req.id,
            format!("protocol mismatch: server supports {}", PROTOCOL_VERSION),
        );
    }
    let hello = HelloOk {
        typ: "hello-ok".to_string(),
        protocol,
        user: user.clone(),
        developer_mode: state.developer_mode(&user),
        policy: Some(HelloPolicy {
            dashboard_channel: state.config.broadcast.dashboard_channel.clone(),
        }),
    };
    let client = &params.client;
    log::debug!(
        "ws client connected as {:?} (client {} {} on {})",
        user,
        client.id.as_deref().unwrap_or("unknown"),
        client.version.as_deref().unwrap_or("-"),
        client.platform.as_deref().unwrap_or("-")
    );
    conn.user = Some(user);
    WsResponse::ok(&req.id, serde_json::to_value(&hello).unwrap_or(json!({})))
}
