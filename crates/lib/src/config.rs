//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.beacon/config.json`) and environment.
//! Every section has defaults, so an empty file (or no file) is a valid config.

use crate::authz::ChannelName;
use crate::broadcast::RecordField;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Inbound provider settings (e.g. Telegram webhook).
    #[serde(default)]
    pub channels: ChannelsConfig,

    /// Broadcast fan-out settings.
    #[serde(default)]
    pub broadcast: BroadcastConfig,

    /// Super users and private channel rules.
    #[serde(default)]
    pub authorization: AuthorizationConfig,

    /// Global debug switch; turns developer mode on for everyone. Overridden by BEACON_DEBUG env.
    #[serde(default)]
    pub debug: bool,
}

impl Config {
    /// Reject settings that would expose stored messages to unauthenticated subscribers.
    pub fn validate(&self) -> Result<()> {
        let dashboard = &self.broadcast.dashboard_channel;
        if dashboard.family().is_none() {
            anyhow::bail!(
                "broadcast.dashboardChannel {:?} must be a private channel (\"{}<family>\")",
                dashboard.as_str(),
                crate::authz::PRIVATE_PREFIX
            );
        }
        Ok(())
    }
}

/// Gateway bind, port, and auth settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for HTTP and WebSocket (default 15152).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,

    /// Auth settings. When absent, defaults to no auth for loopback bind.
    #[serde(default)]
    pub auth: GatewayAuthConfig,
}

/// Gateway auth: token or none (loopback-only when none).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayAuthConfig {
    /// "none" = no shared secret (only safe when bind is loopback). "token" = require connect.auth.token.
    #[serde(default)]
    pub mode: GatewayAuthMode,

    /// Shared secret for WebSocket connect. Overridden by BEACON_GATEWAY_TOKEN env.
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayAuthMode {
    /// No auth; allow only when bind is loopback.
    #[default]
    None,

    /// Require connect.auth.token to match configured token.
    Token,
}

fn default_gateway_port() -> u16 {
    15152
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
            auth: GatewayAuthConfig::default(),
        }
    }
}

/// Per-provider config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsConfig {
    #[serde(default)]
    pub telegram: TelegramChannelConfig,
}

/// Telegram provider config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramChannelConfig {
    /// Bot token from BotFather. Overridden by TELEGRAM_BOT_TOKEN env when set. Only needed to register the webhook.
    pub bot_token: Option<String>,
    /// Public URL Telegram should POST updates to. When set with a bot token, the webhook is registered at startup.
    pub webhook_url: Option<String>,
    /// Optional secret for webhook verification (X-Telegram-Bot-Api-Secret-Token).
    pub webhook_secret: Option<String>,
}

/// Broadcast settings: buffers, timeouts, and what a dashboard subscriber gets to see.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastConfig {
    /// Frames buffered per channel before slow subscribers start lagging (default 64).
    #[serde(default = "default_broadcast_capacity")]
    pub capacity: usize,

    /// Upper bound for a single channel delivery in milliseconds (default 5000).
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,

    /// Channel inbound messages are announced on (default "private-dashboard").
    #[serde(default = "default_dashboard_channel")]
    pub dashboard_channel: ChannelName,

    /// Record fields included in the message.received payload. Empty (default) broadcasts `{}`;
    /// clients then re-fetch through `messages.recent`.
    #[serde(default)]
    pub message_fields: Vec<RecordField>,

    /// Inbound records kept in memory (default 1000).
    #[serde(default = "default_retain_messages")]
    pub retain_messages: usize,
}

fn default_broadcast_capacity() -> usize {
    64
}

fn default_delivery_timeout_ms() -> u64 {
    5_000
}

fn default_dashboard_channel() -> ChannelName {
    ChannelName::private("dashboard", None)
}

fn default_retain_messages() -> usize {
    1_000
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            capacity: default_broadcast_capacity(),
            delivery_timeout_ms: default_delivery_timeout_ms(),
            dashboard_channel: default_dashboard_channel(),
            message_fields: Vec::new(),
            retain_messages: default_retain_messages(),
        }
    }
}

impl BroadcastConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

/// Who holds the super permission, and who may attach to each private channel family.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationConfig {
    /// Identities holding the super permission (developer mode, every superUsers channel).
    #[serde(default)]
    pub super_users: Vec<String>,

    /// Channel family (e.g. "dashboard" for "private-dashboard") to rule. Families not listed deny everyone.
    #[serde(default = "default_channel_rules")]
    pub channels: BTreeMap<String, ChannelRuleConfig>,
}

/// Access rule for one private channel family.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRuleConfig {
    /// Identities always admitted.
    #[serde(default)]
    pub members: Vec<String>,
    /// When true, super users are admitted too.
    #[serde(default)]
    pub super_users: bool,
}

fn default_channel_rules() -> BTreeMap<String, ChannelRuleConfig> {
    let mut rules = BTreeMap::new();
    rules.insert(
        "dashboard".to_string(),
        ChannelRuleConfig {
            members: Vec::new(),
            super_users: true,
        },
    );
    rules
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            super_users: Vec::new(),
            channels: default_channel_rules(),
        }
    }
}

/// Non-empty, trimmed env var value.
fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Resolve the gateway token: env BEACON_GATEWAY_TOKEN overrides config.
pub fn resolve_gateway_token(config: &Config) -> Option<String> {
    env_nonempty("BEACON_GATEWAY_TOKEN").or_else(|| {
        config
            .gateway
            .auth
            .token
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Resolve the Telegram bot token: env TELEGRAM_BOT_TOKEN overrides config.
pub fn resolve_telegram_token(config: &Config) -> Option<String> {
    env_nonempty("TELEGRAM_BOT_TOKEN").or_else(|| {
        config
            .channels
            .telegram
            .bot_token
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Webhook secret from config; blank values count as unset.
pub fn resolve_webhook_secret(config: &Config) -> Option<String> {
    config
        .channels
        .telegram
        .webhook_secret
        .as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve the global debug switch once: BEACON_DEBUG (1/true/yes/on, 0/false/no/off) overrides config.
pub fn resolve_debug_mode(config: &Config) -> bool {
    match env_nonempty("BEACON_DEBUG") {
        Some(v) => parse_bool_flag(&v).unwrap_or_else(|| {
            log::warn!("ignoring unrecognized BEACON_DEBUG value {:?}", v);
            config.debug
        }),
        None => config.debug,
    }
}

fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// True if the bind address is loopback (127.0.0.1, ::1, etc.).
pub fn is_loopback_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "127.0.0.1" || b == "::1" || b == "localhost"
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("BEACON_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".beacon").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path, BEACON_CONFIG_PATH, or the default path. Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    config
        .validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok((config, path))
}
