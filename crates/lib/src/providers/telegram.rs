//! Telegram provider: webhook update parsing and setWebhook/deleteWebhook via Bot API.

use serde::Deserialize;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Provider id recorded on Telegram messages.
pub const TELEGRAM_PROVIDER: &str = "telegram";

/// Telegram update payload (webhook POST body). Only the fields needed to validate it.
#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub chat: TelegramChat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

/// Validate a webhook body as a Telegram update and return it as raw JSON (kept verbatim in the record).
pub fn parse_update(body: &[u8]) -> Result<serde_json::Value, serde_json::Error> {
    let raw: serde_json::Value = serde_json::from_slice(body)?;
    let update = TelegramUpdate::deserialize(&raw)?;
    log::debug!(
        "telegram update {} (chat {:?})",
        update.update_id,
        update.message.as_ref().map(|m| m.chat.id)
    );
    Ok(raw)
}

/// Resolve Telegram bot API base URL: TELEGRAM_API_BASE env (tests, custom endpoints) or the public API.
pub fn telegram_api_base() -> String {
    std::env::var("TELEGRAM_API_BASE").unwrap_or_else(|_| TELEGRAM_API_BASE.to_string())
}

/// Bot API client for webhook registration.
pub struct TelegramClient {
    token: String,
    base: String,
    client: reqwest::Client,
}

impl TelegramClient {
    pub fn new(token: String) -> Self {
        Self {
            token,
            base: telegram_api_base(),
            client: reqwest::Client::new(),
        }
    }

    /// Set webhook URL (and optional secret). Telegram then POSTs updates to the URL.
    pub async fn set_webhook(&self, url: &str, secret: Option<&str>) -> Result<(), String> {
        let api_url = format!("{}/bot{}/setWebhook", self.base, self.token);
        let mut body = serde_json::json!({ "url": url });
        if let Some(s) = secret {
            body["secret_token"] = serde_json::Value::String(s.to_string());
        }
        let res = self
            .client
            .post(&api_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(format!("setWebhook failed: {} {}", status, body));
        }
        Ok(())
    }

    /// Remove the webhook (on shutdown).
    pub async fn delete_webhook(&self) -> Result<(), String> {
        let url = format!("{}/bot{}/deleteWebhook", self.base, self.token);
        let res = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(format!("deleteWebhook failed: {} {}", status, body));
        }
        Ok(())
    }
}
