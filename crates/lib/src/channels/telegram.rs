//! Telegram channel: long-poll getUpdates (or webhook) for inbound posts, sendMessage for replies.

use crate::channels::inbound::InboundMessage;
use crate::channels::registry::ChannelHandle;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const LONG_POLL_TIMEOUT: u64 = 30;
const CHANNEL_ID: &str = "telegram";

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram update payload (getUpdates result item or webhook POST body).
#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
    /// Posts in a channel the bot administers.
    #[serde(default)]
    pub channel_post: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub chat: TelegramChat,
    /// Unix seconds.
    #[serde(default)]
    pub date: i64,
    #[serde(default)]
    pub text: Option<String>,
    /// Media posts carry their text here.
    #[serde(default)]
    pub caption: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
struct BotUser {
    #[serde(default)]
    username: Option<String>,
}

impl TelegramUpdate {
    /// Convert to an inbound message. Updates without text (stickers, joins, edits) yield None.
    pub fn into_inbound(self) -> Option<InboundMessage> {
        let msg = self.message.or(self.channel_post)?;
        let text = msg.text.or(msg.caption)?;
        let received_at = DateTime::<Utc>::from_timestamp(msg.date, 0).unwrap_or_else(Utc::now);
        Some(InboundMessage {
            channel_id: CHANNEL_ID.to_string(),
            conversation_id: msg.chat.id.to_string(),
            text,
            received_at,
        })
    }
}

/// Telegram channel connector: long-polls for updates and sends replies via sendMessage.
pub struct TelegramChannel {
    token: String,
    api_base: String,
    running: AtomicBool,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(token: String, api_base: Option<String>) -> Self {
        let api_base = api_base
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| TELEGRAM_API_BASE.to_string());
        Self {
            token,
            api_base,
            running: AtomicBool::new(false),
            client: reqwest::Client::new(),
        }
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// Start the getUpdates long-poll loop and forward messages to the relay. Returns a handle to await on shutdown.
    pub fn start_inbound(
        self: Arc<Self>,
        inbound_tx: mpsc::Sender<InboundMessage>,
    ) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        log::info!("telegram channel: starting getUpdates long-poll loop");
        tokio::spawn(async move {
            run_get_updates_loop(self, inbound_tx).await;
        })
    }

    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<T, String> {
        let res = self
            .client
            .post(self.method_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(format!("{} failed: {} {}", method, status, body));
        }
        let data: ApiResponse<T> = res.json().await.map_err(|e| e.to_string())?;
        if !data.ok {
            return Err(format!(
                "{} returned ok: false ({})",
                method,
                data.description.unwrap_or_default()
            ));
        }
        data.result
            .ok_or_else(|| format!("{} returned no result", method))
    }

    /// Verify the bot token. Returns the bot username.
    pub async fn get_me(&self) -> Result<String, String> {
        let me: BotUser = self.call("getMe", &serde_json::json!({})).await?;
        Ok(me.username.unwrap_or_default())
    }

    /// Call Telegram getUpdates (long poll). Returns (updates, next_offset).
    async fn get_updates(
        &self,
        offset: Option<i64>,
    ) -> Result<(Vec<TelegramUpdate>, Option<i64>), String> {
        let mut body = serde_json::json!({
            "timeout": LONG_POLL_TIMEOUT,
            "allowed_updates": ["message", "channel_post"],
        });
        if let Some(off) = offset {
            body["offset"] = serde_json::Value::from(off);
        }
        let updates: Vec<TelegramUpdate> = self.call("getUpdates", &body).await?;
        let next_offset = updates
            .iter()
            .map(|u| u.update_id)
            .max()
            .map(|id| id + 1)
            .or(offset);
        Ok((updates, next_offset))
    }

    /// Set webhook URL (and optional secret). When set, Telegram POSTs updates to the URL instead of getUpdates.
    pub async fn set_webhook(&self, url: &str, secret: Option<&str>) -> Result<(), String> {
        let mut body = serde_json::json!({
            "url": url,
            "allowed_updates": ["message", "channel_post"],
        });
        if let Some(s) = secret {
            body["secret_token"] = serde_json::Value::String(s.to_string());
        }
        let _: bool = self.call("setWebhook", &body).await?;
        Ok(())
    }

    /// Remove webhook so the bot can use getUpdates again.
    pub async fn delete_webhook(&self) -> Result<(), String> {
        let _: bool = self.call("deleteWebhook", &serde_json::json!({})).await?;
        Ok(())
    }

    /// Send a text message to a chat via sendMessage API.
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), String> {
        let body = serde_json::json!({ "chat_id": chat_id, "text": text });
        let _: serde_json::Value = self.call("sendMessage", &body).await?;
        Ok(())
    }
}

async fn run_get_updates_loop(
    channel: Arc<TelegramChannel>,
    inbound_tx: mpsc::Sender<InboundMessage>,
) {
    let mut offset: Option<i64> = None;
    while channel.running() {
        match channel.get_updates(offset).await {
            Ok((updates, next)) => {
                offset = next;
                for inbound in updates.into_iter().filter_map(TelegramUpdate::into_inbound) {
                    if inbound_tx.send(inbound).await.is_err() {
                        log::debug!("telegram: inbound channel closed, stopping loop");
                        return;
                    }
                }
            }
            Err(e) => {
                log::debug!("telegram getUpdates error: {}", e);
                tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;
            }
        }
    }
    log::info!("telegram channel: getUpdates loop stopped");
}

#[async_trait]
impl ChannelHandle for TelegramChannel {
    fn id(&self) -> &str {
        CHANNEL_ID
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), String> {
        TelegramChannel::send_message(self, conversation_id, text).await
    }
}
