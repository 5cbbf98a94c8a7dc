//! WhatsApp channel backed by an HTTP WhatsApp bridge (Evolution API style).
//!
//! The bridge owns the WhatsApp Web session, its token storage and QR generation; this module
//! only sends text, polls the connection state and turns bridge signals into [`ChannelEvent`]s.

use crate::channels::registry::ChannelHandle;
use crate::status::{ChannelEvent, ChannelState, LinkPhase, StatusPublisher};
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const CHANNEL_ID: &str = "whatsapp";
/// Chats logged after a connect, to help pick the destination id.
const CHAT_LIST_LIMIT: usize = 25;

#[derive(Debug, thiserror::Error)]
pub enum WhatsAppError {
    #[error("whatsapp bridge request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("whatsapp bridge api error: {0}")]
    Api(String),
}

/// One chat known to the WhatsApp session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSummary {
    pub id: String,
    pub name: Option<String>,
    pub is_group: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChat {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    remote_jid: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    push_name: Option<String>,
}

impl RawChat {
    fn into_summary(self) -> Option<ChatSummary> {
        let id = self.remote_jid.or(self.id).filter(|s| !s.is_empty())?;
        let name = self.name.or(self.push_name).filter(|s| !s.is_empty());
        Some(ChatSummary {
            is_group: id.ends_with("@g.us"),
            id,
            name,
        })
    }
}

/// Map a bridge connection-state string to a lifecycle event. Unknown or transitional
/// states (e.g. "connecting") produce no signal.
pub fn event_from_connection_state(state: &str) -> Option<ChannelEvent> {
    let s = state.trim().to_ascii_lowercase();
    match s.as_str() {
        "open" | "connected" => Some(ChannelEvent::Connected),
        "close" | "closed" | "disconnected" | "unpaired" | "unpaired_idle" | "conflict"
        | "unlaunched" => Some(ChannelEvent::Disconnected(s)),
        _ => None,
    }
}

/// Normalize a bridge QR payload into a `data:image/png;base64,...` URL. Empty payloads yield None.
pub fn qr_data_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw.starts_with("data:image") {
        Some(raw.to_string())
    } else {
        Some(format!("data:image/png;base64,{}", raw))
    }
}

/// Decode the image bytes of a base64 data URL.
pub fn decode_data_url(data_url: &str) -> Option<Vec<u8>> {
    let (_, payload) = data_url.split_once(";base64,")?;
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .ok()
}

/// Translate a bridge webhook payload (`{event, data}`) into a lifecycle event.
pub fn event_from_webhook(payload: &serde_json::Value) -> Option<ChannelEvent> {
    let event = payload.get("event")?.as_str()?.to_ascii_lowercase().replace('_', ".");
    let data = payload.get("data")?;
    match event.as_str() {
        "qrcode.updated" => {
            let qr = data["qrcode"]["base64"]
                .as_str()
                .or_else(|| data["qrcode"].as_str())?;
            qr_data_url(qr).map(ChannelEvent::PairingArtifact)
        }
        "connection.update" => event_from_connection_state(data["state"].as_str()?),
        _ => None,
    }
}

/// True when a fresh QR should be requested: none is held, or both the held QR and the last
/// connect request (`last_request`) are older than `refresh`.
pub fn needs_fresh_qr(
    state: &ChannelState,
    last_request: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    refresh: Duration,
) -> bool {
    if state.phase == LinkPhase::Connected {
        return false;
    }
    if state.last_qr.is_none() {
        return true;
    }
    let since = last_request.map_or(state.last_transition_at, |at| {
        at.max(state.last_transition_at)
    });
    let age = now.signed_duration_since(since);
    age.to_std().map(|a| a >= refresh).unwrap_or(false)
}

/// Client for one WhatsApp bridge instance (session).
pub struct WhatsAppChannel {
    api_url: String,
    api_key: String,
    instance: String,
    running: AtomicBool,
    client: reqwest::Client,
}

impl WhatsAppChannel {
    pub fn new(api_url: &str, api_key: &str, instance: &str) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            instance: instance.to_string(),
            running: AtomicBool::new(false),
            client: reqwest::Client::new(),
        }
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn call(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value, WhatsAppError> {
        let url = format!("{}/{}/{}", self.api_url, path, self.instance);
        let mut req = self
            .client
            .request(method, &url)
            .header("apikey", &self.api_key);
        if let Some(b) = body {
            req = req.json(b);
        }
        let res = req.send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(WhatsAppError::Api(format!(
                "{} {}: {} {}",
                path, self.instance, status, body
            )));
        }
        Ok(res.json().await?)
    }

    /// GET /instance/connectionState — raw state string (e.g. "open", "close", "connecting").
    pub async fn connection_state(&self) -> Result<String, WhatsAppError> {
        let body = self.call(reqwest::Method::GET, "instance/connectionState", None).await?;
        let state = body["instance"]["state"]
            .as_str()
            .or_else(|| body["state"].as_str())
            .ok_or_else(|| {
                WhatsAppError::Api("connectionState response without state".to_string())
            })?;
        Ok(state.to_string())
    }

    /// GET /instance/connect — asks the bridge to (re)start pairing.
    /// Returns the QR as a data URL when one is issued.
    pub async fn connect(&self) -> Result<Option<String>, WhatsAppError> {
        let body = self.call(reqwest::Method::GET, "instance/connect", None).await?;
        let qr = body["base64"]
            .as_str()
            .or_else(|| body["qrcode"]["base64"].as_str())
            .unwrap_or("");
        Ok(qr_data_url(qr))
    }

    /// POST /message/sendText — send a text to a contact (`...@c.us`) or group (`...@g.us`).
    pub async fn send_text(&self, number: &str, text: &str) -> Result<(), WhatsAppError> {
        let body = serde_json::json!({ "number": number, "text": text });
        self.call(reqwest::Method::POST, "message/sendText", Some(&body))
            .await?;
        Ok(())
    }

    /// POST /chat/findChats — chats known to the session.
    pub async fn find_chats(&self) -> Result<Vec<ChatSummary>, WhatsAppError> {
        let body = self
            .call(reqwest::Method::POST, "chat/findChats", Some(&serde_json::json!({})))
            .await?;
        let raw: Vec<RawChat> = serde_json::from_value(body)
            .map_err(|e| WhatsAppError::Api(format!("findChats: {}", e)))?;
        Ok(raw.into_iter().filter_map(RawChat::into_summary).collect())
    }

    /// Start the lifecycle watcher: polls the connection state, requests QR codes while unpaired
    /// and publishes every signal to `status`. Returns a handle to await on shutdown.
    pub fn start_lifecycle(
        self: Arc<Self>,
        status: Arc<StatusPublisher>,
        poll_interval: Duration,
        qr_refresh: Duration,
    ) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        log::info!("whatsapp channel: watching bridge instance {}", self.instance);
        tokio::spawn(async move {
            run_lifecycle_loop(self, status, poll_interval, qr_refresh).await;
        })
    }

    async fn log_chats(&self) {
        match self.find_chats().await {
            Ok(chats) => {
                log::info!("whatsapp chats detected ({}):", chats.len());
                for chat in chats.iter().take(CHAT_LIST_LIMIT) {
                    let kind = if chat.is_group { "group" } else { "contact" };
                    log::info!(
                        " - {} | {} | {}",
                        kind,
                        chat.name.as_deref().unwrap_or("(no name)"),
                        chat.id
                    );
                }
                if chats.len() > CHAT_LIST_LIMIT {
                    log::info!("... (+{} hidden)", chats.len() - CHAT_LIST_LIMIT);
                }
            }
            Err(e) => log::warn!("could not list whatsapp chats: {}", e),
        }
    }
}

async fn run_lifecycle_loop(
    channel: Arc<WhatsAppChannel>,
    status: Arc<StatusPublisher>,
    poll_interval: Duration,
    qr_refresh: Duration,
) {
    let mut chats_listed = false;
    let mut last_qr_request: Option<DateTime<Utc>> = None;
    while channel.running() {
        match channel.connection_state().await {
            Ok(state) => {
                if let Some(event) = event_from_connection_state(&state) {
                    status.apply(event).await;
                }
            }
            Err(e) => log::debug!("whatsapp connectionState error: {}", e),
        }

        let snapshot = status.snapshot().await;
        if snapshot.ready {
            if !chats_listed {
                chats_listed = true;
                channel.log_chats().await;
            }
        } else {
            chats_listed = false;
            if needs_fresh_qr(&snapshot, last_qr_request, Utc::now(), qr_refresh) {
                last_qr_request = Some(Utc::now());
                match channel.connect().await {
                    Ok(Some(qr)) => {
                        if status.apply(ChannelEvent::PairingArtifact(qr)).await {
                            log::info!("whatsapp QR issued; open /qr to scan it");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => log::debug!("whatsapp connect error: {}", e),
                }
            }
        }

        tokio::time::sleep(poll_interval).await;
    }
    log::info!("whatsapp channel: lifecycle watcher stopped");
}

#[async_trait]
impl ChannelHandle for WhatsAppChannel {
    fn id(&self) -> &str {
        CHANNEL_ID
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), String> {
        self.send_text(conversation_id, text)
            .await
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_states_map_explicitly() {
        assert_eq!(event_from_connection_state("open"), Some(ChannelEvent::Connected));
        assert_eq!(event_from_connection_state("CONNECTED"), Some(ChannelEvent::Connected));
        assert_eq!(
            event_from_connection_state("close"),
            Some(ChannelEvent::Disconnected("close".into()))
        );
        assert_eq!(
            event_from_connection_state("UNPAIRED_IDLE"),
            Some(ChannelEvent::Disconnected("unpaired_idle".into()))
        );
        assert_eq!(event_from_connection_state("connecting"), None);
        assert_eq!(event_from_connection_state("CONNECTED_ISH"), None);
    }

    #[test]
    fn qr_payloads_become_data_urls() {
        assert_eq!(qr_data_url("  "), None);
        assert_eq!(qr_data_url("QUJD").as_deref(), Some("data:image/png;base64,QUJD"));
        assert_eq!(
            qr_data_url("data:image/png;base64,QUJD").as_deref(),
            Some("data:image/png;base64,QUJD")
        );
        assert_eq!(decode_data_url("data:image/png;base64,QUJD"), Some(b"ABC".to_vec()));
        assert_eq!(decode_data_url("not a data url"), None);
    }

    #[test]
    fn webhook_events_are_translated() {
        let qr = serde_json::json!({
            "event": "qrcode.updated",
            "data": {"qrcode": {"base64": "QUJD"}}
        });
        assert_eq!(
            event_from_webhook(&qr),
            Some(ChannelEvent::PairingArtifact("data:image/png;base64,QUJD".into()))
        );
        let conn = serde_json::json!({"event": "CONNECTION_UPDATE", "data": {"state": "open"}});
        assert_eq!(event_from_webhook(&conn), Some(ChannelEvent::Connected));
        let msg = serde_json::json!({"event": "messages.upsert", "data": {}});
        assert_eq!(event_from_webhook(&msg), None);
    }

    #[test]
    fn chat_list_prefers_jid_and_flags_groups() {
        let raw: Vec<RawChat> = serde_json::from_value(serde_json::json!([
            {"id": "cuid1", "remoteJid": "555491739682-1532652400@g.us", "name": "News"},
            {"id": "559999999999@c.us", "pushName": "Ana"},
            {"name": "no id"}
        ]))
        .unwrap();
        let chats: Vec<ChatSummary> = raw.into_iter().filter_map(RawChat::into_summary).collect();
        assert_eq!(chats.len(), 2);
        assert_eq!(chats[0].id, "555491739682-1532652400@g.us");
        assert!(chats[0].is_group);
        assert_eq!(chats[1].name.as_deref(), Some("Ana"));
        assert!(!chats[1].is_group);
    }

    #[test]
    fn fresh_qr_needed_when_missing_or_stale() {
        let now = Utc::now();
        let refresh = Duration::from_secs(30);
        let mut s = ChannelState::default();
        assert!(needs_fresh_qr(&s, None, now, refresh));
        assert!(needs_fresh_qr(&s, Some(now), now, refresh));

        s.phase = LinkPhase::AwaitingPairing;
        s.last_qr = Some("data:x".into());
        s.last_transition_at = now - chrono::Duration::seconds(5);
        assert!(!needs_fresh_qr(&s, None, now, refresh));
        s.last_transition_at = now - chrono::Duration::seconds(31);
        assert!(needs_fresh_qr(&s, None, now, refresh));

        s.phase = LinkPhase::Connected;
        s.last_qr = None;
        assert!(!needs_fresh_qr(&s, None, now, refresh));
    }

    #[tokio::test]
    async fn unchanged_qr_is_not_requested_again_every_poll() {
        let refresh = Duration::from_secs(30);
        let status = StatusPublisher::new();
        let t0 = Utc::now();
        assert!(status.apply(ChannelEvent::PairingArtifact("data:a".into())).await);

        // Bridge hands back the same QR 31s later: the state does not move.
        let requested_at = t0 + chrono::Duration::seconds(31);
        assert!(!status.apply(ChannelEvent::PairingArtifact("data:a".into())).await);
        let snapshot = status.snapshot().await;
        assert!(snapshot.last_transition_at <= t0 + chrono::Duration::seconds(1));

        let next_poll = requested_at + chrono::Duration::seconds(5);
        assert!(!needs_fresh_qr(&snapshot, Some(requested_at), next_poll, refresh));
        let after_refresh = requested_at + chrono::Duration::seconds(30);
        assert!(needs_fresh_qr(&snapshot, Some(requested_at), after_refresh, refresh));
    }
}
