//! Relay: formats inbound posts and forwards them to the WhatsApp destination.
//!
//! [`try_send`] is the gate (destination set? link ready? then send once, no retry).
//! [`Relay::handle_inbound`] is the per-message adapter driven by the inbound processor task.

use crate::channels::{ChannelHandle, ChannelRegistry, InboundMessage};
use crate::news::{self, NewsTemplate};
use crate::status::StatusPublisher;
use std::fmt;
use std::sync::Arc;

/// Prefix of the Telegram command that relays its payload verbatim and confirms in the source chat.
pub const RAW_COMMAND_PREFIX: &str = "!wa ";

/// Fixed WhatsApp destination, read-only after startup. Empty id rejects every send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayTarget {
    pub destination_id: String,
    pub configured_at_startup: bool,
}

impl RelayTarget {
    pub fn new(destination: Option<String>) -> Self {
        let destination_id = destination.unwrap_or_default().trim().to_string();
        Self {
            configured_at_startup: !destination_id.is_empty(),
            destination_id,
        }
    }
}

/// Result of one relay attempt. A rejected message is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    RejectedNoDestination,
    RejectedNotReady,
    RejectedTransportError(String),
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent)
    }
}

impl fmt::Display for SendOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendOutcome::Sent => write!(f, "sent"),
            SendOutcome::RejectedNoDestination => write!(f, "whatsapp destination not configured"),
            SendOutcome::RejectedNotReady => write!(f, "whatsapp is not connected"),
            SendOutcome::RejectedTransportError(detail) => write!(f, "send failed: {}", detail),
        }
    }
}

/// Gate one outbound text. Rules short-circuit in order: destination, readiness, send.
pub async fn try_send(
    text: &str,
    outbound: &dyn ChannelHandle,
    target: &RelayTarget,
    status: &StatusPublisher,
) -> SendOutcome {
    if target.destination_id.is_empty() {
        log::warn!("relay: dropping message, no destination configured");
        return SendOutcome::RejectedNoDestination;
    }
    if !status.is_ready().await {
        log::warn!("relay: dropping message, {} not ready", outbound.id());
        return SendOutcome::RejectedNotReady;
    }
    match outbound.send_message(&target.destination_id, text).await {
        Ok(()) => SendOutcome::Sent,
        Err(e) => {
            log::warn!("relay: send to {} failed: {}", target.destination_id, e);
            SendOutcome::RejectedTransportError(e)
        }
    }
}

/// Per-message relay pipeline: formatter, gate, and command replies to the source chat.
pub struct Relay {
    template: NewsTemplate,
    target: RelayTarget,
    status: Arc<StatusPublisher>,
    outbound: Arc<dyn ChannelHandle>,
    /// Source channels, for `!wa` confirmations.
    sources: Arc<ChannelRegistry>,
    allowed_chat_ids: Vec<String>,
}

impl Relay {
    pub fn new(
        template: NewsTemplate,
        target: RelayTarget,
        status: Arc<StatusPublisher>,
        outbound: Arc<dyn ChannelHandle>,
        sources: Arc<ChannelRegistry>,
    ) -> Self {
        Self {
            template,
            target,
            status,
            outbound,
            sources,
            allowed_chat_ids: Vec::new(),
        }
    }

    /// Restrict relaying to these source chats; empty allows all.
    pub fn with_allowed_chats(mut self, ids: Vec<String>) -> Self {
        self.allowed_chat_ids = ids.into_iter().map(|s| s.trim().to_string()).collect();
        self
    }

    pub fn target(&self) -> &RelayTarget {
        &self.target
    }

    /// Relay `text` as-is (no news template), e.g. for the dashboard test-send.
    pub async fn send_raw(&self, text: &str) -> SendOutcome {
        try_send(text, self.outbound.as_ref(), &self.target, &self.status).await
    }

    /// Handle one inbound message. Returns None when the message was ignored (empty text,
    /// chat not allowed), otherwise the outcome of the single send attempt.
    pub async fn handle_inbound(&self, msg: &InboundMessage) -> Option<SendOutcome> {
        let text = msg.text.trim();
        if text.is_empty() {
            return None;
        }
        if !self.allowed_chat_ids.is_empty()
            && !self.allowed_chat_ids.iter().any(|id| id == &msg.conversation_id)
        {
            log::debug!("relay: ignoring message from chat {}", msg.conversation_id);
            return None;
        }

        if let Some(payload) = text.strip_prefix(RAW_COMMAND_PREFIX) {
            let payload = payload.trim();
            if payload.is_empty() {
                return None;
            }
            let outcome = self.send_raw(payload).await;
            self.confirm(msg, &outcome).await;
            return Some(outcome);
        }

        let announcement = news::format(text);
        let rendered = announcement.render(&self.template);
        let outcome = self.send_raw(&rendered).await;
        match &outcome {
            SendOutcome::Sent => log::info!(
                "relay: announcement \"{}\" from {}:{} sent",
                announcement.title,
                msg.channel_id,
                msg.conversation_id
            ),
            other => log::warn!(
                "relay: announcement \"{}\" dropped ({})",
                announcement.title,
                other
            ),
        }
        Some(outcome)
    }

    async fn confirm(&self, msg: &InboundMessage, outcome: &SendOutcome) {
        let Some(source) = self.sources.get(&msg.channel_id).await else {
            return;
        };
        let reply = if outcome.is_sent() {
            "✅ Enviado ao WhatsApp.".to_string()
        } else {
            format!("❌ Falha ao enviar ao WhatsApp: {}", outcome)
        };
        if let Err(e) = source.send_message(&msg.conversation_id, &reply).await {
            log::warn!("relay: reply to {} failed: {}", msg.conversation_id, e);
        }
    }
}
