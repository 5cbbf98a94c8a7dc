//! Inbound message from a channel: handed to the relay processor.

use chrono::{DateTime, Utc};

/// A message from a channel, to be formatted and relayed to WhatsApp.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub channel_id: String,
    /// Source chat (e.g. Telegram chat id), used for command replies.
    pub conversation_id: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
}
