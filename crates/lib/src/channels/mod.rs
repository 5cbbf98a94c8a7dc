//! Communication channels: Telegram (inbound source) and WhatsApp (relay destination).
//!
//! Both implement [`ChannelHandle`] so the gateway can stop them on shutdown and the
//! relay can send through either one.

mod inbound;
mod registry;
mod telegram;
pub mod whatsapp;

pub use inbound::InboundMessage;
pub use registry::{ChannelHandle, ChannelRegistry};
pub use telegram::{TelegramChannel, TelegramUpdate};
pub use whatsapp::WhatsAppChannel;
