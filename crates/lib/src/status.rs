//! WhatsApp link status: the single source of truth read by the dashboard and the relay gate.
//!
//! Lifecycle signals from the WhatsApp bridge are translated into [`ChannelEvent`]s and applied
//! through [`StatusPublisher::apply`], the only writer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// Lifecycle signal from the outbound client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A pairing QR was issued (data URL).
    PairingArtifact(String),
    Connected,
    Disconnected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LinkPhase {
    Disconnected,
    AwaitingPairing,
    Connected,
}

/// Snapshot of the WhatsApp link. `ready` implies `last_qr` is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelState {
    pub phase: LinkPhase,
    pub ready: bool,
    pub last_qr: Option<String>,
    pub last_transition_at: DateTime<Utc>,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            phase: LinkPhase::Disconnected,
            ready: false,
            last_qr: None,
            last_transition_at: Utc::now(),
        }
    }
}

impl ChannelState {
    /// Apply one event; returns false when the event does not change anything.
    fn transition(&mut self, event: ChannelEvent, now: DateTime<Utc>) -> bool {
        match event {
            ChannelEvent::PairingArtifact(qr) => {
                if self.phase == LinkPhase::AwaitingPairing
                    && self.last_qr.as_deref() == Some(qr.as_str())
                {
                    return false;
                }
                self.phase = LinkPhase::AwaitingPairing;
                self.ready = false;
                self.last_qr = Some(qr);
            }
            ChannelEvent::Connected => {
                if self.phase == LinkPhase::Connected {
                    return false;
                }
                self.phase = LinkPhase::Connected;
                self.ready = true;
                self.last_qr = None;
            }
            ChannelEvent::Disconnected(_) => {
                if self.phase == LinkPhase::Disconnected {
                    return false;
                }
                // The QR artifact survives a disconnect; only a new artifact or a connect replaces it.
                self.phase = LinkPhase::Disconnected;
                self.ready = false;
            }
        }
        self.last_transition_at = now;
        true
    }
}

/// Shared, lock-guarded link status plus the Telegram activity flag.
#[derive(Default)]
pub struct StatusPublisher {
    state: RwLock<ChannelState>,
    telegram_active: AtomicBool,
}

impl StatusPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a lifecycle event. Returns true when the state changed.
    pub async fn apply(&self, event: ChannelEvent) -> bool {
        let label = match &event {
            ChannelEvent::PairingArtifact(_) => "pairing artifact".to_string(),
            ChannelEvent::Connected => "connected".to_string(),
            ChannelEvent::Disconnected(reason) => format!("disconnected ({})", reason),
        };
        let changed = self.state.write().await.transition(event, Utc::now());
        if changed {
            log::info!("whatsapp link: {}", label);
        } else {
            log::debug!("whatsapp link: duplicate {} ignored", label);
        }
        changed
    }

    pub async fn snapshot(&self) -> ChannelState {
        self.state.read().await.clone()
    }

    pub async fn is_ready(&self) -> bool {
        self.state.read().await.ready
    }

    pub fn set_telegram_active(&self, active: bool) {
        self.telegram_active.store(active, Ordering::SeqCst);
    }

    pub fn telegram_active(&self) -> bool {
        self.telegram_active.load(Ordering::SeqCst)
    }
}
