//! Channel registry: register and lookup channels by id.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Handle to a running channel (stop, send message).
#[async_trait]
pub trait ChannelHandle: Send + Sync {
    /// Channel id (e.g. "telegram", "whatsapp").
    fn id(&self) -> &str;
    /// Stop the channel's background task.
    fn stop(&self);
    /// Send a text message to a conversation (Telegram chat_id, WhatsApp jid). Default returns error.
    async fn send_message(&self, _conversation_id: &str, _text: &str) -> Result<(), String> {
        Err("send not implemented".to_string())
    }
}

/// Registry of channel ids to handles. Shared across gateway.
pub struct ChannelRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<dyn ChannelHandle>>>>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a handle; a previous handle under the same id is stopped.
    pub async fn register(&self, handle: Arc<dyn ChannelHandle>) {
        let id = handle.id().to_string();
        let mut g = self.inner.write().await;
        if let Some(old) = g.insert(id, handle) {
            old.stop();
        }
    }

    pub async fn get(&self, id: &str) -> Option<Arc<dyn ChannelHandle>> {
        self.inner.read().await.get(id).cloned()
    }

    /// Stop every registered channel.
    pub async fn stop_all(&self) {
        for handle in self.inner.read().await.values() {
            handle.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        id: &'static str,
        stops: AtomicUsize,
    }

    #[async_trait]
    impl ChannelHandle for Counting {
        fn id(&self) -> &str {
            self.id
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn replacing_a_channel_stops_the_old_one() {
        let reg = ChannelRegistry::new();
        let first = Arc::new(Counting { id: "telegram", stops: AtomicUsize::new(0) });
        let second = Arc::new(Counting { id: "telegram", stops: AtomicUsize::new(0) });
        reg.register(first.clone()).await;
        reg.register(second.clone()).await;
        assert_eq!(first.stops.load(Ordering::SeqCst), 1);
        assert_eq!(second.stops.load(Ordering::SeqCst), 0);

        reg.stop_all().await;
        assert_eq!(second.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn default_send_is_an_error() {
        let reg = ChannelRegistry::new();
        reg.register(Arc::new(Counting { id: "x", stops: AtomicUsize::new(0) })).await;
        let handle = reg.get("x").await.unwrap();
        assert!(handle.send_message("1", "hi").await.is_err());
        assert!(reg.get("missing").await.is_none());
    }
}
