//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.tgwa/config.json`); environment variables
//! override individual values (see the `resolve_*` functions).

use crate::news::NewsTemplate;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Dashboard server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Telegram (source) and WhatsApp (destination) settings.
    #[serde(default)]
    pub channels: ChannelsConfig,

    /// Literal text of relayed announcements.
    #[serde(default)]
    pub news: NewsTemplate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// HTTP port (default 3000). Overridden by PORT env.
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "0.0.0.0" so the QR page is reachable from a phone).
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_port() -> u16 {
    3000
}

fn default_gateway_bind() -> String {
    "0.0.0.0".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsConfig {
    #[serde(default)]
    pub telegram: TelegramChannelConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppChannelConfig,
}

/// Telegram channel config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramChannelConfig {
    /// Bot token from BotFather. Overridden by TELEGRAM_BOT_TOKEN (or TELEGRAM_TOKEN) env when set.
    pub bot_token: Option<String>,
    /// Bot API base URL (default https://api.telegram.org). Overridden by TELEGRAM_API_BASE env.
    pub api_base: Option<String>,
    /// When set, use webhook mode: Telegram POSTs updates to this URL. If unset, long-poll getUpdates is used.
    pub webhook_url: Option<String>,
    /// Optional secret for webhook verification (X-Telegram-Bot-Api-Secret-Token). Used only when webhook_url is set.
    pub webhook_secret: Option<String>,
    /// Only relay messages from these chat ids. Empty relays every chat.
    #[serde(default)]
    pub allowed_chat_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatsAppChannelConfig {
    /// WhatsApp bridge base URL. Overridden by WHATSAPP_API_URL env.
    #[serde(default = "default_whatsapp_api_url")]
    pub api_url: String,
    /// Bridge API key, sent as the `apikey` header. Overridden by WHATSAPP_API_KEY env.
    pub api_key: Option<String>,
    /// Bridge instance (session) name. Overridden by SESSION_NAME env.
    #[serde(default = "default_session_name")]
    pub session_name: String,
    /// Destination contact (`...@c.us`) or group (`...@g.us`). Overridden by WHATSAPP_DESTINO env.
    pub destination: Option<String>,
    /// When false, the bridge starts without a destination (pairing only) and every relay is rejected.
    #[serde(default = "default_true")]
    pub require_destination: bool,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Age after which an unscanned QR is replaced.
    #[serde(default = "default_qr_refresh_secs")]
    pub qr_refresh_secs: u64,
}

fn default_whatsapp_api_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_session_name() -> String {
    "noticia-bot".to_string()
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_qr_refresh_secs() -> u64 {
    30
}

impl Default for WhatsAppChannelConfig {
    fn default() -> Self {
        Self {
            api_url: default_whatsapp_api_url(),
            api_key: None,
            session_name: default_session_name(),
            destination: None,
            require_destination: default_true(),
            poll_interval_secs: default_poll_interval_secs(),
            qr_refresh_secs: default_qr_refresh_secs(),
        }
    }
}

/// Startup configuration that cannot be defaulted.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("telegram bot token not configured (set TELEGRAM_BOT_TOKEN or channels.telegram.botToken)")]
    MissingTelegramToken,
    #[error("whatsapp destination not configured (set WHATSAPP_DESTINO or channels.whatsapp.destination)")]
    MissingDestination,
}

fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

/// First non-empty env var among `names`, else the trimmed config value.
fn env_or(names: &[&str], fallback: Option<&String>) -> Option<String> {
    names
        .iter()
        .find_map(|n| std::env::var(n).ok().and_then(|v| non_empty(&v)))
        .or_else(|| fallback.and_then(|s| non_empty(s)))
}

/// Resolve the Telegram bot token: env TELEGRAM_BOT_TOKEN, then TELEGRAM_TOKEN, then config.
pub fn resolve_telegram_token(config: &Config) -> Option<String> {
    env_or(
        &["TELEGRAM_BOT_TOKEN", "TELEGRAM_TOKEN"],
        config.channels.telegram.bot_token.as_ref(),
    )
}

/// Resolve the Telegram API base URL: env TELEGRAM_API_BASE overrides config.
pub fn resolve_telegram_api_base(config: &Config) -> Option<String> {
    env_or(&["TELEGRAM_API_BASE"], config.channels.telegram.api_base.as_ref())
}

/// Resolve the WhatsApp destination: env WHATSAPP_DESTINO overrides config.
pub fn resolve_destination(config: &Config) -> Option<String> {
    env_or(&["WHATSAPP_DESTINO"], config.channels.whatsapp.destination.as_ref())
}

/// Resolve the bridge API key: env WHATSAPP_API_KEY overrides config. Empty when unset.
pub fn resolve_whatsapp_api_key(config: &Config) -> String {
    env_or(&["WHATSAPP_API_KEY"], config.channels.whatsapp.api_key.as_ref()).unwrap_or_default()
}

/// Resolve the bridge URL: env WHATSAPP_API_URL overrides config.
pub fn resolve_whatsapp_api_url(config: &Config) -> String {
    env_or(&["WHATSAPP_API_URL"], Some(&config.channels.whatsapp.api_url))
        .unwrap_or_else(default_whatsapp_api_url)
}

/// Resolve the session (bridge instance) name: env SESSION_NAME overrides config.
pub fn resolve_session_name(config: &Config) -> String {
    env_or(&["SESSION_NAME"], Some(&config.channels.whatsapp.session_name))
        .unwrap_or_else(default_session_name)
}

/// Apply the PORT env override, if it parses.
pub fn apply_env_port(config: &mut Config) {
    if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.trim().parse::<u16>().ok()) {
        config.gateway.port = port;
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("TGWA_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".tgwa").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path (default: TGWA_CONFIG_PATH or ~/.tgwa/config.json). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let mut config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    apply_env_port(&mut config);
    Ok((config, path))
}
