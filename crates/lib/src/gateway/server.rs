//! Gateway HTTP server (single port) and channel wiring.

use crate::channels::{
    whatsapp, ChannelRegistry, InboundMessage, TelegramChannel, TelegramUpdate, WhatsAppChannel,
};
use crate::config::{self, Config, ConfigError};
use crate::gateway::dashboard::{self, DashboardView};
use crate::relay::{Relay, RelayTarget, SendOutcome};
use crate::status::StatusPublisher;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const QR_UNAVAILABLE: &str = "QR não disponível no momento.";
const DEFAULT_TEST_MESSAGE: &str = "Mensagem de teste";

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub session_name: String,
    pub status: Arc<StatusPublisher>,
    pub relay: Arc<Relay>,
    /// Sender for inbound channel messages (e.g. Telegram webhook POSTs). Processor task receives.
    pub inbound_tx: mpsc::Sender<InboundMessage>,
}

/// Run the bridge: Telegram inbound, WhatsApp lifecycle watcher, relay processor and dashboard.
/// Binds to config.gateway.bind:config.gateway.port and blocks until shutdown (e.g. Ctrl+C).
/// Fails fast when the Telegram token (or a required destination) is missing.
pub async fn run_gateway(config: Config) -> Result<()> {
    let telegram_token =
        config::resolve_telegram_token(&config).ok_or(ConfigError::MissingTelegramToken)?;
    let destination = config::resolve_destination(&config);
    if destination.is_none() {
        if config.channels.whatsapp.require_destination {
            return Err(ConfigError::MissingDestination.into());
        }
        log::warn!("no whatsapp destination configured; messages will be dropped until one is set");
    }
    if !config.news.has_footer() {
        log::warn!(
            "news template has no channel or app blocks; set them under `news` in the config"
        );
    }
    let session_name = config::resolve_session_name(&config);

    let status = Arc::new(StatusPublisher::new());
    let registry = Arc::new(ChannelRegistry::new());
    let mut channel_tasks: Vec<JoinHandle<()>> = Vec::new();

    let whatsapp = Arc::new(WhatsAppChannel::new(
        &config::resolve_whatsapp_api_url(&config),
        &config::resolve_whatsapp_api_key(&config),
        &session_name,
    ));
    registry.register(whatsapp.clone()).await;
    let wa_cfg = &config.channels.whatsapp;
    channel_tasks.push(whatsapp.clone().start_lifecycle(
        status.clone(),
        Duration::from_secs(wa_cfg.poll_interval_secs.max(1)),
        Duration::from_secs(wa_cfg.qr_refresh_secs),
    ));

    let telegram = Arc::new(TelegramChannel::new(
        telegram_token,
        config::resolve_telegram_api_base(&config),
    ));
    registry.register(telegram.clone()).await;

    let relay = Arc::new(
        Relay::new(
            config.news.clone(),
            RelayTarget::new(destination),
            status.clone(),
            whatsapp.clone(),
            registry.clone(),
        )
        .with_allowed_chats(config.channels.telegram.allowed_chat_ids.clone()),
    );

    let (inbound_tx, mut inbound_rx) = mpsc::channel::<InboundMessage>(64);
    {
        let relay = relay.clone();
        tokio::spawn(async move {
            while let Some(msg) = inbound_rx.recv().await {
                relay.handle_inbound(&msg).await;
            }
        });
    }

    {
        let telegram = telegram.clone();
        let status = status.clone();
        tokio::spawn(async move {
            match telegram.get_me().await {
                Ok(username) => {
                    status.set_telegram_active(true);
                    log::info!("telegram bot @{} active", username);
                }
                Err(e) => log::warn!("telegram getMe failed: {}", e),
            }
        });
    }

    let webhook_url = config.channels.telegram.webhook_url.clone();
    let telegram_webhook_for_shutdown = if let Some(ref url) = webhook_url {
        let secret = config.channels.telegram.webhook_secret.as_deref();
        if let Err(e) = telegram.set_webhook(url, secret).await {
            log::warn!("telegram set_webhook failed: {}", e);
        } else {
            log::info!("telegram channel registered (webhook mode): {}", url);
        }
        Some(telegram.clone())
    } else {
        channel_tasks.push(telegram.clone().start_inbound(inbound_tx.clone()));
        log::info!("telegram channel registered and getUpdates loop started");
        None
    };

    let port = config.gateway.port;
    let bind = config.gateway.bind.trim().to_string();
    let state = GatewayState {
        config: Arc::new(config),
        session_name,
        status,
        relay,
        inbound_tx,
    };
    let app = router(state);

    let bind_addr = format!("{}:{}", bind, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("dashboard listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(
            registry,
            channel_tasks,
            telegram_webhook_for_shutdown,
        ))
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/qr", get(qr_page))
        .route("/qr.png", get(qr_png))
        .route("/status", get(status_json))
        .route("/send-test", get(send_test))
        .route("/health", get(health_http))
        .route("/telegram/webhook", post(telegram_webhook))
        .route("/whatsapp/webhook", post(whatsapp_webhook))
        .with_state(state)
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
/// Stops channel loops, removes the Telegram webhook if used, then awaits channel tasks.
async fn shutdown_signal(
    registry: Arc<ChannelRegistry>,
    channel_tasks: Vec<JoinHandle<()>>,
    telegram_webhook: Option<Arc<TelegramChannel>>,
) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, stopping channels");

    registry.stop_all().await;

    if let Some(t) = telegram_webhook {
        if let Err(e) = t.delete_webhook().await {
            log::debug!("telegram delete_webhook on shutdown: {}", e);
        }
    }

    for h in channel_tasks {
        let _ = h.await;
    }
    log::info!("channel tasks finished");
}

/// GET / — HTML home with links and current state.
async fn home(State(state): State<GatewayState>) -> Html<String> {
    let snapshot = state.status.snapshot().await;
    Html(dashboard::render_home(&DashboardView {
        whatsapp_connected: snapshot.ready,
        telegram_active: state.status.telegram_active(),
        pairing_available: snapshot.last_qr.is_some(),
        port: state.config.gateway.port,
        session_name: state.session_name.clone(),
    }))
}

/// GET /qr — page with the current QR, 404 when none has been issued.
async fn qr_page(State(state): State<GatewayState>) -> Response {
    match state.status.snapshot().await.last_qr {
        Some(qr) => Html(dashboard::render_qr(&qr)).into_response(),
        None => (StatusCode::NOT_FOUND, QR_UNAVAILABLE).into_response(),
    }
}

/// GET /qr.png — raw QR image.
async fn qr_png(State(state): State<GatewayState>) -> Response {
    let png = state
        .status
        .snapshot()
        .await
        .last_qr
        .and_then(|qr| whatsapp::decode_data_url(&qr));
    match png {
        Some(bytes) => ([(header::CONTENT_TYPE, "image/png")], bytes).into_response(),
        None => (StatusCode::NOT_FOUND, QR_UNAVAILABLE).into_response(),
    }
}

/// GET /status — JSON status document.
async fn status_json(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    let snapshot = state.status.snapshot().await;
    Json(json!({
        "connected": snapshot.ready,
        "pairingAvailable": snapshot.last_qr.is_some(),
        "telegramActive": state.status.telegram_active(),
        "destinationConfigured": state.relay.target().configured_at_startup,
        "phase": snapshot.phase,
        "lastTransitionAt": snapshot.last_transition_at.to_rfc3339(),
    }))
}

#[derive(Debug, Deserialize)]
struct SendTestQuery {
    msg: Option<String>,
}

/// GET /send-test?msg=... — relay a raw test message to the destination.
async fn send_test(
    State(state): State<GatewayState>,
    Query(query): Query<SendTestQuery>,
) -> (StatusCode, Json<serde_json::Value>) {
    let msg = query
        .msg
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_TEST_MESSAGE.to_string());
    let outcome = state.relay.send_raw(&msg).await;
    let code = match outcome {
        SendOutcome::Sent => return (StatusCode::OK, Json(json!({ "ok": true, "sent": msg }))),
        SendOutcome::RejectedNoDestination | SendOutcome::RejectedNotReady => {
            StatusCode::BAD_REQUEST
        }
        SendOutcome::RejectedTransportError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (code, Json(json!({ "ok": false, "error": outcome.to_string() })))
}

/// GET /health returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.config.gateway.port,
    }))
}

/// POST /telegram/webhook — receives Telegram update JSON; verifies optional secret, pushes InboundMessage.
async fn telegram_webhook(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if let Some(ref expected) = state.config.channels.telegram.webhook_secret {
        let provided = headers
            .get("X-Telegram-Bot-Api-Secret-Token")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if provided != expected.as_str() {
            return StatusCode::FORBIDDEN;
        }
    }
    let update: TelegramUpdate = match serde_json::from_slice(&body) {
        Ok(u) => u,
        Err(_) => return StatusCode::BAD_REQUEST,
    };
    let Some(inbound) = update.into_inbound() else {
        return StatusCode::OK;
    };
    if state.inbound_tx.send(inbound).await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::OK
}

/// POST /whatsapp/webhook — QR and connection events pushed by the WhatsApp bridge.
async fn whatsapp_webhook(State(state): State<GatewayState>, body: Bytes) -> StatusCode {
    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return StatusCode::BAD_REQUEST,
    };
    if let Some(instance) = payload.get("instance").and_then(|v| v.as_str()) {
        if instance != state.session_name {
            log::debug!("whatsapp webhook for unknown instance {}", instance);
            return StatusCode::OK;
        }
    }
    if let Some(event) = whatsapp::event_from_webhook(&payload) {
        state.status.apply(event).await;
    }
    StatusCode::OK
}
