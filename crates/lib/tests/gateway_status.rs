//! Integration test: start the gateway on a free port and drive the dashboard endpoints.
//! Telegram points at a closed local port; the WhatsApp bridge is either closed too or a small
//! local axum stand-in, so nothing leaves the machine.
//! Server tasks are left running when a test ends.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use lib::config::Config;
use lib::gateway;
use lib::news::{self, NewsTemplate};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const UNREACHABLE: &str = "http://127.0.0.1:1";

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

fn test_config(port: u16) -> Config {
    let mut config = Config::default();
    config.gateway.port = port;
    config.gateway.bind = "127.0.0.1".to_string();
    config.channels.telegram.bot_token = Some("123:test".to_string());
    config.channels.telegram.api_base = Some(UNREACHABLE.to_string());
    config.channels.whatsapp.api_url = UNREACHABLE.to_string();
    config.channels.whatsapp.destination = Some("559999999999@c.us".to_string());
    config.channels.whatsapp.poll_interval_secs = 60;
    config
}

async fn wait_for_health(client: &reqwest::Client, base: &str) {
    let url = format!("{}/health", base);
    let mut last_err = None;
    for _ in 0..100 {
        match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                let json: serde_json::Value = resp.json().await.expect("parse JSON");
                assert_eq!(json.get("runtime").and_then(|v| v.as_str()), Some("running"));
                return;
            }
            Ok(_) => {}
            Err(e) => last_err = Some(e),
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!(
        "GET {} did not return 200 within 5s; last error: {:?}",
        url, last_err
    );
}

async fn status(client: &reqwest::Client, base: &str) -> serde_json::Value {
    client
        .get(format!("{}/status", base))
        .send()
        .await
        .expect("GET /status")
        .json()
        .await
        .expect("parse status JSON")
}

#[tokio::test]
async fn dashboard_reflects_bridge_lifecycle() {
    let port = free_port();
    let config = test_config(port);
    tokio::spawn(async move {
        let _ = gateway::run_gateway(config).await;
    });

    let base = format!("http://127.0.0.1:{}", port);
    let client = reqwest::Client::new();
    wait_for_health(&client, &base).await;

    let s = status(&client, &base).await;
    assert_eq!(s["connected"], false);
    assert_eq!(s["pairingAvailable"], false);
    assert_eq!(s["destinationConfigured"], true);

    let qr = client.get(format!("{}/qr", base)).send().await.unwrap();
    assert_eq!(qr.status().as_u16(), 404);

    let res = client
        .get(format!("{}/send-test?msg=Ola", base))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 400);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["ok"], false);

    let hook = format!("{}/whatsapp/webhook", base);
    let res = client
        .post(&hook)
        .json(&serde_json::json!({
            "event": "qrcode.updated",
            "instance": "noticia-bot",
            "data": { "qrcode": { "base64": "data:image/png;base64,QUJD" } }
        }))
        .send()
        .await
        .unwrap();
    assert!(res.status().is_success());
    let s = status(&client, &base).await;
    assert_eq!(s["pairingAvailable"], true);
    assert_eq!(s["phase"], "awaitingPairing");

    let qr = client.get(format!("{}/qr", base)).send().await.unwrap();
    assert_eq!(qr.status().as_u16(), 200);
    assert!(qr.text().await.unwrap().contains("data:image/png;base64,QUJD"));
    let png = client.get(format!("{}/qr.png", base)).send().await.unwrap();
    assert_eq!(png.bytes().await.unwrap().as_ref(), b"ABC");

    client
        .post(&hook)
        .json(&serde_json::json!({
            "event": "connection.update",
            "instance": "noticia-bot",
            "data": { "state": "open" }
        }))
        .send()
        .await
        .unwrap();
    let s = status(&client, &base).await;
    assert_eq!(s["connected"], true);
    assert_eq!(s["pairingAvailable"], false);

    // Link is ready but the bridge itself is unreachable: transport failure, no crash.
    let res = client
        .get(format!("{}/send-test", base))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 500);
    let s = status(&client, &base).await;
    assert_eq!(s["connected"], true);

    let home = client.get(&base).send().await.unwrap().text().await.unwrap();
    assert!(home.contains(r#"<span class="ok">Conectado</span>"#));
}

#[tokio::test]
async fn missing_destination_is_fatal_unless_pairing_only() {
    if std::env::var("WHATSAPP_DESTINO").is_ok() {
        return;
    }
    let mut config = test_config(free_port());
    config.channels.whatsapp.destination = None;
    let err = gateway::run_gateway(config).await.unwrap_err();
    assert!(err.to_string().contains("destination"));

    let port = free_port();
    let mut config = test_config(port);
    config.channels.whatsapp.destination = None;
    config.channels.whatsapp.require_destination = false;
    tokio::spawn(async move {
        let _ = gateway::run_gateway(config).await;
    });
    let base = format!("http://127.0.0.1:{}", port);
    let client = reqwest::Client::new();
    wait_for_health(&client, &base).await;
    let s = status(&client, &base).await;
    assert_eq!(s["destinationConfigured"], false);
}

#[tokio::test]
async fn missing_telegram_token_is_fatal() {
    if std::env::var("TELEGRAM_BOT_TOKEN").is_ok() || std::env::var("TELEGRAM_TOKEN").is_ok() {
        return;
    }
    let mut config = test_config(free_port());
    config.channels.telegram.bot_token = None;
    let err = gateway::run_gateway(config).await.unwrap_err();
    assert!(err.to_string().contains("telegram bot token"));
}

type SentLog = Arc<Mutex<Vec<(String, serde_json::Value)>>>;

async fn record_send(
    State(sent): State<SentLog>,
    Path(instance): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    sent.lock().unwrap().push((instance, body));
    Json(serde_json::json!({ "key": { "id": "msg-1" } }))
}

/// Local WhatsApp bridge that reports an open session and records every sendText call.
async fn start_bridge() -> (String, SentLog) {
    let sent: SentLog = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route(
            "/instance/connectionState/:instance",
            get(|| async { Json(serde_json::json!({ "instance": { "state": "open" } })) }),
        )
        .route(
            "/chat/findChats/:instance",
            post(|| async { Json(serde_json::json!([])) }),
        )
        .route("/message/sendText/:instance", post(record_send))
        .with_state(sent.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind bridge");
    let addr = listener.local_addr().expect("bridge addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{}", addr), sent)
}

#[tokio::test]
async fn telegram_webhook_posts_are_formatted_and_relayed() {
    if std::env::var("WHATSAPP_API_URL").is_ok() || std::env::var("WHATSAPP_DESTINO").is_ok() {
        return;
    }
    let (bridge, sent) = start_bridge().await;
    let port = free_port();
    let mut config = test_config(port);
    config.channels.whatsapp.api_url = bridge;
    config.channels.whatsapp.destination = Some("1@g.us".to_string());
    config.channels.telegram.webhook_url = Some("https://bridge.invalid/telegram/webhook".into());
    config.channels.telegram.webhook_secret = Some("s3cret".to_string());
    tokio::spawn(async move {
        let _ = gateway::run_gateway(config).await;
    });

    let base = format!("http://127.0.0.1:{}", port);
    let client = reqwest::Client::new();
    wait_for_health(&client, &base).await;
    let mut connected = false;
    for _ in 0..100 {
        if status(&client, &base).await["connected"] == true {
            connected = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(connected, "link never reported connected");

    let raw = "Title\nhttps://a.example/x\nLine2";
    let update = serde_json::json!({
        "update_id": 1,
        "message": {
            "message_id": 7,
            "date": 1_700_000_000,
            "chat": { "id": -1001, "type": "supergroup" },
            "text": raw
        }
    });
    let hook = format!("{}/telegram/webhook", base);

    let res = client.post(&hook).json(&update).send().await.unwrap();
    assert_eq!(res.status().as_u16(), 403);
    let res = client
        .post(&hook)
        .header("X-Telegram-Bot-Api-Secret-Token", "wrong")
        .json(&update)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 403);
    let res = client
        .post(&hook)
        .header("X-Telegram-Bot-Api-Secret-Token", "s3cret")
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 400);
    assert!(sent.lock().unwrap().is_empty());

    let res = client
        .post(&hook)
        .header("X-Telegram-Bot-Api-Secret-Token", "s3cret")
        .json(&update)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 200);

    let mut relayed = Vec::new();
    for _ in 0..100 {
        relayed = sent.lock().unwrap().clone();
        if !relayed.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(relayed.len(), 1, "expected exactly one sendText call");
    let (instance, body) = &relayed[0];
    assert_eq!(instance, "noticia-bot");
    assert_eq!(body["number"], "1@g.us");
    let expected = news::format(raw).render(&NewsTemplate::default());
    assert_eq!(body["text"].as_str(), Some(expected.as_str()));
    assert_eq!(expected.matches("https://").count(), 1);

    // Events for another bridge instance leave the link untouched.
    let res = client
        .post(format!("{}/whatsapp/webhook", base))
        .json(&serde_json::json!({
            "event": "qrcode.updated",
            "instance": "someone-else",
            "data": { "qrcode": { "base64": "QUJD" } }
        }))
        .send()
        .await
        .unwrap();
    assert!(res.status().is_success());
    let s = status(&client, &base).await;
    assert_eq!(s["connected"], true);
    assert_eq!(s["pairingAvailable"], false);
}
