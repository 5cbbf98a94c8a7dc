//! HTML pages served by the dashboard (home and QR).

/// What the home page shows.
#[derive(Debug, Clone)]
pub struct DashboardView {
    pub whatsapp_connected: bool,
    pub telegram_active: bool,
    pub pairing_available: bool,
    pub port: u16,
    pub session_name: String,
}

const STYLE: &str = r#"body { font-family: system-ui, -apple-system, Segoe UI, Roboto, Arial; margin: 24px; }
        .wrap { max-width: 860px; margin: 0 auto; }
        a.btn { display:inline-block; padding:10px 14px; border-radius:10px; background:#0b5fff; color:#fff; text-decoration:none; }
        .grid { display:grid; gap:12px; grid-template-columns: repeat(auto-fit, minmax(220px,1fr)); margin-top: 16px; }
        .card { border:1px solid #e4e7ee; border-radius:12px; padding:16px; }
        code { background:#f6f8fb; padding:2px 6px; border-radius:6px; }
        .ok { color: #0a7a38; font-weight: 600; }
        .off { color: #c73d2d; font-weight: 600; }"#;

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn badge(on: bool, yes: &str, no: &str) -> String {
    if on {
        format!(r#"<span class="ok">{}</span>"#, yes)
    } else {
        format!(r#"<span class="off">{}</span>"#, no)
    }
}

pub fn render_home(view: &DashboardView) -> String {
    format!(
        r#"<html lang="pt-br">
    <head>
      <meta charset="utf-8" />
      <meta name="viewport" content="width=device-width,initial-scale=1" />
      <title>TG → WA Bridge</title>
      <style>
        {style}
      </style>
    </head>
    <body>
      <div class="wrap">
        <h1>🧩 TG → WA Bridge</h1>
        <p>Use os atalhos abaixo para acompanhar o estado e escanear o QR do WhatsApp.</p>
        <div class="grid">
          <div class="card">
            <h3>QR do WhatsApp</h3>
            <p>Abra: <a class="btn" href="/qr" target="_blank">/qr</a></p>
            <small>Se expirar, atualize a página.</small>
          </div>
          <div class="card">
            <h3>Status JSON</h3>
            <p><a class="btn" href="/status" target="_blank">/status</a></p>
          </div>
          <div class="card">
            <h3>Envio de teste</h3>
            <p>GET <code>/send-test?msg=Olá</code></p>
            <small>Envia a mensagem ao <code>WHATSAPP_DESTINO</code>.</small>
          </div>
        </div>

        <h2 style="margin-top:28px">Estado atual</h2>
        <ul>
          <li>WhatsApp: {wa}</li>
          <li>Telegram: {tg}</li>
          <li>QR disponível: {qr}</li>
        </ul>

        <p style="margin-top:24px"><small>Porta: {port} • Sessão: <code>{session}</code></small></p>
      </div>
    </body>
  </html>"#,
        style = STYLE,
        wa = badge(view.whatsapp_connected, "Conectado", "Desconectado"),
        tg = badge(view.telegram_active, "Ativo", "Inativo"),
        qr = badge(view.pairing_available, "Sim", "Não"),
        port = view.port,
        session = escape_html(&view.session_name),
    )
}

/// QR page for a `data:image/...` URL.
pub fn render_qr(data_url: &str) -> String {
    format!(
        r#"<html lang="pt-br">
    <head><meta charset="utf-8" /><meta name="viewport" content="width=device-width,initial-scale=1" />
      <title>QR • WhatsApp</title>
      <style>
        body {{ font-family: system-ui, -apple-system, Segoe UI, Roboto, Arial; margin: 24px; }}
        img {{ max-width: 320px; image-rendering: pixelated; }}
        a {{ color: #0b5fff; text-decoration: none; }}
      </style>
    </head>
    <body>
      <h1>Escaneie o QR no WhatsApp</h1>
      <img src="{}" alt="QR do WhatsApp" />
      <p>Se expirar, atualize a página.</p>
      <p><a href="/status" target="_blank">Ver status</a></p>
    </body>
  </html>"#,
        escape_html(data_url)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn home_shows_flags_and_escapes_session() {
        let html = render_home(&DashboardView {
            whatsapp_connected: true,
            telegram_active: false,
            pairing_available: false,
            port: 3000,
            session_name: "<news>".into(),
        });
        assert!(html.contains(r#"WhatsApp: <span class="ok">Conectado</span>"#));
        assert!(html.contains(r#"Telegram: <span class="off">Inativo</span>"#));
        assert!(html.contains(r#"QR disponível: <span class="off">Não</span>"#));
        assert!(html.contains("Porta: 3000"));
        assert!(html.contains("&lt;news&gt;"));
    }

    #[test]
    fn qr_page_embeds_image() {
        let html = render_qr("data:image/png;base64,QUJD");
        assert!(html.contains(r#"<img src="data:image/png;base64,QUJD""#));
    }
}
