//! Gateway: HTTP dashboard and webhooks, plus wiring of channels and the relay.
//!
//! Single port serves the dashboard (`/`, `/qr`, `/status`, `/send-test`) and the
//! Telegram and WhatsApp bridge webhooks.

mod dashboard;
mod server;

pub use dashboard::{render_home, render_qr, DashboardView};
pub use server::run_gateway;
