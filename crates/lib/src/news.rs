//! News formatter: turns a raw inbound text into a structured announcement.
//!
//! The first non-empty line is the title, the first URL line after it is the
//! "read more" link, and every other non-URL line is the body. Rendering wraps
//! the result in the configured template (see [`NewsTemplate`]).

use serde::{Deserialize, Serialize};

/// Structured announcement derived from one inbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Announcement {
    pub title: String,
    /// First URL line after the title; empty when the message has none.
    pub primary_link: String,
    pub body: String,
}

/// Literal text of a rendered announcement. Every field can be overridden under
/// `news` in the config file. The channel and app blocks are empty by default and
/// the footer is left out until at least one of them is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewsTemplate {
    pub title_prefix: String,
    pub read_more_label: String,
    pub separator: String,
    pub whatsapp_block: String,
    pub telegram_block: String,
    pub app_block: String,
}

impl Default for NewsTemplate {
    fn default() -> Self {
        Self {
            title_prefix: "📰 ".to_string(),
            read_more_label: "🔗 Leia mais: ".to_string(),
            separator: "━━━━━━━━━━━━━━━".to_string(),
            whatsapp_block: String::new(),
            telegram_block: String::new(),
            app_block: String::new(),
        }
    }
}

impl NewsTemplate {
    /// True when any of the channel/app blocks is set.
    pub fn has_footer(&self) -> bool {
        [&self.whatsapp_block, &self.telegram_block, &self.app_block]
            .iter()
            .any(|b| !b.trim().is_empty())
    }
}

/// True if the (already trimmed) line starts with an http(s) URL.
pub fn is_link_line(line: &str) -> bool {
    ["http://", "https://"].iter().any(|scheme| {
        line.len() > scheme.len()
            && line
                .get(..scheme.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(scheme))
    })
}

/// Build an announcement from raw text. Never fails: empty input yields empty fields.
pub fn format(raw: &str) -> Announcement {
    let lines: Vec<&str> = raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let Some((title, rest)) = lines.split_first() else {
        return Announcement::default();
    };
    let primary_link = rest
        .iter()
        .find(|l| is_link_line(l))
        .map(|l| l.to_string())
        .unwrap_or_default();
    let body = rest
        .iter()
        .filter(|l| !is_link_line(l))
        .copied()
        .collect::<Vec<_>>()
        .join("\n");
    Announcement {
        title: title.to_string(),
        primary_link,
        body,
    }
}

impl Announcement {
    /// Render the announcement as the WhatsApp message text.
    pub fn render(&self, template: &NewsTemplate) -> String {
        let mut lines = vec![
            format!("{}{}", template.title_prefix, self.title),
            String::new(),
            format!("{}{}", template.read_more_label, self.primary_link),
            String::new(),
            self.body.clone(),
        ];
        if template.has_footer() {
            lines.extend([
                String::new(),
                template.separator.clone(),
                template.whatsapp_block.clone(),
                String::new(),
                template.telegram_block.clone(),
                template.separator.clone(),
                template.app_block.clone(),
            ]);
        }
        lines.join("\n")
    }
}
