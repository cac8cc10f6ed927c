use chrono::{DateTime, Utc};

use crate::config::FormatConfig;
use crate::platform::{IncomingEvent, Media};

const ELLIPSIS: &str = "...";

/// Values available to the prefix template
#[derive(Debug, Clone)]
pub struct MessageContext<'a> {
    pub chat_title: &'a str,
    pub sender_name: &'a str,
    pub chat_id: i64,
    pub message_id: i32,
    pub send_time: Option<DateTime<Utc>>,
}

/// Renders the outgoing payload for a forwarded message
#[derive(Debug, Clone)]
pub struct MessageFormatter {
    template: String,
    show_time: bool,
    time_format: String,
    max_length: usize,
}

impl MessageFormatter {
    pub fn new(config: &FormatConfig) -> Self {
        Self {
            template: config.message_prefix.clone(),
            show_time: config.show_message_time,
            time_format: config.time_format.clone(),
            max_length: config.max_message_length,
        }
    }

    /// Fill the template's `{chat_title}`, `{sender_name}`, `{message_time}`,
    /// `{chat_id}` and `{message_id}` placeholders
    pub fn prefix(&self, ctx: &MessageContext<'_>) -> String {
        // TIME_FORMAT is checked at config load, so formatting cannot fail here
        let message_time = match (self.show_time, ctx.send_time) {
            (true, Some(t)) => t.format(&self.time_format).to_string(),
            _ => String::new(),
        };
        self.template
            .replace("{chat_title}", ctx.chat_title)
            .replace("{sender_name}", ctx.sender_name)
            .replace("{message_time}", &message_time)
            .replace("{chat_id}", &ctx.chat_id.to_string())
            .replace("{message_id}", &ctx.message_id.to_string())
    }

    /// Prefix followed by body, cut down to the configured maximum
    pub fn format(&self, ctx: &MessageContext<'_>, event: &IncomingEvent) -> String {
        let mut composed = self.prefix(ctx);
        composed.push_str(&render_body(event));
        truncate(&composed, self.max_length)
    }
}

/// Message text, or a textual stand-in when the message has only media
pub fn render_body(event: &IncomingEvent) -> String {
    if let Some(text) = event.text.as_deref().filter(|t| !t.is_empty()) {
        return text.to_string();
    }
    match &event.media {
        Some(Media::Geo {
            latitude,
            longitude,
        }) => format!("📍 Location: {}, {}", latitude, longitude),
        Some(Media::Contact {
            first_name,
            last_name,
            phone_number,
        }) => format!(
            "👤 {} {} {}",
            first_name,
            last_name.as_deref().unwrap_or(""),
            phone_number
        ),
        Some(Media::Poll { question, answers }) => {
            let mut out = format!("📊 {}", question);
            for (i, answer) in answers.iter().enumerate() {
                out.push_str(&format!("\n{}. {}", i + 1, answer));
            }
            out
        }
        Some(Media::Document {
            file_name: Some(name),
        }) => format!("[document: {}]", name),
        Some(media) => format!("[{}]", media.kind_name()),
        None => String::new(),
    }
}

/// Cut `text` to at most `max_chars` characters, ending in `...` when cut
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(ELLIPSIS.len());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn formatter(template: &str, max_length: usize) -> MessageFormatter {
        MessageFormatter::new(&FormatConfig {
            message_prefix: template.to_string(),
            show_message_time: true,
            time_format: "%Y-%m-%d %H:%M".to_string(),
            max_message_length: max_length,
        })
    }

    fn event(text: Option<&str>, media: Option<Media>) -> IncomingEvent {
        IncomingEvent {
            chat_id: -1001,
            chat_title: Some("Rustaceans".to_string()),
            chat_username: None,
            message_id: 9,
            date: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
            sender: None,
            text: text.map(str::to_string),
            media,
            is_forwarded: false,
        }
    }

    fn ctx(send_time: Option<DateTime<Utc>>) -> MessageContext<'static> {
        MessageContext {
            chat_title: "Rustaceans",
            sender_name: "Ferris",
            chat_id: -1001,
            message_id: 9,
            send_time,
        }
    }

    #[test]
    fn test_prefix_substitutes_all_placeholders() {
        let f = formatter("[{chat_title}] {sender_name} {message_time} #{chat_id}/{message_id}: ", 100);
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        assert_eq!(
            f.prefix(&ctx(Some(at))),
            "[Rustaceans] Ferris 2024-05-01 12:30 #-1001/9: "
        );
    }

    #[test]
    fn test_time_is_blank_when_disabled() {
        let mut f = formatter("{message_time}|", 100);
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        f.show_time = false;
        assert_eq!(f.prefix(&ctx(Some(at))), "|");
        f.show_time = true;
        assert_eq!(f.prefix(&ctx(None)), "|");
    }

    #[test]
    fn test_short_payload_is_plain_concatenation() {
        let f = formatter("{sender_name}: ", 20);
        let out = f.format(&ctx(None), &event(Some("hello"), None));
        assert_eq!(out, "Ferris: hello");
    }

    #[test]
    fn test_exact_fit_is_not_truncated() {
        let f = formatter("{sender_name}: ", 13);
        assert_eq!(f.format(&ctx(None), &event(Some("hello"), None)), "Ferris: hello");
    }

    #[test]
    fn test_long_payload_truncated_on_composed_string() {
        let f = formatter("{sender_name}: ", 12);
        let body = "x".repeat(50);
        let out = f.format(&ctx(None), &event(Some(&body), None));
        assert_eq!(out.chars().count(), 12);
        assert_eq!(out, "Ferris: x...");
    }

    #[test]
    fn test_truncation_counts_characters_not_bytes() {
        let out = truncate("ééééééé", 5);
        assert_eq!(out, "éé...");
        assert_eq!(out.chars().count(), 5);
    }

    #[test]
    fn test_media_bodies() {
        assert_eq!(render_body(&event(None, Some(Media::Photo))), "[photo]");
        assert_eq!(render_body(&event(Some(""), Some(Media::Sticker))), "[sticker]");
        assert_eq!(
            render_body(&event(Some("caption"), Some(Media::Photo))),
            "caption"
        );
        assert_eq!(
            render_body(&event(
                None,
                Some(Media::Geo {
                    latitude: 1.5,
                    longitude: -2.25
                })
            )),
            "📍 Location: 1.5, -2.25"
        );
        assert_eq!(
            render_body(&event(
                None,
                Some(Media::Poll {
                    question: "Best crate?".to_string(),
                    answers: vec!["tokio".to_string(), "serde".to_string()],
                })
            )),
            "📊 Best crate?\n1. tokio\n2. serde"
        );
        assert_eq!(
            render_body(&event(
                None,
                Some(Media::Document {
                    file_name: Some("notes.pdf".to_string())
                })
            )),
            "[document: notes.pdf]"
        );
    }
}
