pub mod telegram;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Kind of media attached to a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Media {
    Photo,
    Video,
    Document { file_name: Option<String> },
    Voice,
    Audio,
    Sticker,
    Geo { latitude: f64, longitude: f64 },
    Contact {
        first_name: String,
        last_name: Option<String>,
        phone_number: String,
    },
    Poll { question: String, answers: Vec<String> },
}

impl Media {
    /// Short lowercase name used in placeholders and logs
    pub fn kind_name(&self) -> &'static str {
        match self {
            Media::Photo => "photo",
            Media::Video => "video",
            Media::Document { .. } => "document",
            Media::Voice => "voice",
            Media::Audio => "audio",
            Media::Sticker => "sticker",
            Media::Geo { .. } => "location",
            Media::Contact { .. } => "contact",
            Media::Poll { .. } => "poll",
        }
    }
}

/// Who sent a message
#[derive(Debug, Clone, PartialEq)]
pub enum Sender {
    User {
        id: u64,
        first_name: String,
        last_name: Option<String>,
        username: Option<String>,
        is_bot: bool,
    },
    /// Anonymous admins and channel posts are sent on behalf of a chat
    Chat { id: i64, title: Option<String> },
}

impl Sender {
    pub fn is_bot(&self) -> bool {
        matches!(self, Sender::User { is_bot: true, .. })
    }

    pub fn display_name(&self) -> String {
        match self {
            Sender::User {
                id,
                first_name,
                last_name,
                username,
                ..
            } => {
                let mut name = first_name.clone();
                if let Some(last) = last_name.as_deref().filter(|l| !l.is_empty()) {
                    name.push(' ');
                    name.push_str(last);
                }
                if name.trim().is_empty() {
                    match username.as_deref().filter(|u| !u.is_empty()) {
                        Some(u) => u.to_string(),
                        None => format!("User_{}", id),
                    }
                } else {
                    name
                }
            }
            Sender::Chat { title, .. } => title.clone().unwrap_or_else(|| "Unknown".to_string()),
        }
    }
}

/// A message received from the transport. Immutable once built.
#[derive(Debug, Clone)]
pub struct IncomingEvent {
    pub chat_id: i64,
    pub chat_title: Option<String>,
    pub chat_username: Option<String>,
    pub message_id: i32,
    pub date: DateTime<Utc>,
    pub sender: Option<Sender>,
    pub text: Option<String>,
    pub media: Option<Media>,
    pub is_forwarded: bool,
}

impl IncomingEvent {
    pub fn sender_name(&self) -> String {
        self.sender
            .as_ref()
            .map(Sender::display_name)
            .unwrap_or_else(|| "Unknown".to_string())
    }

    pub fn sender_is_bot(&self) -> bool {
        self.sender.as_ref().is_some_and(Sender::is_bot)
    }

    /// First `max_chars` characters of the text, for log lines
    pub fn preview(&self, max_chars: usize) -> String {
        match self.text.as_deref() {
            Some(t) if !t.is_empty() => t.chars().take(max_chars).collect(),
            _ => "[media message]".to_string(),
        }
    }
}

/// Events delivered through a subscription
#[derive(Debug, Clone)]
pub enum TransportEvent {
    NewMessage(IncomingEvent),
    MessageEdited(IncomingEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    User,
    Group,
    Supergroup,
    Channel,
}

impl EntityKind {
    pub fn is_group_like(self) -> bool {
        !matches!(self, EntityKind::User)
    }
}

/// A resolved chat or user
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: i64,
    pub kind: EntityKind,
    pub username: Option<String>,
    pub title: Option<String>,
}

/// What to hand the transport for resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRef {
    Id(i64),
    /// Always carries the leading `@`
    Username(String),
}

impl EntityRef {
    /// `@name` or a signed numeric id
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        match raw.strip_prefix('@') {
            Some(name) if !name.is_empty() => Some(EntityRef::Username(raw.to_string())),
            Some(_) => None,
            None => raw.parse().ok().map(EntityRef::Id),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Id(id) => write!(f, "{}", id),
            EntityRef::Username(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("rate limited, retry after {}s", .retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("entity not found: {0}")]
    NotFound(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("network error: {0}")]
    Network(String),
}

/// An authenticated session that can look up chats and post to them
#[async_trait]
pub trait Transport: Send + Sync {
    async fn resolve_entity(&self, target: &EntityRef) -> Result<Entity, TransportError>;

    async fn send_message(&self, to: &Entity, text: &str) -> Result<(), TransportError>;
}

/// The session authenticated as the destination account. Forwarded payloads
/// are posted through it.
#[async_trait]
pub trait SinkSession: Transport {
    async fn own_id(&self) -> Result<i64, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(first: &str, last: Option<&str>, username: Option<&str>) -> Sender {
        Sender::User {
            id: 42,
            first_name: first.to_string(),
            last_name: last.map(str::to_string),
            username: username.map(str::to_string),
            is_bot: false,
        }
    }

    #[test]
    fn test_display_name_joins_first_and_last() {
        assert_eq!(user("Ada", Some("Lovelace"), None).display_name(), "Ada Lovelace");
        assert_eq!(user("Ada", None, None).display_name(), "Ada");
    }

    #[test]
    fn test_display_name_falls_back_to_username_then_id() {
        assert_eq!(user("", None, Some("ada")).display_name(), "ada");
        assert_eq!(user(" ", None, None).display_name(), "User_42");
    }

    #[test]
    fn test_chat_sender_uses_title() {
        let sender = Sender::Chat {
            id: -100,
            title: Some("News".to_string()),
        };
        assert_eq!(sender.display_name(), "News");
        assert!(!sender.is_bot());
    }

    #[test]
    fn test_entity_ref_parsing() {
        assert_eq!(EntityRef::parse(" 42 "), Some(EntityRef::Id(42)));
        assert_eq!(EntityRef::parse("-1001234567890"), Some(EntityRef::Id(-1001234567890)));
        assert_eq!(
            EntityRef::parse("@relay_inbox"),
            Some(EntityRef::Username("@relay_inbox".to_string()))
        );
        assert_eq!(EntityRef::parse("@"), None);
        assert_eq!(EntityRef::parse("inbox"), None);
        assert_eq!(EntityRef::parse(""), None);
    }

    #[test]
    fn test_preview_truncates_by_chars() {
        let event = IncomingEvent {
            chat_id: 1,
            chat_title: None,
            chat_username: None,
            message_id: 1,
            date: Utc::now(),
            sender: None,
            text: Some("héllo world".to_string()),
            media: None,
            is_forwarded: false,
        };
        assert_eq!(event.preview(5), "héllo");
        assert_eq!(event.sender_name(), "Unknown");
    }
}
