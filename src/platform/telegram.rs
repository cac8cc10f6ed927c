use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{ChatFullInfo, Recipient};
use teloxide::{ApiError, RequestError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::ProxyConfig;
use crate::platform::{
    Entity, EntityKind, EntityRef, IncomingEvent, Media, Sender, SinkSession, Transport,
    TransportError, TransportEvent,
};

/// Build a bot, routed through the configured proxy if enabled
pub fn build_bot(token: &str, proxy: &ProxyConfig) -> Result<Bot> {
    if !proxy.enabled {
        return Ok(Bot::new(token));
    }
    let client = teloxide::net::default_reqwest_settings()
        .proxy(
            reqwest::Proxy::all(&proxy.url)
                .with_context(|| format!("Invalid proxy URL: {}", proxy.url))?,
        )
        .build()
        .context("Failed to build proxied HTTP client")?;
    info!("Using proxy {}", proxy.url);
    Ok(Bot::with_client(token, client))
}

fn map_error(err: RequestError) -> TransportError {
    match err {
        RequestError::RetryAfter(wait) => TransportError::RateLimited {
            retry_after: wait.duration(),
        },
        RequestError::Api(ApiError::ChatNotFound) | RequestError::Api(ApiError::UserNotFound) => {
            TransportError::NotFound(err.to_string())
        }
        RequestError::Api(api) => TransportError::Api(api.to_string()),
        RequestError::Network(e) => TransportError::Network(e.to_string()),
        other => TransportError::Api(other.to_string()),
    }
}

fn entity_from_chat(chat: &ChatFullInfo) -> Entity {
    let kind = if chat.is_private() {
        EntityKind::User
    } else if chat.is_channel() {
        EntityKind::Channel
    } else if chat.is_supergroup() {
        EntityKind::Supergroup
    } else {
        EntityKind::Group
    };
    Entity {
        id: chat.id.0,
        kind,
        username: chat.username().map(str::to_string),
        title: chat.title().map(str::to_string),
    }
}

fn media_of(msg: &Message) -> Option<Media> {
    if msg.sticker().is_some() {
        Some(Media::Sticker)
    } else if msg.voice().is_some() {
        Some(Media::Voice)
    } else if msg.audio().is_some() {
        Some(Media::Audio)
    } else if msg.photo().is_some() {
        Some(Media::Photo)
    } else if msg.video().is_some() || msg.video_note().is_some() || msg.animation().is_some() {
        Some(Media::Video)
    } else if let Some(doc) = msg.document() {
        Some(Media::Document {
            file_name: doc.file_name.clone(),
        })
    } else if let Some(loc) = msg.location() {
        Some(Media::Geo {
            latitude: loc.latitude,
            longitude: loc.longitude,
        })
    } else if let Some(contact) = msg.contact() {
        Some(Media::Contact {
            first_name: contact.first_name.clone(),
            last_name: contact.last_name.clone(),
            phone_number: contact.phone_number.clone(),
        })
    } else {
        msg.poll().map(|poll| Media::Poll {
            question: poll.question.clone(),
            answers: poll.options.iter().map(|o| o.text.clone()).collect(),
        })
    }
}

fn sender_of(msg: &Message) -> Option<Sender> {
    if let Some(chat) = &msg.sender_chat {
        return Some(Sender::Chat {
            id: chat.id.0,
            title: chat.title().map(str::to_string),
        });
    }
    msg.from.as_ref().map(|user| Sender::User {
        id: user.id.0,
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        username: user.username.clone(),
        is_bot: user.is_bot,
    })
}

fn to_incoming(msg: &Message) -> IncomingEvent {
    IncomingEvent {
        chat_id: msg.chat.id.0,
        chat_title: msg.chat.title().map(str::to_string),
        chat_username: msg.chat.username().map(str::to_string),
        message_id: msg.id.0,
        date: msg.date,
        sender: sender_of(msg),
        text: msg.text().or_else(|| msg.caption()).map(str::to_string),
        media: media_of(msg),
        is_forwarded: msg.forward_origin().is_some(),
    }
}

async fn push_new(msg: Message, tx: mpsc::Sender<TransportEvent>) -> ResponseResult<()> {
    if tx.send(TransportEvent::NewMessage(to_incoming(&msg))).await.is_err() {
        warn!("Router is gone; dropping message {}", msg.id.0);
    }
    Ok(())
}

async fn push_edited(msg: Message, tx: mpsc::Sender<TransportEvent>) -> ResponseResult<()> {
    if tx.send(TransportEvent::MessageEdited(to_incoming(&msg))).await.is_err() {
        warn!("Router is gone; dropping edit of message {}", msg.id.0);
    }
    Ok(())
}

/// A teloxide bot session. The listener subscribes to updates with it; the
/// destination bot posts forwarded payloads with it.
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    /// Start receiving updates. Messages and edits are queued on the returned
    /// channel in arrival order; the task runs until the process exits.
    pub fn subscribe(&self, buffer: usize) -> (mpsc::Receiver<TransportEvent>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(buffer);
        let bot = self.bot.clone();

        let handle = tokio::spawn(async move {
            info!("Starting Telegram update listener...");

            let handler = dptree::entry()
                .branch(Update::filter_message().endpoint(push_new))
                .branch(Update::filter_channel_post().endpoint(push_new))
                .branch(Update::filter_edited_message().endpoint(push_edited))
                .branch(Update::filter_edited_channel_post().endpoint(push_edited));

            Dispatcher::builder(bot, handler)
                .dependencies(dptree::deps![tx])
                .default_handler(|upd| async move {
                    warn!("Unhandled update: {:?}", upd.id);
                })
                .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
                .build()
                .dispatch()
                .await;
        });

        (rx, handle)
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn resolve_entity(&self, target: &EntityRef) -> Result<Entity, TransportError> {
        let recipient = match target {
            EntityRef::Id(id) => Recipient::Id(ChatId(*id)),
            EntityRef::Username(name) => Recipient::ChannelUsername(name.clone()),
        };
        let chat = self.bot.get_chat(recipient).await.map_err(map_error)?;
        Ok(entity_from_chat(&chat))
    }

    async fn send_message(&self, to: &Entity, text: &str) -> Result<(), TransportError> {
        self.bot
            .send_message(ChatId(to.id), text)
            .await
            .map(|_| ())
            .map_err(map_error)
    }
}

/// Used as the destination session when built from the destination token
#[async_trait]
impl SinkSession for TelegramTransport {
    async fn own_id(&self) -> Result<i64, TransportError> {
        let me = self.bot.get_me().await.map_err(map_error)?;
        info!(
            "Destination session logged in as {} (@{})",
            me.first_name,
            me.username()
        );
        i64::try_from(me.id.0)
            .map_err(|_| TransportError::Api(format!("user id {} out of range", me.id.0)))
    }
}
