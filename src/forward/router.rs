use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{Config, FilterPolicy};
use crate::forward::dedup::{DedupCache, DedupKey};
use crate::forward::dispatch::Dispatcher;
use crate::forward::filter::{self, RejectReason};
use crate::forward::format::{MessageContext, MessageFormatter};
use crate::forward::matcher::MonitoredGroups;
use crate::forward::stats::ForwardStats;
use crate::platform::{IncomingEvent, Transport, TransportEvent};

const PREVIEW_CHARS: usize = 50;

/// What happened to one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Logged only: forwarding is off, or the event was an edit
    Displayed,
    Unmonitored,
    Filtered(RejectReason),
    Duplicate,
    Forwarded,
    Failed,
}

/// Runs every incoming event through match, filter, dedup, format and
/// delivery, one event at a time.
pub struct Router {
    forwarding: bool,
    groups: MonitoredGroups,
    policy: FilterPolicy,
    formatter: MessageFormatter,
    dedup_enabled: bool,
    dedup_window: Duration,
    dedup: Arc<Mutex<DedupCache>>,
    dispatcher: Option<Dispatcher>,
    stats: Arc<ForwardStats>,
    forward_delay: Duration,
}

impl Router {
    pub fn new(
        config: &Config,
        dispatcher: Option<Dispatcher>,
        dedup: Arc<Mutex<DedupCache>>,
        stats: Arc<ForwardStats>,
    ) -> Self {
        Self {
            forwarding: config.forward.enabled,
            groups: MonitoredGroups::new(config.forward.monitor_groups.clone()),
            policy: config.filter.clone(),
            formatter: MessageFormatter::new(&config.format),
            dedup_enabled: config.dedup.enabled,
            dedup_window: config.dedup_window(),
            dedup,
            dispatcher,
            stats,
            forward_delay: config.forward_delay(),
        }
    }

    pub fn forwarding_enabled(&self) -> bool {
        self.forwarding
    }

    pub fn monitored_groups(&self) -> &[String] {
        self.groups.specs()
    }

    /// Resolve the destination and the monitored groups. Forwarding is turned
    /// off for the rest of the process if either comes up empty; message
    /// reception keeps running.
    pub async fn prepare<T>(&mut self, transport: &T)
    where
        T: Transport + ?Sized,
    {
        if !self.forwarding {
            info!("Group forwarding is disabled");
            return;
        }

        let resolved = match &self.dispatcher {
            Some(dispatcher) => dispatcher.sink().await.map(|_| ()).map_err(|e| e.to_string()),
            None => Err("no destination session".to_string()),
        };
        if let Err(e) = resolved {
            error!("Failed to resolve forwarding destination: {}", e);
            warn!("Forwarding disabled; check BOT_TOKEN and FORWARD_TARGET");
            self.forwarding = false;
            return;
        }

        info!("Validating {} monitored group(s)...", self.groups.specs().len());
        let unresolved = self.groups.resolve_all(transport).await;
        for spec in &unresolved {
            warn!(
                "Dropping monitored group '{}': not joined, wrong id, or deleted",
                spec
            );
        }

        if self.groups.is_empty() {
            warn!("No accessible monitored groups; forwarding disabled");
            warn!("Check membership and ids, or try the group's @username");
            self.forwarding = false;
        } else {
            info!("Monitoring groups: {:?}", self.groups.specs());
        }
    }

    /// Consume the subscription until it closes
    pub async fn run(&self, mut events: mpsc::Receiver<TransportEvent>) {
        info!("Listening for messages...");
        while let Some(event) = events.recv().await {
            let outcome = self.handle_event(&event).await;
            debug!("Event outcome: {:?}", outcome);
        }
        info!("Event subscription closed");
    }

    pub async fn handle_event(&self, event: &TransportEvent) -> Outcome {
        match event {
            TransportEvent::NewMessage(message) => self.handle_new_message(message).await,
            TransportEvent::MessageEdited(message) => self.handle_edited_message(message),
        }
    }

    pub async fn handle_new_message(&self, event: &IncomingEvent) -> Outcome {
        let Some(dispatcher) = self.dispatcher.as_ref().filter(|_| self.forwarding) else {
            self.display(event);
            return Outcome::Displayed;
        };

        if !self.groups.matches(event.chat_id, event.chat_username.as_deref()) {
            debug!("Skipping message from unmonitored chat {}", event.chat_id);
            return Outcome::Unmonitored;
        }

        self.display(event);
        self.stats.record_received();

        if let Err(reason) = filter::check(event, &self.policy, event.sender_is_bot()) {
            debug!("Filtered message {} in {}: {}", event.message_id, event.chat_id, reason);
            self.stats.record_filtered();
            return Outcome::Filtered(reason);
        }

        if self.dedup_enabled {
            let key = DedupKey::new(event.chat_id, event.message_id, event.text.as_deref());
            let is_new = self
                .dedup
                .lock()
                .await
                .check_and_record(key, Instant::now(), self.dedup_window);
            if !is_new {
                debug!("Skipping duplicate message {:?}", key);
                return Outcome::Duplicate;
            }
        }

        let chat_title = self.chat_title(event);
        let sender_name = event.sender_name();
        let ctx = MessageContext {
            chat_title: &chat_title,
            sender_name: &sender_name,
            chat_id: event.chat_id,
            message_id: event.message_id,
            send_time: Some(event.date),
        };
        let payload = self.formatter.format(&ctx, event);

        match dispatcher.deliver(&payload).await {
            Ok(report) => {
                self.stats.record_forwarded();
                info!(
                    "Forwarded: {} -> {}: {} ({} attempt(s))",
                    chat_title,
                    sender_name,
                    event.preview(PREVIEW_CHARS),
                    report.attempts
                );
                if !self.forward_delay.is_zero() {
                    tokio::time::sleep(self.forward_delay).await;
                }
                Outcome::Forwarded
            }
            Err(e) => {
                error!("Failed to forward message {} from {}: {}", event.message_id, chat_title, e);
                self.stats.record_error();
                Outcome::Failed
            }
        }
    }

    pub fn handle_edited_message(&self, event: &IncomingEvent) -> Outcome {
        if self.forwarding && !self.groups.matches(event.chat_id, event.chat_username.as_deref()) {
            return Outcome::Unmonitored;
        }
        info!(
            "Message edited - chat: {}, sender: {}, message: {}",
            self.chat_title(event),
            event.sender_name(),
            event.preview(PREVIEW_CHARS)
        );
        Outcome::Displayed
    }

    fn chat_title(&self, event: &IncomingEvent) -> String {
        event
            .chat_title
            .as_deref()
            .or_else(|| self.groups.title_for(event.chat_id))
            .unwrap_or("Unknown Group")
            .to_string()
    }

    fn display(&self, event: &IncomingEvent) {
        let media = event
            .media
            .as_ref()
            .map(|m| format!(" [{}]", m.kind_name()))
            .unwrap_or_default();
        info!(
            "New message - chat: {}, sender: {}, message: {}{}",
            self.chat_title(event),
            event.sender_name(),
            event.preview(PREVIEW_CHARS),
            media
        );
    }
}
