use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::platform::{Entity, EntityRef, SinkSession, Transport, TransportError};

/// Sends allowed per payload when errors are transient. Rate-limit resends are not counted.
pub const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("destination could not be resolved: {0}")]
    SinkUnresolved(String),

    #[error("delivery failed after {attempts} attempts: {last_error}")]
    Exhausted {
        attempts: u32,
        last_error: TransportError,
    },
}

/// How a successful delivery went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub attempts: u32,
    pub rate_limit_waits: u32,
}

/// Where payloads go: the destination account and the chat it posts into
#[derive(Debug, Clone, PartialEq)]
pub struct Sink {
    pub account_id: i64,
    pub chat: Entity,
}

/// Delivers payloads through the destination account's session.
///
/// The sink is resolved on first use and cached only once resolution
/// succeeds, so a failed attempt is retried on the next delivery.
pub struct Dispatcher {
    session: Arc<dyn SinkSession>,
    account_id: Option<i64>,
    target: EntityRef,
    sink: OnceCell<Sink>,
    retry_delay: Duration,
}

impl Dispatcher {
    /// `account_id` is the id carried by the destination credential, if any
    pub fn new(
        session: Arc<dyn SinkSession>,
        account_id: Option<i64>,
        target: EntityRef,
        retry_delay: Duration,
    ) -> Self {
        Self {
            session,
            account_id,
            target,
            sink: OnceCell::new(),
            retry_delay,
        }
    }

    pub async fn sink(&self) -> Result<&Sink, DeliveryError> {
        self.sink.get_or_try_init(|| self.resolve_sink()).await
    }

    async fn resolve_sink(&self) -> Result<Sink, DeliveryError> {
        let account_id = match self.account_id {
            Some(id) => id,
            None => {
                debug!("No id in destination token, asking the session");
                self.session.own_id().await.map_err(|e| {
                    DeliveryError::SinkUnresolved(format!("destination account: {}", e))
                })?
            }
        };

        let chat = self
            .session
            .resolve_entity(&self.target)
            .await
            .map_err(|e| {
                DeliveryError::SinkUnresolved(format!(
                    "target {} is not reachable by the destination bot ({}); \
                     start the bot from that account or add it to the chat",
                    self.target, e
                ))
            })?;
        if chat.id == account_id {
            return Err(DeliveryError::SinkUnresolved(format!(
                "target {} is the destination bot itself",
                self.target
            )));
        }

        info!(
            "Resolved destination: account {} posting to {} (ID: {})",
            account_id,
            chat.title
                .as_deref()
                .or(chat.username.as_deref())
                .unwrap_or("unknown"),
            chat.id
        );
        Ok(Sink { account_id, chat })
    }

    /// Send `payload` to the destination. Rate limits are waited out without
    /// limit; other errors are retried up to [`MAX_ATTEMPTS`] sends in total.
    pub async fn deliver(&self, payload: &str) -> Result<DeliveryReport, DeliveryError> {
        let sink = self.sink().await?;
        let mut report = DeliveryReport {
            attempts: 0,
            rate_limit_waits: 0,
        };
        let mut failures = 0;

        loop {
            report.attempts += 1;
            match self.session.send_message(&sink.chat, payload).await {
                Ok(()) => return Ok(report),
                Err(TransportError::RateLimited { retry_after }) => {
                    report.rate_limit_waits += 1;
                    warn!("Rate limited, waiting {:?} before resending", retry_after);
                    tokio::time::sleep(retry_after).await;
                }
                Err(e) => {
                    failures += 1;
                    if failures >= MAX_ATTEMPTS {
                        return Err(DeliveryError::Exhausted {
                            attempts: failures,
                            last_error: e,
                        });
                    }
                    warn!(
                        "Send failed (attempt {}/{}): {}; retrying in {:?}",
                        failures, MAX_ATTEMPTS, e, self.retry_delay
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }
}
