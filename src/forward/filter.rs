use std::fmt;

use crate::config::FilterPolicy;
use crate::platform::{IncomingEvent, Media};

/// First rule an event failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Forwarded,
    BotSender,
    Sticker,
    Voice,
    Media(&'static str),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Forwarded => write!(f, "forwarded message"),
            RejectReason::BotSender => write!(f, "bot message"),
            RejectReason::Sticker => write!(f, "sticker"),
            RejectReason::Voice => write!(f, "voice/audio"),
            RejectReason::Media(kind) => write!(f, "{} media", kind),
        }
    }
}

/// Apply the policy to an event. Rules run in a fixed order and the first
/// failure decides the reason.
pub fn check(
    event: &IncomingEvent,
    policy: &FilterPolicy,
    sender_is_bot: bool,
) -> Result<(), RejectReason> {
    if event.is_forwarded && !policy.forward_forwarded_messages {
        return Err(RejectReason::Forwarded);
    }
    if sender_is_bot && !policy.forward_bot_messages {
        return Err(RejectReason::BotSender);
    }

    let Some(media) = &event.media else {
        return Ok(());
    };
    match media {
        Media::Sticker if !policy.forward_stickers => Err(RejectReason::Sticker),
        Media::Sticker => Ok(()),
        Media::Voice | Media::Audio if !policy.forward_voice => Err(RejectReason::Voice),
        Media::Voice | Media::Audio => Ok(()),
        other => {
            let kind_allowed = match other {
                Media::Photo => policy.forward_photos,
                Media::Video => policy.forward_videos,
                Media::Document { .. } => policy.forward_documents,
                _ => true,
            };
            if policy.forward_media && kind_allowed {
                Ok(())
            } else {
                Err(RejectReason::Media(other.kind_name()))
            }
        }
    }
}

/// Boolean form of [`check`]
#[cfg(test)]
pub fn should_forward(event: &IncomingEvent, policy: &FilterPolicy, sender_is_bot: bool) -> bool {
    check(event, policy, sender_is_bot).is_ok()
}
