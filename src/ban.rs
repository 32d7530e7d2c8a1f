//! Ban executor (C3, spec §4.3): the single entry point for every moderation
//! action on the platform. This is where `ban_manager.rs`'s Redis ban-decay
//! loop used to live; that loop doesn't apply once bans are platform-native
//! (duration passed straight to `BanChatMember`), so this module is a plain
//! request-in, `PlatformOp`-out function instead.

use chrono::Duration as ChronoDuration;
use std::time::Duration;

use crate::clock::Clock;
use crate::config::{BAN_DURATION_COERCION_THRESHOLD, MIN_BAN_DURATION};
use crate::error::CoreResult;
use crate::platform::{PlatformClient, PlatformOp};

/// A single moderation action (spec §4.3).
#[derive(Debug, Clone)]
pub struct BanRequest {
    pub user_id: i64,
    /// Non-zero when the message was posted by a linked channel rather
    /// than a user; in that case `channel_id` is banned instead of
    /// `user_id`.
    pub channel_id: i64,
    pub chat_id: i64,
    pub duration: Duration,
    pub user_name: String,
    pub dry: bool,
    pub training: bool,
    /// Soft-ban mode: mute (restrict) instead of removing.
    pub restrict: bool,
}

/// Executes `req` against `platform`, applying the dry/training bypass and
/// duration coercion rules from spec §4.3. Returns `Ok(())` in every
/// bypassed case; real platform failures propagate.
pub async fn execute(
    platform: &dyn PlatformClient,
    clock: &dyn Clock,
    req: BanRequest,
) -> CoreResult<()> {
    if req.dry {
        log::info!("dry run: would ban {} ({}) in chat {}", req.user_name, req.user_id, req.chat_id);
        return Ok(());
    }
    if req.training {
        log::info!("training mode: not banning {} ({})", req.user_name, req.user_id);
        return Ok(());
    }

    let duration = if req.duration < BAN_DURATION_COERCION_THRESHOLD {
        MIN_BAN_DURATION
    } else {
        req.duration
    };
    let until_date = clock.now() + ChronoDuration::from_std(duration).unwrap_or(ChronoDuration::seconds(60));

    let op = if req.restrict {
        PlatformOp::RestrictChatMember { chat_id: req.chat_id, user_id: req.user_id, until_date }
    } else if req.channel_id != 0 {
        PlatformOp::BanChatSenderChat { chat_id: req.chat_id, sender_chat_id: req.channel_id, until_date }
    } else {
        PlatformOp::BanChatMember { chat_id: req.chat_id, user_id: req.user_id, until_date }
    };

    platform.request(op).await
}
