//! C6: the listener/dispatcher outer loop (spec §4.6, §5). Built on
//! teloxide's `dptree`/`Dispatcher`, the same pair the teacher's
//! `admin_handlers/dispatcher.rs` used, generalized with dependency
//! injection instead of the teacher's module-level Redis client so every
//! branch shares one `AppContext` (spec §9 "cyclic references" redesign).

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use teloxide::dispatching::{Dispatcher, UpdateFilterExt};
use teloxide::dptree;
use teloxide::prelude::*;
use teloxide::types::MessageKind;

use crate::admin_dialog;
use crate::ban::{self, BanRequest};
use crate::commands::{self, CommandTrigger, DirectCommand};
use crate::context::AppContext;
use crate::detector::DetectRequest;
use crate::platform::PlatformOp;
use crate::user_reports::{self, ReportTrigger};

/// Tracks the last moment any update was seen, so the idle-timer task (spec
/// §4.6) can tell a quiet chat from one it just hasn't polled recently.
struct LastActivity(AtomicI64);

impl LastActivity {
    fn new(now: chrono::DateTime<chrono::Utc>) -> Self {
        Self(AtomicI64::new(now.timestamp()))
    }

    fn touch(&self, now: chrono::DateTime<chrono::Utc>) {
        self.0.store(now.timestamp(), Ordering::SeqCst);
    }

    fn idle_for(&self, now: chrono::DateTime<chrono::Utc>) -> i64 {
        (now.timestamp() - self.0.load(Ordering::SeqCst)).max(0)
    }
}

/// Starts the super-users refresh, then runs the dispatch loop until the
/// process is asked to stop. A failure to resolve the primary chat's
/// administrators is fatal per spec §7.
pub async fn run(bot: Bot, ctx: Arc<AppContext>) -> anyhow::Result<()> {
    ctx.super_users
        .refresh(ctx.platform.as_ref(), &ctx.config.super_users, ctx.config.prim_chat_id)
        .await
        .map_err(|e| anyhow::anyhow!("fatal startup error: could not resolve super users: {e}"))?;

    let last_activity = Arc::new(LastActivity::new(ctx.clock.now()));

    let idle_ctx = ctx.clone();
    let idle_activity = last_activity.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(idle_ctx.config.idle_duration);
        loop {
            interval.tick().await;
            let idle_secs = idle_activity.idle_for(idle_ctx.clock.now());
            if idle_secs < idle_ctx.config.idle_duration.as_secs() as i64 {
                continue;
            }

            log::debug!("no update within {:?}, emitting synthetic idle check", idle_ctx.config.idle_duration);
            if let Err(e) = idle_ctx
                .detector
                .check(DetectRequest {
                    text: "idle".to_string(),
                    user_id: 0,
                    user_name: String::new(),
                    chat_id: idle_ctx.config.prim_chat_id,
                    chat_name: String::new(),
                    meta: Default::default(),
                })
                .await
            {
                log::warn!("idle-tick classifier check failed: {e}");
            }
            idle_activity.touch(idle_ctx.clock.now());
        }
    });

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(message_handler))
        .branch(Update::filter_callback_query().endpoint(callback_handler));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![ctx, last_activity])
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn message_handler(
    msg: Message,
    ctx: Arc<AppContext>,
    last_activity: Arc<LastActivity>,
) -> Result<(), teloxide::RequestError> {
    last_activity.touch(ctx.clock.now());
    let chat_id = msg.chat.id.0;

    if let MessageKind::NewChatMembers(new_members) = &msg.kind {
        for member in &new_members.new_chat_members {
            let key = format!("new_{}_{}", chat_id, member.id.0);
            let _ = ctx.locator.add_message(&key, chat_id, member.id.0 as i64, &member.full_name(), msg.id.0 as i64).await;
        }
        return Ok(());
    }
    if let MessageKind::LeftChatMember(left) = &msg.kind {
        let key = format!("new_{}_{}", chat_id, left.left_chat_member.id.0);
        if ctx.config.suppress_join_message {
            if let Some(join_notice) = ctx.locator.message(&key).await {
                let _ = ctx.platform.request(PlatformOp::DeleteMessage { chat_id, message_id: join_notice.msg_id as i32 }).await;
            }
        }
        return Ok(());
    }

    let Some(text) = msg.text().map(str::to_string) else { return Ok(()) };
    let from = msg.from();

    if chat_id == ctx.config.prim_chat_id {
        if let Some(reply) = msg.reply_to_message() {
            if let (Some(command), Some(admin)) = (DirectCommand::from_leading_token(&text), from) {
                if ctx.is_super_user(admin.id.0 as i64) {
                    let trigger = CommandTrigger {
                        admin_user_name: admin.full_name(),
                        command,
                        chat_id,
                        command_msg_id: msg.id.0 as i64,
                        replied_msg_id: reply.id.0 as i64,
                        replied_user_id: reply.from().map(|u| u.id.0 as i64).unwrap_or(0),
                        replied_user_name: reply.from().map(|u| u.full_name()).unwrap_or_default(),
                        replied_text: reply.text().unwrap_or_default().to_string(),
                        replied_sender_chat_id: reply.sender_chat().map(|c| c.id.0).unwrap_or(0),
                    };
                    if let Err(e) = commands::handle_direct_command(&ctx, trigger).await {
                        log::warn!("direct command failed: {e}");
                    }
                    return Ok(());
                }
            }

            if text.trim().eq_ignore_ascii_case(crate::config::direct_command::REPORT) {
                let reporter = match from {
                    Some(u) => u,
                    None => return Ok(()),
                };
                let trigger = ReportTrigger {
                    reporter_user_id: reporter.id.0 as i64,
                    reporter_user_name: reporter.full_name(),
                    reported_user_id: reply.from().map(|u| u.id.0 as i64),
                    reported_user_name: reply.from().map(|u| u.full_name()).unwrap_or_default(),
                    msg_id: reply.id.0 as i64,
                    chat_id,
                    msg_text: reply.text().unwrap_or_default().to_string(),
                    command_msg_id: msg.id.0 as i64,
                };
                if let Err(e) = user_reports::handle_report(&ctx, trigger).await {
                    log::warn!("/report rejected: {e}");
                }
                return Ok(());
            }
        }

        handle_primary_message(&ctx, &msg, &text, from).await;
    } else if chat_id == ctx.config.admin_chat_id {
        let Some(admin) = from else { return Ok(()) };
        if !ctx.is_super_user(admin.id.0 as i64) {
            return Ok(());
        }
        let is_forwarded = msg.forward_date().is_some();
        if is_forwarded {
            if let Err(e) = admin_dialog::handle_forwarded_message(&ctx, &admin.full_name(), true, &text).await {
                log::warn!("forwarded-message handler failed: {e}");
                let _ = crate::markdown::send_with_fallback(
                    ctx.platform.as_ref(),
                    ctx.config.admin_chat_id,
                    &format!("error: {e}"),
                    None,
                )
                .await;
            }
        }
    }

    Ok(())
}

/// The plain classify-then-ban path for an ordinary primary-chat message
/// (spec §4.6, §5 ordering guarantee: locator insert -> classify -> (on
/// spam) SpamData insert -> ban -> admin notification).
async fn handle_primary_message(ctx: &AppContext, msg: &Message, text: &str, from: Option<&teloxide::types::User>) {
    let Some(user) = from else { return };
    let user_id = user.id.0 as i64;
    let user_name = user.full_name();
    let chat_id = msg.chat.id.0;
    let normalized = text.replace('\n', " ");

    if let Err(e) = ctx.locator.add_message(&normalized, chat_id, user_id, &user_name, msg.id.0 as i64).await {
        log::warn!("locator insert failed: {e}");
    }

    let result = match ctx
        .detector
        .check(DetectRequest {
            text: normalized.clone(),
            user_id,
            user_name: user_name.clone(),
            chat_id,
            chat_name: msg.chat.title().unwrap_or_default().to_string(),
            meta: Default::default(),
        })
        .await
    {
        Ok(r) => r,
        Err(e) => {
            log::warn!("detector check failed: {e}");
            return;
        }
    };

    if !result.spam {
        return;
    }

    if let Err(e) = ctx.locator.add_spam(user_id, &result.checks).await {
        log::warn!("spam-data insert failed: {e}");
    }

    if ctx.is_super_user(user_id) {
        log::info!("not banning super-user {user_name} ({user_id}) despite spam verdict");
        return;
    }

    let sender_chat_id = msg.sender_chat().map(|c| c.id.0).unwrap_or(0);
    let channel_id = if sender_chat_id != 0 && sender_chat_id != chat_id { sender_chat_id } else { 0 };

    if let Err(e) = ban::execute(
        ctx.platform.as_ref(),
        ctx.clock.as_ref(),
        BanRequest {
            user_id,
            channel_id,
            chat_id,
            duration: crate::config::DEFAULT_BAN_DURATION,
            user_name: user_name.clone(),
            dry: ctx.config.dry,
            training: ctx.config.training_mode,
            restrict: ctx.config.soft_ban_mode,
        },
    )
    .await
    {
        log::warn!("ban failed: {e}");
    }

    if !ctx.config.dry && !ctx.config.training_mode {
        let _ = ctx.platform.request(PlatformOp::DeleteMessage { chat_id, message_id: msg.id.0 }).await;
    }

    let body = admin_dialog::format_ban_notification(&user_name, user_id, text);
    let keyboard = admin_dialog::initial_ban_keyboard(user_id, msg.id.0 as i64);
    if let Err(e) =
        crate::markdown::send_with_fallback(ctx.platform.as_ref(), ctx.config.admin_chat_id, &body, Some(keyboard)).await
    {
        log::warn!("failed to post ban notification: {e}");
    }
}

async fn callback_handler(
    query: CallbackQuery,
    ctx: Arc<AppContext>,
    last_activity: Arc<LastActivity>,
) -> Result<(), teloxide::RequestError> {
    last_activity.touch(ctx.clock.now());
    let Some(data) = query.data.clone() else { return Ok(()) };
    let Some(message) = query.message.as_ref() else { return Ok(()) };

    let from_chat_id = message.chat().id.0;
    let message_id = message.id().0;
    let current_text = message.text().unwrap_or_default().to_string();
    let admin_name = query.from.username.clone().unwrap_or_else(|| query.from.first_name.clone());

    if let Err(e) =
        admin_dialog::handle_callback(&ctx, from_chat_id, query.id.as_str(), message_id, &current_text, &admin_name, &data)
            .await
    {
        log::warn!("callback handling failed: {e}");
    }

    Ok(())
}
