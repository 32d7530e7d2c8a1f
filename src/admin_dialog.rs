//! C4: the admin chat's two surfaces -- the forwarded-message handler
//! (§4.4.1) and the inline-callback state machine (§4.4.2). Keyboards are
//! built with `InlineKeyboardButton::callback`/`InlineKeyboardMarkup::new`,
//! the same pair the teacher's `admin_handlers/admin.rs` used throughout.

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::ban::{self, BanRequest};
use crate::callback::CallbackAction;
use crate::context::AppContext;
use crate::detector::{ApprovedUserInfo, DetectRequest};
use crate::error::{CompositeError, CoreError};
use crate::markdown;
use crate::platform::PlatformOp;

/// Separates the header of a notification from the verbatim reported text,
/// so a later callback handler (which only has the rendered message back)
/// can recover the original text for `UpdateSpam`/`UpdateHam`.
const TEXT_MARKER: &str = "\n\n> ";

pub(crate) fn format_ban_notification(user_name: &str, user_id: i64, text: &str) -> String {
    format!(
        "🚫 permanently banned {}{}{}",
        markdown::user_link(user_id, user_name),
        TEXT_MARKER,
        markdown::escape(text)
    )
}

fn extract_marked_text(rendered: &str) -> Option<&str> {
    rendered.split(TEXT_MARKER).nth(1).map(|rest| rest.split('\n').next().unwrap_or(rest))
}

pub(crate) fn initial_ban_keyboard(id: i64, msg_id: i64) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("🔓 unban?", CallbackAction::AskUnban { id, msg_id }.to_data()),
        InlineKeyboardButton::callback("✅ keep banned", CallbackAction::ConfirmBan { id, msg_id }.to_data()),
        InlineKeyboardButton::callback("ℹ️ info", CallbackAction::ShowInfo { id, msg_id }.to_data()),
    ]])
}

fn confirmation_keyboard(id: i64, msg_id: i64) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("unban for real", CallbackAction::ConfirmUnban { id, msg_id }.to_data()),
        InlineKeyboardButton::callback("keep banned", CallbackAction::ConfirmBan { id, msg_id }.to_data()),
    ]])
}

/// 4.4.1 -- a super-user forwards a message into the admin chat that the
/// classifier missed.
pub async fn handle_forwarded_message(
    ctx: &AppContext,
    admin_name: &str,
    is_forwarded: bool,
    text: &str,
) -> Result<(), CoreError> {
    if !is_forwarded {
        return Err(CoreError::guard("forwarded-message handler invoked on a non-forwarded message"));
    }
    if text.trim().is_empty() {
        return Err(CoreError::guard("forwarded message has no text"));
    }

    let meta = ctx
        .locator
        .message(text)
        .await
        .ok_or_else(|| CoreError::guard("not found: no locator entry for this text"))?;

    if ctx.is_super_user(meta.user_id) {
        return Err(CoreError::guard("refusing to ban a super-user"));
    }

    ctx.detector
        .remove_approved_user(meta.user_id)
        .await
        .map_err(|e| CoreError::platform(e.to_string()))?;

    let check = ctx
        .detector
        .check(DetectRequest {
            text: text.to_string(),
            user_id: meta.user_id,
            user_name: meta.user_name.clone(),
            chat_id: meta.chat_id,
            chat_name: String::new(),
            meta: Default::default(),
        })
        .await
        .map_err(|e| CoreError::platform(e.to_string()))?;

    ctx.locator
        .add_spam(meta.user_id, &check.checks)
        .await
        .map_err(|e| CoreError::storage(e.to_string()))?;

    let body = format_ban_notification(&meta.user_name, meta.user_id, text);
    let keyboard = initial_ban_keyboard(meta.user_id, meta.msg_id);
    markdown::send_with_fallback(ctx.platform.as_ref(), ctx.config.admin_chat_id, &body, Some(keyboard))
        .await
        .map_err(|e| CoreError::platform(e.to_string()))?;

    log::info!("admin {admin_name} flagged missed spam from {} ({})", meta.user_name, meta.user_id);

    if !ctx.config.dry {
        // §7: aggregate failures from the delete/ban/update-spam trio instead
        // of aborting on the first one, so partial successes stay visible.
        let mut errors = CompositeError::new();

        if let Err(e) = ctx
            .platform
            .request(PlatformOp::DeleteMessage { chat_id: meta.chat_id, message_id: meta.msg_id as i32 })
            .await
        {
            errors.push("failed to delete message", e);
        }

        // An anonymous-admin post carries the group's own id as the sender;
        // a channel post carries a negative sender id. Either way, the
        // channel (not a user) is what gets banned.
        let channel_id = if meta.user_id == meta.chat_id || meta.user_id < 0 { meta.user_id } else { 0 };
        if let Err(e) = ban::execute(
            ctx.platform.as_ref(),
            ctx.clock.as_ref(),
            BanRequest {
                user_id: meta.user_id,
                channel_id,
                chat_id: meta.chat_id,
                duration: crate::config::DEFAULT_BAN_DURATION,
                user_name: meta.user_name.clone(),
                dry: ctx.config.dry,
                training: ctx.config.training_mode,
                restrict: ctx.config.soft_ban_mode,
            },
        )
        .await
        {
            errors.push("failed to ban user", e);
        }

        if let Err(e) = ctx.detector.update_spam(text).await {
            errors.push("failed to update spam sample", e);
        }

        if !errors.is_empty() {
            return Err(CoreError::platform(errors.to_string()));
        }
    }

    Ok(())
}

/// 4.4.2 -- one inline-button press in the admin chat. `current_text` is
/// the message body as it stands before this transition; callers must pass
/// the real rendered text so `!`/`R!` transitions can append/rewrite it.
pub async fn handle_callback(
    ctx: &AppContext,
    from_chat_id: i64,
    callback_query_id: &str,
    message_id: i32,
    current_text: &str,
    admin_name: &str,
    data: &str,
) -> Result<(), CoreError> {
    // Security boundary (spec §4.4.2 invariants): only the admin chat may
    // drive this state machine.
    if from_chat_id != ctx.config.admin_chat_id {
        log::warn!("ignoring callback from non-admin chat {from_chat_id}");
        return Ok(());
    }

    // Ack first so the platform's spinner clears even if a later step
    // fails (spec §5 ordering guarantee).
    let _ = ctx.platform.request(PlatformOp::AnswerCallbackQuery {
        callback_query_id: callback_query_id.to_string(),
        text: None,
    })
    .await;

    let action = CallbackAction::parse(data)
        .ok_or_else(|| CoreError::guard(format!("unparseable callback data: {data}")))?;

    match action {
        CallbackAction::AskUnban { id, msg_id } => {
            let keyboard = confirmation_keyboard(id, msg_id);
            ctx.platform
                .request(PlatformOp::EditMessageReplyMarkup {
                    chat_id: ctx.config.admin_chat_id,
                    message_id,
                    reply_markup: Some(keyboard),
                })
                .await
                .map_err(|e| CoreError::platform(e.to_string()))?;
        }

        CallbackAction::ConfirmUnban { id, msg_id } => {
            let op = if id < 0 {
                PlatformOp::UnbanChatSenderChat { chat_id: ctx.config.prim_chat_id, sender_chat_id: id }
            } else {
                PlatformOp::UnbanChatMember { chat_id: ctx.config.prim_chat_id, user_id: id, only_if_banned: ctx.config.keep_user }
            };
            ctx.platform.request(op).await.map_err(|e| CoreError::platform(e.to_string()))?;

            let user_name = ctx.locator.user_name_by_id(id).await.unwrap_or_default();
            ctx.detector
                .add_approved_user(ApprovedUserInfo { user_id: id, user_name })
                .await
                .map_err(|e| CoreError::platform(e.to_string()))?;

            let mut elapsed = 0i64;
            if let Some(text) = extract_marked_text(current_text) {
                ctx.detector.update_ham(text).await.map_err(|e| CoreError::platform(e.to_string()))?;
                if let Some(original) = ctx.locator.message(text).await {
                    elapsed = ctx.clock.now().signed_duration_since(original.time).num_seconds().max(0);
                }
            }

            let new_text = format!("{current_text}\n\n_unbanned by {} in {}s_", markdown::escape(admin_name), elapsed);
            markdown::edit_with_fallback(ctx.platform.as_ref(), ctx.config.admin_chat_id, message_id, &new_text, None)
                .await
                .map_err(|e| CoreError::platform(e.to_string()))?;
            let _ = msg_id;
        }

        CallbackAction::ConfirmBan { id, msg_id } => {
            let mut elapsed = 0i64;
            if let Some(text) = extract_marked_text(current_text) {
                ctx.detector.update_spam(text).await.map_err(|e| CoreError::platform(e.to_string()))?;
                if let Some(original) = ctx.locator.message(text).await {
                    elapsed = ctx.clock.now().signed_duration_since(original.time).num_seconds().max(0);
                }
            }

            if ctx.config.training_mode {
                let user_name = ctx.locator.user_name_by_id(id).await.unwrap_or_default();
                ban::execute(
                    ctx.platform.as_ref(),
                    ctx.clock.as_ref(),
                    BanRequest {
                        user_id: id,
                        channel_id: if id < 0 { id } else { 0 },
                        chat_id: ctx.config.prim_chat_id,
                        duration: crate::config::DEFAULT_BAN_DURATION,
                        user_name,
                        dry: ctx.config.dry,
                        training: false,
                        restrict: ctx.config.soft_ban_mode,
                    },
                )
                .await
                .map_err(|e| CoreError::platform(e.to_string()))?;

                ctx.platform
                    .request(PlatformOp::DeleteMessage { chat_id: ctx.config.prim_chat_id, message_id: msg_id as i32 })
                    .await
                    .map_err(|e| CoreError::platform(e.to_string()))?;
            }

            let new_text = format!("{current_text}\n\n_ban confirmed by {} in {}s_", markdown::escape(admin_name), elapsed);
            ctx.platform
                .request(PlatformOp::EditMessageReplyMarkup { chat_id: ctx.config.admin_chat_id, message_id, reply_markup: None })
                .await
                .map_err(|e| CoreError::platform(e.to_string()))?;
            markdown::edit_with_fallback(ctx.platform.as_ref(), ctx.config.admin_chat_id, message_id, &new_text, None)
                .await
                .map_err(|e| CoreError::platform(e.to_string()))?;
        }

        CallbackAction::ShowInfo { id, .. } => {
            let spam = ctx.locator.spam(id).await;
            let details = match spam {
                Some(data) => data
                    .checks
                    .iter()
                    .map(|c| format!("{}: {}", c.name, c.details))
                    .collect::<Vec<_>>()
                    .join(", "),
                None => "no spam-check data on record".to_string(),
            };
            let new_text = format!("{current_text}\n\n_checks: {}_", markdown::escape(&details));
            markdown::edit_with_fallback(ctx.platform.as_ref(), ctx.config.admin_chat_id, message_id, &new_text, None)
                .await
                .map_err(|e| CoreError::platform(e.to_string()))?;
        }

        CallbackAction::ReportApprove { id, msg_id } => {
            let reports = ctx
                .reports
                .get_by_message(msg_id, ctx.config.prim_chat_id)
                .await
                .map_err(|e| CoreError::storage(e.to_string()))?;
            let user_name = reports.first().map(|r| r.reported_user_name.clone()).unwrap_or_default();

            ctx.platform
                .request(PlatformOp::DeleteMessage { chat_id: ctx.config.prim_chat_id, message_id: msg_id as i32 })
                .await
                .map_err(|e| CoreError::platform(e.to_string()))?;

            ban::execute(
                ctx.platform.as_ref(),
                ctx.clock.as_ref(),
                BanRequest {
                    user_id: id,
                    channel_id: if id < 0 { id } else { 0 },
                    chat_id: ctx.config.prim_chat_id,
                    duration: crate::config::DEFAULT_BAN_DURATION,
                    user_name,
                    dry: ctx.config.dry,
                    training: ctx.config.training_mode,
                    restrict: ctx.config.soft_ban_mode,
                },
            )
            .await
            .map_err(|e| CoreError::platform(e.to_string()))?;

            if let Some(text) = reports.first().map(|r| r.msg_text.clone()) {
                ctx.detector.update_spam(&text).await.map_err(|e| CoreError::platform(e.to_string()))?;
            }

            ctx.reports
                .delete_by_message(msg_id, ctx.config.prim_chat_id)
                .await
                .map_err(|e| CoreError::storage(e.to_string()))?;

            let new_text = format!("banned by {}", markdown::escape(admin_name));
            ctx.platform
                .request(PlatformOp::EditMessageReplyMarkup { chat_id: ctx.config.admin_chat_id, message_id, reply_markup: None })
                .await
                .map_err(|e| CoreError::platform(e.to_string()))?;
            markdown::edit_with_fallback(ctx.platform.as_ref(), ctx.config.admin_chat_id, message_id, &new_text, None)
                .await
                .map_err(|e| CoreError::platform(e.to_string()))?;
        }

        CallbackAction::ReportReject { msg_id, .. } => {
            ctx.reports
                .delete_by_message(msg_id, ctx.config.prim_chat_id)
                .await
                .map_err(|e| CoreError::storage(e.to_string()))?;

            let new_text = format!("rejected by {}", markdown::escape(admin_name));
            ctx.platform
                .request(PlatformOp::EditMessageReplyMarkup { chat_id: ctx.config.admin_chat_id, message_id, reply_markup: None })
                .await
                .map_err(|e| CoreError::platform(e.to_string()))?;
            markdown::edit_with_fallback(ctx.platform.as_ref(), ctx.config.admin_chat_id, message_id, &new_text, None)
                .await
                .map_err(|e| CoreError::platform(e.to_string()))?;
        }

        CallbackAction::ReportAskBanReporter { msg_id, .. } => {
            let reports = ctx
                .reports
                .get_by_message(msg_id, ctx.config.prim_chat_id)
                .await
                .map_err(|e| CoreError::storage(e.to_string()))?;

            let mut rows: Vec<Vec<InlineKeyboardButton>> = reports
                .iter()
                .map(|r| {
                    vec![InlineKeyboardButton::callback(
                        format!("ban {}", r.reporter_user_name),
                        CallbackAction::ReportConfirmBanReporter { reporter_id: r.reporter_user_id, msg_id }.to_data(),
                    )]
                })
                .collect();
            rows.push(vec![InlineKeyboardButton::callback(
                "cancel",
                CallbackAction::ReportCancel { id: 0, msg_id }.to_data(),
            )]);

            ctx.platform
                .request(PlatformOp::EditMessageReplyMarkup {
                    chat_id: ctx.config.admin_chat_id,
                    message_id,
                    reply_markup: Some(InlineKeyboardMarkup::new(rows)),
                })
                .await
                .map_err(|e| CoreError::platform(e.to_string()))?;
        }

        CallbackAction::ReportConfirmBanReporter { reporter_id, msg_id } => {
            let reports = ctx
                .reports
                .get_by_message(msg_id, ctx.config.prim_chat_id)
                .await
                .map_err(|e| CoreError::storage(e.to_string()))?;
            let reporter = reports.iter().find(|r| r.reporter_user_id == reporter_id);
            let reporter_name = reporter.map(|r| r.reporter_user_name.clone()).unwrap_or_default();

            ban::execute(
                ctx.platform.as_ref(),
                ctx.clock.as_ref(),
                BanRequest {
                    user_id: reporter_id,
                    channel_id: 0,
                    chat_id: ctx.config.prim_chat_id,
                    duration: crate::config::DEFAULT_BAN_DURATION,
                    user_name: reporter_name,
                    dry: ctx.config.dry,
                    training: ctx.config.training_mode,
                    restrict: ctx.config.soft_ban_mode,
                },
            )
            .await
            .map_err(|e| CoreError::platform(e.to_string()))?;

            ctx.reports
                .delete_reporter(reporter_id, msg_id, ctx.config.prim_chat_id)
                .await
                .map_err(|e| CoreError::storage(e.to_string()))?;

            let remaining = ctx
                .reports
                .get_by_message(msg_id, ctx.config.prim_chat_id)
                .await
                .map_err(|e| CoreError::storage(e.to_string()))?;

            if remaining.is_empty() {
                ctx.reports
                    .delete_by_message(msg_id, ctx.config.prim_chat_id)
                    .await
                    .map_err(|e| CoreError::storage(e.to_string()))?;
                let new_text = format!("all reporters banned by {}", markdown::escape(admin_name));
                ctx.platform
                    .request(PlatformOp::EditMessageReplyMarkup { chat_id: ctx.config.admin_chat_id, message_id, reply_markup: None })
                    .await
                    .map_err(|e| CoreError::platform(e.to_string()))?;
                markdown::edit_with_fallback(ctx.platform.as_ref(), ctx.config.admin_chat_id, message_id, &new_text, None)
                    .await
                    .map_err(|e| CoreError::platform(e.to_string()))?;
            } else {
                let reported_id = remaining[0].reported_user_id;
                let new_text = crate::user_reports::format_report_notification(&remaining, reported_id);
                let keyboard = crate::user_reports::report_keyboard(reported_id, msg_id);
                markdown::edit_with_fallback(ctx.platform.as_ref(), ctx.config.admin_chat_id, message_id, &new_text, Some(keyboard))
                    .await
                    .map_err(|e| CoreError::platform(e.to_string()))?;
            }
        }

        CallbackAction::ReportCancel { id, msg_id } => {
            let reported_id = if id != 0 {
                id
            } else {
                ctx.reports
                    .get_by_message(msg_id, ctx.config.prim_chat_id)
                    .await
                    .map_err(|e| CoreError::storage(e.to_string()))?
                    .first()
                    .map(|r| r.reported_user_id)
                    .unwrap_or(0)
            };
            let keyboard = crate::user_reports::report_keyboard(reported_id, msg_id);
            ctx.platform
                .request(PlatformOp::EditMessageReplyMarkup {
                    chat_id: ctx.config.admin_chat_id,
                    message_id,
                    reply_markup: Some(keyboard),
                })
                .await
                .map_err(|e| CoreError::platform(e.to_string()))?;
        }
    }

    Ok(())
}
