//! C5: the `/report` subsystem (spec §4.5) -- guard chain, report recording,
//! threshold check, and the admin-chat notification this module shares
//! with `admin_dialog`'s `R?`/`R!` transitions.

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::callback::CallbackAction;
use crate::config::REPORT_TEXT_TRUNCATE_RUNES;
use crate::context::AppContext;
use crate::error::CoreError;
use crate::markdown;
use crate::platform::PlatformOp;
use crate::reports::{Report, ReportsStore};

/// A `/report` reply, as seen by the dispatcher.
pub struct ReportTrigger {
    pub reporter_user_id: i64,
    pub reporter_user_name: String,
    /// `None` when the replied-to message has no `From` user (channel or
    /// anonymous-admin post) -- guard 1.
    pub reported_user_id: Option<i64>,
    pub reported_user_name: String,
    pub msg_id: i64,
    pub chat_id: i64,
    pub msg_text: String,
    pub command_msg_id: i64,
}

/// Builds the admin-chat notification body: title, reported-user link,
/// truncated message text, then a bulleted reporter list (spec §4.5).
pub fn format_report_notification(reports: &[Report], reported_id: i64) -> String {
    let reported_name = reports
        .iter()
        .find(|r| r.reported_user_id == reported_id)
        .map(|r| r.reported_user_name.as_str())
        .unwrap_or("unknown");

    let truncated: String = reports
        .first()
        .map(|r| r.msg_text.replace('\n', " "))
        .unwrap_or_default()
        .chars()
        .take(REPORT_TEXT_TRUNCATE_RUNES)
        .collect();

    let reporters = reports
        .iter()
        .map(|r| format!("- {}", markdown::user_link(r.reporter_user_id, &r.reporter_user_name)))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "🚩 {} report(s) against {}\n\n> {}\n\nreported by:\n{}",
        reports.len(),
        markdown::user_link(reported_id, reported_name),
        markdown::escape(&truncated),
        reporters
    )
}

pub fn report_keyboard(reported_id: i64, msg_id: i64) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("✅ approve", CallbackAction::ReportApprove { id: reported_id, msg_id }.to_data()),
        InlineKeyboardButton::callback("❌ reject", CallbackAction::ReportReject { id: reported_id, msg_id }.to_data()),
        InlineKeyboardButton::callback("🔨 ban a reporter", CallbackAction::ReportAskBanReporter { id: reported_id, msg_id }.to_data()),
    ]])
}

/// Runs the full `/report` guard chain and, once the threshold is reached,
/// posts or refreshes the admin-chat notification.
pub async fn handle_report(ctx: &AppContext, trigger: ReportTrigger) -> Result<(), CoreError> {
    let reported_user_id = trigger
        .reported_user_id
        .ok_or_else(|| CoreError::guard("reported message has no From user (channel or anonymous admin)"))?;

    if ctx.is_super_user(trigger.reporter_user_id) {
        return Err(CoreError::guard("super-users should use /spam instead of /report"));
    }
    if ctx.is_super_user(reported_user_id) {
        return Err(CoreError::guard("refusing to record a report against a super-user"));
    }

    if ctx.config.report_rate_limit > 0 {
        let since = ctx.clock.now() - chrono::Duration::from_std(ctx.config.report_rate_period).unwrap_or(chrono::Duration::zero());
        let count = ctx
            .reports
            .get_reporter_count_since(trigger.reporter_user_id, since)
            .await
            .map_err(|e| CoreError::storage(e.to_string()))?;
        if count >= ctx.config.report_rate_limit {
            delete_command(ctx, trigger.chat_id, trigger.command_msg_id).await;
            return Err(CoreError::guard("reporter rate limit exceeded"));
        }
    }

    delete_command(ctx, trigger.chat_id, trigger.command_msg_id).await;

    let report = Report {
        msg_id: trigger.msg_id,
        chat_id: trigger.chat_id,
        reporter_user_id: trigger.reporter_user_id,
        reporter_user_name: trigger.reporter_user_name,
        reported_user_id,
        reported_user_name: trigger.reported_user_name,
        msg_text: trigger.msg_text,
        created_at: ctx.clock.now(),
        notification_sent: false,
        admin_msg_id: 0,
    };
    ctx.reports.add(&report).await.map_err(|e| CoreError::storage(e.to_string()))?;

    notify_if_threshold_reached(&ctx.reports, ctx, trigger.msg_id, trigger.chat_id, reported_user_id).await
}

async fn delete_command(ctx: &AppContext, chat_id: i64, command_msg_id: i64) {
    if let Err(e) = ctx
        .platform
        .request(PlatformOp::DeleteMessage { chat_id, message_id: command_msg_id as i32 })
        .await
    {
        log::warn!("failed to delete /report command message: {e}");
    }
}

async fn notify_if_threshold_reached(
    store: &ReportsStore,
    ctx: &AppContext,
    msg_id: i64,
    chat_id: i64,
    reported_user_id: i64,
) -> Result<(), CoreError> {
    let rows = store.get_by_message(msg_id, chat_id).await.map_err(|e| CoreError::storage(e.to_string()))?;
    if rows.len() < ctx.config.report_threshold {
        return Ok(());
    }

    let body = format_report_notification(&rows, reported_user_id);
    let keyboard = report_keyboard(reported_user_id, msg_id);

    if rows.iter().any(|r| !r.notification_sent) {
        let sent = markdown::send_with_fallback(ctx.platform.as_ref(), ctx.config.admin_chat_id, &body, Some(keyboard))
            .await
            .map_err(|e| CoreError::platform(e.to_string()))?;
        store
            .update_admin_msg_id(msg_id, chat_id, sent.message_id as i64)
            .await
            .map_err(|e| CoreError::storage(e.to_string()))?;
    } else {
        let admin_msg_id = rows[0].admin_msg_id;
        markdown::edit_with_fallback(ctx.platform.as_ref(), ctx.config.admin_chat_id, admin_msg_id as i32, &body, Some(keyboard))
            .await
            .map_err(|e| CoreError::platform(e.to_string()))?;
    }

    Ok(())
}
