//! Callback-data parsing (spec §4.4.2, §6, §9 REDESIGN FLAGS). Replaces the
//! ad-hoc prefix-string handling scattered across handlers with one parser
//! returning a closed sum type, in the spirit of the `parse_admin_callback`
//! pattern used by the `kirill-jjj` Telegram admin-handler reference file.

use crate::config::callback_prefix as prefix;
use crate::config::CALLBACK_DATA_MAX_LEN;

/// A parsed inline-button callback. `id` is the user id (positive) or
/// channel id (negative) the button concerns; `msg_id` is the primary-chat
/// message id it's about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    AskUnban { id: i64, msg_id: i64 },
    ConfirmUnban { id: i64, msg_id: i64 },
    ConfirmBan { id: i64, msg_id: i64 },
    ShowInfo { id: i64, msg_id: i64 },
    ReportApprove { id: i64, msg_id: i64 },
    ReportReject { id: i64, msg_id: i64 },
    ReportAskBanReporter { id: i64, msg_id: i64 },
    ReportConfirmBanReporter { reporter_id: i64, msg_id: i64 },
    ReportCancel { id: i64, msg_id: i64 },
}

impl CallbackAction {
    /// Parses callback `data` per spec §6's wire format:
    /// `<prefix><user_or_channel_id>:<msg_id>`. Two-character report
    /// prefixes (`R+`, `R-`, `R?`, `R!`, `RX`) are checked before the
    /// single-character ones so `R+` isn't mistaken for bare `+`. A data
    /// string with no recognized prefix is the confirm-unban case: it
    /// starts directly with the (possibly negative) id.
    pub fn parse(data: &str) -> Option<Self> {
        let (rest, build): (&str, fn(i64, i64) -> CallbackAction) = if let Some(r) = data.strip_prefix("R+") {
            (r, |id, msg_id| CallbackAction::ReportApprove { id, msg_id })
        } else if let Some(r) = data.strip_prefix("R-") {
            (r, |id, msg_id| CallbackAction::ReportReject { id, msg_id })
        } else if let Some(r) = data.strip_prefix("R?") {
            (r, |id, msg_id| CallbackAction::ReportAskBanReporter { id, msg_id })
        } else if let Some(r) = data.strip_prefix("R!") {
            (r, |reporter_id, msg_id| CallbackAction::ReportConfirmBanReporter { reporter_id, msg_id })
        } else if let Some(r) = data.strip_prefix("RX") {
            (r, |id, msg_id| CallbackAction::ReportCancel { id, msg_id })
        } else if let Some(r) = data.strip_prefix(prefix::ASK_UNBAN) {
            (r, |id, msg_id| CallbackAction::AskUnban { id, msg_id })
        } else if let Some(r) = data.strip_prefix(prefix::CONFIRM_BAN) {
            (r, |id, msg_id| CallbackAction::ConfirmBan { id, msg_id })
        } else if let Some(r) = data.strip_prefix(prefix::SHOW_INFO) {
            (r, |id, msg_id| CallbackAction::ShowInfo { id, msg_id })
        } else {
            (data, |id, msg_id| CallbackAction::ConfirmUnban { id, msg_id })
        };

        let (id_part, msg_part) = rest.split_once(':')?;
        let id: i64 = id_part.parse().ok()?;
        let msg_id: i64 = msg_part.parse().ok()?;
        Some(build(id, msg_id))
    }

    /// Serializes back to wire format, for building inline keyboards.
    pub fn to_data(self) -> String {
        let data = match self {
            CallbackAction::AskUnban { id, msg_id } => format!("{}{}:{}", prefix::ASK_UNBAN, id, msg_id),
            CallbackAction::ConfirmUnban { id, msg_id } => format!("{}:{}", id, msg_id),
            CallbackAction::ConfirmBan { id, msg_id } => format!("{}{}:{}", prefix::CONFIRM_BAN, id, msg_id),
            CallbackAction::ShowInfo { id, msg_id } => format!("{}{}:{}", prefix::SHOW_INFO, id, msg_id),
            CallbackAction::ReportApprove { id, msg_id } => format!("{}{}:{}", prefix::REPORT_APPROVE, id, msg_id),
            CallbackAction::ReportReject { id, msg_id } => format!("{}{}:{}", prefix::REPORT_REJECT, id, msg_id),
            CallbackAction::ReportAskBanReporter { id, msg_id } => {
                format!("{}{}:{}", prefix::REPORT_ASK_BAN_REPORTER, id, msg_id)
            }
            CallbackAction::ReportConfirmBanReporter { reporter_id, msg_id } => {
                format!("{}{}:{}", prefix::REPORT_CONFIRM_BAN_REPORTER, reporter_id, msg_id)
            }
            CallbackAction::ReportCancel { id, msg_id } => format!("{}{}:{}", prefix::REPORT_CANCEL, id, msg_id),
        };

        if data.len() > CALLBACK_DATA_MAX_LEN {
            log::warn!("callback data exceeds platform's {CALLBACK_DATA_MAX_LEN}-byte limit: {data}");
        }
        data
    }
}
