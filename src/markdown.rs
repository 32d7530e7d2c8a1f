//! Markdown escaping and the Markdown-first/plain-fallback send pattern
//! (spec §4.4.2, §9 REDESIGN FLAGS: "keep both" -- this is invariant
//! behavior the test suite expects).

use teloxide::types::InlineKeyboardMarkup;

use crate::platform::{PlatformClient, PlatformOp, SentMessage};

/// Escapes Telegram Markdown-reserved characters (`_`, `*`, `` ` ``, `[`) by
/// backslash. Used on substituted user text (names, message excerpts) before
/// it's interpolated into a Markdown-mode message.
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// A Markdown `tg://user?id=...` mention link, with the display name
/// escaped.
pub fn user_link(user_id: i64, display_name: &str) -> String {
    format!("[{}](tg://user?id={})", escape(display_name), user_id)
}

/// Sends `text` to `chat_id`, attempting Markdown first; on a platform
/// parsing failure, retries once in plain text (spec §4.4.2, §9).
pub async fn send_with_fallback(
    platform: &dyn PlatformClient,
    chat_id: i64,
    text: &str,
    reply_markup: Option<InlineKeyboardMarkup>,
) -> anyhow::Result<SentMessage> {
    let markdown_attempt = platform
        .send(PlatformOp::SendMessage {
            chat_id,
            text: text.to_string(),
            markdown: true,
            reply_markup: reply_markup.clone(),
        })
        .await;

    match markdown_attempt {
        Ok(sent) => Ok(sent),
        Err(e) => {
            log::warn!("markdown send failed, retrying as plain text: {e}");
            platform
                .send(PlatformOp::SendMessage { chat_id, text: text.to_string(), markdown: false, reply_markup })
                .await
        }
    }
}

/// Edits `message_id` in `chat_id`, attempting Markdown first, falling back
/// to plain text on failure -- same contract as `send_with_fallback`.
pub async fn edit_with_fallback(
    platform: &dyn PlatformClient,
    chat_id: i64,
    message_id: i32,
    text: &str,
    reply_markup: Option<InlineKeyboardMarkup>,
) -> anyhow::Result<()> {
    let markdown_attempt = platform
        .send(PlatformOp::EditMessageText {
            chat_id,
            message_id,
            text: text.to_string(),
            markdown: true,
            reply_markup: reply_markup.clone(),
        })
        .await;

    if let Err(e) = markdown_attempt {
        log::warn!("markdown edit failed, retrying as plain text: {e}");
        platform
            .send(PlatformOp::EditMessageText { chat_id, message_id, text: text.to_string(), markdown: false, reply_markup })
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::MockPlatform;

    #[test]
    fn escapes_reserved_characters_only() {
        assert_eq!(escape("a_b*c`d[e]f"), "a\\_b\\*c\\`d\\[e]f");
        assert_eq!(escape("plain text"), "plain text");
    }

    #[tokio::test]
    async fn falls_back_to_plain_on_markdown_failure() {
        let platform = MockPlatform::new();
        *platform.fail_markdown.lock().unwrap() = true;

        send_with_fallback(&platform, -100, "hello_world", None).await.unwrap();

        let calls = platform.calls();
        assert_eq!(calls.len(), 1);
        match &calls[0] {
            crate::platform::PlatformOp::SendMessage { markdown, .. } => assert!(!markdown),
            _ => panic!("expected SendMessage"),
        }
    }
}
