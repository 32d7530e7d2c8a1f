//! Error taxonomy for the core moderation engine (see spec §7).
//!
//! Call sites mostly work with `anyhow::Result` (`CoreResult<T>`), same as the
//! rest of this codebase; `CoreError` exists so a handler can match on *kind*
//! when the kind changes behavior (guard failures get surfaced to the admin
//! chat, storage failures don't).

use thiserror::Error;

pub type CoreResult<T> = anyhow::Result<T>;

/// The four error kinds from spec §7. Not every error in the codebase is
/// wrapped in this type -- only the ones whose kind a caller needs to branch
/// on.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Recoverable platform-API failure (send/edit/ban/...). Log at WARN,
    /// don't halt the dispatcher.
    #[error("platform API error: {0}")]
    Platform(String),

    /// Unexpected storage failure. Log at WARN, abort the surrounding
    /// operation, dispatcher continues.
    #[error("storage error: {0}")]
    Storage(String),

    /// A precondition failed: not-forwarded, empty text, super-user target,
    /// rate limit exceeded, etc.
    #[error("{0}")]
    Guard(String),

    /// Can't resolve the primary or admin chat id at startup. Propagates out
    /// of `Dispatcher::run` and terminates the bot.
    #[error("fatal startup error: {0}")]
    Fatal(String),
}

impl CoreError {
    pub fn guard(msg: impl Into<String>) -> Self {
        CoreError::Guard(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        CoreError::Storage(msg.into())
    }

    pub fn platform(msg: impl Into<String>) -> Self {
        CoreError::Platform(msg.into())
    }

    /// True if this is a guard failure -- these are the ones §7 says may be
    /// posted back into the admin chat as a best-effort plain-text message.
    pub fn is_guard(&self) -> bool {
        matches!(self, CoreError::Guard(_))
    }
}

/// Aggregates multiple handler failures into one error, per the §7
/// propagation policy ("failed to delete message" + "failed to ban user").
#[derive(Debug, Default)]
pub struct CompositeError {
    messages: Vec<String>,
}

impl CompositeError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, context: &str, err: impl std::fmt::Display) {
        self.messages.push(format!("{context}: {err}"));
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn into_result(self) -> CoreResult<()> {
        if self.messages.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!(self.messages.join("; ")))
        }
    }
}

impl std::fmt::Display for CompositeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.messages.join("; "))
    }
}
