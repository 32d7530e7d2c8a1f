//! Centralized configuration: the runtime `Config` loaded from the
//! environment, plus static naming constants (table/column names, callback
//! prefixes) in the same `pub mod key { ... }` grouping style the original
//! Redis-backed config used for its key prefixes.

use std::env;
use std::time::Duration;

/// **Table names** used by the sqlite-backed stores (`db.rs`, `locator.rs`,
/// `reports.rs`).
pub mod table {
    pub const MESSAGES: &str = "locator_messages";
    pub const SPAM: &str = "locator_spam";
    pub const REPORTS: &str = "reports";
}

/// **Column names** shared across tables; every table also carries a `gid`
/// column per spec §3 invariant 1.
pub mod column {
    pub const GID: &str = "gid";
}

/// **Callback-data prefixes** (spec §4.4.2, §6). Kept as named constants so
/// the parser in `callback.rs` never hand-matches a string literal twice.
pub mod callback_prefix {
    pub const ASK_UNBAN: &str = "?";
    pub const CONFIRM_BAN: &str = "+";
    pub const SHOW_INFO: &str = "!";
    pub const REPORT_APPROVE: &str = "R+";
    pub const REPORT_REJECT: &str = "R-";
    pub const REPORT_ASK_BAN_REPORTER: &str = "R?";
    pub const REPORT_CONFIRM_BAN_REPORTER: &str = "R!";
    pub const REPORT_CANCEL: &str = "RX";
}

/// **Direct admin commands** recognized in the primary chat (spec §4.4.3,
/// §4.5). Matched case-insensitively against the message's leading token.
pub mod direct_command {
    pub const SPAM: &str = "/spam";
    pub const BAN: &str = "/ban";
    pub const WARN: &str = "/warn";
    pub const REPORT: &str = "/report";
}

/// Default idle-timer period (spec §4.6): if no update arrives within this
/// long, the dispatcher emits a synthetic `"idle"` message to the classifier.
pub const DEFAULT_IDLE_DURATION: Duration = Duration::from_secs(30);

/// Reports-notification text: first N runes of the reported message are kept.
pub const REPORT_TEXT_TRUNCATE_RUNES: usize = 200;

/// Cap on aggressive cleanup (spec §4.4.3).
pub const AGGRESSIVE_CLEANUP_HARD_CAP: usize = 100;

/// Consecutive delete failures before aggressive cleanup gives up.
pub const AGGRESSIVE_CLEANUP_MAX_FAILURES: usize = 5;

/// Telegram's limit on `callback_data` length in bytes (spec §6).
pub const CALLBACK_DATA_MAX_LEN: usize = 64;

/// Sub-30-second bans are coerced up to this, per spec §4.3.
pub const MIN_BAN_DURATION: Duration = Duration::from_secs(60);
pub const BAN_DURATION_COERCION_THRESHOLD: Duration = Duration::from_secs(30);

/// Default ban duration used wherever the spec calls for "a permanent ban"
/// (spec §4.3, §4.4.1, §4.4.3) but doesn't expose a configurable knob: one
/// year, matching Telegram's own "ban longer than 366 days == forever" rule.
pub const DEFAULT_BAN_DURATION: Duration = Duration::from_secs(365 * 24 * 3600);

/// Runtime configuration, loaded once at startup from the environment
/// (`.env` via `dotenv`, same loading style `main.rs` has always used for
/// `BOT_TOKEN`).
#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub database_path: String,
    pub rspamd_url: String,

    /// Resolved at startup if given as `@username` (see `super_users.rs`).
    pub prim_chat_id: i64,
    pub admin_chat_id: i64,

    pub super_users: Vec<String>,

    pub training_mode: bool,
    pub dry: bool,
    pub soft_ban_mode: bool,
    pub keep_user: bool,

    pub ttl: Duration,
    pub min_size: usize,

    pub report_threshold: usize,
    pub report_rate_limit: usize,
    pub report_rate_period: Duration,

    pub aggressive_cleanup: bool,
    pub aggressive_cleanup_limit: usize,

    pub warn_msg: String,
    pub startup_msg: String,

    pub suppress_join_message: bool,

    pub idle_duration: Duration,
}

impl Config {
    /// Loads configuration from environment variables, applying the same
    /// defaults the spec calls out in §6. Panics with a descriptive message
    /// on a malformed (not missing) value, matching the teacher's
    /// `env::var(...).expect(...)` style for required settings.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let bot_token = env::var("BOT_TOKEN").map_err(|_| {
            anyhow::anyhow!("BOT_TOKEN must be set in the environment or .env file")
        })?;

        let prim_chat_id = env_i64("PRIM_CHAT_ID")?;
        let admin_chat_id = env_i64("ADMIN_CHAT_ID")?;

        let super_users = env::var("SUPER_USERS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Config {
            bot_token,
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "tg-spam.sqlite".into()),
            rspamd_url: env::var("RSPAMD_URL").unwrap_or_else(|_| "http://127.0.0.1:11333".into()),
            prim_chat_id,
            admin_chat_id,
            super_users,
            training_mode: env_bool("TRAINING_MODE", false),
            dry: env_bool("DRY", false),
            soft_ban_mode: env_bool("SOFT_BAN_MODE", false),
            keep_user: env_bool("KEEP_USER", false),
            ttl: Duration::from_secs(env_u64("TTL_SECONDS", 30 * 24 * 3600)),
            min_size: env_usize("MIN_SIZE", 1000),
            report_threshold: env_usize("REPORT_THRESHOLD", 3),
            report_rate_limit: env_usize("REPORT_RATE_LIMIT", 5),
            report_rate_period: Duration::from_secs(env_u64("REPORT_RATE_PERIOD_SECONDS", 3600)),
            aggressive_cleanup: env_bool("AGGRESSIVE_CLEANUP", false),
            aggressive_cleanup_limit: env_usize("AGGRESSIVE_CLEANUP_LIMIT", 50),
            warn_msg: env::var("WARN_MSG")
                .unwrap_or_else(|_| "This message looks like spam, please behave.".into()),
            startup_msg: env::var("STARTUP_MSG").unwrap_or_else(|_| "tg-spam is online".into()),
            suppress_join_message: env_bool("SUPPRESS_JOIN_MESSAGE", true),
            idle_duration: DEFAULT_IDLE_DURATION,
        })
    }
}

fn env_i64(name: &str) -> anyhow::Result<i64> {
    env::var(name)
        .map_err(|_| anyhow::anyhow!("{name} must be set"))?
        .parse()
        .map_err(|e| anyhow::anyhow!("{name} must be a valid integer: {e}"))
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
