//! C1: the locator store. Maps message fingerprints and user ids to
//! metadata so a forwarded message (which carries no sender identity) can be
//! reconciled back to its original sender, message id and prior spam
//! verdict. See spec §3, §4.1, §8.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};

use crate::clock::Clock;
use crate::config::table;

/// One spam-check result from the external detector, stored verbatim so the
/// admin "show info" view (§4.4.2 `!`) can redisplay it later.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckResult {
    pub name: String,
    pub spam: bool,
    pub details: String,
}

/// Metadata recorded the first time a message is seen on the primary chat.
#[derive(Debug, Clone, PartialEq)]
pub struct MsgMeta {
    pub time: DateTime<Utc>,
    pub chat_id: i64,
    pub user_id: i64,
    pub user_name: String,
    pub msg_id: i64,
}

/// The most recent spam verdict recorded for a user.
#[derive(Debug, Clone, PartialEq)]
pub struct SpamData {
    pub time: DateTime<Utc>,
    pub checks: Vec<CheckResult>,
}

/// SHA-256 hex digest of `text`'s UTF-8 bytes. Deterministic across
/// processes, which is the whole point: a forward of the same text produces
/// the same fingerprint regardless of which instance computed it (spec
/// §4.1, §8).
pub fn msg_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Clone)]
pub struct Locator {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    gid: String,
    ttl: Duration,
    min_size: usize,
}

impl Locator {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>, gid: impl Into<String>, ttl: Duration, min_size: usize) -> Self {
        Self { pool, clock, gid: gid.into(), ttl, min_size }
    }

    /// Upserts on fingerprint within `gid`. Wall-clock time is captured at
    /// call time (via the injected clock). Runs cleanup afterward (spec §3
    /// invariant 3, §4.1).
    pub async fn add_message(
        &self,
        text: &str,
        chat_id: i64,
        user_id: i64,
        user_name: &str,
        msg_id: i64,
    ) -> anyhow::Result<()> {
        let fp = msg_hash(text);
        let now = self.clock.now().timestamp();
        sqlx::query(&format!(
            r#"
            INSERT INTO {table} (gid, fingerprint, time, chat_id, user_id, user_name, msg_id)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (gid, fingerprint) DO UPDATE SET
                time = excluded.time,
                chat_id = excluded.chat_id,
                user_id = excluded.user_id,
                user_name = excluded.user_name,
                msg_id = excluded.msg_id
            "#,
            table = table::MESSAGES
        ))
        .bind(&self.gid)
        .bind(&fp)
        .bind(now)
        .bind(chat_id)
        .bind(user_id)
        .bind(user_name)
        .bind(msg_id)
        .execute(&self.pool)
        .await?;

        self.cleanup().await?;
        Ok(())
    }

    /// Pure point lookup by fingerprint + gid.
    pub async fn message(&self, text: &str) -> Option<MsgMeta> {
        let fp = msg_hash(text);
        let row = sqlx::query(&format!(
            "SELECT time, chat_id, user_id, user_name, msg_id FROM {table} WHERE gid = ? AND fingerprint = ?",
            table = table::MESSAGES
        ))
        .bind(&self.gid)
        .bind(&fp)
        .fetch_optional(&self.pool)
        .await
        .unwrap_or_else(|e| {
            log::debug!("locator: message lookup failed: {e}");
            None
        })?;

        Some(MsgMeta {
            time: DateTime::from_timestamp(row.get::<i64, _>("time"), 0).unwrap_or_else(Utc::now),
            chat_id: row.get("chat_id"),
            user_id: row.get("user_id"),
            user_name: row.get("user_name"),
            msg_id: row.get("msg_id"),
        })
    }

    /// Upserts the latest spam verdict for `user_id` within `gid`.
    pub async fn add_spam(&self, user_id: i64, checks: &[CheckResult]) -> anyhow::Result<()> {
        let now = self.clock.now().timestamp();
        let payload = serde_json::to_string(checks)?;
        sqlx::query(&format!(
            r#"
            INSERT INTO {table} (gid, user_id, time, checks)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (gid, user_id) DO UPDATE SET time = excluded.time, checks = excluded.checks
            "#,
            table = table::SPAM
        ))
        .bind(&self.gid)
        .bind(user_id)
        .bind(now)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Pure point lookup of the latest spam verdict for `user_id`.
    pub async fn spam(&self, user_id: i64) -> Option<SpamData> {
        let row = sqlx::query(&format!(
            "SELECT time, checks FROM {table} WHERE gid = ? AND user_id = ?",
            table = table::SPAM
        ))
        .bind(&self.gid)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .unwrap_or_else(|e| {
            log::debug!("locator: spam lookup failed: {e}");
            None
        })?;

        let checks: Vec<CheckResult> = serde_json::from_str(&row.get::<String, _>("checks")).unwrap_or_default();
        Some(SpamData {
            time: DateTime::from_timestamp(row.get::<i64, _>("time"), 0).unwrap_or_else(Utc::now),
            checks,
        })
    }

    /// Looks up the stored user name for `user_id` from the most recent
    /// message row. Returns `None` if the user has never been seen.
    pub async fn user_name_by_id(&self, user_id: i64) -> Option<String> {
        let row = sqlx::query(&format!(
            "SELECT user_name FROM {table} WHERE gid = ? AND user_id = ? ORDER BY time DESC LIMIT 1",
            table = table::MESSAGES
        ))
        .bind(&self.gid)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .ok()
        .flatten()?;
        Some(row.get("user_name"))
    }

    /// Reverse lookup: the most recently seen user id for `name`.
    pub async fn user_id_by_name(&self, name: &str) -> Option<i64> {
        let row = sqlx::query(&format!(
            "SELECT user_id FROM {table} WHERE gid = ? AND user_name = ? ORDER BY time DESC LIMIT 1",
            table = table::MESSAGES
        ))
        .bind(&self.gid)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .ok()
        .flatten()?;
        Some(row.get("user_id"))
    }

    /// Most recent message ids from `user_id`, newest first, bounded by
    /// `limit`. Used by aggressive cleanup (§4.4.3).
    pub async fn get_user_message_ids(&self, user_id: i64, limit: usize) -> Vec<i64> {
        let rows = sqlx::query(&format!(
            "SELECT msg_id FROM {table} WHERE gid = ? AND user_id = ? ORDER BY time DESC LIMIT ?",
            table = table::MESSAGES
        ))
        .bind(&self.gid)
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .unwrap_or_default();

        rows.into_iter().map(|r| r.get("msg_id")).collect()
    }

    /// Deletes rows older than `ttl` as long as doing so still leaves at
    /// least `min_size` rows in this gid (spec §3 invariant 3, §4.1).
    async fn cleanup(&self) -> anyhow::Result<()> {
        let count: i64 = sqlx::query(&format!(
            "SELECT COUNT(*) as c FROM {table} WHERE gid = ?",
            table = table::MESSAGES
        ))
        .bind(&self.gid)
        .fetch_one(&self.pool)
        .await?
        .get("c");

        let count = count as usize;
        if count <= self.min_size {
            return Ok(());
        }

        let excess = count - self.min_size;
        let cutoff = self.clock.now().timestamp() - self.ttl.as_secs() as i64;

        sqlx::query(&format!(
            r#"
            DELETE FROM {table}
            WHERE rowid IN (
                SELECT rowid FROM {table}
                WHERE gid = ? AND time < ?
                ORDER BY time ASC
                LIMIT ?
            )
            "#,
            table = table::MESSAGES
        ))
        .bind(&self.gid)
        .bind(cutoff)
        .bind(excess as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::connect_in_memory;

    async fn locator_with(ttl_secs: u64, min_size: usize) -> (Locator, Arc<FixedClock>) {
        let pool = connect_in_memory().await.unwrap();
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let locator = Locator::new(pool, clock.clone(), "g1", Duration::from_secs(ttl_secs), min_size);
        (locator, clock)
    }

    #[tokio::test]
    async fn message_roundtrip() {
        let (locator, _clock) = locator_with(3600, 1000).await;
        locator.add_message("buy now crypto offer", -100, 42, "alice", 555).await.unwrap();

        let meta = locator.message("buy now crypto offer").await.unwrap();
        assert_eq!(meta.user_id, 42);
        assert_eq!(meta.msg_id, 555);
        assert_eq!(meta.chat_id, -100);

        assert!(locator.message("no such text").await.is_none());
    }

    #[tokio::test]
    async fn upsert_overwrites_same_fingerprint() {
        let (locator, _clock) = locator_with(3600, 1000).await;
        locator.add_message("same text", -100, 1, "a", 1).await.unwrap();
        locator.add_message("same text", -100, 2, "b", 2).await.unwrap();

        let meta = locator.message("same text").await.unwrap();
        assert_eq!(meta.user_id, 2);
        assert_eq!(meta.msg_id, 2);
    }

    #[tokio::test]
    async fn spam_roundtrip_keeps_latest() {
        let (locator, _clock) = locator_with(3600, 1000).await;
        let checks_old = vec![CheckResult { name: "classifier".into(), spam: true, details: "0.5".into() }];
        let checks_new = vec![CheckResult { name: "classifier".into(), spam: true, details: "0.92".into() }];

        locator.add_spam(42, &checks_old).await.unwrap();
        locator.add_spam(42, &checks_new).await.unwrap();

        let data = locator.spam(42).await.unwrap();
        assert_eq!(data.checks, checks_new);
        assert!(locator.spam(999).await.is_none());
    }

    #[test]
    fn hash_is_deterministic_and_collision_resistant_for_distinct_text() {
        assert_eq!(msg_hash("hello"), msg_hash("hello"));
        assert_ne!(msg_hash("hello"), msg_hash("hellp"));
    }

    #[tokio::test]
    async fn cleanup_respects_min_size_floor() {
        let (locator, clock) = locator_with(10, 2).await;
        locator.add_message("m1", -1, 1, "a", 1).await.unwrap();
        locator.add_message("m2", -1, 1, "a", 2).await.unwrap();
        clock.advance(3600);
        locator.add_message("m3", -1, 1, "a", 3).await.unwrap();

        // min_size=2 keeps at least 2 rows even though m1/m2 are past ttl.
        assert!(locator.message("m1").await.is_some() || locator.message("m2").await.is_some());
        assert!(locator.message("m3").await.is_some());
    }

    #[tokio::test]
    async fn cleanup_evicts_old_rows_past_min_size() {
        let (locator, clock) = locator_with(10, 1).await;
        locator.add_message("m1", -1, 1, "a", 1).await.unwrap();
        clock.advance(3600);
        locator.add_message("m2", -1, 1, "a", 2).await.unwrap();

        assert!(locator.message("m1").await.is_none());
        assert!(locator.message("m2").await.is_some());
    }

    #[tokio::test]
    async fn get_user_message_ids_newest_first_bounded() {
        let (locator, _clock) = locator_with(3600, 1000).await;
        for i in 1..=5 {
            locator.add_message(&format!("text {i}"), -1, 7, "u", i).await.unwrap();
        }
        let ids = locator.get_user_message_ids(7, 3).await;
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[0], 5);
    }
}
