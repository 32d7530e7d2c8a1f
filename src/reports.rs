//! C2: the reports store. Durable append + query of user spam reports, with
//! per-reporter rate counting and per-message aggregation (spec §3, §4.2).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::clock::Clock;
use crate::config::table;

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub msg_id: i64,
    pub chat_id: i64,
    pub reporter_user_id: i64,
    pub reporter_user_name: String,
    pub reported_user_id: i64,
    pub reported_user_name: String,
    pub msg_text: String,
    pub created_at: DateTime<Utc>,
    pub notification_sent: bool,
    pub admin_msg_id: i64,
}

#[derive(Clone)]
pub struct ReportsStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    gid: String,
}

impl ReportsStore {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>, gid: impl Into<String>) -> Self {
        Self { pool, clock, gid: gid.into() }
    }

    /// Enforces the `(msg_id, chat_id, reporter_user_id)` uniqueness: a
    /// second `add` by the same reporter on the same message is a no-op
    /// (spec §3 invariant, §4.2).
    pub async fn add(&self, report: &Report) -> anyhow::Result<()> {
        sqlx::query(&format!(
            r#"
            INSERT INTO {table}
                (gid, msg_id, chat_id, reporter_user_id, reporter_user_name,
                 reported_user_id, reported_user_name, msg_text, created_at,
                 notification_sent, admin_msg_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (gid, msg_id, chat_id, reporter_user_id) DO NOTHING
            "#,
            table = table::REPORTS
        ))
        .bind(&self.gid)
        .bind(report.msg_id)
        .bind(report.chat_id)
        .bind(report.reporter_user_id)
        .bind(&report.reporter_user_name)
        .bind(report.reported_user_id)
        .bind(&report.reported_user_name)
        .bind(&report.msg_text)
        .bind(report.created_at.timestamp())
        .bind(report.notification_sent as i64)
        .bind(report.admin_msg_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All reporters for a message, ordered by `created_at` ascending.
    pub async fn get_by_message(&self, msg_id: i64, chat_id: i64) -> anyhow::Result<Vec<Report>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT msg_id, chat_id, reporter_user_id, reporter_user_name,
                   reported_user_id, reported_user_name, msg_text, created_at,
                   notification_sent, admin_msg_id
            FROM {table}
            WHERE gid = ? AND msg_id = ? AND chat_id = ?
            ORDER BY created_at ASC
            "#,
            table = table::REPORTS
        ))
        .bind(&self.gid)
        .bind(msg_id)
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Report {
                msg_id: row.get("msg_id"),
                chat_id: row.get("chat_id"),
                reporter_user_id: row.get("reporter_user_id"),
                reporter_user_name: row.get("reporter_user_name"),
                reported_user_id: row.get("reported_user_id"),
                reported_user_name: row.get("reported_user_name"),
                msg_text: row.get("msg_text"),
                created_at: DateTime::from_timestamp(row.get::<i64, _>("created_at"), 0).unwrap_or_else(Utc::now),
                notification_sent: row.get::<i64, _>("notification_sent") != 0,
                admin_msg_id: row.get("admin_msg_id"),
            })
            .collect())
    }

    /// Count of reports (not distinct reporters) filed by `reporter_user_id`
    /// with `created_at >= since`. Used for per-reporter rate limiting.
    pub async fn get_reporter_count_since(&self, reporter_user_id: i64, since: DateTime<Utc>) -> anyhow::Result<usize> {
        let count: i64 = sqlx::query(&format!(
            "SELECT COUNT(*) as c FROM {table} WHERE gid = ? AND reporter_user_id = ? AND created_at >= ?",
            table = table::REPORTS
        ))
        .bind(&self.gid)
        .bind(reporter_user_id)
        .bind(since.timestamp())
        .fetch_one(&self.pool)
        .await?
        .get("c");
        Ok(count as usize)
    }

    /// Sets `admin_msg_id` and `notification_sent = true` for every row
    /// matching `(msg_id, chat_id)`. Idempotent.
    pub async fn update_admin_msg_id(&self, msg_id: i64, chat_id: i64, admin_msg_id: i64) -> anyhow::Result<()> {
        sqlx::query(&format!(
            "UPDATE {table} SET admin_msg_id = ?, notification_sent = 1 WHERE gid = ? AND msg_id = ? AND chat_id = ?",
            table = table::REPORTS
        ))
        .bind(admin_msg_id)
        .bind(&self.gid)
        .bind(msg_id)
        .bind(chat_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Removes all reports for a message (terminal action).
    pub async fn delete_by_message(&self, msg_id: i64, chat_id: i64) -> anyhow::Result<()> {
        sqlx::query(&format!(
            "DELETE FROM {table} WHERE gid = ? AND msg_id = ? AND chat_id = ?",
            table = table::REPORTS
        ))
        .bind(&self.gid)
        .bind(msg_id)
        .bind(chat_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Removes one reporter's row only.
    pub async fn delete_reporter(&self, reporter_user_id: i64, msg_id: i64, chat_id: i64) -> anyhow::Result<()> {
        sqlx::query(&format!(
            "DELETE FROM {table} WHERE gid = ? AND reporter_user_id = ? AND msg_id = ? AND chat_id = ?",
            table = table::REPORTS
        ))
        .bind(&self.gid)
        .bind(reporter_user_id)
        .bind(msg_id)
        .bind(chat_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::connect_in_memory;
    use std::time::Duration as StdDuration;

    fn report(msg_id: i64, reporter: i64) -> Report {
        Report {
            msg_id,
            chat_id: -100,
            reporter_user_id: reporter,
            reporter_user_name: format!("reporter{reporter}"),
            reported_user_id: 88,
            reported_user_name: "spammer".into(),
            msg_text: "buy crypto now".into(),
            created_at: Utc::now(),
            notification_sent: false,
            admin_msg_id: 0,
        }
    }

    async fn store() -> (ReportsStore, Arc<FixedClock>) {
        let pool = connect_in_memory().await.unwrap();
        let clock = Arc::new(FixedClock::new(Utc::now()));
        (ReportsStore::new(pool, clock.clone(), "g1"), clock)
    }

    #[tokio::test]
    async fn add_is_idempotent_per_reporter() {
        let (store, _clock) = store().await;
        store.add(&report(500, 1)).await.unwrap();
        store.add(&report(500, 1)).await.unwrap();

        let rows = store.get_by_message(500, -100).await.unwrap();
        assert_eq!(rows.len(), 1, "duplicate report by same reporter must not double-count");
    }

    #[tokio::test]
    async fn threshold_counts_distinct_reporters() {
        let (store, _clock) = store().await;
        store.add(&report(500, 1)).await.unwrap();
        store.add(&report(500, 2)).await.unwrap();
        store.add(&report(500, 3)).await.unwrap();

        let rows = store.get_by_message(500, -100).await.unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[tokio::test]
    async fn update_admin_msg_id_is_idempotent_and_shared() {
        let (store, _clock) = store().await;
        store.add(&report(500, 1)).await.unwrap();
        store.add(&report(500, 2)).await.unwrap();

        store.update_admin_msg_id(500, -100, 777).await.unwrap();
        store.update_admin_msg_id(500, -100, 777).await.unwrap();

        let rows = store.get_by_message(500, -100).await.unwrap();
        assert!(rows.iter().all(|r| r.admin_msg_id == 777 && r.notification_sent));
    }

    #[tokio::test]
    async fn reporter_count_since_is_monotone_going_backwards() {
        let (store, clock) = store().await;
        let t0 = clock.now();
        store.add(&report(1, 42)).await.unwrap();
        clock.advance(3600);
        store.add(&report(2, 42)).await.unwrap();

        let count_recent = store.get_reporter_count_since(42, clock.now() - chrono::Duration::seconds(1)).await.unwrap();
        let count_all = store.get_reporter_count_since(42, t0 - chrono::Duration::seconds(1)).await.unwrap();
        assert!(count_all >= count_recent);
        assert_eq!(count_recent, 1);
        assert_eq!(count_all, 2);
    }

    #[tokio::test]
    async fn delete_reporter_leaves_others() {
        let (store, _clock) = store().await;
        store.add(&report(500, 1)).await.unwrap();
        store.add(&report(500, 2)).await.unwrap();

        store.delete_reporter(1, 500, -100).await.unwrap();
        let rows = store.get_by_message(500, -100).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].reporter_user_id, 2);
    }

    #[tokio::test]
    async fn delete_by_message_is_terminal() {
        let (store, _clock) = store().await;
        store.add(&report(500, 1)).await.unwrap();
        store.add(&report(500, 2)).await.unwrap();
        store.delete_by_message(500, -100).await.unwrap();
        assert!(store.get_by_message(500, -100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rate_period_window_excludes_old_reports() {
        let (store, clock) = store().await;
        store.add(&report(1, 99)).await.unwrap();
        clock.advance(StdDuration::from_secs(7200).as_secs() as i64);
        let since = clock.now() - chrono::Duration::seconds(3600);
        let count = store.get_reporter_count_since(99, since).await.unwrap();
        assert_eq!(count, 0, "report older than the rate window must not count");
    }
}
