//! SQLite-backed persistence setup: pool creation and migrations.
//!
//! Mirrors the `CREATE TABLE IF NOT EXISTS` + "if the column exists, skip;
//! otherwise add and back-fill with gid='default'" migration shape from spec
//! §6, in the idiomatic `sqlx` style the `LargeModGames` spam-store reference
//! file uses: plain `sqlx::query(...).execute(&pool)` calls run at startup,
//! no external migration framework.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::config::table;

/// Single supported dialect today; named so a Postgres variant is a matter of
/// adding match arms later (spec §9 REDESIGN FLAGS).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
}

/// Opens (creating if necessary) the sqlite database at `path` and runs
/// migrations.
pub async fn connect(path: &str) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// In-memory pool, used by tests.
pub async fn connect_in_memory() -> anyhow::Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    migrate(&pool).await?;
    Ok(pool)
}

async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {messages} (
            gid         TEXT NOT NULL DEFAULT '',
            fingerprint TEXT NOT NULL,
            time        INTEGER NOT NULL,
            chat_id     INTEGER NOT NULL,
            user_id     INTEGER NOT NULL,
            user_name   TEXT NOT NULL DEFAULT '',
            msg_id      INTEGER NOT NULL,
            PRIMARY KEY (gid, fingerprint)
        )
        "#,
        messages = table::MESSAGES
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_{messages}_user ON {messages} (gid, user_id, time DESC)",
        messages = table::MESSAGES
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {spam} (
            gid     TEXT NOT NULL DEFAULT '',
            user_id INTEGER NOT NULL,
            time    INTEGER NOT NULL,
            checks  TEXT NOT NULL,
            PRIMARY KEY (gid, user_id)
        )
        "#,
        spam = table::SPAM
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {reports} (
            gid                 TEXT NOT NULL DEFAULT '',
            msg_id              INTEGER NOT NULL,
            chat_id             INTEGER NOT NULL,
            reporter_user_id    INTEGER NOT NULL,
            reporter_user_name  TEXT NOT NULL DEFAULT '',
            reported_user_id    INTEGER NOT NULL,
            reported_user_name  TEXT NOT NULL DEFAULT '',
            msg_text            TEXT NOT NULL DEFAULT '',
            created_at          INTEGER NOT NULL,
            notification_sent   INTEGER NOT NULL DEFAULT 0,
            admin_msg_id        INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (gid, msg_id, chat_id, reporter_user_id)
        )
        "#,
        reports = table::REPORTS
    ))
    .execute(pool)
    .await?;

    backfill_default_gid(pool, table::MESSAGES).await?;
    backfill_default_gid(pool, table::SPAM).await?;
    backfill_default_gid(pool, table::REPORTS).await?;

    Ok(())
}

/// "If the column exists, skip; otherwise add and back-fill with
/// gid='default'" -- spec §6. Every table here is created with a `gid`
/// column already, so in practice this is a no-op on a fresh database; it
/// exists for a database created by an older schema that predates `gid`.
async fn backfill_default_gid(pool: &SqlitePool, table_name: &str) -> anyhow::Result<()> {
    let columns = sqlx::query(&format!("PRAGMA table_info({table_name})"))
        .fetch_all(pool)
        .await?;
    let has_gid = columns.iter().any(|row| {
        row.try_get::<String, _>("name").map(|n| n == "gid").unwrap_or(false)
    });
    if !has_gid {
        sqlx::query(&format!(
            "ALTER TABLE {table_name} ADD COLUMN gid TEXT NOT NULL DEFAULT 'default'"
        ))
        .execute(pool)
        .await?;
    }
    Ok(())
}
