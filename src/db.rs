//! SQLite plumbing shared by the account and video stores.
//!
//! The schema is created once by [`Database::open`]. Every query afterwards
//! opens its own short-lived connection on tokio's blocking pool, so a slow
//! statement never pins an async worker and no connection is shared across
//! tasks. Writers serialise on SQLite's database lock; the busy timeout lets
//! them queue instead of failing with `SQLITE_BUSY`.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use rusqlite::{Connection, Row};
use tokio::task;
use uuid::Uuid;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
}

impl Database {
    /// Opens (and if necessary creates) the DB file and ensures the expected
    /// schema exists. WAL mode is enabled to avoid readers blocking writers.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {}", parent.display()))?;
        }

        let mut conn = Connection::open(path)
            .with_context(|| format!("opening database {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("enabling WAL mode")?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .context("setting synchronous mode")?;
        ensure_tables(&mut conn)?;

        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(path: &Path) -> Result<Connection> {
        let conn = Connection::open(path)
            .with_context(|| format!("opening database {}", path.display()))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    /// Runs `f` against a fresh connection on the blocking pool.
    pub async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        task::spawn_blocking(move || {
            let mut conn = Self::connect(&path)?;
            f(&mut conn)
        })
        .await
        .map_err(|err| anyhow!("database task join error: {err}"))?
    }
}

/// Runs the SQL required to create the tables if they do not already exist.
/// Wrapped in a transaction so a failure leaves the DB untouched.
fn ensure_tables(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;

    tx.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE COLLATE NOCASE,
            fullname TEXT NOT NULL,
            avatar TEXT NOT NULL,
            cover_image TEXT NOT NULL DEFAULT '',
            password_hash TEXT NOT NULL,
            refresh_token TEXT,
            watch_history_json TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS videos (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            video_file TEXT NOT NULL,
            thumbnail TEXT NOT NULL,
            duration REAL NOT NULL DEFAULT 0,
            views INTEGER NOT NULL DEFAULT 0,
            is_published INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (owner_id) REFERENCES accounts(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_videos_owner ON videos(owner_id);
        CREATE INDEX IF NOT EXISTS idx_videos_created ON videos(created_at);

        CREATE TABLE IF NOT EXISTS video_likes (
            video_id TEXT NOT NULL,
            account_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (video_id, account_id),
            FOREIGN KEY (video_id) REFERENCES videos(id) ON DELETE CASCADE,
            FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_video_likes_account ON video_likes(account_id);

        CREATE TABLE IF NOT EXISTS subscriptions (
            subscriber_id TEXT NOT NULL,
            channel_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (subscriber_id, channel_id),
            FOREIGN KEY (subscriber_id) REFERENCES accounts(id) ON DELETE CASCADE,
            FOREIGN KEY (channel_id) REFERENCES accounts(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_subscriptions_channel ON subscriptions(channel_id);
        "#,
    )?;

    tx.commit()?;
    Ok(())
}

/// UUIDs are stored as their hyphenated text form.
pub(crate) fn row_uuid(row: &Row<'_>, column: &str) -> Result<Uuid> {
    let raw: String = row.get(column)?;
    Uuid::parse_str(&raw).with_context(|| format!("parsing stored {column} {raw:?}"))
}

#[cfg(test)]
pub(crate) fn test_database() -> (tempfile::TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("nested").join("newtube.db")).unwrap();
    (dir, db)
}
