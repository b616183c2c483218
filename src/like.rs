//! Video likes: one row per (video, account) pair.

use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior, params};
use serde::Serialize;
use uuid::Uuid;

use crate::db::{Database, row_uuid};

/// State after a toggle, as returned to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeState {
    pub liked: bool,
    pub likes: u64,
}

#[derive(Debug, Clone)]
pub struct LikeStore {
    db: Database,
}

impl LikeStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Likes the video, or removes the like if there already is one.
    pub async fn toggle(&self, video_id: Uuid, account_id: Uuid) -> Result<LikeState> {
        self.db
            .run(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let removed = tx.execute(
                    "DELETE FROM video_likes WHERE video_id = ?1 AND account_id = ?2",
                    params![video_id.to_string(), account_id.to_string()],
                )?;
                if removed == 0 {
                    tx.execute(
                        "INSERT INTO video_likes (video_id, account_id, created_at) VALUES (?1, ?2, ?3)",
                        params![video_id.to_string(), account_id.to_string(), Utc::now()],
                    )?;
                }
                let likes = count_likes(&tx, video_id)?;
                tx.commit()?;
                Ok(LikeState {
                    liked: removed == 0,
                    likes,
                })
            })
            .await
    }

    pub async fn count(&self, video_id: Uuid) -> Result<u64> {
        self.db.run(move |conn| count_likes(conn, video_id)).await
    }

    /// Videos liked by `account_id`, most recent like first.
    pub async fn liked_video_ids(&self, account_id: Uuid) -> Result<Vec<Uuid>> {
        self.db
            .run(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT video_id FROM video_likes
                    WHERE account_id = ?1
                    ORDER BY created_at DESC, rowid DESC
                    "#,
                )?;
                let mut rows = stmt.query([account_id.to_string()])?;
                let mut ids = Vec::new();
                while let Some(row) = rows.next()? {
                    ids.push(row_uuid(row, "video_id")?);
                }
                Ok(ids)
            })
            .await
    }
}

fn count_likes(conn: &Connection, video_id: Uuid) -> Result<u64> {
    let likes: i64 = conn.query_row(
        "SELECT COUNT(*) FROM video_likes WHERE video_id = ?1",
        [video_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(u64::try_from(likes).unwrap_or_default())
}
