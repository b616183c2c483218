//! Channel subscriptions. A channel is simply an account.

use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, Row, TransactionBehavior, params};
use serde::Serialize;
use uuid::Uuid;

use crate::db::{Database, row_uuid};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionState {
    pub subscribed: bool,
    pub subscribers: u64,
}

/// The public face of a channel in subscriber listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSummary {
    pub id: Uuid,
    pub username: String,
    pub fullname: String,
    pub avatar: String,
}

#[derive(Debug, Clone)]
pub struct SubscriptionStore {
    db: Database,
}

impl SubscriptionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Subscribes `subscriber_id` to `channel_id`, or unsubscribes if the
    /// subscription already exists.
    pub async fn toggle(&self, subscriber_id: Uuid, channel_id: Uuid) -> Result<SubscriptionState> {
        self.db
            .run(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let removed = tx.execute(
                    "DELETE FROM subscriptions WHERE subscriber_id = ?1 AND channel_id = ?2",
                    params![subscriber_id.to_string(), channel_id.to_string()],
                )?;
                if removed == 0 {
                    tx.execute(
                        r#"
                        INSERT INTO subscriptions (subscriber_id, channel_id, created_at)
                        VALUES (?1, ?2, ?3)
                        "#,
                        params![subscriber_id.to_string(), channel_id.to_string(), Utc::now()],
                    )?;
                }
                let subscribers = count_subscribers(&tx, channel_id)?;
                tx.commit()?;
                Ok(SubscriptionState {
                    subscribed: removed == 0,
                    subscribers,
                })
            })
            .await
    }

    /// Accounts subscribed to `channel_id`, newest first.
    pub async fn subscribers(&self, channel_id: Uuid) -> Result<Vec<ChannelSummary>> {
        self.db
            .run(move |conn| {
                summaries(
                    conn,
                    r#"
                    SELECT a.id, a.username, a.fullname, a.avatar
                    FROM subscriptions s JOIN accounts a ON a.id = s.subscriber_id
                    WHERE s.channel_id = ?1
                    ORDER BY s.created_at DESC, s.rowid DESC
                    "#,
                    channel_id,
                )
            })
            .await
    }

    /// Channels `subscriber_id` follows, newest first.
    pub async fn subscribed_channels(&self, subscriber_id: Uuid) -> Result<Vec<ChannelSummary>> {
        self.db
            .run(move |conn| {
                summaries(
                    conn,
                    r#"
                    SELECT a.id, a.username, a.fullname, a.avatar
                    FROM subscriptions s JOIN accounts a ON a.id = s.channel_id
                    WHERE s.subscriber_id = ?1
                    ORDER BY s.created_at DESC, s.rowid DESC
                    "#,
                    subscriber_id,
                )
            })
            .await
    }
}

fn count_subscribers(conn: &Connection, channel_id: Uuid) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM subscriptions WHERE channel_id = ?1",
        [channel_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(u64::try_from(count).unwrap_or_default())
}

fn summaries(conn: &Connection, sql: &str, id: Uuid) -> Result<Vec<ChannelSummary>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([id.to_string()])?;
    let mut channels = Vec::new();
    while let Some(row) = rows.next()? {
        channels.push(row_to_summary(row)?);
    }
    Ok(channels)
}

fn row_to_summary(row: &Row<'_>) -> Result<ChannelSummary> {
    Ok(ChannelSummary {
        id: row_uuid(row, "id")?,
        username: row.get("username")?,
        fullname: row.get("fullname")?,
        avatar: row.get("avatar")?,
    })
}
