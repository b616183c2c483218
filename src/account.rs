//! Credential store: persisted account records.
//!
//! `Account` is the full row including the password hash and the live
//! refresh token. Anything that leaves the process goes through
//! [`PublicAccount`], which has neither.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{
    Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior, params,
};
use serde::Serialize;
use uuid::Uuid;

use crate::db::{Database, row_uuid};

#[derive(Debug, Clone)]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub fullname: String,
    pub avatar: String,
    pub cover_image: String,
    pub password_hash: String,
    pub refresh_token: Option<String>,
    /// Most recently viewed first, no duplicates.
    pub watch_history: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Account as exposed to clients and attached to authenticated requests.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicAccount {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub fullname: String,
    pub avatar: String,
    pub cover_image: String,
    pub watch_history: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Account> for PublicAccount {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            username: account.username,
            email: account.email,
            fullname: account.fullname,
            avatar: account.avatar,
            cover_image: account.cover_image,
            watch_history: account.watch_history,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

/// Registration payload after validation and hashing.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub fullname: String,
    pub avatar: String,
    pub cover_image: String,
    pub password_hash: String,
}

/// Outcome of writes that can collide with the unique handle/contact columns.
#[derive(Debug)]
pub enum UniqueWrite<T> {
    Done(T),
    Taken,
    Missing,
}

pub const WATCH_HISTORY_LIMIT: usize = 200;

const ACCOUNT_COLUMNS: &str = "id, username, email, fullname, avatar, cover_image, \
     password_hash, refresh_token, watch_history_json, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct AccountStore {
    db: Database,
}

impl AccountStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>> {
        self.db.run(move |conn| fetch_by_id(conn, id)).await
    }

    /// Looks an account up by handle (case-normalised) or by contact. A handle
    /// match wins over a contact match.
    pub async fn find_by_login(&self, identifier: &str) -> Result<Option<Account>> {
        let handle = identifier.trim().to_lowercase();
        let contact = identifier.trim().to_string();
        self.db
            .run(move |conn| {
                conn.query_row(
                    &format!(
                        "SELECT {ACCOUNT_COLUMNS} FROM accounts \
                         WHERE username = ?1 OR email = ?2 \
                         ORDER BY username = ?1 DESC LIMIT 1"
                    ),
                    params![handle, contact],
                    |row| Ok(row_to_account(row)),
                )
                .optional()?
                .transpose()
            })
            .await
    }

    pub async fn insert(&self, new: NewAccount) -> Result<UniqueWrite<Account>> {
        self.db
            .run(move |conn| {
                let id = Uuid::new_v4();
                let now = Utc::now();
                let inserted = conn.execute(
                    r#"
                    INSERT INTO accounts (
                        id, username, email, fullname, avatar, cover_image,
                        password_hash, refresh_token, watch_history_json,
                        created_at, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, '[]', ?8, ?8)
                    "#,
                    params![
                        id.to_string(),
                        new.username,
                        new.email,
                        new.fullname,
                        new.avatar,
                        new.cover_image,
                        new.password_hash,
                        now,
                    ],
                );
                match inserted {
                    Ok(_) => {}
                    Err(err) if is_unique_violation(&err) => return Ok(UniqueWrite::Taken),
                    Err(err) => return Err(err).context("inserting account"),
                }
                match fetch_by_id(conn, id)? {
                    Some(account) => Ok(UniqueWrite::Done(account)),
                    None => Ok(UniqueWrite::Missing),
                }
            })
            .await
    }

    /// Overwrites the stored refresh token (or clears it with `None`).
    /// Returns whether the account exists.
    pub async fn set_refresh_token(&self, id: Uuid, token: Option<String>) -> Result<bool> {
        self.db
            .run(move |conn| {
                let updated = conn.execute(
                    "UPDATE accounts SET refresh_token = ?2, updated_at = ?3 WHERE id = ?1",
                    params![id.to_string(), token, Utc::now()],
                )?;
                Ok(updated == 1)
            })
            .await
    }

    /// Replaces the refresh token only if the stored value still equals
    /// `expected`. A single conditional `UPDATE`, so two callers presenting
    /// the same token cannot both win.
    pub async fn rotate_refresh_token(
        &self,
        id: Uuid,
        expected: String,
        replacement: String,
    ) -> Result<bool> {
        self.db
            .run(move |conn| {
                let updated = conn.execute(
                    r#"
                    UPDATE accounts
                    SET refresh_token = ?3, updated_at = ?4
                    WHERE id = ?1 AND refresh_token = ?2
                    "#,
                    params![id.to_string(), expected, replacement, Utc::now()],
                )?;
                Ok(updated == 1)
            })
            .await
    }

    pub async fn update_password_hash(&self, id: Uuid, password_hash: String) -> Result<bool> {
        self.db
            .run(move |conn| {
                let updated = conn.execute(
                    "UPDATE accounts SET password_hash = ?2, updated_at = ?3 WHERE id = ?1",
                    params![id.to_string(), password_hash, Utc::now()],
                )?;
                Ok(updated == 1)
            })
            .await
    }

    pub async fn update_details(
        &self,
        id: Uuid,
        fullname: String,
        email: String,
    ) -> Result<UniqueWrite<Account>> {
        self.db
            .run(move |conn| {
                let updated = conn.execute(
                    "UPDATE accounts SET fullname = ?2, email = ?3, updated_at = ?4 WHERE id = ?1",
                    params![id.to_string(), fullname, email, Utc::now()],
                );
                match updated {
                    Ok(0) => return Ok(UniqueWrite::Missing),
                    Ok(_) => {}
                    Err(err) if is_unique_violation(&err) => return Ok(UniqueWrite::Taken),
                    Err(err) => return Err(err).context("updating account details"),
                }
                Ok(match fetch_by_id(conn, id)? {
                    Some(account) => UniqueWrite::Done(account),
                    None => UniqueWrite::Missing,
                })
            })
            .await
    }

    pub async fn set_avatar(&self, id: Uuid, url: String) -> Result<Option<Account>> {
        self.set_image_column(id, "avatar", url).await
    }

    pub async fn set_cover_image(&self, id: Uuid, url: String) -> Result<Option<Account>> {
        self.set_image_column(id, "cover_image", url).await
    }

    async fn set_image_column(
        &self,
        id: Uuid,
        column: &'static str,
        url: String,
    ) -> Result<Option<Account>> {
        self.db
            .run(move |conn| {
                let updated = conn.execute(
                    &format!("UPDATE accounts SET {column} = ?2, updated_at = ?3 WHERE id = ?1"),
                    params![id.to_string(), url, Utc::now()],
                )?;
                if updated == 0 {
                    return Ok(None);
                }
                fetch_by_id(conn, id)
            })
            .await
    }

    /// Moves `video_id` to the front of the watch history, keeping at most
    /// [`WATCH_HISTORY_LIMIT`] entries.
    pub async fn record_view(&self, id: Uuid, video_id: Uuid) -> Result<bool> {
        self.db
            .run(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let stored: Option<String> = tx
                    .query_row(
                        "SELECT watch_history_json FROM accounts WHERE id = ?1",
                        [id.to_string()],
                        |row| row.get(0),
                    )
                    .optional()?;
                let Some(stored) = stored else {
                    return Ok(false);
                };
                let mut history: Vec<Uuid> =
                    serde_json::from_str(&stored).context("parsing stored watch history")?;
                push_front_unique(&mut history, video_id);
                let history_json =
                    serde_json::to_string(&history).context("serializing watch history")?;
                tx.execute(
                    "UPDATE accounts SET watch_history_json = ?2, updated_at = ?3 WHERE id = ?1",
                    params![id.to_string(), history_json, Utc::now()],
                )?;
                tx.commit()?;
                Ok(true)
            })
            .await
    }
}

fn push_front_unique(history: &mut Vec<Uuid>, video_id: Uuid) {
    history.retain(|existing| *existing != video_id);
    history.insert(0, video_id);
    history.truncate(WATCH_HISTORY_LIMIT);
}

fn fetch_by_id(conn: &Connection, id: Uuid) -> Result<Option<Account>> {
    conn.query_row(
        &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1"),
        [id.to_string()],
        |row| Ok(row_to_account(row)),
    )
    .optional()?
    .transpose()
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(code, _) if code.code == ErrorCode::ConstraintViolation
    )
}

/// Converts a SQL row into an `Account`, decoding the JSON history column.
fn row_to_account(row: &Row<'_>) -> Result<Account> {
    let history_json: String = row.get("watch_history_json")?;
    let watch_history: Vec<Uuid> =
        serde_json::from_str(&history_json).context("parsing stored watch history")?;

    Ok(Account {
        id: row_uuid(row, "id")?,
        username: row.get("username")?,
        email: row.get("email")?,
        fullname: row.get("fullname")?,
        avatar: row.get("avatar")?,
        cover_image: row.get("cover_image")?,
        password_hash: row.get("password_hash")?,
        refresh_token: row.get("refresh_token")?,
        watch_history,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

#[cfg(test)]
pub(crate) fn sample_account(username: &str) -> NewAccount {
    NewAccount {
        username: username.to_string(),
        email: format!("{username}@example.com"),
        fullname: format!("{username} tester"),
        avatar: format!("https://media.example.com/{username}.png"),
        cover_image: String::new(),
        password_hash: "$argon2id$placeholder".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_database;

    async fn created(store: &AccountStore, username: &str) -> Account {
        match store.insert(sample_account(username)).await.unwrap() {
            UniqueWrite::Done(account) => account,
            other => panic!("unexpected insert outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn insert_then_find_by_handle_or_contact() -> Result<()> {
        let (_dir, db) = test_database();
        let store = AccountStore::new(db);
        let alice = created(&store, "alice").await;

        let by_handle = store.find_by_login("  ALICE ").await?.unwrap();
        assert_eq!(by_handle.id, alice.id);
        let by_contact = store.find_by_login("Alice@Example.com").await?.unwrap();
        assert_eq!(by_contact.id, alice.id);
        assert!(store.find_by_login("bob").await?.is_none());
        assert!(alice.refresh_token.is_none());
        assert!(alice.watch_history.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_handle_or_contact_is_taken() -> Result<()> {
        let (_dir, db) = test_database();
        let store = AccountStore::new(db);
        created(&store, "alice").await;

        let mut same_handle = sample_account("alice");
        same_handle.email = "other@example.com".into();
        assert!(matches!(store.insert(same_handle).await?, UniqueWrite::Taken));

        let mut same_contact = sample_account("carol");
        same_contact.email = "ALICE@example.com".into();
        assert!(matches!(store.insert(same_contact).await?, UniqueWrite::Taken));
        Ok(())
    }

    #[tokio::test]
    async fn rotation_only_succeeds_against_the_current_value() -> Result<()> {
        let (_dir, db) = test_database();
        let store = AccountStore::new(db);
        let alice = created(&store, "alice").await;

        assert!(store.set_refresh_token(alice.id, Some("r1".into())).await?);
        assert!(
            store
                .rotate_refresh_token(alice.id, "r1".into(), "r2".into())
                .await?
        );
        assert!(
            !store
                .rotate_refresh_token(alice.id, "r1".into(), "r3".into())
                .await?
        );
        let stored = store.find_by_id(alice.id).await?.unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some("r2"));

        assert!(store.set_refresh_token(alice.id, None).await?);
        assert!(
            !store
                .rotate_refresh_token(alice.id, "r2".into(), "r4".into())
                .await?
        );
        Ok(())
    }

    #[tokio::test]
    async fn unknown_account_writes_report_missing() -> Result<()> {
        let (_dir, db) = test_database();
        let store = AccountStore::new(db);
        let ghost = Uuid::new_v4();
        assert!(!store.set_refresh_token(ghost, None).await?);
        assert!(!store.record_view(ghost, Uuid::new_v4()).await?);
        assert!(store.set_avatar(ghost, "x".into()).await?.is_none());
        assert!(matches!(
            store
                .update_details(ghost, "n".into(), "n@example.com".into())
                .await?,
            UniqueWrite::Missing
        ));
        Ok(())
    }

    #[tokio::test]
    async fn update_details_rejects_taken_contact() -> Result<()> {
        let (_dir, db) = test_database();
        let store = AccountStore::new(db);
        let alice = created(&store, "alice").await;
        created(&store, "bob").await;

        let outcome = store
            .update_details(alice.id, "Alice".into(), "bob@example.com".into())
            .await?;
        assert!(matches!(outcome, UniqueWrite::Taken));

        let outcome = store
            .update_details(alice.id, "Alice A.".into(), "alice@new.example".into())
            .await?;
        let UniqueWrite::Done(updated) = outcome else {
            panic!("expected update to succeed");
        };
        assert_eq!(updated.fullname, "Alice A.");
        assert_eq!(updated.email, "alice@new.example");
        Ok(())
    }

    #[tokio::test]
    async fn record_view_keeps_most_recent_first_without_duplicates() -> Result<()> {
        let (_dir, db) = test_database();
        let store = AccountStore::new(db);
        let alice = created(&store, "alice").await;
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        for video in [a, b, c, a] {
            assert!(store.record_view(alice.id, video).await?);
        }
        let stored = store.find_by_id(alice.id).await?.unwrap();
        assert_eq!(stored.watch_history, vec![a, c, b]);
        Ok(())
    }

    #[tokio::test]
    async fn record_view_touches_updated_at() -> Result<()> {
        let (_dir, db) = test_database();
        let store = AccountStore::new(db);
        let alice = created(&store, "alice").await;
        std::thread::sleep(std::time::Duration::from_millis(5));

        assert!(store.record_view(alice.id, Uuid::new_v4()).await?);
        let stored = store.find_by_id(alice.id).await?.unwrap();
        assert!(stored.updated_at > alice.updated_at);
        Ok(())
    }

    #[test]
    fn history_is_capped_with_oldest_entries_dropped() {
        let mut history: Vec<Uuid> = (0..WATCH_HISTORY_LIMIT).map(|_| Uuid::new_v4()).collect();
        let oldest = *history.last().unwrap();
        let newest = Uuid::new_v4();

        push_front_unique(&mut history, newest);
        assert_eq!(history.len(), WATCH_HISTORY_LIMIT);
        assert_eq!(history[0], newest);
        assert!(!history.contains(&oldest));

        let revisited = history[10];
        push_front_unique(&mut history, revisited);
        assert_eq!(history.len(), WATCH_HISTORY_LIMIT);
        assert_eq!(history[0], revisited);
    }

    #[tokio::test]
    async fn handle_match_wins_over_contact_match() -> Result<()> {
        let (_dir, db) = test_database();
        let store = AccountStore::new(db);
        let mut contact_owner = sample_account("carol");
        contact_owner.email = "dave@example.com".into();
        let UniqueWrite::Done(carol) = store.insert(contact_owner).await? else {
            panic!("carol should insert");
        };
        let mut handle_owner = sample_account("dave");
        handle_owner.username = "dave@example.com".into();
        handle_owner.email = "dave@elsewhere.example".into();
        let UniqueWrite::Done(dave) = store.insert(handle_owner).await? else {
            panic!("dave should insert");
        };

        let found = store.find_by_login("dave@example.com").await?.unwrap();
        assert_eq!(found.id, dave.id);
        assert_ne!(found.id, carol.id);
        Ok(())
    }

    #[test]
    fn public_projection_drops_credentials() {
        let account = Account {
            id: Uuid::new_v4(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            fullname: "Alice".into(),
            avatar: "a.png".into(),
            cover_image: String::new(),
            password_hash: "$argon2id$secret".into(),
            refresh_token: Some("live-token".into()),
            watch_history: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&PublicAccount::from(account)).unwrap();
        assert!(!json.contains("argon2"));
        assert!(!json.contains("live-token"));
        assert!(json.contains("\"coverImage\""));
    }
}
