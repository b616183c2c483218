//! Video catalogue.
//!
//! Media files live on an external host; a video row only keeps the URLs the
//! uploader got back from it, plus the bookkeeping the API needs (owner,
//! publish flag, view counter).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, ToSql, params};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{Database, row_uuid};

pub const DEFAULT_PAGE_LIMIT: u32 = 10;
pub const MAX_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub video_file: String,
    pub thumbnail: String,
    pub duration: f64,
    pub views: i64,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VideoRecord {
    /// Drafts are visible to their owner only.
    pub fn visible_to(&self, viewer: Uuid) -> bool {
        self.is_published || self.owner_id == viewer
    }
}

#[derive(Debug, Clone)]
pub struct NewVideo {
    pub owner_id: Uuid,
    pub title: String,
    pub description: String,
    pub video_file: String,
    pub thumbnail: String,
    pub duration: f64,
}

/// Editable metadata; `None` leaves the stored value alone.
#[derive(Debug, Clone, Default)]
pub struct VideoChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum SortField {
    #[default]
    #[serde(rename = "createdAt")]
    CreatedAt,
    #[serde(rename = "title")]
    Title,
    #[serde(rename = "views")]
    Views,
    #[serde(rename = "duration")]
    Duration,
}

impl SortField {
    fn column(self) -> &'static str {
        match self {
            SortField::CreatedAt => "created_at",
            SortField::Title => "title",
            SortField::Views => "views",
            SortField::Duration => "duration",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

/// Filters and paging for [`VideoStore::list`]. Unpublished videos are only
/// included when `owner_id` is also the `viewer`.
#[derive(Debug, Clone, Default)]
pub struct VideoQuery {
    pub page: u32,
    pub limit: u32,
    pub search: Option<String>,
    pub sort_by: SortField,
    pub sort_type: SortDirection,
    pub owner_id: Option<Uuid>,
    pub viewer: Option<Uuid>,
}

impl VideoQuery {
    /// Clamps paging to sane bounds: page >= 1, 1 <= limit <= MAX_PAGE_LIMIT.
    pub fn normalized(mut self) -> Self {
        self.page = self.page.max(1);
        self.limit = match self.limit {
            0 => DEFAULT_PAGE_LIMIT,
            n => n.min(MAX_PAGE_LIMIT),
        };
        self.search = self
            .search
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoPage {
    pub videos: Vec<VideoRecord>,
    pub pagination: PageInfo,
}

#[derive(Debug, Clone)]
pub struct VideoStore {
    db: Database,
}

impl VideoStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn insert(&self, new: NewVideo) -> Result<VideoRecord> {
        self.db
            .run(move |conn| {
                let id = Uuid::new_v4();
                let now = Utc::now();
                conn.execute(
                    r#"
                    INSERT INTO videos (
                        id, owner_id, title, description, video_file, thumbnail,
                        duration, views, is_published, created_at, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, 1, ?8, ?8)
                    "#,
                    params![
                        id.to_string(),
                        new.owner_id.to_string(),
                        new.title,
                        new.description,
                        new.video_file,
                        new.thumbnail,
                        new.duration,
                        now,
                    ],
                )
                .context("inserting video")?;
                fetch_single(conn, id)?.context("video vanished right after insert")
            })
            .await
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<VideoRecord>> {
        self.db.run(move |conn| fetch_single(conn, id)).await
    }

    /// Bumps the view counter and returns the updated row.
    pub async fn get_and_count_view(&self, id: Uuid) -> Result<Option<VideoRecord>> {
        self.db
            .run(move |conn| {
                let updated = conn.execute(
                    "UPDATE videos SET views = views + 1 WHERE id = ?1",
                    [id.to_string()],
                )?;
                if updated == 0 {
                    return Ok(None);
                }
                fetch_single(conn, id)
            })
            .await
    }

    /// Fetches the given ids, preserving their order and skipping any that
    /// no longer exist.
    pub async fn get_many(&self, ids: Vec<Uuid>) -> Result<Vec<VideoRecord>> {
        self.db
            .run(move |conn| {
                let mut records = Vec::with_capacity(ids.len());
                for id in ids {
                    if let Some(record) = fetch_single(conn, id)? {
                        records.push(record);
                    }
                }
                Ok(records)
            })
            .await
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        self.db
            .run(move |conn| {
                let deleted = conn.execute("DELETE FROM videos WHERE id = ?1", [id.to_string()])?;
                Ok(deleted == 1)
            })
            .await
    }

    pub async fn update_details(
        &self,
        id: Uuid,
        changes: VideoChanges,
    ) -> Result<Option<VideoRecord>> {
        self.db
            .run(move |conn| {
                let updated = conn.execute(
                    r#"
                    UPDATE videos
                    SET title = COALESCE(?2, title),
                        description = COALESCE(?3, description),
                        thumbnail = COALESCE(?4, thumbnail),
                        updated_at = ?5
                    WHERE id = ?1
                    "#,
                    params![
                        id.to_string(),
                        changes.title,
                        changes.description,
                        changes.thumbnail,
                        Utc::now(),
                    ],
                )?;
                if updated == 0 {
                    return Ok(None);
                }
                fetch_single(conn, id)
            })
            .await
    }

    pub async fn toggle_publish(&self, id: Uuid) -> Result<Option<VideoRecord>> {
        self.db
            .run(move |conn| {
                let updated = conn.execute(
                    r#"
                    UPDATE videos
                    SET is_published = 1 - is_published, updated_at = ?2
                    WHERE id = ?1
                    "#,
                    params![id.to_string(), Utc::now()],
                )?;
                if updated == 0 {
                    return Ok(None);
                }
                fetch_single(conn, id)
            })
            .await
    }

    pub async fn list(&self, query: VideoQuery) -> Result<VideoPage> {
        let query = query.normalized();
        self.db.run(move |conn| list_videos(conn, &query)).await
    }
}

fn list_videos(conn: &Connection, query: &VideoQuery) -> Result<VideoPage> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut args: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(search) = &query.search {
        args.push(Box::new(format!("%{}%", escape_like(search))));
        clauses.push("title LIKE ? ESCAPE '\\'");
    }
    if let Some(owner) = query.owner_id {
        args.push(Box::new(owner.to_string()));
        clauses.push("owner_id = ?");
    }
    let own_listing = query.owner_id.is_some() && query.owner_id == query.viewer;
    if !own_listing {
        clauses.push("is_published = 1");
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let arg_refs: Vec<&dyn ToSql> = args.iter().map(|arg| arg.as_ref()).collect();

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM videos {where_sql}"),
        arg_refs.as_slice(),
        |row| row.get(0),
    )?;

    let direction = match query.sort_type {
        SortDirection::Asc => "ASC",
        SortDirection::Desc => "DESC",
    };
    let offset = i64::from(query.page - 1) * i64::from(query.limit);
    let mut stmt = conn.prepare(&format!(
        r#"
        SELECT id, owner_id, title, description, video_file, thumbnail,
               duration, views, is_published, created_at, updated_at
        FROM videos
        {where_sql}
        ORDER BY {column} {direction}, rowid {direction}
        LIMIT {limit} OFFSET {offset}
        "#,
        column = query.sort_by.column(),
        limit = query.limit,
    ))?;

    let mut rows = stmt.query(arg_refs.as_slice())?;
    let mut videos = Vec::new();
    while let Some(row) = rows.next()? {
        videos.push(row_to_video(row)?);
    }

    let total = u64::try_from(total).unwrap_or_default();
    Ok(VideoPage {
        videos,
        pagination: PageInfo {
            total,
            page: query.page,
            limit: query.limit,
            total_pages: total.div_ceil(u64::from(query.limit)),
        },
    })
}

fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn fetch_single(conn: &Connection, id: Uuid) -> Result<Option<VideoRecord>> {
    conn.query_row(
        r#"
        SELECT id, owner_id, title, description, video_file, thumbnail,
               duration, views, is_published, created_at, updated_at
        FROM videos
        WHERE id = ?1
        "#,
        [id.to_string()],
        |row| Ok(row_to_video(row)),
    )
    .optional()?
    .transpose()
}

/// Converts a SQL row into a `VideoRecord`, normalizing the INTEGER flag.
fn row_to_video(row: &Row<'_>) -> Result<VideoRecord> {
    Ok(VideoRecord {
        id: row_uuid(row, "id")?,
        owner_id: row_uuid(row, "owner_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        video_file: row.get("video_file")?,
        thumbnail: row.get("thumbnail")?,
        duration: row.get("duration")?,
        views: row.get("views")?,
        is_published: row.get::<_, i64>("is_published").map(|value| value != 0)?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

#[cfg(test)]
pub(crate) fn sample_video(owner_id: Uuid, title: &str) -> NewVideo {
    NewVideo {
        owner_id,
        title: title.to_string(),
        description: String::new(),
        video_file: format!("https://media.example.com/{title}.mp4"),
        thumbnail: format!("https://media.example.com/{title}.jpg"),
        duration: 60.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{AccountStore, UniqueWrite, sample_account};
    use crate::db::test_database;

    async fn setup() -> (tempfile::TempDir, VideoStore, Uuid) {
        let (dir, db) = test_database();
        let accounts = AccountStore::new(db.clone());
        let UniqueWrite::Done(owner) = accounts.insert(sample_account("owner")).await.unwrap()
        else {
            panic!("owner insert failed");
        };
        (dir, VideoStore::new(db), owner.id)
    }

    #[tokio::test]
    async fn insert_get_and_count_views() -> Result<()> {
        let (_dir, store, owner) = setup().await;
        let video = store.insert(sample_video(owner, "intro")).await?;
        assert!(video.is_published);
        assert_eq!(video.views, 0);

        let viewed = store.get_and_count_view(video.id).await?.unwrap();
        assert_eq!(viewed.views, 1);
        assert!(store.get_and_count_view(Uuid::new_v4()).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn toggle_and_delete() -> Result<()> {
        let (_dir, store, owner) = setup().await;
        let video = store.insert(sample_video(owner, "clip")).await?;

        let hidden = store.toggle_publish(video.id).await?.unwrap();
        assert!(!hidden.is_published);
        let shown = store.toggle_publish(video.id).await?.unwrap();
        assert!(shown.is_published);

        assert!(store.delete(video.id).await?);
        assert!(!store.delete(video.id).await?);
        assert!(store.get(video.id).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn list_paginates_searches_and_hides_unpublished() -> Result<()> {
        let (_dir, store, owner) = setup().await;
        for title in ["rust 101", "rust 102", "cooking", "rust_100%"] {
            store.insert(sample_video(owner, title)).await?;
        }
        let draft = store.insert(sample_video(owner, "rust draft")).await?;
        store.toggle_publish(draft.id).await?;

        let page = store
            .list(VideoQuery {
                page: 1,
                limit: 2,
                search: Some("RUST".into()),
                sort_by: SortField::Title,
                sort_type: SortDirection::Asc,
                ..VideoQuery::default()
            })
            .await?;
        assert_eq!(page.pagination.total, 3);
        assert_eq!(page.pagination.total_pages, 2);
        let titles: Vec<_> = page.videos.iter().map(|v| v.title.as_str()).collect();
        assert_eq!(titles, vec!["rust 101", "rust 102"]);

        let literal = store
            .list(VideoQuery {
                search: Some("_100%".into()),
                ..VideoQuery::default()
            })
            .await?;
        assert_eq!(literal.videos.len(), 1);

        let own = store
            .list(VideoQuery {
                owner_id: Some(owner),
                viewer: Some(owner),
                ..VideoQuery::default()
            })
            .await?;
        assert_eq!(own.pagination.total, 5);
        assert_eq!(own.pagination.limit, DEFAULT_PAGE_LIMIT);
        Ok(())
    }

    #[tokio::test]
    async fn get_many_preserves_order_and_skips_missing() -> Result<()> {
        let (_dir, store, owner) = setup().await;
        let a = store.insert(sample_video(owner, "a")).await?;
        let b = store.insert(sample_video(owner, "b")).await?;
        let found = store.get_many(vec![b.id, Uuid::new_v4(), a.id]).await?;
        let ids: Vec<_> = found.iter().map(|v| v.id).collect();
        assert_eq!(ids, vec![b.id, a.id]);
        Ok(())
    }

    #[tokio::test]
    async fn update_details_only_touches_given_fields() -> Result<()> {
        let (_dir, store, owner) = setup().await;
        let mut new = sample_video(owner, "raw");
        new.description = "first take".into();
        let video = store.insert(new).await?;

        let updated = store
            .update_details(
                video.id,
                VideoChanges {
                    title: Some("final".into()),
                    ..VideoChanges::default()
                },
            )
            .await?
            .unwrap();
        assert_eq!(updated.title, "final");
        assert_eq!(updated.description, "first take");
        assert_eq!(updated.thumbnail, video.thumbnail);

        assert!(
            store
                .update_details(Uuid::new_v4(), VideoChanges::default())
                .await?
                .is_none()
        );
        Ok(())
    }

    #[tokio::test]
    async fn drafts_are_visible_to_their_owner_only() -> Result<()> {
        let (_dir, store, owner) = setup().await;
        let video = store.insert(sample_video(owner, "clip")).await?;
        let stranger = Uuid::new_v4();
        assert!(video.visible_to(stranger));

        let draft = store.toggle_publish(video.id).await?.unwrap();
        assert!(draft.visible_to(owner));
        assert!(!draft.visible_to(stranger));
        Ok(())
    }

    #[test]
    fn normalized_clamps_paging() {
        let query = VideoQuery {
            page: 0,
            limit: 1_000,
            search: Some("   ".into()),
            ..VideoQuery::default()
        }
        .normalized();
        assert_eq!(query.page, 1);
        assert_eq!(query.limit, MAX_PAGE_LIMIT);
        assert!(query.search.is_none());
    }
}
