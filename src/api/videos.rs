use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use axum_extra::extract::WithRejection;
use serde::Deserialize;
use uuid::Uuid;

use super::{ApiResponse, AppState, parse_id};
use crate::error::{ApiError, ApiResult};
use crate::gate::CurrentAccount;
use crate::video::{
    NewVideo, SortDirection, SortField, VideoChanges, VideoPage, VideoQuery, VideoRecord,
};

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub query: Option<String>,
    pub sort_by: Option<SortField>,
    pub sort_type: Option<SortDirection>,
    pub user_id: Option<String>,
}

impl ListParams {
    fn into_query(self, owner_id: Option<Uuid>, viewer: Option<Uuid>) -> VideoQuery {
        VideoQuery {
            page: self.page.unwrap_or(1),
            limit: self.limit.unwrap_or_default(),
            search: self.query,
            sort_by: self.sort_by.unwrap_or_default(),
            sort_type: self.sort_type.unwrap_or_default(),
            owner_id,
            viewer,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PublishRequest {
    pub title: String,
    pub description: String,
    pub video_file: String,
    pub thumbnail: String,
    pub duration: Option<f64>,
}

pub async fn list(
    State(state): State<AppState>,
    WithRejection(Query(mut params), _): WithRejection<Query<ListParams>, ApiError>,
) -> ApiResult<ApiResponse<VideoPage>> {
    let owner_id = match params.user_id.take().filter(|raw| !raw.trim().is_empty()) {
        Some(raw) => Some(parse_id(&raw, "user")?),
        None => None,
    };
    let page = state.videos.list(params.into_query(owner_id, None)).await?;
    Ok(ApiResponse::ok(page, "Videos fetched successfully"))
}

/// The caller's own catalogue, drafts included.
pub async fn list_mine(
    State(state): State<AppState>,
    Extension(CurrentAccount(account)): Extension<CurrentAccount>,
    WithRejection(Query(params), _): WithRejection<Query<ListParams>, ApiError>,
) -> ApiResult<ApiResponse<VideoPage>> {
    let query = params.into_query(Some(account.id), Some(account.id));
    let page = state.videos.list(query).await?;
    Ok(ApiResponse::ok(page, "Videos fetched successfully"))
}

pub async fn publish(
    State(state): State<AppState>,
    Extension(CurrentAccount(account)): Extension<CurrentAccount>,
    WithRejection(Json(req), _): WithRejection<Json<PublishRequest>, ApiError>,
) -> ApiResult<ApiResponse<VideoRecord>> {
    for (value, field) in [
        (&req.title, "title"),
        (&req.video_file, "videoFile"),
        (&req.thumbnail, "thumbnail"),
    ] {
        if value.trim().is_empty() {
            return Err(ApiError::validation(format!("{field} is required")));
        }
    }
    let duration = req.duration.unwrap_or(0.0);
    if !duration.is_finite() || duration < 0.0 {
        return Err(ApiError::validation("duration must be a non-negative number"));
    }

    let video = state
        .videos
        .insert(NewVideo {
            owner_id: account.id,
            title: req.title.trim().to_string(),
            description: req.description.trim().to_string(),
            video_file: req.video_file.trim().to_string(),
            thumbnail: req.thumbnail.trim().to_string(),
            duration,
        })
        .await?;
    Ok(ApiResponse::new(
        StatusCode::CREATED,
        video,
        "Video published successfully",
    ))
}

/// Only fields present in the body change; present ones must not be blank.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UpdateVideoRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub thumbnail: Option<String>,
}

impl UpdateVideoRequest {
    fn into_changes(self) -> ApiResult<VideoChanges> {
        let title = non_blank(self.title, "title")?;
        let thumbnail = non_blank(self.thumbnail, "thumbnail")?;
        let description = self.description.map(|value| value.trim().to_string());
        if title.is_none() && thumbnail.is_none() && description.is_none() {
            return Err(ApiError::validation(
                "Provide a title, description or thumbnail to update",
            ));
        }
        Ok(VideoChanges {
            title,
            description,
            thumbnail,
        })
    }
}

fn non_blank(value: Option<String>, field: &str) -> ApiResult<Option<String>> {
    match value.map(|value| value.trim().to_string()) {
        Some(value) if value.is_empty() => {
            Err(ApiError::validation(format!("{field} cannot be empty")))
        }
        other => Ok(other),
    }
}

pub async fn get_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> ApiResult<ApiResponse<VideoRecord>> {
    let video_id = parse_id(&video_id, "video")?;
    let video = state
        .videos
        .get_and_count_view(video_id)
        .await?
        .ok_or(ApiError::VideoNotFound)?;
    Ok(ApiResponse::ok(video, "Video fetched successfully"))
}

pub async fn delete_video(
    State(state): State<AppState>,
    Extension(CurrentAccount(account)): Extension<CurrentAccount>,
    Path(video_id): Path<String>,
) -> ApiResult<ApiResponse<serde_json::Value>> {
    let video = owned_video(&state, &video_id, account.id).await?;
    if !state.videos.delete(video.id).await? {
        return Err(ApiError::VideoNotFound);
    }
    Ok(ApiResponse::ok(
        serde_json::json!({}),
        "Video deleted successfully",
    ))
}

pub async fn update_video(
    State(state): State<AppState>,
    Extension(CurrentAccount(account)): Extension<CurrentAccount>,
    Path(video_id): Path<String>,
    WithRejection(Json(req), _): WithRejection<Json<UpdateVideoRequest>, ApiError>,
) -> ApiResult<ApiResponse<VideoRecord>> {
    let changes = req.into_changes()?;
    let video = owned_video(&state, &video_id, account.id).await?;
    let updated = state
        .videos
        .update_details(video.id, changes)
        .await?
        .ok_or(ApiError::VideoNotFound)?;
    Ok(ApiResponse::ok(updated, "Video updated successfully"))
}

pub async fn toggle_publish(
    State(state): State<AppState>,
    Extension(CurrentAccount(account)): Extension<CurrentAccount>,
    Path(video_id): Path<String>,
) -> ApiResult<ApiResponse<VideoRecord>> {
    let video = owned_video(&state, &video_id, account.id).await?;
    let updated = state
        .videos
        .toggle_publish(video.id)
        .await?
        .ok_or(ApiError::VideoNotFound)?;
    Ok(ApiResponse::ok(updated, "Publish status toggled"))
}

async fn owned_video(state: &AppState, raw_id: &str, caller: Uuid) -> ApiResult<VideoRecord> {
    let video_id = parse_id(raw_id, "video")?;
    let video = state
        .videos
        .get(video_id)
        .await?
        .ok_or(ApiError::VideoNotFound)?;
    if video.owner_id != caller {
        return Err(ApiError::Forbidden(
            "You are not the owner of this video".to_string(),
        ));
    }
    Ok(video)
}
