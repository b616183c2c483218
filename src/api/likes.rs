use axum::{
    Extension,
    extract::{Path, State},
};

use super::{ApiResponse, AppState, parse_id};
use crate::error::{ApiError, ApiResult};
use crate::gate::CurrentAccount;
use crate::like::LikeState;
use crate::video::VideoRecord;

/// Someone else's draft cannot be liked; it reads as missing.
pub async fn toggle_video_like(
    State(state): State<AppState>,
    Extension(CurrentAccount(account)): Extension<CurrentAccount>,
    Path(video_id): Path<String>,
) -> ApiResult<ApiResponse<LikeState>> {
    let video_id = parse_id(&video_id, "video")?;
    match state.videos.get(video_id).await? {
        Some(video) if video.visible_to(account.id) => {}
        _ => return Err(ApiError::VideoNotFound),
    }
    let like = state.likes.toggle(video_id, account.id).await?;
    let message = if like.liked {
        "Video liked"
    } else {
        "Video unliked"
    };
    Ok(ApiResponse::ok(like, message))
}

pub async fn liked_videos(
    State(state): State<AppState>,
    Extension(CurrentAccount(account)): Extension<CurrentAccount>,
) -> ApiResult<ApiResponse<Vec<VideoRecord>>> {
    let ids = state.likes.liked_video_ids(account.id).await?;
    let videos = state
        .videos
        .get_many(ids)
        .await?
        .into_iter()
        .filter(|video| video.visible_to(account.id))
        .collect();
    Ok(ApiResponse::ok(videos, "Liked videos fetched successfully"))
}
