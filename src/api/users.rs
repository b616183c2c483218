use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
};
use axum_extra::extract::{WithRejection, cookie::CookieJar};
use serde::{Deserialize, Serialize};

use super::{ApiResponse, AppState, REFRESH_TOKEN_COOKIE, parse_id};
use crate::account::PublicAccount;
use crate::error::{ApiError, ApiResult};
use crate::gate::CurrentAccount;
use crate::session::Registration;
use crate::token::TokenPair;
use crate::video::VideoRecord;

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RegisterRequest {
    pub fullname: String,
    pub email: String,
    pub username: String,
    pub password: String,
    pub avatar: String,
    pub cover_image: Option<String>,
}

/// Either `username` or `email` identifies the account.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: String,
}

impl LoginRequest {
    fn identifier(&self) -> &str {
        [self.username.as_deref(), self.email.as_deref()]
            .into_iter()
            .flatten()
            .find(|value| !value.trim().is_empty())
            .unwrap_or_default()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UpdateAccountRequest {
    pub fullname: String,
    pub email: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AvatarRequest {
    pub avatar: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CoverImageRequest {
    pub cover_image: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginData {
    pub user: PublicAccount,
    pub access_token: String,
    pub refresh_token: String,
}

pub async fn register(
    State(state): State<AppState>,
    WithRejection(Json(req), _): WithRejection<Json<RegisterRequest>, ApiError>,
) -> ApiResult<ApiResponse<PublicAccount>> {
    let account = state
        .session
        .register(Registration {
            fullname: req.fullname,
            email: req.email,
            username: req.username,
            password: req.password,
            avatar: req.avatar,
            cover_image: req.cover_image,
        })
        .await?;
    Ok(ApiResponse::new(
        StatusCode::CREATED,
        account,
        "User registered successfully",
    ))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    WithRejection(Json(req), _): WithRejection<Json<LoginRequest>, ApiError>,
) -> ApiResult<(CookieJar, ApiResponse<LoginData>)> {
    let outcome = state.session.login(req.identifier(), &req.password).await?;
    let jar = state.with_token_cookies(jar, &outcome.tokens);
    Ok((
        jar,
        ApiResponse::ok(
            LoginData {
                user: outcome.account,
                access_token: outcome.tokens.access_token,
                refresh_token: outcome.tokens.refresh_token,
            },
            "User logged in successfully",
        ),
    ))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(CurrentAccount(account)): Extension<CurrentAccount>,
    jar: CookieJar,
) -> ApiResult<(CookieJar, ApiResponse<serde_json::Value>)> {
    state.session.logout(account.id).await?;
    Ok((
        state.without_token_cookies(jar),
        ApiResponse::ok(serde_json::json!({}), "User logged out"),
    ))
}

/// Takes the refresh token from its cookie, falling back to a JSON body.
pub async fn refresh_token(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Bytes,
) -> ApiResult<(CookieJar, ApiResponse<TokenPair>)> {
    let from_cookie = jar
        .get(REFRESH_TOKEN_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.trim().is_empty());
    let presented = from_cookie.or_else(|| {
        serde_json::from_slice::<RefreshRequest>(&body)
            .ok()
            .and_then(|req| req.refresh_token)
    });

    let tokens = state.session.refresh(presented.as_deref()).await?;
    let jar = state.with_token_cookies(jar, &tokens);
    Ok((jar, ApiResponse::ok(tokens, "Access token refreshed")))
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(CurrentAccount(account)): Extension<CurrentAccount>,
    WithRejection(Json(req), _): WithRejection<Json<ChangePasswordRequest>, ApiError>,
) -> ApiResult<ApiResponse<serde_json::Value>> {
    state
        .session
        .change_password(account.id, &req.old_password, &req.new_password)
        .await?;
    Ok(ApiResponse::ok(
        serde_json::json!({}),
        "Password changed successfully",
    ))
}

pub async fn current_user(
    State(state): State<AppState>,
    Extension(CurrentAccount(account)): Extension<CurrentAccount>,
) -> ApiResult<ApiResponse<PublicAccount>> {
    let account = state.session.current_account(account.id).await?;
    Ok(ApiResponse::ok(account, "Current user fetched successfully"))
}

pub async fn update_account(
    State(state): State<AppState>,
    Extension(CurrentAccount(account)): Extension<CurrentAccount>,
    WithRejection(Json(req), _): WithRejection<Json<UpdateAccountRequest>, ApiError>,
) -> ApiResult<ApiResponse<PublicAccount>> {
    let updated = state
        .session
        .update_details(account.id, &req.fullname, &req.email)
        .await?;
    Ok(ApiResponse::ok(updated, "Account details updated successfully"))
}

pub async fn update_avatar(
    State(state): State<AppState>,
    Extension(CurrentAccount(account)): Extension<CurrentAccount>,
    WithRejection(Json(req), _): WithRejection<Json<AvatarRequest>, ApiError>,
) -> ApiResult<ApiResponse<PublicAccount>> {
    let updated = state.session.update_avatar(account.id, &req.avatar).await?;
    Ok(ApiResponse::ok(updated, "Avatar updated successfully"))
}

pub async fn update_cover_image(
    State(state): State<AppState>,
    Extension(CurrentAccount(account)): Extension<CurrentAccount>,
    WithRejection(Json(req), _): WithRejection<Json<CoverImageRequest>, ApiError>,
) -> ApiResult<ApiResponse<PublicAccount>> {
    let updated = state
        .session
        .update_cover_image(account.id, &req.cover_image)
        .await?;
    Ok(ApiResponse::ok(updated, "Cover image updated successfully"))
}

pub async fn record_view(
    State(state): State<AppState>,
    Extension(CurrentAccount(account)): Extension<CurrentAccount>,
    Path(video_id): Path<String>,
) -> ApiResult<ApiResponse<serde_json::Value>> {
    let video_id = parse_id(&video_id, "video")?;
    state.session.record_view(account.id, video_id).await?;
    Ok(ApiResponse::ok(serde_json::json!({}), "View recorded"))
}

pub async fn watch_history(
    State(state): State<AppState>,
    Extension(CurrentAccount(account)): Extension<CurrentAccount>,
) -> ApiResult<ApiResponse<Vec<VideoRecord>>> {
    let history = state.session.watch_history(account.id).await?;
    Ok(ApiResponse::ok(
        history,
        "Watch history fetched successfully",
    ))
}
