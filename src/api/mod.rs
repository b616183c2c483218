//! HTTP surface: router, shared state, response envelope and token cookies.

mod likes;
mod subscriptions;
mod users;
mod videos;

use std::sync::Arc;

use axum::{
    Json, Router,
    http::{HeaderValue, Method, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::account::AccountStore;
use crate::db::Database;
use crate::error::{ApiError, ApiResult};
use crate::gate::require_auth;
use crate::like::LikeStore;
use crate::password::SecretHasher;
use crate::session::SessionController;
use crate::subscription::SubscriptionStore;
use crate::token::{TokenKind, TokenPair, TokenService, TokenSettings};
use crate::video::VideoStore;

pub const ACCESS_TOKEN_COOKIE: &str = "accessToken";
pub const REFRESH_TOKEN_COOKIE: &str = "refreshToken";

#[derive(Clone)]
pub struct AppState {
    pub session: Arc<SessionController>,
    pub accounts: AccountStore,
    pub videos: VideoStore,
    pub likes: LikeStore,
    pub subscriptions: SubscriptionStore,
    /// Only ever false for plain-HTTP local development.
    pub cookie_secure: bool,
}

impl AppState {
    pub fn new(
        db: Database,
        tokens: &TokenSettings,
        hasher: SecretHasher,
        cookie_secure: bool,
    ) -> Self {
        let accounts = AccountStore::new(db.clone());
        let videos = VideoStore::new(db.clone());
        let likes = LikeStore::new(db.clone());
        let subscriptions = SubscriptionStore::new(db);
        let session = SessionController::new(
            accounts.clone(),
            videos.clone(),
            Arc::new(TokenService::new(tokens)),
            hasher,
        );
        Self {
            session: Arc::new(session),
            accounts,
            videos,
            likes,
            subscriptions,
            cookie_secure,
        }
    }

    /// Adds both token cookies to `jar`, HttpOnly and scoped to the token
    /// lifetimes.
    fn with_token_cookies(&self, jar: CookieJar, tokens: &TokenPair) -> CookieJar {
        let service = self.session.tokens();
        jar.add(self.token_cookie(
            ACCESS_TOKEN_COOKIE,
            tokens.access_token.clone(),
            service.ttl(TokenKind::Access),
        ))
        .add(self.token_cookie(
            REFRESH_TOKEN_COOKIE,
            tokens.refresh_token.clone(),
            service.ttl(TokenKind::Refresh),
        ))
    }

    fn token_cookie(
        &self,
        name: &'static str,
        value: String,
        ttl: chrono::Duration,
    ) -> Cookie<'static> {
        Cookie::build((name, value))
            .http_only(true)
            .secure(self.cookie_secure)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(time::Duration::seconds(ttl.num_seconds()))
            .build()
    }

    /// Expires both token cookies. Removal cookies are always sent, even
    /// when the request authenticated with a bearer header.
    fn without_token_cookies(&self, jar: CookieJar) -> CookieJar {
        [ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE]
            .into_iter()
            .fold(jar, |jar, name| {
                let mut cookie = self.token_cookie(name, String::new(), chrono::Duration::zero());
                cookie.make_removal();
                jar.add(cookie)
            })
    }
}

/// Success envelope shared by every JSON endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    #[serde(skip)]
    status: StatusCode,
    status_code: u16,
    data: T,
    message: String,
    success: bool,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(status: StatusCode, data: T, message: impl Into<String>) -> Self {
        Self {
            status,
            status_code: status.as_u16(),
            data,
            message: message.into(),
            success: true,
        }
    }

    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self::new(StatusCode::OK, data, message)
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

fn parse_id(raw: &str, what: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| ApiError::validation(format!("Invalid {what} id")))
}

pub fn router(state: AppState) -> Router {
    let gate = middleware::from_fn_with_state(state.clone(), require_auth);

    let user_routes = Router::new()
        .route("/logout", post(users::logout))
        .route("/change-password", post(users::change_password))
        .route("/current-user", get(users::current_user))
        .route("/update-account", patch(users::update_account))
        .route("/avatar", patch(users::update_avatar))
        .route("/cover-image", patch(users::update_cover_image))
        .route("/history", get(users::watch_history))
        .route("/history/{video_id}", post(users::record_view))
        .route_layer(gate.clone())
        .route("/register", post(users::register))
        .route("/login", post(users::login))
        .route("/refresh-token", post(users::refresh_token));

    let video_routes = Router::new()
        .route(
            "/",
            get(videos::list).merge(post(videos::publish).route_layer(gate.clone())),
        )
        .route("/mine", get(videos::list_mine).route_layer(gate.clone()))
        .route(
            "/{video_id}",
            get(videos::get_video).merge(
                delete(videos::delete_video)
                    .patch(videos::update_video)
                    .route_layer(gate.clone()),
            ),
        )
        .route(
            "/toggle/publish/{video_id}",
            patch(videos::toggle_publish).route_layer(gate.clone()),
        );

    let like_routes = Router::new()
        .route("/toggle/v/{video_id}", post(likes::toggle_video_like))
        .route("/videos", get(likes::liked_videos))
        .route_layer(gate.clone());

    let subscription_routes = Router::new()
        .route(
            "/c/{channel_id}",
            get(subscriptions::channel_subscribers).post(subscriptions::toggle_subscription),
        )
        .route("/u/{subscriber_id}", get(subscriptions::subscribed_channels))
        .route_layer(gate);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1/users", user_routes)
        .nest("/api/v1/videos", video_routes)
        .nest("/api/v1/likes", like_routes)
        .nest("/api/v1/subscriptions", subscription_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Credentialed CORS for a single configured origin.
pub fn cors_layer(origin: &str) -> anyhow::Result<CorsLayer> {
    let origin: HeaderValue = origin
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid CORS origin {origin:?}"))?;
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .allow_credentials(true))
}

async fn health_check() -> &'static str {
    "OK"
}
