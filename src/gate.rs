//! Authorization gate for protected routes.
//!
//! Looks for an access token in the `accessToken` cookie first and the
//! `Authorization: Bearer` header second. A verified token whose account
//! still exists puts a [`CurrentAccount`] into the request extensions;
//! anything else answers 401 before the handler runs. Expired access tokens
//! are never refreshed here.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::debug;

use crate::account::PublicAccount;
use crate::api::{ACCESS_TOKEN_COOKIE, AppState};
use crate::error::ApiError;
use crate::token::TokenKind;

/// Identity resolved by the gate, without password hash or refresh token.
#[derive(Debug, Clone)]
pub struct CurrentAccount(pub PublicAccount);

pub async fn require_auth(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = candidate_token(&jar, request.headers()).ok_or(ApiError::Unauthorized)?;

    let verified = state
        .session
        .tokens()
        .verify(&token, TokenKind::Access)
        .map_err(|err| {
            debug!(error = %err, "access token rejected");
            ApiError::Unauthorized
        })?;

    let account = state
        .accounts
        .find_by_id(verified.account_id)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    request
        .extensions_mut()
        .insert(CurrentAccount(PublicAccount::from(account)));
    Ok(next.run(request).await)
}

/// Cookie wins over header; blank values count as absent.
fn candidate_token(jar: &CookieJar, headers: &HeaderMap) -> Option<String> {
    if let Some(cookie) = jar.get(ACCESS_TOKEN_COOKIE)
        && !cookie.value().trim().is_empty()
    {
        return Some(cookie.value().trim().to_string());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}
