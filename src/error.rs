//! Error taxonomy shared by the session controller, the gate and handlers.

use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::token::TokenError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    /// No account matches; 400 on login, 404 elsewhere.
    #[error("user does not exist")]
    NotFound { status: StatusCode },
    #[error("video not found")]
    VideoNotFound,
    #[error("{0}")]
    Forbidden(String),
    #[error("invalid user credentials")]
    InvalidCredentials,
    #[error("unauthorized request")]
    Unauthorized,
    #[error("invalid refresh token")]
    InvalidToken(#[source] TokenError),
    /// Refresh token is signed and unexpired but is not the one on record.
    #[error("refresh token has been superseded")]
    TokenReuse,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn user_not_found() -> Self {
        Self::NotFound {
            status: StatusCode::NOT_FOUND,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_)
            | ApiError::InvalidCredentials
            | ApiError::InvalidToken(_)
            | ApiError::TokenReuse => StatusCode::BAD_REQUEST,
            ApiError::NotFound { status } => *status,
            ApiError::VideoNotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message sent to the client. Token failures all read the same so a
    /// caller cannot tell which check rejected it.
    fn public_message(&self) -> String {
        match self {
            ApiError::InvalidToken(_) | ApiError::TokenReuse => {
                "Invalid refresh token. It may be expired or already used.".to_string()
            }
            ApiError::Unauthorized => "Unauthorized request. Please login.".to_string(),
            ApiError::Internal(_) => "Something went wrong.".to_string(),
            other => other.to_string(),
        }
    }
}

/// Malformed bodies, wrong content types and undecodable fields are all
/// plain validation failures to the client.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    status_code: u16,
    message: String,
    success: bool,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(err) = &self {
            tracing::error!(error = ?err, "request failed with an internal error");
        }
        let status = self.status();
        let body = ErrorBody {
            status_code: status.as_u16(),
            message: self.public_message(),
            success: false,
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
