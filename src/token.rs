//! Signed access and refresh tokens.
//!
//! Both kinds are HS256 JWTs carrying the account id. They are signed with
//! different secrets so a refresh token can never pass as an access token
//! and vice versa. Expiry is enforced with zero leeway.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Secrets and validity windows for both token kinds.
#[derive(Clone)]
pub struct TokenSettings {
    pub access_secret: String,
    pub access_ttl: Duration,
    pub refresh_secret: String,
    pub refresh_ttl: Duration,
}

impl std::fmt::Debug for TokenSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSettings")
            .field("access_secret", &"<redacted>")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_secret", &"<redacted>")
            .field("refresh_ttl", &self.refresh_ttl)
            .finish()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: Uuid,
    pub iat: i64,
    pub exp: i64,
    /// Random per token, so two tokens minted within the same second differ.
    pub jti: Uuid,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("token has expired")]
    Expired,
    #[error("token is malformed or its signature does not match")]
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    pub account_id: Uuid,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SigningKeys {
    fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }
}

pub struct TokenService {
    access: SigningKeys,
    refresh: SigningKeys,
    validation: Validation,
}

impl TokenService {
    pub fn new(settings: &TokenSettings) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iat", "sub"]);
        Self {
            access: SigningKeys::new(&settings.access_secret, settings.access_ttl),
            refresh: SigningKeys::new(&settings.refresh_secret, settings.refresh_ttl),
            validation,
        }
    }

    fn keys(&self, kind: TokenKind) -> &SigningKeys {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }

    pub fn ttl(&self, kind: TokenKind) -> Duration {
        self.keys(kind).ttl
    }

    pub fn issue_access_token(&self, account_id: Uuid) -> Result<String> {
        self.issue_at(TokenKind::Access, account_id, Utc::now())
    }

    pub fn issue_refresh_token(&self, account_id: Uuid) -> Result<String> {
        self.issue_at(TokenKind::Refresh, account_id, Utc::now())
    }

    pub fn issue_pair(&self, account_id: Uuid) -> Result<TokenPair> {
        Ok(TokenPair {
            access_token: self.issue_access_token(account_id)?,
            refresh_token: self.issue_refresh_token(account_id)?,
        })
    }

    /// Mints a token as if it had been issued at `issued_at`.
    pub(crate) fn issue_at(
        &self,
        kind: TokenKind,
        account_id: Uuid,
        issued_at: DateTime<Utc>,
    ) -> Result<String> {
        let keys = self.keys(kind);
        let claims = Claims {
            sub: account_id,
            iat: issued_at.timestamp(),
            exp: (issued_at + keys.ttl).timestamp(),
            jti: Uuid::new_v4(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding)
            .context("signing token")
    }

    pub fn verify(&self, token: &str, kind: TokenKind) -> Result<VerifiedToken, TokenError> {
        let data = decode::<Claims>(token, &self.keys(kind).decoding, &self.validation).map_err(
            |err| match err.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            },
        )?;
        let issued_at =
            DateTime::<Utc>::from_timestamp(data.claims.iat, 0).ok_or(TokenError::Invalid)?;
        Ok(VerifiedToken {
            account_id: data.claims.sub,
            issued_at,
        })
    }
}

#[cfg(test)]
pub(crate) fn test_settings() -> TokenSettings {
    TokenSettings {
        access_secret: "access-secret-for-tests".into(),
        access_ttl: Duration::minutes(15),
        refresh_secret: "refresh-secret-for-tests".into(),
        refresh_ttl: Duration::days(10),
    }
}
