//! Session controller: registration, login, logout, refresh-token rotation
//! and the account maintenance operations that sit behind the gate.
//!
//! Every account holds at most one live refresh token. Logging in anywhere
//! replaces it; refreshing swaps it for a new one through a conditional
//! update, so a superseded token can never be exchanged again.

use std::sync::Arc;

use anyhow::{Context, anyhow};
use tokio::task;
use tracing::{info, warn};
use uuid::Uuid;

use crate::account::{Account, AccountStore, NewAccount, PublicAccount, UniqueWrite};
use crate::error::{ApiError, ApiResult};
use crate::password::SecretHasher;
use crate::token::{TokenError, TokenKind, TokenPair, TokenService};
use crate::video::{VideoRecord, VideoStore};

#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub fullname: String,
    pub email: String,
    pub username: String,
    pub password: String,
    pub avatar: String,
    pub cover_image: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub account: PublicAccount,
    pub tokens: TokenPair,
}

pub struct SessionController {
    accounts: AccountStore,
    videos: VideoStore,
    tokens: Arc<TokenService>,
    hasher: SecretHasher,
}

impl SessionController {
    pub fn new(
        accounts: AccountStore,
        videos: VideoStore,
        tokens: Arc<TokenService>,
        hasher: SecretHasher,
    ) -> Self {
        Self {
            accounts,
            videos,
            tokens,
            hasher,
        }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub async fn register(&self, registration: Registration) -> ApiResult<PublicAccount> {
        let fullname = required(&registration.fullname, "Full name is required")?;
        let email = required(&registration.email, "Email is required")?;
        let username = required(&registration.username, "Username is required")?.to_lowercase();
        if username.contains('@') {
            return Err(ApiError::validation("Username cannot contain '@'"));
        }
        let avatar = required(&registration.avatar, "Avatar is required")?;
        if registration.password.trim().is_empty() {
            return Err(ApiError::validation("Password is required"));
        }

        let password_hash = self.hash_secret(registration.password).await?;
        let new = NewAccount {
            username,
            email,
            fullname,
            avatar,
            cover_image: registration
                .cover_image
                .map(|url| url.trim().to_string())
                .unwrap_or_default(),
            password_hash,
        };

        match self.accounts.insert(new).await? {
            UniqueWrite::Done(account) => {
                info!(account = %account.id, "account registered");
                Ok(account.into())
            }
            UniqueWrite::Taken => Err(ApiError::Conflict(
                "User with email or username already exists".into(),
            )),
            UniqueWrite::Missing => Err(anyhow!("registered account could not be read back").into()),
        }
    }

    pub async fn login(&self, identifier: &str, secret: &str) -> ApiResult<LoginOutcome> {
        let identifier = required(identifier, "Username or email is required")?;
        if secret.is_empty() {
            return Err(ApiError::validation("Password is required"));
        }

        let account = self
            .accounts
            .find_by_login(&identifier)
            .await?
            .ok_or(ApiError::NotFound {
                status: axum::http::StatusCode::BAD_REQUEST,
            })?;

        if !self.verify_secret(secret, &account.password_hash).await? {
            warn!(account = %account.id, "login rejected: wrong password");
            return Err(ApiError::InvalidCredentials);
        }

        let tokens = self.tokens.issue_pair(account.id)?;
        self.store_refresh_token(account.id, &tokens.refresh_token).await?;
        info!(account = %account.id, "login succeeded");

        Ok(LoginOutcome {
            account: account.into(),
            tokens,
        })
    }

    /// Persists a freshly issued refresh token. Fails if the account vanished
    /// after it was looked up, so no unpersisted token reaches the client.
    async fn store_refresh_token(&self, account_id: Uuid, token: &str) -> ApiResult<()> {
        if !self
            .accounts
            .set_refresh_token(account_id, Some(token.to_string()))
            .await?
        {
            return Err(ApiError::NotFound {
                status: axum::http::StatusCode::BAD_REQUEST,
            });
        }
        Ok(())
    }

    /// Clears the stored refresh token. Succeeds even when there is nothing
    /// to clear.
    pub async fn logout(&self, account_id: Uuid) -> ApiResult<()> {
        self.accounts.set_refresh_token(account_id, None).await?;
        info!(account = %account_id, "logged out");
        Ok(())
    }

    pub async fn refresh(&self, presented: Option<&str>) -> ApiResult<TokenPair> {
        let presented = presented
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(ApiError::Unauthorized)?;

        let verified = self
            .tokens
            .verify(presented, TokenKind::Refresh)
            .map_err(ApiError::InvalidToken)?;

        let account = self
            .accounts
            .find_by_id(verified.account_id)
            .await?
            .ok_or(ApiError::InvalidToken(TokenError::Invalid))?;

        if account.refresh_token.as_deref() != Some(presented) {
            warn!(account = %account.id, "refresh rejected: token is not the current one");
            return Err(ApiError::TokenReuse);
        }

        let tokens = self.tokens.issue_pair(account.id)?;
        let rotated = self
            .accounts
            .rotate_refresh_token(
                account.id,
                presented.to_string(),
                tokens.refresh_token.clone(),
            )
            .await?;
        if !rotated {
            warn!(account = %account.id, "refresh rejected: lost rotation race");
            return Err(ApiError::TokenReuse);
        }

        info!(account = %account.id, "refresh token rotated");
        Ok(tokens)
    }

    pub async fn change_password(
        &self,
        account_id: Uuid,
        old_password: &str,
        new_password: &str,
    ) -> ApiResult<()> {
        if new_password.trim().is_empty() {
            return Err(ApiError::validation("New password is required"));
        }
        let account = self.require_account(account_id).await?;
        if !self.verify_secret(old_password, &account.password_hash).await? {
            warn!(account = %account_id, "password change rejected: wrong old password");
            return Err(ApiError::InvalidCredentials);
        }

        let password_hash = self.hash_secret(new_password.to_string()).await?;
        if !self
            .accounts
            .update_password_hash(account_id, password_hash)
            .await?
        {
            return Err(ApiError::user_not_found());
        }
        info!(account = %account_id, "password changed");
        Ok(())
    }

    pub async fn current_account(&self, account_id: Uuid) -> ApiResult<PublicAccount> {
        Ok(self.require_account(account_id).await?.into())
    }

    pub async fn update_details(
        &self,
        account_id: Uuid,
        fullname: &str,
        email: &str,
    ) -> ApiResult<PublicAccount> {
        let fullname = required(fullname, "Full name is required")?;
        let email = required(email, "Email is required")?;
        match self
            .accounts
            .update_details(account_id, fullname, email)
            .await?
        {
            UniqueWrite::Done(account) => Ok(account.into()),
            UniqueWrite::Taken => Err(ApiError::Conflict("Email is already in use".into())),
            UniqueWrite::Missing => Err(ApiError::user_not_found()),
        }
    }

    pub async fn update_avatar(&self, account_id: Uuid, url: &str) -> ApiResult<PublicAccount> {
        let url = required(url, "Avatar file is missing")?;
        self.accounts
            .set_avatar(account_id, url)
            .await?
            .map(PublicAccount::from)
            .ok_or_else(ApiError::user_not_found)
    }

    pub async fn update_cover_image(
        &self,
        account_id: Uuid,
        url: &str,
    ) -> ApiResult<PublicAccount> {
        let url = required(url, "Cover image file is missing")?;
        self.accounts
            .set_cover_image(account_id, url)
            .await?
            .map(PublicAccount::from)
            .ok_or_else(ApiError::user_not_found)
    }

    /// Someone else's draft reads as missing.
    pub async fn record_view(&self, account_id: Uuid, video_id: Uuid) -> ApiResult<()> {
        match self.videos.get(video_id).await? {
            Some(video) if video.visible_to(account_id) => {}
            _ => return Err(ApiError::VideoNotFound),
        }
        if !self.accounts.record_view(account_id, video_id).await? {
            return Err(ApiError::user_not_found());
        }
        Ok(())
    }

    pub async fn watch_history(&self, account_id: Uuid) -> ApiResult<Vec<VideoRecord>> {
        let account = self.require_account(account_id).await?;
        let videos = self.videos.get_many(account.watch_history).await?;
        Ok(videos
            .into_iter()
            .filter(|video| video.visible_to(account_id))
            .collect())
    }

    async fn require_account(&self, account_id: Uuid) -> ApiResult<Account> {
        self.accounts
            .find_by_id(account_id)
            .await?
            .ok_or_else(ApiError::user_not_found)
    }

    async fn hash_secret(&self, secret: String) -> ApiResult<String> {
        let hasher = self.hasher.clone();
        let hash = task::spawn_blocking(move || hasher.hash(&secret))
            .await
            .context("password hashing task failed")??;
        Ok(hash)
    }

    async fn verify_secret(&self, secret: &str, stored: &str) -> ApiResult<bool> {
        let hasher = self.hasher.clone();
        let (secret, stored) = (secret.to_string(), stored.to_string());
        let matches = task::spawn_blocking(move || hasher.verify(&secret, &stored))
            .await
            .context("password verification task failed")??;
        Ok(matches)
    }
}

fn required(value: &str, message: &str) -> ApiResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::validation(message));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
pub(crate) struct Harness {
    pub _dir: tempfile::TempDir,
    pub session: Arc<SessionController>,
    pub accounts: AccountStore,
    pub videos: VideoStore,
    pub tokens: Arc<TokenService>,
}

#[cfg(test)]
pub(crate) fn harness() -> Harness {
    let (dir, db) = crate::db::test_database();
    let accounts = AccountStore::new(db.clone());
    let videos = VideoStore::new(db);
    let tokens = Arc::new(TokenService::new(&crate::token::test_settings()));
    let session = Arc::new(SessionController::new(
        accounts.clone(),
        videos.clone(),
        tokens.clone(),
        crate::password::test_hasher(),
    ));
    Harness {
        _dir: dir,
        session,
        accounts,
        videos,
        tokens,
    }
}

#[cfg(test)]
pub(crate) fn registration(username: &str, password: &str) -> Registration {
    Registration {
        fullname: format!("{username} tester"),
        email: format!("{username}@example.com"),
        username: username.to_string(),
        password: password.to_string(),
        avatar: format!("https://media.example.com/{username}.png"),
        cover_image: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::sample_video;
    use axum::http::StatusCode;
    use chrono::{Duration, Utc};

    async fn registered(h: &Harness, username: &str, password: &str) -> PublicAccount {
        h.session
            .register(registration(username, password))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn register_normalises_handle_and_rejects_duplicates() {
        let h = harness();
        let mut reg = registration("Alice", "pw");
        reg.username = "  Alice ".into();
        let account = h.session.register(reg).await.unwrap();
        assert_eq!(account.username, "alice");

        let err = h
            .session
            .register(registration("alice", "other"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn register_requires_every_field() {
        let h = harness();
        let mut reg = registration("alice", "pw");
        reg.avatar = " ".into();
        assert!(matches!(
            h.session.register(reg).await,
            Err(ApiError::Validation(_))
        ));
        let mut reg = registration("alice", "pw");
        reg.password = String::new();
        assert!(matches!(
            h.session.register(reg).await,
            Err(ApiError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn login_persists_the_issued_refresh_token() {
        let h = harness();
        let alice = registered(&h, "alice", "correct").await;

        for identifier in ["alice", "ALICE", "alice@example.com"] {
            let outcome = h.session.login(identifier, "correct").await.unwrap();
            let stored = h.accounts.find_by_id(alice.id).await.unwrap().unwrap();
            assert_eq!(
                stored.refresh_token.as_deref(),
                Some(outcome.tokens.refresh_token.as_str())
            );
            let access = h
                .tokens
                .verify(&outcome.tokens.access_token, TokenKind::Access)
                .unwrap();
            assert_eq!(access.account_id, alice.id);
        }
    }

    #[tokio::test]
    async fn login_failures_are_classified() {
        let h = harness();
        registered(&h, "alice", "correct").await;

        let err = h.session.login("nobody", "correct").await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound { .. }));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = h.session.login("alice", "wrong").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidCredentials));

        assert!(matches!(
            h.session.login("  ", "correct").await,
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            h.session.login("alice", "").await,
            Err(ApiError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn second_login_invalidates_the_first_session() {
        let h = harness();
        registered(&h, "alice", "pw").await;
        let first = h.session.login("alice", "pw").await.unwrap();
        let _second = h.session.login("alice", "pw").await.unwrap();
        let err = h
            .session
            .refresh(Some(&first.tokens.refresh_token))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::TokenReuse));
    }

    #[tokio::test]
    async fn only_the_latest_refresh_token_is_ever_valid() {
        let h = harness();
        let alice = registered(&h, "alice", "pw").await;
        let r1 = h.session.login("alice", "pw").await.unwrap().tokens.refresh_token;
        let r2 = h.session.refresh(Some(&r1)).await.unwrap().refresh_token;
        let r3 = h.session.refresh(Some(&r2)).await.unwrap().refresh_token;

        for stale in [&r1, &r2] {
            let err = h.session.refresh(Some(stale)).await.unwrap_err();
            assert!(matches!(err, ApiError::TokenReuse));
            assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        }
        let stored = h.accounts.find_by_id(alice.id).await.unwrap().unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some(r3.as_str()));
        assert!(h.session.refresh(Some(&r3)).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_refreshes_with_one_token_rotate_once() {
        let h = harness();
        registered(&h, "alice", "pw").await;
        let token = h.session.login("alice", "pw").await.unwrap().tokens.refresh_token;

        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let session = h.session.clone();
                let token = token.clone();
                tokio::spawn(async move { session.refresh(Some(&token)).await })
            })
            .collect();

        let mut successes = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => successes += 1,
                Err(err) => assert!(matches!(err, ApiError::TokenReuse), "{err:?}"),
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn logout_is_idempotent_and_kills_the_refresh_token() {
        let h = harness();
        let alice = registered(&h, "alice", "pw").await;
        let token = h.session.login("alice", "pw").await.unwrap().tokens.refresh_token;

        h.session.logout(alice.id).await.unwrap();
        h.session.logout(alice.id).await.unwrap();
        h.session.logout(Uuid::new_v4()).await.unwrap();

        assert!(matches!(
            h.session.refresh(Some(&token)).await,
            Err(ApiError::TokenReuse)
        ));
    }

    #[tokio::test]
    async fn refresh_input_failures() {
        let h = harness();
        assert!(matches!(
            h.session.refresh(None).await,
            Err(ApiError::Unauthorized)
        ));
        assert!(matches!(
            h.session.refresh(Some("  ")).await,
            Err(ApiError::Unauthorized)
        ));
        assert!(matches!(
            h.session.refresh(Some("garbage")).await,
            Err(ApiError::InvalidToken(TokenError::Invalid))
        ));

        registered(&h, "alice", "pw").await;
        let access = h.session.login("alice", "pw").await.unwrap().tokens.access_token;
        assert!(matches!(
            h.session.refresh(Some(&access)).await,
            Err(ApiError::InvalidToken(TokenError::Invalid))
        ));
    }

    #[tokio::test]
    async fn expired_refresh_token_gets_no_grace() {
        let h = harness();
        let alice = registered(&h, "alice", "pw").await;
        let expired = h
            .tokens
            .issue_at(
                TokenKind::Refresh,
                alice.id,
                Utc::now() - Duration::days(10) - Duration::seconds(5),
            )
            .unwrap();
        h.accounts
            .set_refresh_token(alice.id, Some(expired.clone()))
            .await
            .unwrap();
        assert!(matches!(
            h.session.refresh(Some(&expired)).await,
            Err(ApiError::InvalidToken(TokenError::Expired))
        ));
    }

    #[tokio::test]
    async fn refresh_for_unknown_account_is_invalid_and_mutates_nothing() {
        let h = harness();
        let alice = registered(&h, "alice", "pw").await;
        let live = h.session.login("alice", "pw").await.unwrap().tokens.refresh_token;

        let ghost = h.tokens.issue_refresh_token(Uuid::new_v4()).unwrap();
        let err = h.session.refresh(Some(&ghost)).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidToken(_)));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let stored = h.accounts.find_by_id(alice.id).await.unwrap().unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some(live.as_str()));
    }

    #[tokio::test]
    async fn change_password_requires_the_old_one() {
        let h = harness();
        let alice = registered(&h, "alice", "old-pw").await;

        let err = h
            .session
            .change_password(alice.id, "not-it", "new-pw")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidCredentials));

        h.session
            .change_password(alice.id, "old-pw", "new-pw")
            .await
            .unwrap();
        assert!(h.session.login("alice", "old-pw").await.is_err());
        assert!(h.session.login("alice", "new-pw").await.is_ok());

        let stored = h.accounts.find_by_id(alice.id).await.unwrap().unwrap();
        assert!(!stored.password_hash.contains("new-pw"));
    }

    #[tokio::test]
    async fn profile_updates() {
        let h = harness();
        let alice = registered(&h, "alice", "pw").await;
        registered(&h, "bob", "pw").await;

        let updated = h
            .session
            .update_details(alice.id, "Alice Liddell", "liddell@example.com")
            .await
            .unwrap();
        assert_eq!(updated.fullname, "Alice Liddell");
        assert!(matches!(
            h.session
                .update_details(alice.id, "Alice", "bob@example.com")
                .await,
            Err(ApiError::Conflict(_))
        ));

        let updated = h
            .session
            .update_avatar(alice.id, "https://media.example.com/new.png")
            .await
            .unwrap();
        assert_eq!(updated.avatar, "https://media.example.com/new.png");
        let updated = h
            .session
            .update_cover_image(alice.id, "https://media.example.com/cover.png")
            .await
            .unwrap();
        assert_eq!(updated.cover_image, "https://media.example.com/cover.png");
        assert!(matches!(
            h.session.update_avatar(alice.id, "").await,
            Err(ApiError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn watch_history_follows_recorded_views() {
        let h = harness();
        let alice = registered(&h, "alice", "pw").await;
        let first = h.videos.insert(sample_video(alice.id, "first")).await.unwrap();
        let second = h.videos.insert(sample_video(alice.id, "second")).await.unwrap();

        h.session.record_view(alice.id, first.id).await.unwrap();
        h.session.record_view(alice.id, second.id).await.unwrap();
        h.session.record_view(alice.id, first.id).await.unwrap();
        assert!(matches!(
            h.session.record_view(alice.id, Uuid::new_v4()).await,
            Err(ApiError::VideoNotFound)
        ));

        let history = h.session.watch_history(alice.id).await.unwrap();
        let ids: Vec<_> = history.iter().map(|v| v.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn foreign_drafts_stay_out_of_watch_history() {
        let h = harness();
        let alice = registered(&h, "alice", "pw").await;
        let bob = registered(&h, "bob", "pw").await;
        let draft = h.videos.insert(sample_video(alice.id, "secret")).await.unwrap();
        h.videos.toggle_publish(draft.id).await.unwrap();

        assert!(matches!(
            h.session.record_view(bob.id, draft.id).await,
            Err(ApiError::VideoNotFound)
        ));
        h.session.record_view(alice.id, draft.id).await.unwrap();
        assert_eq!(h.session.watch_history(alice.id).await.unwrap().len(), 1);

        // A video watched while public disappears once it is unpublished.
        let clip = h.videos.insert(sample_video(alice.id, "clip")).await.unwrap();
        h.session.record_view(bob.id, clip.id).await.unwrap();
        h.videos.toggle_publish(clip.id).await.unwrap();
        assert!(h.session.watch_history(bob.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn handles_cannot_look_like_contacts() {
        let h = harness();
        let err = h
            .session
            .register(registration("eve@example.com", "pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn refresh_token_for_a_vanished_account_is_not_handed_out() {
        let h = harness();
        let err = h
            .session
            .store_refresh_token(Uuid::new_v4(), "token")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound { .. }));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
