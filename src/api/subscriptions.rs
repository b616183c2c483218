use axum::{
    Extension,
    extract::{Path, State},
};

use super::{ApiResponse, AppState, parse_id};
use crate::error::{ApiError, ApiResult};
use crate::gate::CurrentAccount;
use crate::subscription::{ChannelSummary, SubscriptionState};

pub async fn toggle_subscription(
    State(state): State<AppState>,
    Extension(CurrentAccount(account)): Extension<CurrentAccount>,
    Path(channel_id): Path<String>,
) -> ApiResult<ApiResponse<SubscriptionState>> {
    let channel_id = parse_id(&channel_id, "channel")?;
    if channel_id == account.id {
        return Err(ApiError::validation("You cannot subscribe to your own channel"));
    }
    if state.accounts.find_by_id(channel_id).await?.is_none() {
        return Err(ApiError::user_not_found());
    }
    let subscription = state.subscriptions.toggle(account.id, channel_id).await?;
    let message = if subscription.subscribed {
        "Subscribed successfully"
    } else {
        "Unsubscribed successfully"
    };
    Ok(ApiResponse::ok(subscription, message))
}

pub async fn channel_subscribers(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
) -> ApiResult<ApiResponse<Vec<ChannelSummary>>> {
    let channel_id = parse_id(&channel_id, "channel")?;
    let subscribers = state.subscriptions.subscribers(channel_id).await?;
    Ok(ApiResponse::ok(
        subscribers,
        "Subscribers fetched successfully",
    ))
}

pub async fn subscribed_channels(
    State(state): State<AppState>,
    Path(subscriber_id): Path<String>,
) -> ApiResult<ApiResponse<Vec<ChannelSummary>>> {
    let subscriber_id = parse_id(&subscriber_id, "subscriber")?;
    let channels = state.subscriptions.subscribed_channels(subscriber_id).await?;
    Ok(ApiResponse::ok(
        channels,
        "Subscribed channels fetched successfully",
    ))
}
