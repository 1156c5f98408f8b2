//! Typed payloads of the `event` object in notification deliveries.

use chrono::{DateTime, Utc};
use serde::Deserialize;

pub const STREAM_ONLINE: &str = "stream.online";
pub const STREAM_OFFLINE: &str = "stream.offline";
pub const CHANNEL_UPDATE: &str = "channel.update";
pub const CHANNEL_FOLLOW: &str = "channel.follow";
pub const CHANNEL_SUBSCRIBE: &str = "channel.subscribe";
pub const CHANNEL_CHEER: &str = "channel.cheer";
pub const CHANNEL_BAN: &str = "channel.ban";
pub const CHANNEL_UNBAN: &str = "channel.unban";
pub const CHANNEL_REWARD_ADD: &str = "channel.channel_points_custom_reward.add";
pub const CHANNEL_REWARD_UPDATE: &str = "channel.channel_points_custom_reward.update";
pub const CHANNEL_REWARD_REMOVE: &str = "channel.channel_points_custom_reward.remove";
pub const CHANNEL_REDEMPTION_ADD: &str = "channel.channel_points_custom_reward_redemption.add";
pub const CHANNEL_REDEMPTION_UPDATE: &str = "channel.channel_points_custom_reward_redemption.update";
pub const CHANNEL_HYPE_TRAIN_BEGIN: &str = "channel.hype_train.begin";
pub const CHANNEL_HYPE_TRAIN_PROGRESS: &str = "channel.hype_train.progress";
pub const CHANNEL_HYPE_TRAIN_END: &str = "channel.hype_train.end";
pub const USER_AUTHORIZATION_REVOKE: &str = "user.authorization.revoke";
pub const USER_UPDATE: &str = "user.update";

#[derive(Debug, Clone, Deserialize)]
pub struct StreamOnlineEvent {
    #[serde(default)]
    pub id: Option<String>,
    pub broadcaster_user_id: String,
    pub broadcaster_user_login: String,
    pub broadcaster_user_name: String,
    /// "live", "playlist", "watch_party", "premiere" or "rerun".
    #[serde(rename = "type")]
    pub stream_type: String,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamOfflineEvent {
    pub broadcaster_user_id: String,
    pub broadcaster_user_login: String,
    pub broadcaster_user_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelUpdateEvent {
    pub broadcaster_user_id: String,
    pub broadcaster_user_login: String,
    pub broadcaster_user_name: String,
    pub title: String,
    pub language: String,
    pub category_id: String,
    pub category_name: String,
    pub is_mature: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelFollowEvent {
    pub user_id: String,
    pub user_login: String,
    pub user_name: String,
    pub broadcaster_user_id: String,
    pub broadcaster_user_login: String,
    pub broadcaster_user_name: String,
    #[serde(default)]
    pub followed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelSubscriptionEvent {
    pub user_id: String,
    pub user_login: String,
    pub user_name: String,
    pub broadcaster_user_id: String,
    pub broadcaster_user_login: String,
    pub broadcaster_user_name: String,
    /// "1000", "2000" or "3000".
    pub tier: String,
    #[serde(default)]
    pub is_gift: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelCheerEvent {
    pub is_anonymous: bool,
    /// Absent for anonymous cheers.
    pub user_id: Option<String>,
    pub user_login: Option<String>,
    pub user_name: Option<String>,
    pub broadcaster_user_id: String,
    pub broadcaster_user_login: String,
    pub broadcaster_user_name: String,
    pub message: String,
    pub bits: u64,
}

/// Shared shape of `channel.ban` and `channel.unban`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelModerationEvent {
    pub user_id: String,
    pub user_login: String,
    pub user_name: String,
    pub broadcaster_user_id: String,
    pub broadcaster_user_login: String,
    pub broadcaster_user_name: String,
}

pub type ChannelBanEvent = ChannelModerationEvent;
pub type ChannelUnbanEvent = ChannelModerationEvent;

#[derive(Debug, Clone, Deserialize)]
pub struct RewardImage {
    pub url_1x: String,
    pub url_2x: String,
    pub url_4x: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RewardLimit {
    pub is_enabled: bool,
    pub value: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RewardCooldown {
    pub is_enabled: bool,
    pub seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelRewardEvent {
    pub id: String,
    pub broadcaster_user_id: String,
    pub broadcaster_user_login: String,
    pub broadcaster_user_name: String,
    pub is_enabled: bool,
    pub is_paused: bool,
    pub is_in_stock: bool,
    pub title: String,
    pub cost: u64,
    pub prompt: String,
    pub is_user_input_required: bool,
    pub should_redemptions_skip_request_queue: bool,
    pub background_color: String,
    pub image: Option<RewardImage>,
    pub default_image: RewardImage,
    pub max_per_stream: RewardLimit,
    pub max_per_user_per_stream: RewardLimit,
    pub global_cooldown: RewardCooldown,
    pub cooldown_expires_at: Option<DateTime<Utc>>,
    pub redemptions_redeemed_current_stream: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedeemedReward {
    pub id: String,
    pub title: String,
    pub cost: u64,
    pub prompt: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedemptionStatus {
    Unfulfilled,
    Unknown,
    Fulfilled,
    Canceled,
}

/// Shared shape of redemption add and update events.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelRedemptionEvent {
    pub id: String,
    pub broadcaster_user_id: String,
    pub broadcaster_user_login: String,
    pub broadcaster_user_name: String,
    pub user_id: String,
    pub user_login: String,
    pub user_name: String,
    #[serde(default)]
    pub user_input: String,
    pub status: RedemptionStatus,
    pub reward: RedeemedReward,
    pub redeemed_at: DateTime<Utc>,
}

pub type ChannelRedemptionAddEvent = ChannelRedemptionEvent;
pub type ChannelRedemptionUpdateEvent = ChannelRedemptionEvent;

#[derive(Debug, Clone, Deserialize)]
pub struct HypeTrainContribution {
    pub user_id: String,
    pub user_login: String,
    pub user_name: String,
    /// "bits" or "subscription".
    #[serde(rename = "type")]
    pub contribution_type: String,
    pub total: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelHypeTrainBeginEvent {
    pub broadcaster_user_id: String,
    pub broadcaster_user_login: String,
    pub broadcaster_user_name: String,
    pub total: u64,
    pub progress: u64,
    pub goal: u64,
    #[serde(default)]
    pub top_contributions: Vec<HypeTrainContribution>,
    pub last_contribution: HypeTrainContribution,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelHypeTrainProgressEvent {
    pub broadcaster_user_id: String,
    pub broadcaster_user_login: String,
    pub broadcaster_user_name: String,
    pub level: u32,
    pub total: u64,
    pub progress: u64,
    pub goal: u64,
    #[serde(default)]
    pub top_contributions: Vec<HypeTrainContribution>,
    pub last_contribution: HypeTrainContribution,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelHypeTrainEndEvent {
    pub broadcaster_user_id: String,
    pub broadcaster_user_login: String,
    pub broadcaster_user_name: String,
    pub level: u32,
    pub total: u64,
    #[serde(default)]
    pub top_contributions: Vec<HypeTrainContribution>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub cooldown_ends_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserAuthorizationRevokeEvent {
    pub client_id: String,
    pub user_id: String,
    /// Null if the user no longer exists.
    pub user_login: Option<String>,
    pub user_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserUpdateEvent {
    pub user_id: String,
    pub user_login: String,
    pub user_name: String,
    /// Only present with the `user:read:email` scope.
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub description: String,
}
