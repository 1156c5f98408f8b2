use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Filter condition of a subscription, e.g. `broadcaster_user_id`.
pub type Condition = BTreeMap<String, String>;

pub const WEBHOOK_TRANSPORT: &str = "webhook";

/// Provider-side status of a remote subscription record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Enabled,
    WebhookCallbackVerificationPending,
    WebhookCallbackVerificationFailed,
    NotificationFailuresExceeded,
    AuthorizationRevoked,
    UserRemoved,
    #[serde(other)]
    Unknown,
}

impl SubscriptionStatus {
    /// Statuses after which the provider will never deliver again.
    pub fn is_failed(self) -> bool {
        matches!(
            self,
            Self::WebhookCallbackVerificationFailed
                | Self::NotificationFailuresExceeded
                | Self::AuthorizationRevoked
                | Self::UserRemoved
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportData {
    pub method: String,
    #[serde(default)]
    pub callback: String,
}

/// The provider's bookkeeping entry for one subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSubscription {
    pub id: String,
    pub status: SubscriptionStatus,
    #[serde(rename = "type")]
    pub event_type: String,
    pub version: String,
    #[serde(default)]
    pub condition: Condition,
    pub transport: TransportData,
    pub created_at: DateTime<Utc>,
}

/// What to subscribe to: event type, version and filter condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionDescriptor {
    #[serde(rename = "type")]
    pub event_type: String,
    pub version: String,
    pub condition: Condition,
}

impl SubscriptionDescriptor {
    pub fn new(event_type: impl Into<String>, version: impl Into<String>, condition: Condition) -> Self {
        Self {
            event_type: event_type.into(),
            version: version.into(),
            condition,
        }
    }

    /// Stable routing id, used as the last path segment of the callback URL.
    ///
    /// Derived only from the descriptor so a restarted process maps its
    /// existing remote records back onto the same subscriptions.
    pub fn routing_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.event_type.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.version.as_bytes());
        // BTreeMap iterates in key order
        for (key, value) in &self.condition {
            hasher.update(b"\n");
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
        }
        hex::encode(&hasher.finalize()[..16])
    }
}

/// Transport block sent when creating a subscription.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookTransport {
    pub method: &'static str,
    pub callback: String,
    pub secret: String,
}

/// Body of the provider's create-subscription call.
#[derive(Debug, Clone, Serialize)]
pub struct CreateSubscriptionRequest {
    #[serde(flatten)]
    pub descriptor: SubscriptionDescriptor,
    pub transport: WebhookTransport,
}

/// Body of a `webhook_callback_verification` delivery.
#[derive(Debug, Clone, Deserialize)]
pub struct VerificationBody {
    #[serde(default)]
    pub subscription: Option<RemoteSubscription>,
    pub challenge: String,
}

/// Body of a `notification` delivery.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationBody {
    #[serde(default)]
    pub subscription: Option<RemoteSubscription>,
    pub event: serde_json::Value,
}
