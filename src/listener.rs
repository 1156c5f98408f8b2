//! The listener: owns the routing table, drives reconciliation against the
//! provider and, depending on the adapter, its own HTTP server.

use axum::Router;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::adapter::ConnectionAdapter;
use crate::api::{EventSubApi, TokenType};
use crate::error::{EventSubError, Result};
use crate::events::{self, *};
use crate::http_server::{self, ServerHandle, WebhookState};
use crate::store::{SharedRegistry, SubscriptionRegistry};
use crate::subscription::Subscription;
use crate::types::{Condition, RemoteSubscription, SubscriptionDescriptor, WEBHOOK_TRANSPORT};

const MIN_SECRET_LEN: usize = 10;
const MAX_SECRET_LEN: usize = 100;
const HTTPS_PORT: u16 = 443;
const EVENT_VERSION: &str = "1";

/// Per-subscription outcome of a fan-out over all subscriptions.
#[derive(Debug, Default)]
pub struct LifecycleReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, EventSubError)>,
}

impl LifecycleReport {
    fn collect(operation: &str, results: Vec<(String, Result<()>)>) -> Self {
        let mut report = Self::default();
        for (id, result) in results {
            match result {
                Ok(()) => report.succeeded.push(id),
                Err(e) => {
                    warn!(id = %id, error = %e, "{operation} failed");
                    report.failed.push((id, e));
                }
            }
        }
        report
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// The succeeded ids, or [`EventSubError::Lifecycle`] naming every failure.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.failed.is_empty() {
            return Ok(self.succeeded);
        }
        Err(EventSubError::Lifecycle {
            failed: self
                .failed
                .into_iter()
                .map(|(id, e)| format!("{id}: {e}"))
                .collect(),
        })
    }
}

/// Receives EventSub deliveries and keeps the provider's registry in line
/// with the subscriptions made through it.
pub struct EventSubListener {
    api: Arc<dyn EventSubApi>,
    adapter: Arc<dyn ConnectionAdapter>,
    secret: Arc<str>,
    registry: SharedRegistry,
    server: tokio::sync::Mutex<Option<ServerHandle>>,
    bound_port: parking_lot::Mutex<Option<u16>>,
}

impl EventSubListener {
    pub fn new(
        api: Arc<dyn EventSubApi>,
        adapter: Arc<dyn ConnectionAdapter>,
        secret: impl Into<String>,
    ) -> Result<Self> {
        if api.token_type() != TokenType::App {
            return Err(EventSubError::InvalidTokenType);
        }
        let secret = secret.into();
        let len = secret.chars().count();
        if !(MIN_SECRET_LEN..=MAX_SECRET_LEN).contains(&len) {
            return Err(EventSubError::InvalidSecret(len));
        }

        Ok(Self {
            api,
            adapter,
            secret: Arc::from(secret),
            registry: Arc::new(RwLock::new(SubscriptionRegistry::new())),
            server: tokio::sync::Mutex::new(None),
            bound_port: parking_lot::Mutex::new(None),
        })
    }

    fn webhook_state(&self) -> WebhookState {
        WebhookState {
            registry: self.registry.clone(),
            secret: self.secret.clone(),
        }
    }

    pub fn is_listening(&self) -> bool {
        self.bound_port.lock().is_some()
    }

    /// Port the owned server is bound to, while listening.
    pub fn port(&self) -> Option<u16> {
        *self.bound_port.lock()
    }

    pub async fn subscriptions(&self) -> Vec<Arc<Subscription>> {
        self.registry.read().await.list()
    }

    /// Callback URL for the subscription with routing id `id`.
    pub async fn build_hook_url(&self, id: &str) -> Result<String> {
        let host = self.adapter.host_name().await;
        let port = match self.adapter.external_port().await {
            Some(port) => port,
            None => self.port().ok_or(EventSubError::ImplicitPortNotListening)?,
        };
        let host_portion = if port == HTTPS_PORT {
            host
        } else {
            format!("{host}:{port}")
        };
        let prefix = self
            .adapter
            .path_prefix()
            .map(|p| format!("{p}/"))
            .unwrap_or_default();

        Ok(format!("https://{host_portion}/{prefix}{id}"))
    }

    // Serving

    /// The delivery route, for mounting into a caller-owned axum app.
    pub fn router(&self) -> Router {
        http_server::build_router(self.webhook_state(), self.adapter.path_prefix())
    }

    pub fn apply_middleware(&self, app: Router) -> Router {
        app.merge(self.router())
    }

    /// Bind the adapter's server, then reconcile with the provider.
    ///
    /// Port precedence is the adapter's listener port, then `port`, then 443.
    pub async fn listen(&self, port: Option<u16>) -> Result<LifecycleReport> {
        let spec = self
            .adapter
            .create_http_server()
            .ok_or(EventSubError::ServerNotOwned)?;
        let mut server = self.server.lock().await;
        if server.is_some() {
            return Err(EventSubError::AlreadyListening);
        }

        let port = resolve_listen_port(self.adapter.listener_port().await, port);

        let handle =
            http_server::start(self.webhook_state(), self.adapter.path_prefix(), &spec, port).await?;
        *self.bound_port.lock() = Some(handle.port());
        info!(port = handle.port(), "listening for EventSub deliveries");

        match self.reconcile().await {
            Ok(report) => {
                *server = Some(handle);
                Ok(report)
            }
            Err(e) => {
                *self.bound_port.lock() = None;
                handle.shutdown().await;
                Err(e)
            }
        }
    }

    /// Suspend every subscription, clear the routing table and stop the server.
    pub async fn unlisten(&self) -> Result<LifecycleReport> {
        if self.adapter.create_http_server().is_none() {
            return Err(EventSubError::ServerNotOwned);
        }
        let mut server = self.server.lock().await;
        let handle = server.take().ok_or(EventSubError::NotListening)?;

        let subscriptions = self.registry.write().await.clear();
        let api = self.api.as_ref();
        let results = join_all(subscriptions.iter().map(|sub| async move {
            (sub.id().to_string(), sub.suspend(api).await)
        }))
        .await;

        handle.shutdown().await;
        *self.bound_port.lock() = None;
        info!("stopped listening");

        Ok(LifecycleReport::collect("suspend", results))
    }

    // Reconciliation

    /// Match the provider's records to local subscriptions and start all of
    /// them.
    ///
    /// Only `webhook` records whose callback points at this listener are
    /// considered; they are keyed by the trailing routing id.
    pub async fn reconcile(&self) -> Result<LifecycleReport> {
        let url_prefix = self.build_hook_url("").await?;
        let records = self.api.get_subscriptions().await?;
        let total = records.len();

        let snapshot: HashMap<String, RemoteSubscription> = records
            .into_iter()
            .filter(|r| r.transport.method == WEBHOOK_TRANSPORT)
            .filter_map(|r| {
                let id = r.transport.callback.strip_prefix(&url_prefix)?.to_string();
                Some((id, r))
            })
            .collect();
        debug!(total, matched = snapshot.len(), "matched remote subscriptions to this listener");

        let subscriptions = {
            let mut registry = self.registry.write().await;
            registry.replace_remote(snapshot.clone());
            registry.list()
        };

        let results = join_all(subscriptions.iter().map(|sub| {
            let matching = snapshot.get(sub.id()).cloned();
            async move {
                let result = self.start_subscription(sub, matching).await;
                (sub.id().to_string(), result)
            }
        }))
        .await;

        Ok(LifecycleReport::collect("start", results))
    }

    async fn start_subscription(
        &self,
        subscription: &Subscription,
        matching: Option<RemoteSubscription>,
    ) -> Result<()> {
        let callback = self.build_hook_url(subscription.id()).await?;
        let record = subscription
            .start(self.api.as_ref(), &callback, &self.secret, matching)
            .await?;
        // An unsubscribe may have raced this start.
        if !self
            .registry
            .write()
            .await
            .set_remote_if_routed(subscription, record)
        {
            debug!(id = %subscription.id(), "subscription removed while starting");
        }
        Ok(())
    }

    // Subscribing

    /// Register interest in `descriptor`, decoding each event as `E`.
    ///
    /// The subscription is routable as soon as this returns. If no callback
    /// URL can be built yet, remote registration happens on `listen`.
    pub async fn subscribe<E, F>(
        &self,
        descriptor: SubscriptionDescriptor,
        handler: F,
    ) -> Result<Arc<Subscription>>
    where
        E: DeserializeOwned + 'static,
        F: Fn(E) + Send + Sync + 'static,
    {
        let subscription = Arc::new(Subscription::new(descriptor, handler));
        let id = subscription.id().to_string();
        let matching = {
            let mut registry = self.registry.write().await;
            if !registry.insert(subscription.clone()) {
                return Err(EventSubError::AlreadySubscribed(id));
            }
            registry.remote(&id)
        };

        match self.start_subscription(&subscription, matching).await {
            Ok(()) => Ok(subscription),
            Err(EventSubError::ImplicitPortNotListening) => {
                debug!(id = %id, "callback URL not known yet, registration deferred");
                Ok(subscription)
            }
            Err(e) => {
                self.registry.write().await.remove(&id);
                Err(e)
            }
        }
    }

    /// Delete the remote record and stop routing deliveries to `subscription`.
    pub async fn unsubscribe(&self, subscription: &Arc<Subscription>) -> Result<()> {
        subscription.suspend(self.api.as_ref()).await?;

        let mut registry = self.registry.write().await;
        if registry
            .get(subscription.id())
            .is_some_and(|routed| Arc::ptr_eq(&routed, subscription))
        {
            registry.remove(subscription.id());
        }
        debug!(id = %subscription.id(), "unsubscribed");
        Ok(())
    }

    async fn subscribe_for_broadcaster<E, F>(
        &self,
        event_type: &str,
        user_id: &str,
        reward_id: Option<&str>,
        handler: F,
    ) -> Result<Arc<Subscription>>
    where
        E: DeserializeOwned + 'static,
        F: Fn(E) + Send + Sync + 'static,
    {
        warn_if_not_numeric(event_type, user_id);
        let mut condition = Condition::from([("broadcaster_user_id".to_string(), user_id.to_string())]);
        if let Some(reward_id) = reward_id {
            condition.insert("reward_id".to_string(), reward_id.to_string());
        }
        self.subscribe(SubscriptionDescriptor::new(event_type, EVENT_VERSION, condition), handler)
            .await
    }

    pub async fn subscribe_to_stream_online_events<F>(&self, user_id: &str, handler: F) -> Result<Arc<Subscription>>
    where
        F: Fn(StreamOnlineEvent) + Send + Sync + 'static,
    {
        self.subscribe_for_broadcaster(events::STREAM_ONLINE, user_id, None, handler)
            .await
    }

    pub async fn subscribe_to_stream_offline_events<F>(&self, user_id: &str, handler: F) -> Result<Arc<Subscription>>
    where
        F: Fn(StreamOfflineEvent) + Send + Sync + 'static,
    {
        self.subscribe_for_broadcaster(events::STREAM_OFFLINE, user_id, None, handler)
            .await
    }

    pub async fn subscribe_to_channel_update_events<F>(&self, user_id: &str, handler: F) -> Result<Arc<Subscription>>
    where
        F: Fn(ChannelUpdateEvent) + Send + Sync + 'static,
    {
        self.subscribe_for_broadcaster(events::CHANNEL_UPDATE, user_id, None, handler)
            .await
    }

    pub async fn subscribe_to_channel_follow_events<F>(&self, user_id: &str, handler: F) -> Result<Arc<Subscription>>
    where
        F: Fn(ChannelFollowEvent) + Send + Sync + 'static,
    {
        self.subscribe_for_broadcaster(events::CHANNEL_FOLLOW, user_id, None, handler)
            .await
    }

    pub async fn subscribe_to_channel_subscription_events<F>(
        &self,
        user_id: &str,
        handler: F,
    ) -> Result<Arc<Subscription>>
    where
        F: Fn(ChannelSubscriptionEvent) + Send + Sync + 'static,
    {
        self.subscribe_for_broadcaster(events::CHANNEL_SUBSCRIBE, user_id, None, handler)
            .await
    }

    pub async fn subscribe_to_channel_cheer_events<F>(&self, user_id: &str, handler: F) -> Result<Arc<Subscription>>
    where
        F: Fn(ChannelCheerEvent) + Send + Sync + 'static,
    {
        self.subscribe_for_broadcaster(events::CHANNEL_CHEER, user_id, None, handler)
            .await
    }

    pub async fn subscribe_to_channel_ban_events<F>(&self, user_id: &str, handler: F) -> Result<Arc<Subscription>>
    where
        F: Fn(ChannelBanEvent) + Send + Sync + 'static,
    {
        self.subscribe_for_broadcaster(events::CHANNEL_BAN, user_id, None, handler)
            .await
    }

    pub async fn subscribe_to_channel_unban_events<F>(&self, user_id: &str, handler: F) -> Result<Arc<Subscription>>
    where
        F: Fn(ChannelUnbanEvent) + Send + Sync + 'static,
    {
        self.subscribe_for_broadcaster(events::CHANNEL_UNBAN, user_id, None, handler)
            .await
    }

    pub async fn subscribe_to_channel_reward_add_events<F>(&self, user_id: &str, handler: F) -> Result<Arc<Subscription>>
    where
        F: Fn(ChannelRewardEvent) + Send + Sync + 'static,
    {
        self.subscribe_for_broadcaster(events::CHANNEL_REWARD_ADD, user_id, None, handler)
            .await
    }

    pub async fn subscribe_to_channel_reward_update_events<F>(
        &self,
        user_id: &str,
        handler: F,
    ) -> Result<Arc<Subscription>>
    where
        F: Fn(ChannelRewardEvent) + Send + Sync + 'static,
    {
        self.subscribe_for_broadcaster(events::CHANNEL_REWARD_UPDATE, user_id, None, handler)
            .await
    }

    pub async fn subscribe_to_channel_reward_update_events_for_reward<F>(
        &self,
        user_id: &str,
        reward_id: &str,
        handler: F,
    ) -> Result<Arc<Subscription>>
    where
        F: Fn(ChannelRewardEvent) + Send + Sync + 'static,
    {
        self.subscribe_for_broadcaster(events::CHANNEL_REWARD_UPDATE, user_id, Some(reward_id), handler)
            .await
    }

    pub async fn subscribe_to_channel_reward_remove_events<F>(
        &self,
        user_id: &str,
        handler: F,
    ) -> Result<Arc<Subscription>>
    where
        F: Fn(ChannelRewardEvent) + Send + Sync + 'static,
    {
        self.subscribe_for_broadcaster(events::CHANNEL_REWARD_REMOVE, user_id, None, handler)
            .await
    }

    pub async fn subscribe_to_channel_reward_remove_events_for_reward<F>(
        &self,
        user_id: &str,
        reward_id: &str,
        handler: F,
    ) -> Result<Arc<Subscription>>
    where
        F: Fn(ChannelRewardEvent) + Send + Sync + 'static,
    {
        self.subscribe_for_broadcaster(events::CHANNEL_REWARD_REMOVE, user_id, Some(reward_id), handler)
            .await
    }

    pub async fn subscribe_to_channel_redemption_add_events<F>(
        &self,
        user_id: &str,
        handler: F,
    ) -> Result<Arc<Subscription>>
    where
        F: Fn(ChannelRedemptionAddEvent) + Send + Sync + 'static,
    {
        self.subscribe_for_broadcaster(events::CHANNEL_REDEMPTION_ADD, user_id, None, handler)
            .await
    }

    pub async fn subscribe_to_channel_redemption_add_events_for_reward<F>(
        &self,
        user_id: &str,
        reward_id: &str,
        handler: F,
    ) -> Result<Arc<Subscription>>
    where
        F: Fn(ChannelRedemptionAddEvent) + Send + Sync + 'static,
    {
        self.subscribe_for_broadcaster(events::CHANNEL_REDEMPTION_ADD, user_id, Some(reward_id), handler)
            .await
    }

    pub async fn subscribe_to_channel_redemption_update_events<F>(
        &self,
        user_id: &str,
        handler: F,
    ) -> Result<Arc<Subscription>>
    where
        F: Fn(ChannelRedemptionUpdateEvent) + Send + Sync + 'static,
    {
        self.subscribe_for_broadcaster(events::CHANNEL_REDEMPTION_UPDATE, user_id, None, handler)
            .await
    }

    pub async fn subscribe_to_channel_redemption_update_events_for_reward<F>(
        &self,
        user_id: &str,
        reward_id: &str,
        handler: F,
    ) -> Result<Arc<Subscription>>
    where
        F: Fn(ChannelRedemptionUpdateEvent) + Send + Sync + 'static,
    {
        self.subscribe_for_broadcaster(events::CHANNEL_REDEMPTION_UPDATE, user_id, Some(reward_id), handler)
            .await
    }

    pub async fn subscribe_to_channel_hype_train_begin_events<F>(
        &self,
        user_id: &str,
        handler: F,
    ) -> Result<Arc<Subscription>>
    where
        F: Fn(ChannelHypeTrainBeginEvent) + Send + Sync + 'static,
    {
        self.subscribe_for_broadcaster(events::CHANNEL_HYPE_TRAIN_BEGIN, user_id, None, handler)
            .await
    }

    pub async fn subscribe_to_channel_hype_train_progress_events<F>(
        &self,
        user_id: &str,
        handler: F,
    ) -> Result<Arc<Subscription>>
    where
        F: Fn(ChannelHypeTrainProgressEvent) + Send + Sync + 'static,
    {
        self.subscribe_for_broadcaster(events::CHANNEL_HYPE_TRAIN_PROGRESS, user_id, None, handler)
            .await
    }

    pub async fn subscribe_to_channel_hype_train_end_events<F>(
        &self,
        user_id: &str,
        handler: F,
    ) -> Result<Arc<Subscription>>
    where
        F: Fn(ChannelHypeTrainEndEvent) + Send + Sync + 'static,
    {
        self.subscribe_for_broadcaster(events::CHANNEL_HYPE_TRAIN_END, user_id, None, handler)
            .await
    }

    /// Fires when a user revokes authorization for the application `client_id`.
    pub async fn subscribe_to_user_authorization_revoke_events<F>(
        &self,
        client_id: &str,
        handler: F,
    ) -> Result<Arc<Subscription>>
    where
        F: Fn(UserAuthorizationRevokeEvent) + Send + Sync + 'static,
    {
        let condition = Condition::from([("client_id".to_string(), client_id.to_string())]);
        self.subscribe(
            SubscriptionDescriptor::new(events::USER_AUTHORIZATION_REVOKE, EVENT_VERSION, condition),
            handler,
        )
        .await
    }

    pub async fn subscribe_to_user_update_events<F>(&self, user_id: &str, handler: F) -> Result<Arc<Subscription>>
    where
        F: Fn(UserUpdateEvent) + Send + Sync + 'static,
    {
        warn_if_not_numeric(events::USER_UPDATE, user_id);
        let condition = Condition::from([("user_id".to_string(), user_id.to_string())]);
        self.subscribe(
            SubscriptionDescriptor::new(events::USER_UPDATE, EVENT_VERSION, condition),
            handler,
        )
        .await
    }
}

impl std::fmt::Debug for EventSubListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSubListener")
            .field("port", &self.port())
            .finish_non_exhaustive()
    }
}

/// Adapter-forced port, then the caller's, then 443.
fn resolve_listen_port(adapter_port: Option<u16>, requested: Option<u16>) -> u16 {
    if let (Some(forced), Some(requested)) = (adapter_port, requested) {
        warn!(
            requested,
            port = forced,
            "passed port is ignored because the adapter overrides it"
        );
    }
    adapter_port.or(requested).unwrap_or(HTTPS_PORT)
}

fn warn_if_not_numeric(event_type: &str, user_id: &str) {
    if user_id.is_empty() || !user_id.bytes().all(|b| b.is_ascii_digit()) {
        warn!(
            event_type,
            user_id,
            "user id is not numeric; you might be passing a user name instead of an id"
        );
    }
}
