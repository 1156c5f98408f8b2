use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::subscription::Subscription;
use crate::types::{RemoteSubscription, SubscriptionStatus};

/// Routing table and remote snapshot, shared between the HTTP handlers
/// and the listener's lifecycle operations.
pub type SharedRegistry = Arc<RwLock<SubscriptionRegistry>>;

/// Local subscriptions keyed by routing id, plus the last known remote
/// record for each id.
#[derive(Default)]
pub struct SubscriptionRegistry {
    subscriptions: HashMap<String, Arc<Subscription>>,
    remote: HashMap<String, RemoteSubscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Subscription>> {
        self.subscriptions.get(id).cloned()
    }

    /// Insert a subscription. Returns `false` and leaves the table untouched
    /// if the id is already routed.
    pub fn insert(&mut self, subscription: Arc<Subscription>) -> bool {
        let id = subscription.id().to_string();
        if self.subscriptions.contains_key(&id) {
            return false;
        }
        self.subscriptions.insert(id, subscription);
        true
    }

    /// Remove a subscription and its remote record.
    pub fn remove(&mut self, id: &str) -> Option<Arc<Subscription>> {
        self.remote.remove(id);
        self.subscriptions.remove(id)
    }

    pub fn list(&self) -> Vec<Arc<Subscription>> {
        self.subscriptions.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn remote(&self, id: &str) -> Option<RemoteSubscription> {
        self.remote.get(id).cloned()
    }

    pub fn set_remote(&mut self, id: &str, record: RemoteSubscription) {
        self.remote.insert(id.to_string(), record);
    }

    /// Store `record` for `subscription` only while that exact subscription
    /// is still routed. Returns whether the record was stored.
    pub fn set_remote_if_routed(&mut self, subscription: &Subscription, record: RemoteSubscription) -> bool {
        let routed = self
            .subscriptions
            .get(subscription.id())
            .is_some_and(|s| std::ptr::eq(Arc::as_ptr(s), subscription));
        if routed {
            self.remote.insert(subscription.id().to_string(), record);
        }
        routed
    }

    /// Replace the whole snapshot after a fresh listing.
    pub fn replace_remote(&mut self, snapshot: HashMap<String, RemoteSubscription>) {
        self.remote = snapshot;
    }

    /// Best-effort cache update after a successful challenge.
    pub fn mark_remote_enabled(&mut self, id: &str) {
        if let Some(record) = self.remote.get_mut(id) {
            record.status = SubscriptionStatus::Enabled;
        }
    }

    /// Drop every subscription and remote record.
    pub fn clear(&mut self) -> Vec<Arc<Subscription>> {
        self.remote.clear();
        self.subscriptions.drain().map(|(_, s)| s).collect()
    }
}
