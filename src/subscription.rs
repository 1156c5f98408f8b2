//! One registered interest in an event kind, and its lifecycle.
//!
//! ```text
//! Created -> Registering -> Verified -> Suspended
//!                  \-> Failed
//! ```

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, warn};

use crate::api::EventSubApi;
use crate::error::{EventSubError, Result};
use crate::types::{
    CreateSubscriptionRequest, RemoteSubscription, SubscriptionDescriptor, SubscriptionStatus,
    WebhookTransport, WEBHOOK_TRANSPORT,
};

/// Decodes an `event` payload and hands it to the user's handler.
type DataHandler = Box<dyn Fn(serde_json::Value) -> serde_json::Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Created,
    /// Registered remotely, waiting for the verification challenge.
    Registering,
    Verified,
    Failed,
    Suspended,
}

struct Inner {
    state: SubscriptionState,
    remote: Option<RemoteSubscription>,
}

pub struct Subscription {
    id: String,
    descriptor: SubscriptionDescriptor,
    inner: Mutex<Inner>,
    handler: DataHandler,
}

impl Subscription {
    pub(crate) fn new<E, F>(descriptor: SubscriptionDescriptor, handler: F) -> Self
    where
        E: DeserializeOwned + 'static,
        F: Fn(E) + Send + Sync + 'static,
    {
        let handler: DataHandler = Box::new(move |payload| {
            let event: E = serde_json::from_value(payload)?;
            handler(event);
            Ok(())
        });

        Self {
            id: descriptor.routing_id(),
            descriptor,
            inner: Mutex::new(Inner {
                state: SubscriptionState::Created,
                remote: None,
            }),
            handler,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn descriptor(&self) -> &SubscriptionDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> SubscriptionState {
        self.inner.lock().state
    }

    pub fn is_verified(&self) -> bool {
        self.state() == SubscriptionState::Verified
    }

    /// Id the provider assigned to the remote record, once registered.
    pub fn remote_id(&self) -> Option<String> {
        self.inner.lock().remote.as_ref().map(|r| r.id.clone())
    }

    fn invalid_state(&self, state: SubscriptionState, expected: SubscriptionState) -> EventSubError {
        EventSubError::InvalidState {
            id: self.id.clone(),
            state,
            expected,
        }
    }

    /// Bring the subscription up, reusing `matching` when the provider
    /// already has a live record for it.
    ///
    /// `matching` is taken as authoritative: without it any record held from
    /// an earlier start is dropped and a new one is registered.
    ///
    /// Returns the remote record the subscription holds afterwards.
    pub(crate) async fn start(
        &self,
        api: &dyn EventSubApi,
        callback: &str,
        secret: &str,
        matching: Option<RemoteSubscription>,
    ) -> Result<RemoteSubscription> {
        {
            let inner = self.inner.lock();
            if inner.state == SubscriptionState::Suspended {
                return Err(self.invalid_state(inner.state, SubscriptionState::Created));
            }
        }

        match matching {
            Some(record) if !record.status.is_failed() => {
                let mut inner = self.inner.lock();
                if record.status == SubscriptionStatus::Enabled {
                    inner.state = SubscriptionState::Verified;
                    debug!(id = %self.id, remote_id = %record.id, "adopted enabled remote subscription");
                } else if inner.state != SubscriptionState::Verified {
                    inner.state = SubscriptionState::Registering;
                    debug!(id = %self.id, remote_id = %record.id, status = ?record.status, "adopted pending remote subscription");
                }
                inner.remote = Some(record.clone());
                return Ok(record);
            }
            Some(stale) => {
                warn!(
                    id = %self.id,
                    remote_id = %stale.id,
                    status = ?stale.status,
                    "remote subscription is dead, registering a new one"
                );
                if let Err(e) = api.delete_subscription(&stale.id).await {
                    warn!(id = %self.id, remote_id = %stale.id, error = %e, "failed to delete dead remote subscription");
                }
                self.inner.lock().remote = None;
            }
            None => {
                // The provider no longer lists the record we hold.
                if let Some(gone) = self.inner.lock().remote.take() {
                    warn!(id = %self.id, remote_id = %gone.id, "remote subscription vanished, registering a new one");
                }
            }
        }

        self.inner.lock().state = SubscriptionState::Registering;
        let request = CreateSubscriptionRequest {
            descriptor: self.descriptor.clone(),
            transport: WebhookTransport {
                method: WEBHOOK_TRANSPORT,
                callback: callback.to_string(),
                secret: secret.to_string(),
            },
        };

        match api.create_subscription(&request).await {
            Ok(mut record) => {
                let mut inner = self.inner.lock();
                // The challenge can arrive before the create call returns.
                if inner.state == SubscriptionState::Verified || record.status == SubscriptionStatus::Enabled {
                    inner.state = SubscriptionState::Verified;
                    record.status = SubscriptionStatus::Enabled;
                }
                inner.remote = Some(record.clone());
                debug!(
                    id = %self.id,
                    remote_id = %record.id,
                    event_type = %self.descriptor.event_type,
                    "registered remote subscription"
                );
                Ok(record)
            }
            Err(e) => {
                self.inner.lock().state = SubscriptionState::Failed;
                Err(e.into())
            }
        }
    }

    /// Mark the verification handshake as completed.
    pub(crate) fn verify(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            SubscriptionState::Registering | SubscriptionState::Verified => {
                inner.state = SubscriptionState::Verified;
                if let Some(remote) = inner.remote.as_mut() {
                    remote.status = SubscriptionStatus::Enabled;
                }
                Ok(())
            }
            state => Err(self.invalid_state(state, SubscriptionState::Registering)),
        }
    }

    /// Decode `payload` and run the handler on it.
    ///
    /// Handler panics are caught and returned as [`EventSubError::HandlerPanicked`].
    pub(crate) fn handle_data(&self, payload: serde_json::Value) -> Result<()> {
        let state = self.state();
        if state != SubscriptionState::Verified {
            return Err(self.invalid_state(state, SubscriptionState::Verified));
        }

        match catch_unwind(AssertUnwindSafe(|| (self.handler)(payload))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(EventSubError::Decode(e)),
            Err(panic) => Err(EventSubError::HandlerPanicked(panic_message(panic.as_ref()))),
        }
    }

    /// Delete the remote record and stop for good.
    ///
    /// If the remote deletion fails the subscription keeps its record and
    /// state so the call can be retried.
    pub(crate) async fn suspend(&self, api: &dyn EventSubApi) -> Result<()> {
        let remote = self.inner.lock().remote.clone();
        if let Some(record) = remote {
            api.delete_subscription(&record.id).await?;
            debug!(id = %self.id, remote_id = %record.id, "deleted remote subscription");
        }

        let mut inner = self.inner.lock();
        inner.remote = None;
        inner.state = SubscriptionState::Suspended;
        Ok(())
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("descriptor", &self.descriptor)
            .field("state", &inner.state)
            .field("remote_id", &inner.remote.as_ref().map(|r| &r.id))
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::StreamOfflineEvent;
    use crate::test_utils::{broadcaster_condition, remote_record, MockApi};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const CALLBACK: &str = "https://example.com/hooks/abc";
    const SECRET: &str = "0123456789abcdef";

    fn offline_subscription(counter: Arc<AtomicUsize>) -> Subscription {
        let descriptor = SubscriptionDescriptor::new("stream.offline", "1", broadcaster_condition("1234"));
        Subscription::new(descriptor, move |_event: StreamOfflineEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn offline_payload() -> serde_json::Value {
        serde_json::json!({
            "broadcaster_user_id": "1234",
            "broadcaster_user_login": "streamer",
            "broadcaster_user_name": "Streamer"
        })
    }

    #[tokio::test]
    async fn start_without_record_registers_remotely() {
        let api = MockApi::new();
        let sub = offline_subscription(Arc::default());
        assert_eq!(sub.state(), SubscriptionState::Created);

        let record = sub.start(&api, CALLBACK, SECRET, None).await.unwrap();

        assert_eq!(sub.state(), SubscriptionState::Registering);
        assert_eq!(sub.remote_id(), Some(record.id.clone()));
        assert_eq!(api.create_count(), 1);
        let created = api.last_create().unwrap();
        assert_eq!(created.transport.callback, CALLBACK);
        assert_eq!(created.transport.secret, SECRET);
        assert_eq!(created.descriptor.event_type, "stream.offline");
    }

    #[tokio::test]
    async fn start_with_enabled_record_skips_registration() {
        let api = MockApi::new();
        let sub = offline_subscription(Arc::default());
        let record = remote_record("remote-1", CALLBACK, SubscriptionStatus::Enabled);

        sub.start(&api, CALLBACK, SECRET, Some(record)).await.unwrap();

        assert!(sub.is_verified());
        assert_eq!(sub.remote_id().as_deref(), Some("remote-1"));
        assert_eq!(api.create_count(), 0);
    }

    #[tokio::test]
    async fn start_with_pending_record_waits_for_challenge() {
        let api = MockApi::new();
        let sub = offline_subscription(Arc::default());
        let record = remote_record(
            "remote-1",
            CALLBACK,
            SubscriptionStatus::WebhookCallbackVerificationPending,
        );

        sub.start(&api, CALLBACK, SECRET, Some(record)).await.unwrap();

        assert_eq!(sub.state(), SubscriptionState::Registering);
        assert_eq!(api.create_count(), 0);
    }

    #[tokio::test]
    async fn start_with_dead_record_replaces_it() {
        let api = MockApi::new();
        let dead = remote_record("dead-1", CALLBACK, SubscriptionStatus::NotificationFailuresExceeded);
        api.seed(dead.clone());
        let sub = offline_subscription(Arc::default());

        let record = sub.start(&api, CALLBACK, SECRET, Some(dead)).await.unwrap();

        assert_ne!(record.id, "dead-1");
        assert_eq!(api.deleted(), vec!["dead-1".to_string()]);
        assert_eq!(api.create_count(), 1);
        assert_eq!(sub.state(), SubscriptionState::Registering);
    }

    #[tokio::test]
    async fn restart_with_listed_record_keeps_it() {
        let api = MockApi::new();
        let sub = offline_subscription(Arc::default());
        let first = sub.start(&api, CALLBACK, SECRET, None).await.unwrap();
        let second = sub.start(&api, CALLBACK, SECRET, Some(first.clone())).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(api.create_count(), 1);
        assert_eq!(sub.state(), SubscriptionState::Registering);
    }

    #[tokio::test]
    async fn restart_without_listed_record_registers_again() {
        let api = MockApi::new();
        let sub = offline_subscription(Arc::default());
        let first = sub.start(&api, CALLBACK, SECRET, None).await.unwrap();
        sub.verify().unwrap();
        api.delete_subscription(&first.id).await.unwrap();

        let second = sub.start(&api, CALLBACK, SECRET, None).await.unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(sub.remote_id(), Some(second.id));
        assert_eq!(api.create_count(), 2);
        assert_eq!(sub.state(), SubscriptionState::Registering);
    }

    #[tokio::test]
    async fn failed_registration_marks_failed() {
        let api = MockApi::new();
        api.fail_creates(true);
        let sub = offline_subscription(Arc::default());

        let result = sub.start(&api, CALLBACK, SECRET, None).await;

        assert!(matches!(result, Err(EventSubError::Api(_))));
        assert_eq!(sub.state(), SubscriptionState::Failed);
        assert!(sub.remote_id().is_none());
    }

    #[tokio::test]
    async fn verify_moves_registering_to_verified() {
        let api = MockApi::new();
        let sub = offline_subscription(Arc::default());
        assert!(matches!(sub.verify(), Err(EventSubError::InvalidState { .. })));

        sub.start(&api, CALLBACK, SECRET, None).await.unwrap();
        sub.verify().unwrap();
        assert!(sub.is_verified());
        // Repeated challenges are harmless.
        sub.verify().unwrap();
        assert!(sub.is_verified());
    }

    #[tokio::test]
    async fn handle_data_requires_verified() {
        let api = MockApi::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let sub = offline_subscription(calls.clone());
        sub.start(&api, CALLBACK, SECRET, None).await.unwrap();

        let result = sub.handle_data(offline_payload());
        assert!(matches!(result, Err(EventSubError::InvalidState { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        sub.verify().unwrap();
        sub.handle_data(offline_payload()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sub.is_verified());
    }

    #[tokio::test]
    async fn handle_data_reports_decode_errors() {
        let api = MockApi::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let sub = offline_subscription(calls.clone());
        let record = remote_record("remote-1", CALLBACK, SubscriptionStatus::Enabled);
        sub.start(&api, CALLBACK, SECRET, Some(record)).await.unwrap();

        let result = sub.handle_data(serde_json::json!({ "unexpected": true }));
        assert!(matches!(result, Err(EventSubError::Decode(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handler_panic_is_isolated() {
        let api = MockApi::new();
        let descriptor = SubscriptionDescriptor::new("stream.offline", "1", broadcaster_condition("1"));
        let sub = Subscription::new(descriptor, |_event: StreamOfflineEvent| {
            panic!("handler exploded");
        });
        let record = remote_record("remote-1", CALLBACK, SubscriptionStatus::Enabled);
        sub.start(&api, CALLBACK, SECRET, Some(record)).await.unwrap();

        match sub.handle_data(offline_payload()) {
            Err(EventSubError::HandlerPanicked(message)) => assert_eq!(message, "handler exploded"),
            other => panic!("expected HandlerPanicked, got {other:?}"),
        }
        assert!(sub.is_verified());
    }

    #[tokio::test]
    async fn suspend_deletes_remote_and_is_terminal() {
        let api = MockApi::new();
        let sub = offline_subscription(Arc::default());
        let record = sub.start(&api, CALLBACK, SECRET, None).await.unwrap();

        sub.suspend(&api).await.unwrap();

        assert_eq!(sub.state(), SubscriptionState::Suspended);
        assert_eq!(api.deleted(), vec![record.id]);
        assert!(sub.remote_id().is_none());
        assert!(sub.start(&api, CALLBACK, SECRET, None).await.is_err());
    }

    #[tokio::test]
    async fn failed_suspend_keeps_record() {
        let api = MockApi::new();
        let sub = offline_subscription(Arc::default());
        // Never seeded into the mock, so deletion is rejected.
        let record = remote_record("unknown-remote", CALLBACK, SubscriptionStatus::Enabled);
        sub.start(&api, CALLBACK, SECRET, Some(record)).await.unwrap();

        assert!(sub.suspend(&api).await.is_err());
        assert!(sub.is_verified());
        assert_eq!(sub.remote_id().as_deref(), Some("unknown-remote"));
    }
}
