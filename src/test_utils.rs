//! In-memory provider registry for tests.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::api::{EventSubApi, TokenType};
use crate::error::ApiError;
use crate::types::{
    Condition, CreateSubscriptionRequest, RemoteSubscription, SubscriptionStatus, TransportData,
    WEBHOOK_TRANSPORT,
};

pub(crate) fn broadcaster_condition(user_id: &str) -> Condition {
    Condition::from([("broadcaster_user_id".to_string(), user_id.to_string())])
}

pub(crate) fn remote_record(id: &str, callback: &str, status: SubscriptionStatus) -> RemoteSubscription {
    RemoteSubscription {
        id: id.to_string(),
        status,
        event_type: "stream.offline".to_string(),
        version: "1".to_string(),
        condition: Condition::new(),
        transport: TransportData {
            method: WEBHOOK_TRANSPORT.to_string(),
            callback: callback.to_string(),
        },
        created_at: Utc::now(),
    }
}

#[derive(Default)]
struct MockState {
    records: Vec<RemoteSubscription>,
    creates: Vec<CreateSubscriptionRequest>,
    deleted: Vec<String>,
    fail_creates: bool,
    fail_listing: bool,
}

pub(crate) struct MockApi {
    token_type: TokenType,
    state: Mutex<MockState>,
}

impl MockApi {
    pub(crate) fn new() -> Self {
        Self::with_token_type(TokenType::App)
    }

    pub(crate) fn with_token_type(token_type: TokenType) -> Self {
        Self {
            token_type,
            state: Mutex::new(MockState::default()),
        }
    }

    pub(crate) fn seed(&self, record: RemoteSubscription) {
        self.state.lock().records.push(record);
    }

    /// Simulate the provider changing a record's status out of band.
    pub(crate) fn set_status(&self, remote_id: &str, status: SubscriptionStatus) {
        let mut state = self.state.lock();
        if let Some(record) = state.records.iter_mut().find(|r| r.id == remote_id) {
            record.status = status;
        }
    }

    pub(crate) fn records(&self) -> Vec<RemoteSubscription> {
        self.state.lock().records.clone()
    }

    pub(crate) fn create_count(&self) -> usize {
        self.state.lock().creates.len()
    }

    pub(crate) fn last_create(&self) -> Option<CreateSubscriptionRequest> {
        self.state.lock().creates.last().cloned()
    }

    pub(crate) fn deleted(&self) -> Vec<String> {
        self.state.lock().deleted.clone()
    }

    pub(crate) fn fail_creates(&self, fail: bool) {
        self.state.lock().fail_creates = fail;
    }

    pub(crate) fn fail_listing(&self, fail: bool) {
        self.state.lock().fail_listing = fail;
    }
}

fn provider_error(status: reqwest::StatusCode) -> ApiError {
    ApiError::Status {
        status,
        body: String::new(),
    }
}

#[async_trait]
impl EventSubApi for MockApi {
    fn token_type(&self) -> TokenType {
        self.token_type
    }

    async fn get_subscriptions(&self) -> Result<Vec<RemoteSubscription>, ApiError> {
        let state = self.state.lock();
        if state.fail_listing {
            return Err(provider_error(reqwest::StatusCode::SERVICE_UNAVAILABLE));
        }
        Ok(state.records.clone())
    }

    async fn create_subscription(
        &self,
        request: &CreateSubscriptionRequest,
    ) -> Result<RemoteSubscription, ApiError> {
        let mut state = self.state.lock();
        if state.fail_creates {
            return Err(provider_error(reqwest::StatusCode::BAD_REQUEST));
        }
        let record = RemoteSubscription {
            id: uuid::Uuid::new_v4().to_string(),
            status: SubscriptionStatus::WebhookCallbackVerificationPending,
            event_type: request.descriptor.event_type.clone(),
            version: request.descriptor.version.clone(),
            condition: request.descriptor.condition.clone(),
            transport: TransportData {
                method: request.transport.method.to_string(),
                callback: request.transport.callback.clone(),
            },
            created_at: Utc::now(),
        };
        state.creates.push(request.clone());
        state.records.push(record.clone());
        Ok(record)
    }

    async fn delete_subscription(&self, id: &str) -> Result<(), ApiError> {
        let mut state = self.state.lock();
        let before = state.records.len();
        state.records.retain(|r| r.id != id);
        if state.records.len() == before {
            return Err(provider_error(reqwest::StatusCode::NOT_FOUND));
        }
        state.deleted.push(id.to_string());
        Ok(())
    }
}
