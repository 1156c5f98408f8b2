use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ApiError;
use crate::types::{CreateSubscriptionRequest, RemoteSubscription};

pub const DEFAULT_HELIX_URL: &str = "https://api.twitch.tv/helix";

/// Kind of access token an API client authenticates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    App,
    User,
}

/// The provider's subscription registry, as seen by the listener.
#[async_trait]
pub trait EventSubApi: Send + Sync {
    fn token_type(&self) -> TokenType;
    /// All remote subscription records of the account, every page.
    async fn get_subscriptions(&self) -> Result<Vec<RemoteSubscription>, ApiError>;
    async fn create_subscription(
        &self,
        request: &CreateSubscriptionRequest,
    ) -> Result<RemoteSubscription, ApiError>;
    async fn delete_subscription(&self, id: &str) -> Result<(), ApiError>;
}

// ---------------------------------------------------------------------------
// Helix
// ---------------------------------------------------------------------------

pub struct HelixEventSubApi {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
    access_token: String,
    token_type: TokenType,
}

#[derive(Deserialize)]
struct Pagination {
    cursor: Option<String>,
}

#[derive(Deserialize)]
struct SubscriptionPage {
    data: Vec<RemoteSubscription>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

impl HelixEventSubApi {
    pub fn with_app_token(client_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self::new(client_id, access_token, TokenType::App)
    }

    pub fn with_user_token(client_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self::new(client_id, access_token, TokenType::User)
    }

    fn new(client_id: impl Into<String>, access_token: impl Into<String>, token_type: TokenType) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_HELIX_URL.into(),
            client_id: client_id.into(),
            access_token: access_token.into(),
            token_type,
        }
    }

    /// Point the client at another Helix-compatible base URL (mock servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.base_url))
            .header("Client-ID", &self.client_id)
            .bearer_auth(&self.access_token)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(ApiError::Status { status, body })
    }
}

#[async_trait]
impl EventSubApi for HelixEventSubApi {
    fn token_type(&self) -> TokenType {
        self.token_type
    }

    async fn get_subscriptions(&self) -> Result<Vec<RemoteSubscription>, ApiError> {
        let mut all = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut req = self.request(reqwest::Method::GET, "/eventsub/subscriptions");
            if let Some(after) = &cursor {
                req = req.query(&[("after", after)]);
            }
            let page: SubscriptionPage = Self::check(req.send().await?).await?.json().await?;
            let fetched = page.data.len();
            all.extend(page.data);

            cursor = page
                .pagination
                .and_then(|p| p.cursor)
                .filter(|c| !c.is_empty());
            if cursor.is_none() || fetched == 0 {
                break;
            }
        }

        tracing::debug!(count = all.len(), "fetched remote subscriptions");
        Ok(all)
    }

    async fn create_subscription(
        &self,
        request: &CreateSubscriptionRequest,
    ) -> Result<RemoteSubscription, ApiError> {
        let resp = self
            .request(reqwest::Method::POST, "/eventsub/subscriptions")
            .json(request)
            .send()
            .await?;
        let page: SubscriptionPage = Self::check(resp).await?.json().await?;
        page.data.into_iter().next().ok_or(ApiError::EmptyResponse)
    }

    async fn delete_subscription(&self, id: &str) -> Result<(), ApiError> {
        let resp = self
            .request(reqwest::Method::DELETE, "/eventsub/subscriptions")
            .query(&[("id", id)])
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }
}

impl std::fmt::Debug for HelixEventSubApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HelixEventSubApi")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field("token_type", &self.token_type)
            .finish_non_exhaustive()
    }
}
