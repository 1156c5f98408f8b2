//! Error types for the listener and the provider API client.

use thiserror::Error;

use crate::subscription::SubscriptionState;

/// Errors returned by the provider REST client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Transport-level failure (connect, TLS, body read, JSON decode).
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with a non-success status.
    #[error("provider returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    /// A create call succeeded but the response carried no record.
    #[error("provider response contained no subscription record")]
    EmptyResponse,
}

/// Errors produced by the listener, its subscriptions and adapters.
#[derive(Debug, Error)]
pub enum EventSubError {
    #[error("EventSub requires an app access token; construct the API client with an app token")]
    InvalidTokenType,

    #[error("secret must be between 10 and 100 characters long, got {0}")]
    InvalidSecret(usize),

    #[error("trying to listen while already listening")]
    AlreadyListening,

    #[error("trying to unlisten while not listening")]
    NotListening,

    /// The connection adapter mounts into a host app and owns no server.
    #[error("the connection adapter does not own a server; mount the listener router instead")]
    ServerNotOwned,

    #[error("can not build hook URL with implicit external port while not listening")]
    ImplicitPortNotListening,

    #[error("already subscribed: {0}")]
    AlreadySubscribed(String),

    #[error("subscription {id} is {state:?}, expected {expected:?}")]
    InvalidState {
        id: String,
        state: SubscriptionState,
        expected: SubscriptionState,
    },

    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TLS configuration: {0}")]
    Tls(String),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("could not decode event payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("event handler panicked: {0}")]
    HandlerPanicked(String),

    /// One or more members of a startup/shutdown fan-out failed.
    #[error("{} subscription(s) failed: {}", failed.len(), failed.join(", "))]
    Lifecycle { failed: Vec<String> },
}

pub type Result<T, E = EventSubError> = std::result::Result<T, E>;
