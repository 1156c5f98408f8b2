//! EventSub webhook listener.
//!
//! Registers EventSub subscriptions with the provider, answers their
//! verification challenges and routes signed notifications to typed handlers.

pub mod adapter;
pub mod api;
pub mod error;
pub mod events;
pub mod http_server;
pub mod listener;
pub mod store;
pub mod subscription;
pub mod types;
pub mod verification;

#[cfg(test)]
mod test_utils;

pub use adapter::{
    ConnectionAdapter, DirectConnectionAdapter, EnvPortAdapter, MiddlewareAdapter, ReverseProxyAdapter,
    ServerSpec, TlsCertificateConfig,
};
pub use api::{EventSubApi, HelixEventSubApi, TokenType};
pub use error::{ApiError, EventSubError, Result};
pub use listener::{EventSubListener, LifecycleReport};
pub use subscription::{Subscription, SubscriptionState};
pub use types::{RemoteSubscription, SubscriptionDescriptor, SubscriptionStatus};
