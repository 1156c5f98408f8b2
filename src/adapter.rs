//! Connection adapters: where the listener is reachable and how it binds.
//!
//! The listener never inspects which adapter it was given. Everything it
//! needs for building callback URLs and for binding comes through
//! [`ConnectionAdapter`].

use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr};

pub const DEFAULT_REVERSE_PROXY_PORT: u16 = 8080;
pub const DEFAULT_ENV_PORT: u16 = 8080;
pub const DEFAULT_PORT_VARIABLE: &str = "PORT";
const HTTPS_PORT: u16 = 443;

/// PEM-encoded certificate chain and private key.
#[derive(Clone)]
pub struct TlsCertificateConfig {
    pub cert_pem: String,
    pub key_pem: String,
}

impl std::fmt::Debug for TlsCertificateConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsCertificateConfig").finish_non_exhaustive()
    }
}

/// Description of a server the listener should own.
#[derive(Debug, Clone)]
pub struct ServerSpec {
    pub bind_address: IpAddr,
    pub tls: Option<TlsCertificateConfig>,
}

impl Default for ServerSpec {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            tls: None,
        }
    }
}

#[async_trait]
pub trait ConnectionAdapter: Send + Sync {
    /// Externally reachable host, used in callback URLs.
    async fn host_name(&self) -> String;
    /// Port the provider connects to. `None` means the port actually bound.
    async fn external_port(&self) -> Option<u16> {
        None
    }
    /// Port forced by the adapter, overriding the one passed to `listen`.
    async fn listener_port(&self) -> Option<u16> {
        None
    }
    fn path_prefix(&self) -> Option<&str> {
        None
    }
    /// `None` for adapters that are mounted into a caller-owned app.
    fn create_http_server(&self) -> Option<ServerSpec>;
}

fn normalize_prefix(prefix: Option<String>) -> Option<String> {
    prefix
        .map(|p| p.trim_matches('/').to_string())
        .filter(|p| !p.is_empty())
}

// ---------------------------------------------------------------------------
// Direct
// ---------------------------------------------------------------------------

/// The listener binds its own socket directly on the public host.
#[derive(Debug, Clone)]
pub struct DirectConnectionAdapter {
    host_name: String,
    bind_address: IpAddr,
    tls: Option<TlsCertificateConfig>,
}

impl DirectConnectionAdapter {
    pub fn new(host_name: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            tls: None,
        }
    }

    pub fn with_tls(mut self, tls: TlsCertificateConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_bind_address(mut self, bind_address: IpAddr) -> Self {
        self.bind_address = bind_address;
        self
    }
}

#[async_trait]
impl ConnectionAdapter for DirectConnectionAdapter {
    async fn host_name(&self) -> String {
        self.host_name.clone()
    }

    fn create_http_server(&self) -> Option<ServerSpec> {
        Some(ServerSpec {
            bind_address: self.bind_address,
            tls: self.tls.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Reverse proxy
// ---------------------------------------------------------------------------

/// A proxy terminates TLS on `external_port` and forwards to a local port.
#[derive(Debug, Clone)]
pub struct ReverseProxyAdapter {
    host_name: String,
    listener_port: u16,
    external_port: u16,
    path_prefix: Option<String>,
    bind_address: IpAddr,
}

impl ReverseProxyAdapter {
    pub fn new(host_name: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
            listener_port: DEFAULT_REVERSE_PROXY_PORT,
            external_port: HTTPS_PORT,
            path_prefix: None,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }

    pub fn with_listener_port(mut self, port: u16) -> Self {
        self.listener_port = port;
        self
    }

    pub fn with_external_port(mut self, port: u16) -> Self {
        self.external_port = port;
        self
    }

    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = normalize_prefix(Some(prefix.into()));
        self
    }

    pub fn with_bind_address(mut self, bind_address: IpAddr) -> Self {
        self.bind_address = bind_address;
        self
    }
}

#[async_trait]
impl ConnectionAdapter for ReverseProxyAdapter {
    async fn host_name(&self) -> String {
        self.host_name.clone()
    }

    async fn external_port(&self) -> Option<u16> {
        Some(self.external_port)
    }

    async fn listener_port(&self) -> Option<u16> {
        Some(self.listener_port)
    }

    fn path_prefix(&self) -> Option<&str> {
        self.path_prefix.as_deref()
    }

    fn create_http_server(&self) -> Option<ServerSpec> {
        Some(ServerSpec {
            bind_address: self.bind_address,
            tls: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Environment port
// ---------------------------------------------------------------------------

/// For platforms that assign the listen port through an environment variable
/// and terminate TLS in front of the process.
#[derive(Debug, Clone)]
pub struct EnvPortAdapter {
    host_name: String,
    variable_name: String,
    external_port: u16,
    path_prefix: Option<String>,
}

impl EnvPortAdapter {
    pub fn new(host_name: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
            variable_name: DEFAULT_PORT_VARIABLE.into(),
            external_port: HTTPS_PORT,
            path_prefix: None,
        }
    }

    pub fn with_variable_name(mut self, name: impl Into<String>) -> Self {
        self.variable_name = name.into();
        self
    }

    pub fn with_external_port(mut self, port: u16) -> Self {
        self.external_port = port;
        self
    }

    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = normalize_prefix(Some(prefix.into()));
        self
    }

    fn port_from_env(&self) -> u16 {
        match std::env::var(&self.variable_name) {
            Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
                tracing::warn!(
                    variable = %self.variable_name,
                    value = %raw,
                    "port variable is not a valid port, falling back to {DEFAULT_ENV_PORT}"
                );
                DEFAULT_ENV_PORT
            }),
            Err(_) => DEFAULT_ENV_PORT,
        }
    }
}

#[async_trait]
impl ConnectionAdapter for EnvPortAdapter {
    async fn host_name(&self) -> String {
        self.host_name.clone()
    }

    async fn external_port(&self) -> Option<u16> {
        Some(self.external_port)
    }

    async fn listener_port(&self) -> Option<u16> {
        Some(self.port_from_env())
    }

    fn path_prefix(&self) -> Option<&str> {
        self.path_prefix.as_deref()
    }

    fn create_http_server(&self) -> Option<ServerSpec> {
        Some(ServerSpec::default())
    }
}

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

/// No owned server: the caller mounts [`crate::EventSubListener::router`]
/// into its own axum app.
#[derive(Debug, Clone)]
pub struct MiddlewareAdapter {
    host_name: String,
    external_port: u16,
    path_prefix: Option<String>,
}

impl MiddlewareAdapter {
    pub fn new(host_name: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
            external_port: HTTPS_PORT,
            path_prefix: None,
        }
    }

    pub fn with_external_port(mut self, port: u16) -> Self {
        self.external_port = port;
        self
    }

    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = normalize_prefix(Some(prefix.into()));
        self
    }
}

#[async_trait]
impl ConnectionAdapter for MiddlewareAdapter {
    async fn host_name(&self) -> String {
        self.host_name.clone()
    }

    async fn external_port(&self) -> Option<u16> {
        Some(self.external_port)
    }

    fn path_prefix(&self) -> Option<&str> {
        self.path_prefix.as_deref()
    }

    fn create_http_server(&self) -> Option<ServerSpec> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn direct_adapter_uses_bound_port() {
        let adapter = DirectConnectionAdapter::new("example.com");
        assert_eq!(adapter.host_name().await, "example.com");
        assert_eq!(adapter.external_port().await, None);
        assert_eq!(adapter.listener_port().await, None);
        let spec = adapter.create_http_server().unwrap();
        assert!(spec.tls.is_none());
        assert_eq!(spec.bind_address, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }

    #[tokio::test]
    async fn reverse_proxy_defaults() {
        let adapter = ReverseProxyAdapter::new("proxy.example.com");
        assert_eq!(adapter.external_port().await, Some(443));
        assert_eq!(adapter.listener_port().await, Some(8080));
        assert!(adapter.path_prefix().is_none());
    }

    #[test]
    fn path_prefix_is_trimmed_on_both_ends() {
        let adapter = ReverseProxyAdapter::new("h").with_path_prefix("/hooks/twitch/");
        assert_eq!(adapter.path_prefix(), Some("hooks/twitch"));
        let empty = MiddlewareAdapter::new("h").with_path_prefix("/");
        assert_eq!(empty.path_prefix(), None);
    }

    #[tokio::test]
    async fn env_port_adapter_reads_variable() {
        let name = "EVENTSUB_TEST_PORT_READS";
        std::env::set_var(name, "5123");
        let adapter = EnvPortAdapter::new("app.example.com").with_variable_name(name);
        assert_eq!(adapter.listener_port().await, Some(5123));
        assert_eq!(adapter.external_port().await, Some(443));
        std::env::remove_var(name);
    }

    #[tokio::test]
    async fn env_port_adapter_falls_back() {
        let missing = EnvPortAdapter::new("h").with_variable_name("EVENTSUB_TEST_PORT_UNSET");
        assert_eq!(missing.listener_port().await, Some(DEFAULT_ENV_PORT));

        let name = "EVENTSUB_TEST_PORT_GARBAGE";
        std::env::set_var(name, "not-a-port");
        let garbage = EnvPortAdapter::new("h").with_variable_name(name);
        assert_eq!(garbage.listener_port().await, Some(DEFAULT_ENV_PORT));
        std::env::remove_var(name);
    }

    #[test]
    fn middleware_adapter_owns_no_server() {
        assert!(MiddlewareAdapter::new("h").create_http_server().is_none());
    }

    #[test]
    fn tls_config_debug_hides_key() {
        let tls = TlsCertificateConfig {
            cert_pem: "CERT".into(),
            key_pem: "PRIVATE".into(),
        };
        assert!(!format!("{tls:?}").contains("PRIVATE"));
    }
}
