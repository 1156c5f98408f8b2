//! Binary configuration
//!
//! Loads configuration from environment variables.

use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use eventsub_listener::{
    ConnectionAdapter, DirectConnectionAdapter, EnvPortAdapter, ReverseProxyAdapter, TlsCertificateConfig,
};

/// How the listener is reachable from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    Direct,
    ReverseProxy,
    EnvPort,
}

impl FromStr for AdapterKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "reverse-proxy" | "reverse_proxy" | "proxy" => Ok(Self::ReverseProxy),
            "env-port" | "env_port" => Ok(Self::EnvPort),
            other => bail!("unknown adapter {other:?}, expected direct, reverse-proxy or env-port"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Application client id sent with every provider call
    pub client_id: String,

    /// App access token
    pub app_token: String,

    /// Shared secret the provider signs deliveries with (10-100 characters)
    pub secret: String,

    /// Public host name used in callback URLs
    pub host_name: String,

    /// Connection adapter (default: reverse-proxy)
    pub adapter: AdapterKind,

    /// Port passed to `listen`
    pub port: Option<u16>,

    /// Port the provider connects to, if different from 443
    pub external_port: Option<u16>,

    /// Path segment(s) before the subscription id
    pub path_prefix: Option<String>,

    /// Variable the env-port adapter reads (default: PORT)
    pub port_variable: Option<String>,

    /// PEM certificate chain for the direct adapter
    pub tls_cert: Option<PathBuf>,

    /// PEM private key for the direct adapter
    pub tls_key: Option<PathBuf>,

    /// Broadcasters whose stream online/offline events are subscribed
    pub user_ids: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |name: &str| lookup(name).with_context(|| format!("{name} must be set"));
        let port = |name: &str| -> Result<Option<u16>> {
            lookup(name)
                .map(|v| {
                    v.trim()
                        .parse::<u16>()
                        .with_context(|| format!("{name} must be a port number, got {v:?}"))
                })
                .transpose()
        };

        let config = Self {
            client_id: required("TWITCH_CLIENT_ID")?,
            app_token: required("TWITCH_APP_TOKEN")?,
            secret: required("EVENTSUB_SECRET")?,
            host_name: required("EVENTSUB_HOST_NAME")?,
            adapter: lookup("EVENTSUB_ADAPTER")
                .map(|v| v.parse::<AdapterKind>())
                .transpose()
                .context("EVENTSUB_ADAPTER is invalid")?
                .unwrap_or(AdapterKind::ReverseProxy),
            port: port("EVENTSUB_PORT")?,
            external_port: port("EVENTSUB_EXTERNAL_PORT")?,
            path_prefix: lookup("EVENTSUB_PATH_PREFIX"),
            port_variable: lookup("EVENTSUB_PORT_VARIABLE"),
            tls_cert: lookup("EVENTSUB_TLS_CERT").map(PathBuf::from),
            tls_key: lookup("EVENTSUB_TLS_KEY").map(PathBuf::from),
            user_ids: lookup("EVENTSUB_USER_IDS")
                .map(|s| {
                    s.split(',')
                        .map(|t| t.trim().to_string())
                        .filter(|t| !t.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        };

        if config.tls_cert.is_some() != config.tls_key.is_some() {
            bail!("EVENTSUB_TLS_CERT and EVENTSUB_TLS_KEY must be set together");
        }
        Ok(config)
    }

    /// Build the connection adapter, reading TLS material from disk if configured.
    pub fn build_adapter(&self) -> Result<Arc<dyn ConnectionAdapter>> {
        let adapter: Arc<dyn ConnectionAdapter> = match self.adapter {
            AdapterKind::Direct => {
                let mut adapter = DirectConnectionAdapter::new(&self.host_name);
                if let Some(tls) = self.load_tls()? {
                    adapter = adapter.with_tls(tls);
                }
                Arc::new(adapter)
            }
            AdapterKind::ReverseProxy => {
                let mut adapter = ReverseProxyAdapter::new(&self.host_name);
                if let Some(port) = self.external_port {
                    adapter = adapter.with_external_port(port);
                }
                if let Some(prefix) = &self.path_prefix {
                    adapter = adapter.with_path_prefix(prefix);
                }
                Arc::new(adapter)
            }
            AdapterKind::EnvPort => {
                let mut adapter = EnvPortAdapter::new(&self.host_name);
                if let Some(name) = &self.port_variable {
                    adapter = adapter.with_variable_name(name);
                }
                if let Some(port) = self.external_port {
                    adapter = adapter.with_external_port(port);
                }
                if let Some(prefix) = &self.path_prefix {
                    adapter = adapter.with_path_prefix(prefix);
                }
                Arc::new(adapter)
            }
        };
        Ok(adapter)
    }

    fn load_tls(&self) -> Result<Option<TlsCertificateConfig>> {
        let (Some(cert), Some(key)) = (&self.tls_cert, &self.tls_key) else {
            return Ok(None);
        };
        Ok(Some(TlsCertificateConfig {
            cert_pem: std::fs::read_to_string(cert)
                .with_context(|| format!("failed to read certificate {}", cert.display()))?,
            key_pem: std::fs::read_to_string(key)
                .with_context(|| format!("failed to read private key {}", key.display()))?,
        }))
    }
}
