use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, warn};

use crate::adapter::{ServerSpec, TlsCertificateConfig};
use crate::error::{EventSubError, Result};
use crate::store::SharedRegistry;
use crate::types::{NotificationBody, VerificationBody};
use crate::verification;

pub const HEADER_MESSAGE_TYPE: &str = "twitch-eventsub-message-type";
pub const HEADER_MESSAGE_ID: &str = "twitch-eventsub-message-id";
pub const HEADER_MESSAGE_TIMESTAMP: &str = "twitch-eventsub-message-timestamp";
pub const HEADER_MESSAGE_SIGNATURE: &str = "twitch-eventsub-message-signature";

pub const MESSAGE_TYPE_VERIFICATION: &str = "webhook_callback_verification";
pub const MESSAGE_TYPE_NOTIFICATION: &str = "notification";

#[derive(Clone)]
pub(crate) struct WebhookState {
    pub registry: SharedRegistry,
    pub secret: Arc<str>,
}

pub(crate) fn route_path(path_prefix: Option<&str>) -> String {
    match path_prefix {
        Some(prefix) => format!("/{prefix}/{{id}}"),
        None => "/{id}".to_string(),
    }
}

/// The delivery route alone, suitable for merging into a host app.
pub(crate) fn build_router(state: WebhookState, path_prefix: Option<&str>) -> Router {
    Router::new()
        .route(&route_path(path_prefix), post(handle_delivery))
        .with_state(state)
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

async fn handle_delivery(
    Path(id): Path<String>,
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let response = dispatch(&id, &state, &headers, &body).await;
    debug!(id = %id, status = %response.status(), "POST delivery handled");
    response
}

async fn dispatch(id: &str, state: &WebhookState, headers: &HeaderMap, body: &[u8]) -> Response {
    let message_type = header_value(headers, HEADER_MESSAGE_TYPE);

    let subscription = state.registry.read().await.get(id);
    let subscription = match subscription {
        Some(s) => s,
        None => {
            warn!(id = %id, message_type = %message_type, "delivery for unknown subscription");
            return StatusCode::GONE.into_response();
        }
    };

    // Verify signature before anything touches the body
    let verified = verification::verify_eventsub_signature(
        header_value(headers, HEADER_MESSAGE_ID),
        header_value(headers, HEADER_MESSAGE_TIMESTAMP),
        body,
        &state.secret,
        header_value(headers, HEADER_MESSAGE_SIGNATURE),
    );
    if !verified {
        warn!(id = %id, message_type = %message_type, "could not verify delivery signature");
        return StatusCode::GONE.into_response();
    }

    match message_type {
        MESSAGE_TYPE_VERIFICATION => {
            let data: VerificationBody = match serde_json::from_slice(body) {
                Ok(d) => d,
                Err(e) => {
                    warn!(id = %id, error = %e, "malformed verification body");
                    return StatusCode::BAD_REQUEST.into_response();
                }
            };
            if let Err(e) = subscription.verify() {
                warn!(id = %id, error = %e, "verification challenge for a subscription not awaiting one");
                return StatusCode::GONE.into_response();
            }
            state.registry.write().await.mark_remote_enabled(id);
            debug!(id = %id, "successfully subscribed to event");

            let length = data.challenge.len().to_string();
            (StatusCode::OK, [(header::CONTENT_LENGTH, length)], data.challenge).into_response()
        }
        MESSAGE_TYPE_NOTIFICATION => {
            let data: NotificationBody = match serde_json::from_slice(body) {
                Ok(d) => d,
                Err(e) => {
                    warn!(id = %id, error = %e, "malformed notification body");
                    return StatusCode::BAD_REQUEST.into_response();
                }
            };
            match subscription.handle_data(data.event) {
                Ok(()) => {}
                Err(e @ EventSubError::HandlerPanicked(_)) => {
                    error!(id = %id, error = %e, "event handler failed");
                }
                Err(e) => {
                    warn!(id = %id, error = %e, "could not dispatch notification");
                }
            }
            StatusCode::ACCEPTED.into_response()
        }
        other => {
            warn!(id = %id, message_type = %other, "unknown message type");
            StatusCode::BAD_REQUEST.into_response()
        }
    }
}

async fn unknown_route(method: Method, uri: Uri) -> StatusCode {
    warn!(method = %method, uri = %uri, "access to unknown URL/method attempted");
    StatusCode::NOT_FOUND
}

// ---------------------------------------------------------------------------
// Owned server
// ---------------------------------------------------------------------------

/// A running server owned by the listener.
pub(crate) struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<io::Result<()>>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stop accepting, let in-flight requests finish, and wait for the
    /// serve task to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        match self.task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "HTTP server exited with error"),
            Err(e) => warn!(error = %e, "HTTP server task failed"),
        }
    }
}

/// Bind `port` on the configured address and serve `state` there, over TLS
/// when certificates are present.
pub(crate) async fn start(
    state: WebhookState,
    path_prefix: Option<&str>,
    spec: &ServerSpec,
    port: u16,
) -> Result<ServerHandle> {
    let acceptor = spec.tls.as_ref().map(tls_acceptor).transpose()?;

    let listener = TcpListener::bind(SocketAddr::new(spec.bind_address, port))
        .await
        .map_err(|source| EventSubError::Bind { port, source })?;
    let local_addr = listener
        .local_addr()
        .map_err(|source| EventSubError::Bind { port, source })?;

    let app = build_router(state, path_prefix).fallback(unknown_route);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let shutdown = async move {
        let _ = shutdown_rx.await;
    };

    let task = match acceptor {
        Some(acceptor) => {
            let listener = TlsListener {
                inner: listener,
                acceptor,
            };
            tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown)
                    .await
            })
        }
        None => tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
        }),
    };

    debug!(addr = %local_addr, tls = spec.tls.is_some(), "HTTP server bound");
    Ok(ServerHandle {
        local_addr,
        shutdown_tx,
        task,
    })
}

fn tls_acceptor(tls: &TlsCertificateConfig) -> Result<TlsAcceptor> {
    let certs = CertificateDer::pem_slice_iter(tls.cert_pem.as_bytes())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| EventSubError::Tls(format!("invalid certificate PEM: {e}")))?;
    if certs.is_empty() {
        return Err(EventSubError::Tls("no certificate found in PEM".into()));
    }
    let key = PrivateKeyDer::from_pem_slice(tls.key_pem.as_bytes())
        .map_err(|e| EventSubError::Tls(format!("invalid private key PEM: {e}")))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| EventSubError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| EventSubError::Tls(e.to_string()))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// TCP listener that completes a TLS handshake before handing the stream to axum.
struct TlsListener {
    inner: TcpListener,
    acceptor: TlsAcceptor,
}

impl axum::serve::Listener for TlsListener {
    type Io = tokio_rustls::server::TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            let (stream, addr) = axum::serve::Listener::accept(&mut self.inner).await;
            match self.acceptor.accept(stream).await {
                Ok(tls) => return (tls, addr),
                Err(e) => debug!(addr = %addr, error = %e, "TLS handshake failed"),
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        self.inner.local_addr()
    }
}
