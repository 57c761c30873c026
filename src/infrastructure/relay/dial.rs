//! Upstream leg: open the console WebSocket on the hypervisor.
//!
//! The console endpoint silently drops connections that do not ask for the
//! binary sub-protocol, so the `Sec-WebSocket-Protocol` header is always sent.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::domain::ConsoleTicket;
use crate::error::{Error, Result};
use crate::infrastructure::config::RelayConfig;

pub(super) type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Accepts any server certificate while still checking handshake signatures.
///
/// Hypervisor hosts ship self-signed certificates; `verify_tls = false` opts
/// into this verifier.
#[derive(Debug)]
struct AcceptAnyCertificate {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Build the TLS client config for the upstream leg.
///
/// Returns `None` when the default (native roots) configuration applies:
/// plain `ws://` upstreams or verified TLS.
///
/// # Errors
///
/// Returns an error if the crypto provider rejects the protocol versions.
pub(super) fn tls_config(config: &RelayConfig) -> Result<Option<Arc<ClientConfig>>> {
    if !config.upstream_tls || config.verify_tls {
        return Ok(None);
    }

    warn!("Upstream console certificates will not be verified");
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let tls = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate { provider }))
        .with_no_client_auth();
    Ok(Some(Arc::new(tls)))
}

fn header_value(field: &'static str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|err| Error::Connection(format!("invalid {field} header {value:?}: {err}")))
}

/// Open the upstream console connection for `ticket`.
///
/// # Errors
///
/// - [`Error::Timeout`] if the handshake does not finish within `connect_timeout`
/// - [`Error::WebSocket`] if the host refuses the upgrade or the sub-protocol
pub(super) async fn dial(
    config: &RelayConfig,
    tls: Option<Arc<ClientConfig>>,
    ticket: &ConsoleTicket,
) -> Result<UpstreamSocket> {
    let url = ticket.endpoint(config.upstream_tls)?;
    let mut request = url.as_str().into_client_request()?;
    let headers = request.headers_mut();
    headers.insert(
        header::SEC_WEBSOCKET_PROTOCOL,
        header_value("subprotocol", &config.subprotocol)?,
    );
    headers.insert(header::ORIGIN, header_value("origin", &config.origin)?);

    let connector = tls.map(Connector::Rustls);
    let timeout = config.connect_timeout();
    let (socket, response) = tokio::time::timeout(
        timeout,
        connect_async_tls_with_config(request, None, true, connector),
    )
    .await
    .map_err(|_| Error::Timeout(timeout))??;

    debug!(
        host = %ticket.host,
        port = ticket.port,
        status = %response.status(),
        protocol = ?response.headers().get(header::SEC_WEBSOCKET_PROTOCOL),
        "Upstream console connected"
    );
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_upstream_needs_no_tls_config() {
        let config = RelayConfig {
            upstream_tls: false,
            ..RelayConfig::default()
        };
        assert!(tls_config(&config).unwrap().is_none());
    }

    #[test]
    fn verified_tls_uses_default_roots() {
        let config = RelayConfig {
            upstream_tls: true,
            verify_tls: true,
            ..RelayConfig::default()
        };
        assert!(tls_config(&config).unwrap().is_none());
    }

    #[test]
    fn unverified_tls_builds_custom_config() {
        let config = RelayConfig {
            upstream_tls: true,
            verify_tls: false,
            ..RelayConfig::default()
        };
        assert!(tls_config(&config).unwrap().is_some());
    }
}
