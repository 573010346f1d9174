//! Outbound transport to peer nodes.
//!
//! The protocol core only needs one operation: deliver an envelope to an
//! onion address and learn the peer's verdict. The [`Transport`] trait is
//! that seam; [`HttpTransport`] is the production implementation, a reqwest
//! JSON POST routed through a SOCKS5 proxy so `.onion` hostnames resolve
//! inside the anonymity network.
//!
//! There is no retry policy and no core-level timeout: a failed send is
//! terminal until the caller re-initiates, and any deadline belongs to the
//! configured HTTP client.

use crate::address::OnionAddress;
use crate::envelope::Envelope;
use crate::error::{OnionChatError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// Conflict reason: peer rejected the advertised key as too small.
pub const REASON_KEY_SIZE: &str = "EKEYSIZE";

/// Conflict reason: peer does not speak this protocol version.
pub const REASON_PROTOCOL_VERSION: &str = "EPROTOCOLVERSION";

/// A peer's verdict on a delivered envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP-style status: 200 accepted, 409 conflict, 410 unknown recipient key.
    pub status: u16,
    /// Machine-readable conflict reason, when the peer supplied one.
    pub reason: Option<String>,
}

impl TransportResponse {
    /// Convenience constructor for an acceptance.
    pub fn ok() -> Self {
        Self {
            status: 200,
            reason: None,
        }
    }

    /// Convenience constructor for a rejection with a reason.
    pub fn rejected(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: Some(reason.into()),
        }
    }

    /// Returns true if the peer accepted the envelope.
    pub fn is_accepted(&self) -> bool {
        self.status == 200
    }
}

/// Asynchronous delivery of one envelope to one peer.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Delivers `envelope` to `dest` and resolves with the peer's verdict.
    ///
    /// Network faults surface as `Transport` errors; a non-200 peer verdict
    /// is a successful send and comes back as a [`TransportResponse`].
    async fn send(&self, dest: &OnionAddress, envelope: &Envelope) -> Result<TransportResponse>;
}

/// Body shape of a peer's rejection response.
#[derive(Debug, Deserialize)]
struct RejectionBody {
    reason: Option<String>,
}

/// HTTP transport over reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    peer_port: u16,
}

impl HttpTransport {
    /// Builds a transport. `socks_proxy` is e.g. `socks5h://127.0.0.1:9050`;
    /// the `h` variant is required so hostname resolution happens inside the
    /// proxy and `.onion` names never leak to the local resolver.
    pub fn new(socks_proxy: Option<&str>, peer_port: u16) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(proxy) = socks_proxy {
            builder = builder.proxy(
                reqwest::Proxy::all(proxy)
                    .map_err(|e| OnionChatError::transport(format!("bad proxy URL: {}", e)))?,
            );
        }
        let client = builder
            .build()
            .map_err(|e| OnionChatError::transport(format!("client build failed: {}", e)))?;
        Ok(Self { client, peer_port })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, dest: &OnionAddress, envelope: &Envelope) -> Result<TransportResponse> {
        let url = format!("http://{}:{}/", dest, self.peer_port);
        debug!(dest = %dest, "sending envelope");

        let response = self
            .client
            .post(&url)
            .json(envelope)
            .send()
            .await
            .map_err(|e| OnionChatError::transport(format!("send to {} failed: {}", dest, e)))?;

        let status = response.status().as_u16();
        let reason = if status == 200 {
            None
        } else {
            response
                .json::<RejectionBody>()
                .await
                .ok()
                .and_then(|body| body.reason)
        };

        Ok(TransportResponse { status, reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_accessors() {
        assert!(TransportResponse::ok().is_accepted());

        let rejected = TransportResponse::rejected(409, REASON_KEY_SIZE);
        assert!(!rejected.is_accepted());
        assert_eq!(rejected.reason.as_deref(), Some("EKEYSIZE"));
    }

    #[test]
    fn test_http_transport_rejects_bad_proxy() {
        assert!(HttpTransport::new(Some("not a url"), 1111).is_err());
    }
}
