//! Contact-request lifecycle: the trust-establishment state machine.
//!
//! Per address the states are:
//!
//! ```text
//! none -> outgoing:sending -> outgoing:delivered -> (promoted to Contact)
//!                          -> outgoing:failed
//! none -> incoming:sending -> (promoted to Contact)
//!                          -> incoming:failed
//! ```
//!
//! Outgoing requests advance on the transport response to our introduction.
//! Incoming requests are created when a valid unsolicited introduction
//! arrives and, under the auto-accept policy, immediately answer with a
//! reciprocal introduction; the peer accepting that reciprocal send is what
//! promotes the record to a contact. An introduction arriving while we are
//! in `outgoing:delivered` is the mirror image: the peer's reciprocal
//! introduction, i.e. handshake completion on our side.
//!
//! State for different addresses is independent; transitions for one address
//! are serialized through the context's state lock.

use crate::address::OnionAddress;
use crate::context::ProtocolContext;
use crate::envelope::build_introduction;
use crate::error::Result;
use crate::store::{
    Contact, ContactStore, Direction, PendingRequest, PendingRequestStore, RequestStatus,
};
use crate::transport::{Transport, TransportResponse, REASON_KEY_SIZE, REASON_PROTOCOL_VERSION};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// What to do with a valid unsolicited introduction.
///
/// This is a trust-model decision, not an implementation detail, so it is
/// configuration rather than behavior baked into the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncomingPolicy {
    /// Record the request and immediately reciprocate.
    AutoAccept,
    /// Drop valid introductions from unknown peers.
    Reject,
    /// Record the request and wait for a local [`accept_pending`]
    /// (ProtocolContext::accept_pending) call.
    Manual,
}

/// Logs the operator-facing explanation for a rejected introduction.
fn log_rejection(dest: &OnionAddress, reason: Option<&str>) {
    match reason {
        Some(REASON_KEY_SIZE) => warn!(
            dest = %dest,
            "contact request rejected: our public key does not meet the peer's size requirement"
        ),
        Some(REASON_PROTOCOL_VERSION) => warn!(
            dest = %dest,
            "contact request rejected: the peer does not speak this protocol version"
        ),
        _ => warn!(
            dest = %dest,
            "contact request rejected: the peer already has our contact information"
        ),
    }
}

impl ProtocolContext {
    /// Initiates a contact request toward `dest`.
    ///
    /// Creates the `outgoing:sending` record, transmits our introduction and
    /// applies the response as a state transition. Transport faults are not
    /// errors at this level: they are recorded as a `failed` status for
    /// `dest` and reflected in the returned status.
    pub async fn initiate_contact_request(&self, dest: &OnionAddress) -> Result<RequestStatus> {
        {
            let _guard = self.state_lock.lock().await;
            if self.contacts.has_contact(dest)? {
                return Err(crate::error::OnionChatError::duplicate_handshake(format!(
                    "{} is already a contact",
                    dest
                )));
            }
            if self.pending.has_pending(dest)? {
                return Err(crate::error::OnionChatError::duplicate_handshake(format!(
                    "a contact request for {} is already in flight",
                    dest
                )));
            }
            self.pending.put_pending(PendingRequest {
                address: dest.clone(),
                direction: Direction::Outgoing,
                status: RequestStatus::Sending,
                pending_pub_pem: None,
            })?;
        }

        info!(dest = %dest, "sending contact request");
        let envelope = build_introduction(&self.identity, &self.my_address, dest)?;
        let outcome = self.transport.send(dest, &envelope).await;
        self.apply_outgoing_response(dest, outcome).await
    }

    /// Applies a transport outcome to an outgoing request record.
    async fn apply_outgoing_response(
        &self,
        dest: &OnionAddress,
        outcome: Result<TransportResponse>,
    ) -> Result<RequestStatus> {
        let _guard = self.state_lock.lock().await;
        let status = match outcome {
            Ok(response) if response.is_accepted() => {
                info!(dest = %dest, "contact request delivered");
                RequestStatus::Delivered
            }
            Ok(response) => {
                log_rejection(dest, response.reason.as_deref());
                RequestStatus::Failed
            }
            Err(e) => {
                warn!(dest = %dest, error = %e, "contact request transport fault");
                RequestStatus::Failed
            }
        };
        self.update_pending_status(dest, status)?;
        Ok(status)
    }

    fn update_pending_status(&self, address: &OnionAddress, status: RequestStatus) -> Result<()> {
        if let Some(mut request) = self.pending.get_pending(address)? {
            request.status = status;
            self.pending.put_pending(request)?;
        }
        Ok(())
    }

    /// Handles a validated, signature-checked introduction from `from`.
    ///
    /// Called by the dispatcher only after the inbound validator accepted the
    /// envelope, so `from` is either wholly unknown or in
    /// `outgoing:delivered`.
    pub(crate) async fn register_introduction(&self, from: &OnionAddress, pub_pem: &str) -> Result<()> {
        let reciprocate = {
            let _guard = self.state_lock.lock().await;

            if let Some(request) = self.pending.get_pending(from)? {
                // Our own request came back: the peer accepted it and is now
                // introducing itself. Handshake complete.
                if request.direction == Direction::Outgoing
                    && request.status == RequestStatus::Delivered
                {
                    info!(peer = %from, "handshake complete, promoting to contact");
                    self.contacts.put_contact(Contact {
                        address: from.clone(),
                        pub_pem: pub_pem.to_string(),
                    })?;
                    self.pending.remove_pending(from)?;
                } else {
                    // The validator bounds which states reach this point;
                    // anything else raced with a concurrent transition.
                    warn!(peer = %from, "introduction ignored: conflicting pending request");
                }
                return Ok(());
            }

            info!(peer = %from, "new contact request received");
            match self.incoming_policy {
                IncomingPolicy::Reject => {
                    info!(peer = %from, "incoming policy rejects unsolicited requests, dropping");
                    return Ok(());
                }
                IncomingPolicy::Manual | IncomingPolicy::AutoAccept => {
                    self.pending.put_pending(PendingRequest {
                        address: from.clone(),
                        direction: Direction::Incoming,
                        status: RequestStatus::Sending,
                        pending_pub_pem: Some(pub_pem.to_string()),
                    })?;
                }
            }
            self.incoming_policy == IncomingPolicy::AutoAccept
        };

        if reciprocate {
            self.send_reciprocal_introduction(from).await?;
        }
        Ok(())
    }

    /// Accepts a manually held incoming request by sending our reciprocal
    /// introduction.
    pub async fn accept_pending(&self, address: &OnionAddress) -> Result<()> {
        {
            let _guard = self.state_lock.lock().await;
            match self.pending.get_pending(address)? {
                Some(request) if request.direction == Direction::Incoming => {}
                _ => {
                    return Err(crate::error::OnionChatError::unknown_sender(format!(
                        "no incoming request from {}",
                        address
                    )))
                }
            }
        }
        self.send_reciprocal_introduction(address).await
    }

    /// Sends our introduction in answer to an incoming one and, on
    /// acceptance, promotes the pending record to a contact.
    async fn send_reciprocal_introduction(&self, peer: &OnionAddress) -> Result<()> {
        let envelope = build_introduction(&self.identity, &self.my_address, peer)?;
        let outcome = self.transport.send(peer, &envelope).await;

        let _guard = self.state_lock.lock().await;
        match outcome {
            Ok(response) if response.is_accepted() => {
                let Some(request) = self.pending.get_pending(peer)? else {
                    warn!(peer = %peer, "pending record vanished during reciprocal send");
                    return Ok(());
                };
                let Some(pub_pem) = request.pending_pub_pem else {
                    warn!(peer = %peer, "incoming request holds no key, cannot promote");
                    return Ok(());
                };
                info!(peer = %peer, "reciprocal introduction accepted, promoting to contact");
                self.contacts.put_contact(Contact {
                    address: peer.clone(),
                    pub_pem,
                })?;
                self.pending.remove_pending(peer)?;
            }
            Ok(response) => {
                // Can occur when a delivered request was deleted on the peer
                // before our answer arrived.
                log_rejection(peer, response.reason.as_deref());
                self.update_pending_status(peer, RequestStatus::Failed)?;
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "reciprocal introduction transport fault");
                self.update_pending_status(peer, RequestStatus::Failed)?;
            }
        }
        Ok(())
    }
}
