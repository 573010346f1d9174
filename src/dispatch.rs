//! Post-acceptance processing of inbound envelopes.
//!
//! The dispatcher runs only after the inbound validator accepted an
//! envelope. It owns the checks the validator cannot do: signature
//! verification and, for encrypted data, decryption and inner-envelope
//! validation. An introduction is verified against the key *embedded in the
//! message* (the handshake is self-certifying; the validator already bounded
//! which addresses may introduce themselves), while an inner message is
//! verified against the *stored* contact key, never a key the sender
//! supplied, so an established contact cannot be impersonated.
//!
//! Any verification failure here is logged and the envelope silently
//! discarded: the sender already received its 200 at the envelope level, and
//! a forger learns nothing.

use crate::address::OnionAddress;
use crate::context::ProtocolContext;
use crate::crypto::CryptoIdentity;
use crate::envelope::{
    build_encrypted_message, canonical_json, parse_inner_message, Content, Envelope,
};
use crate::error::{OnionChatError, Result};
use crate::store::ContactStore;
use crate::transport::{Transport, REASON_PROTOCOL_VERSION};
use tracing::{debug, info, warn};

/// Application-layer recipient of delivered messages.
///
/// `deliver` may return a reply text, which the dispatcher encrypts, signs
/// and sends back to the sender.
pub trait MessageSink: Send + Sync {
    /// Hands a verified message to the application. A `Some` return is sent
    /// back to `from` as a reply.
    fn deliver(&self, from: &OnionAddress, msg_text: &str) -> Option<String>;
}

/// Sink that answers every message with the same text.
#[derive(Debug, Default)]
pub struct EchoSink;

impl MessageSink for EchoSink {
    fn deliver(&self, from: &OnionAddress, msg_text: &str) -> Option<String> {
        info!(from = %from, msg = %msg_text, "message received");
        Some(msg_text.to_string())
    }
}

/// Local outcome of an outbound message send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// The peer accepted the message.
    Delivered,
    /// The peer rejected it, or transport failed.
    Failed,
}

impl ProtocolContext {
    /// Processes an inbound envelope that the validator accepted.
    ///
    /// Protocol-level failures past this point are deliberately silent
    /// toward the sender; the returned error covers storage faults only.
    pub async fn dispatch_inbound(&self, raw: &[u8]) -> Result<()> {
        let envelope = match Envelope::parse(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                // The validator parses the same bytes first, so this is
                // unreachable in the normal pipeline.
                warn!(error = %e, "accepted envelope failed to parse, discarding");
                return Ok(());
            }
        };

        match envelope.content {
            Content::Introduction { .. } => self.dispatch_introduction(envelope).await,
            Content::EncryptedData { clear_from, data } => {
                self.dispatch_encrypted_data(&clear_from, &data).await
            }
            Content::Message { .. } => {
                warn!("plaintext message envelope at the outer level, discarding");
                Ok(())
            }
        }
    }

    async fn dispatch_introduction(&self, envelope: Envelope) -> Result<()> {
        let Content::Introduction { from, to, pub_pem } = &envelope.content else {
            unreachable!("dispatch_introduction called with non-introduction content");
        };

        let Some(signature) = envelope.signature.as_deref() else {
            warn!(from = %from, "unsigned introduction, discarding");
            return Ok(());
        };

        // The advertised key itself verifies the advertisement; from and to
        // are under the same signature, so a relayed introduction cannot be
        // re-targeted.
        let peer_key = match CryptoIdentity::from_public_pem(pub_pem) {
            Ok(key) => key,
            Err(e) => {
                warn!(from = %from, error = %e, "introduction key failed to parse, discarding");
                return Ok(());
            }
        };
        let canon = canonical_json(&envelope.content)?;
        if !peer_key.verify(canon.as_bytes(), signature) {
            warn!(from = %from, "introduction is not properly signed, discarding");
            return Ok(());
        }

        if to != &self.my_address || from == &self.my_address {
            warn!(from = %from, to = %to, "introduction is not properly addressed, discarding");
            return Ok(());
        }

        debug!(from = %from, "introduction verified");
        self.register_introduction(&from.clone(), pub_pem).await
    }

    async fn dispatch_encrypted_data(&self, clear_from: &OnionAddress, data: &str) -> Result<()> {
        let plaintext = match self.identity.decrypt(data) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!(clear_from = %clear_from, error = %e, "payload failed to decrypt, discarding");
                return Ok(());
            }
        };

        let inner = match parse_inner_message(&plaintext) {
            Ok(inner) => inner,
            Err(e) => {
                warn!(clear_from = %clear_from, error = %e, "inner envelope malformed, discarding");
                return Ok(());
            }
        };
        let Content::Message { from, to, msg_text } = &inner.content else {
            unreachable!("parse_inner_message only returns messages");
        };

        if to != &self.my_address || from == &self.my_address {
            warn!(from = %from, "message is not properly addressed, discarding");
            return Ok(());
        }

        // Verification key comes from the contact store, not the wire.
        let Some(contact) = self.contacts.get_contact(from)? else {
            warn!(from = %from, "inner sender is not a contact, discarding");
            return Ok(());
        };
        let contact_key = match CryptoIdentity::from_public_pem(&contact.pub_pem) {
            Ok(key) => key,
            Err(e) => {
                warn!(from = %from, error = %e, "stored contact key failed to parse, discarding");
                return Ok(());
            }
        };

        let Some(signature) = inner.signature.as_deref() else {
            warn!(from = %from, "unsigned message, discarding");
            return Ok(());
        };
        let canon = canonical_json(&inner.content)?;
        if !contact_key.verify(canon.as_bytes(), signature) {
            warn!(from = %from, "message is not properly signed, discarding");
            return Ok(());
        }

        debug!(from = %from, "message verified, delivering");
        if let Some(reply) = self.sink.deliver(from, msg_text) {
            match self.send_message(from, &reply).await {
                Ok(status) => debug!(to = %from, ?status, "reply send finished"),
                Err(e) => warn!(to = %from, error = %e, "reply send errored"),
            }
        }
        Ok(())
    }

    /// Encrypts, signs and sends a message to an established contact.
    ///
    /// The transport response is mapped to a locally logged
    /// [`DeliveryStatus`]; rejections and faults are not surfaced to the
    /// peer.
    pub async fn send_message(
        &self,
        dest: &OnionAddress,
        msg_text: &str,
    ) -> Result<DeliveryStatus> {
        let Some(contact) = self.contacts.get_contact(dest)? else {
            return Err(OnionChatError::unknown_sender(format!(
                "{} is not a contact",
                dest
            )));
        };
        let recipient_key = CryptoIdentity::from_public_pem(&contact.pub_pem)?;
        let envelope = build_encrypted_message(
            &self.identity,
            &recipient_key,
            &self.my_address,
            dest,
            msg_text,
        )?;

        match self.transport.send(dest, &envelope).await {
            Ok(response) if response.is_accepted() => {
                info!(dest = %dest, "message delivered");
                Ok(DeliveryStatus::Delivered)
            }
            Ok(response) if response.status == 410 => {
                warn!(
                    dest = %dest,
                    "recipient no longer holds our key; the contact exchange must be redone"
                );
                Ok(DeliveryStatus::Failed)
            }
            Ok(response) => {
                if response.reason.as_deref() == Some(REASON_PROTOCOL_VERSION) {
                    warn!(dest = %dest, "message rejected: protocol version mismatch");
                } else {
                    warn!(dest = %dest, status = response.status, "message rejected");
                }
                Ok(DeliveryStatus::Failed)
            }
            Err(e) => {
                warn!(dest = %dest, error = %e, "message transport fault");
                Ok(DeliveryStatus::Failed)
            }
        }
    }
}
