//! Stateless inbound gate.
//!
//! Every received envelope passes through [`validate`] before any store
//! mutation or decryption happens. The validator reads protocol state but
//! never writes it, never decrypts, and never touches signatures; signature
//! checks need a trusted key (and, for encrypted data, the plaintext), both
//! of which only exist after acceptance. Its verdict is returned to the
//! sender synchronously at the HTTP boundary.

use crate::context::ProtocolContext;
use crate::crypto::CryptoIdentity;
use crate::envelope::{Content, RawEnvelope, PROTOCOL_VERSION};
use crate::error::Result;
use crate::store::{ContactStore, Direction, PendingRequestStore, RequestStatus};
use crate::transport::{REASON_KEY_SIZE, REASON_PROTOCOL_VERSION};
use tracing::debug;

/// The validator's decision on an inbound envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// HTTP-style status code returned to the sender: 200, 403, 409 or 410.
    pub code: u16,
    /// Machine-readable reason for 409 rejections.
    pub reason: Option<String>,
}

impl Verdict {
    /// Acceptance.
    pub fn accept() -> Self {
        Self {
            code: 200,
            reason: None,
        }
    }

    /// Rejection with a bare status code.
    pub fn reject(code: u16) -> Self {
        Self { code, reason: None }
    }

    /// Rejection with a reason string.
    pub fn reject_with(code: u16, reason: &str) -> Self {
        Self {
            code,
            reason: Some(reason.to_string()),
        }
    }

    /// Returns true if the envelope may proceed to dispatch.
    pub fn is_accepted(&self) -> bool {
        self.code == 200
    }
}

/// Validates a raw inbound envelope against current protocol state.
///
/// Errors are storage failures only; every protocol-level problem maps to a
/// rejection [`Verdict`].
pub fn validate(
    raw: &[u8],
    contacts: &dyn ContactStore,
    pending: &dyn PendingRequestStore,
    min_peer_key_bits: usize,
) -> Result<Verdict> {
    // Structural failures are indistinguishable from garbage: plain 403.
    let raw_envelope = match RawEnvelope::parse(raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!(error = %e, "rejecting unparseable envelope");
            return Ok(Verdict::reject(403));
        }
    };

    if raw_envelope.protocol.as_deref() != Some(PROTOCOL_VERSION) {
        debug!(
            got = raw_envelope.protocol.as_deref().unwrap_or("<none>"),
            "rejecting protocol version mismatch"
        );
        return Ok(Verdict::reject_with(409, REASON_PROTOCOL_VERSION));
    }

    let envelope = match raw_envelope.into_envelope() {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!(error = %e, "rejecting envelope with malformed content");
            return Ok(Verdict::reject(403));
        }
    };

    match &envelope.content {
        Content::Introduction { from, pub_pem, .. } => {
            // Address state gate: wholly unknown is a fresh request; a
            // delivered outgoing record means this is the peer reciprocating.
            // Anything else requires the key exchange to be restarted.
            let known_contact = contacts.has_contact(from)?;
            let pending_record = pending.get_pending(from)?;
            let state_ok = match (&known_contact, &pending_record) {
                (false, None) => true,
                (false, Some(record)) => {
                    record.direction == Direction::Outgoing
                        && record.status == RequestStatus::Delivered
                }
                (true, _) => false,
            };
            if !state_ok {
                debug!(from = %from, "rejecting duplicate introduction");
                return Ok(Verdict::reject(409));
            }

            // Key gate: must parse and meet the size floor before any record
            // referencing it may be created.
            match CryptoIdentity::from_public_pem(pub_pem) {
                Ok(peer_key) if peer_key.key_size_bits() >= min_peer_key_bits => {
                    debug!(
                        from = %from,
                        key_bits = peer_key.key_size_bits(),
                        "introduction accepted"
                    );
                    Ok(Verdict::accept())
                }
                Ok(peer_key) => {
                    debug!(
                        from = %from,
                        key_bits = peer_key.key_size_bits(),
                        min_bits = min_peer_key_bits,
                        "rejecting undersized introduction key"
                    );
                    Ok(Verdict::reject_with(409, REASON_KEY_SIZE))
                }
                Err(e) => {
                    debug!(from = %from, error = %e, "rejecting unparseable introduction key");
                    Ok(Verdict::reject_with(409, REASON_KEY_SIZE))
                }
            }
        }

        Content::EncryptedData { clear_from, .. } => {
            if contacts.has_contact(clear_from)? {
                Ok(Verdict::accept())
            } else {
                // No key on file for this sender; it must re-introduce.
                debug!(clear_from = %clear_from, "rejecting encrypted data from unknown sender");
                Ok(Verdict::reject(410))
            }
        }

        // The message shape only exists inside encrypted data.
        Content::Message { .. } => Ok(Verdict::reject(403)),
    }
}

impl ProtocolContext {
    /// Validates a raw inbound envelope against this context's state.
    pub fn validate_inbound(&self, raw: &[u8]) -> Result<Verdict> {
        validate(
            raw,
            self.contacts.as_ref(),
            self.pending.as_ref(),
            self.min_peer_key_bits,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::OnionAddress;
    use crate::envelope::build_introduction;
    use crate::store::{Contact, MemoryStore, PendingRequest};

    const TEST_MIN_BITS: usize = 2048;

    fn addr(label: &str) -> OnionAddress {
        OnionAddress::parse(&format!("{}.onion", label)).unwrap()
    }

    fn intro_bytes(identity: &CryptoIdentity, from: &OnionAddress, to: &OnionAddress) -> Vec<u8> {
        build_introduction(identity, from, to)
            .unwrap()
            .to_bytes()
            .unwrap()
    }

    fn check(store: &MemoryStore, raw: &[u8]) -> Verdict {
        validate(raw, store, store, TEST_MIN_BITS).unwrap()
    }

    #[test]
    fn test_garbage_is_403() {
        let store = MemoryStore::new();
        assert_eq!(check(&store, b"not json").code, 403);
        assert_eq!(check(&store, b"{}").code, 403);
    }

    #[test]
    fn test_protocol_mismatch_is_409() {
        let store = MemoryStore::new();
        let raw = br#"{"protocol":"2.0","content":{"type":"introduction","from":"aaaabbbbccccdddd.onion","to":"eeeeffffgggghhhh.onion","pubPem":"x"}}"#;
        let verdict = check(&store, raw);
        assert_eq!(verdict.code, 409);
        assert_eq!(verdict.reason.as_deref(), Some(REASON_PROTOCOL_VERSION));
    }

    #[test]
    fn test_missing_protocol_is_409() {
        let store = MemoryStore::new();
        let raw = br#"{"content":{"type":"introduction","from":"aaaabbbbccccdddd.onion","to":"eeeeffffgggghhhh.onion","pubPem":"x"}}"#;
        assert_eq!(check(&store, raw).code, 409);
    }

    #[test]
    fn test_unknown_content_type_is_403() {
        let store = MemoryStore::new();
        let raw = br#"{"protocol":"1.0","content":{"type":"ping"}}"#;
        assert_eq!(check(&store, raw).code, 403);
    }

    #[test]
    fn test_outer_message_type_is_403() {
        let store = MemoryStore::new();
        let raw = br#"{"protocol":"1.0","content":{"type":"message","from":"aaaabbbbccccdddd.onion","to":"eeeeffffgggghhhh.onion","msgText":"hi"}}"#;
        assert_eq!(check(&store, raw).code, 403);
    }

    #[test]
    fn test_malformed_from_address_is_403() {
        let store = MemoryStore::new();
        let raw = br#"{"protocol":"1.0","content":{"type":"introduction","from":"bad","to":"eeeeffffgggghhhh.onion","pubPem":"x"}}"#;
        assert_eq!(check(&store, raw).code, 403);
    }

    #[test]
    fn test_fresh_introduction_is_accepted() {
        let store = MemoryStore::new();
        let sender = CryptoIdentity::generate(TEST_MIN_BITS).unwrap();
        let raw = intro_bytes(&sender, &addr("aaaabbbbccccdddd"), &addr("eeeeffffgggghhhh"));
        assert!(check(&store, &raw).is_accepted());
    }

    #[test]
    fn test_undersized_key_is_409_ekeysize_and_no_record() {
        let store = MemoryStore::new();
        let sender = CryptoIdentity::generate(1024).unwrap();
        let from = addr("aaaabbbbccccdddd");
        let raw = intro_bytes(&sender, &from, &addr("eeeeffffgggghhhh"));

        let verdict = check(&store, &raw);
        assert_eq!(verdict.code, 409);
        assert_eq!(verdict.reason.as_deref(), Some(REASON_KEY_SIZE));
        // The validator must not have created any record for the address.
        assert!(store.get_pending(&from).unwrap().is_none());
        assert!(store.get_contact(&from).unwrap().is_none());
    }

    #[test]
    fn test_unparseable_key_is_409_ekeysize() {
        let store = MemoryStore::new();
        let raw = br#"{"protocol":"1.0","content":{"type":"introduction","from":"aaaabbbbccccdddd.onion","to":"eeeeffffgggghhhh.onion","pubPem":"garbage"}}"#;
        let verdict = check(&store, raw);
        assert_eq!(verdict.code, 409);
        assert_eq!(verdict.reason.as_deref(), Some(REASON_KEY_SIZE));
    }

    #[test]
    fn test_introduction_from_existing_contact_is_409() {
        let store = MemoryStore::new();
        let sender = CryptoIdentity::generate(TEST_MIN_BITS).unwrap();
        let from = addr("aaaabbbbccccdddd");
        store
            .put_contact(Contact {
                address: from.clone(),
                pub_pem: sender.public_key_pem().to_string(),
            })
            .unwrap();

        let raw = intro_bytes(&sender, &from, &addr("eeeeffffgggghhhh"));
        assert_eq!(check(&store, &raw).code, 409);
    }

    #[test]
    fn test_introduction_matching_delivered_outgoing_is_accepted() {
        let store = MemoryStore::new();
        let sender = CryptoIdentity::generate(TEST_MIN_BITS).unwrap();
        let from = addr("aaaabbbbccccdddd");
        store
            .put_pending(PendingRequest {
                address: from.clone(),
                direction: Direction::Outgoing,
                status: RequestStatus::Delivered,
                pending_pub_pem: None,
            })
            .unwrap();

        let raw = intro_bytes(&sender, &from, &addr("eeeeffffgggghhhh"));
        assert!(check(&store, &raw).is_accepted());
    }

    #[test]
    fn test_introduction_during_outgoing_sending_is_409() {
        let store = MemoryStore::new();
        let sender = CryptoIdentity::generate(TEST_MIN_BITS).unwrap();
        let from = addr("aaaabbbbccccdddd");
        store
            .put_pending(PendingRequest {
                address: from.clone(),
                direction: Direction::Outgoing,
                status: RequestStatus::Sending,
                pending_pub_pem: None,
            })
            .unwrap();

        let raw = intro_bytes(&sender, &from, &addr("eeeeffffgggghhhh"));
        assert_eq!(check(&store, &raw).code, 409);
    }

    #[test]
    fn test_introduction_during_incoming_pending_is_409() {
        let store = MemoryStore::new();
        let sender = CryptoIdentity::generate(TEST_MIN_BITS).unwrap();
        let from = addr("aaaabbbbccccdddd");
        store
            .put_pending(PendingRequest {
                address: from.clone(),
                direction: Direction::Incoming,
                status: RequestStatus::Sending,
                pending_pub_pem: Some(sender.public_key_pem().to_string()),
            })
            .unwrap();

        let raw = intro_bytes(&sender, &from, &addr("eeeeffffgggghhhh"));
        assert_eq!(check(&store, &raw).code, 409);
    }

    #[test]
    fn test_encrypted_data_from_contact_is_accepted() {
        let store = MemoryStore::new();
        let from = addr("aaaabbbbccccdddd");
        store
            .put_contact(Contact {
                address: from.clone(),
                pub_pem: "pem".to_string(),
            })
            .unwrap();

        let raw = format!(
            r#"{{"protocol":"1.0","content":{{"type":"encryptedData","clearFrom":"{}","data":"AAAA"}}}}"#,
            from
        );
        assert!(check(&store, raw.as_bytes()).is_accepted());
    }

    #[test]
    fn test_encrypted_data_from_unknown_sender_is_410() {
        let store = MemoryStore::new();
        let raw = br#"{"protocol":"1.0","content":{"type":"encryptedData","clearFrom":"aaaabbbbccccdddd.onion","data":"AAAA"}}"#;
        assert_eq!(check(&store, raw).code, 410);
    }
}
