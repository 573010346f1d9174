//! Wire envelope construction and parsing.
//!
//! Two shapes travel over the wire:
//!
//! - a plaintext *introduction*, signed with the sender's private key and
//!   carrying its public key PEM;
//! - *encryptedData*, wrapping a signed inner `message` envelope that is
//!   JSON-serialized and encrypted whole with the recipient's public key.
//!
//! Signatures are always computed over the [canonical form](canonical_json)
//! of the content: key-sorted JSON, byte-stable regardless of the field order
//! the sender happened to serialize with. The receiver re-serializes the
//! parsed content and must reproduce the exact signed bytes.

use crate::address::OnionAddress;
use crate::crypto::CryptoIdentity;
use crate::error::{OnionChatError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The protocol version this crate speaks.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Typed envelope content. The tag is the wire `type` field; unknown tags
/// fail deserialization and are rejected at the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Content {
    /// Signed handshake message advertising a public key.
    #[serde(rename = "introduction")]
    Introduction {
        from: OnionAddress,
        to: OnionAddress,
        #[serde(rename = "pubPem")]
        pub_pem: String,
    },
    /// Ciphertext wrapper; `clear_from` names the sender so the receiver can
    /// select a stored key before decrypting.
    #[serde(rename = "encryptedData")]
    EncryptedData {
        #[serde(rename = "clearFrom")]
        clear_from: OnionAddress,
        data: String,
    },
    /// Inner, post-decryption message payload.
    #[serde(rename = "message")]
    Message {
        from: OnionAddress,
        to: OnionAddress,
        #[serde(rename = "msgText")]
        msg_text: String,
    },
}

/// A fully parsed envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version; present on outer envelopes, absent on the inner
    /// message envelope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    /// Typed content.
    pub content: Content,
    /// Base64 signature over the canonical form of `content`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// An envelope whose version has been read but whose content is not yet
/// typed. The validator checks the protocol version against this shape
/// before committing to content interpretation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEnvelope {
    /// Protocol version as transmitted.
    pub protocol: Option<String>,
    /// Untyped content.
    pub content: Value,
    /// Base64 signature, if present.
    pub signature: Option<String>,
}

impl RawEnvelope {
    /// Parses the outer JSON structure. Any failure is `MalformedEnvelope`.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw)
            .map_err(|e| OnionChatError::malformed_envelope(format!("bad outer envelope: {}", e)))
    }

    /// Types the content, consuming the raw envelope.
    pub fn into_envelope(self) -> Result<Envelope> {
        let content: Content = serde_json::from_value(self.content)
            .map_err(|e| OnionChatError::malformed_envelope(format!("bad content: {}", e)))?;
        Ok(Envelope {
            protocol: self.protocol,
            content,
            signature: self.signature,
        })
    }
}

impl Envelope {
    /// Parses a complete envelope from raw bytes.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        RawEnvelope::parse(raw)?.into_envelope()
    }

    /// Serializes the envelope for transmission.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| OnionChatError::serialization(format!("envelope serialization failed: {}", e)))
    }
}

/// Serializes content to its canonical form: JSON with object keys sorted.
///
/// Routing through `serde_json::Value` is what provides the stability:
/// its object map is BTree-backed, so key order in the output is independent
/// of field declaration or wire order.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value)
        .map_err(|e| OnionChatError::serialization(format!("canonicalization failed: {}", e)))?;
    serde_json::to_string(&value)
        .map_err(|e| OnionChatError::serialization(format!("canonicalization failed: {}", e)))
}

/// Builds a signed introduction from `identity` to `to`.
pub fn build_introduction(
    identity: &CryptoIdentity,
    from: &OnionAddress,
    to: &OnionAddress,
) -> Result<Envelope> {
    let content = Content::Introduction {
        from: from.clone(),
        to: to.clone(),
        pub_pem: identity.public_key_pem().to_string(),
    };
    let signature = identity.sign(canonical_json(&content)?.as_bytes())?;
    Ok(Envelope {
        protocol: Some(PROTOCOL_VERSION.to_string()),
        content,
        signature: Some(signature),
    })
}

/// Builds an encrypted message envelope.
///
/// The inner `message` content is signed with the sender's key, wrapped in an
/// envelope, JSON-serialized and encrypted whole with `recipient_key`, then
/// wrapped as `encryptedData` naming the sender in the clear.
pub fn build_encrypted_message(
    identity: &CryptoIdentity,
    recipient_key: &CryptoIdentity,
    from: &OnionAddress,
    to: &OnionAddress,
    msg_text: &str,
) -> Result<Envelope> {
    let inner_content = Content::Message {
        from: from.clone(),
        to: to.clone(),
        msg_text: msg_text.to_string(),
    };
    let signature = identity.sign(canonical_json(&inner_content)?.as_bytes())?;
    let inner = Envelope {
        protocol: None,
        content: inner_content,
        signature: Some(signature),
    };

    let data = recipient_key.encrypt(&inner.to_bytes()?)?;
    Ok(Envelope {
        protocol: Some(PROTOCOL_VERSION.to_string()),
        content: Content::EncryptedData {
            clear_from: from.clone(),
            data,
        },
        signature: None,
    })
}

/// Parses the decrypted payload of an `encryptedData` envelope.
///
/// The inner envelope must carry a signed `message`; anything else is
/// `MalformedEnvelope`.
pub fn parse_inner_message(plaintext: &[u8]) -> Result<Envelope> {
    let inner = Envelope::parse(plaintext)?;
    match inner.content {
        Content::Message { .. } => Ok(inner),
        _ => Err(OnionChatError::malformed_envelope(
            "inner envelope is not a message",
        )),
    }
}
