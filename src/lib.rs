//! # onionchat: peer-to-peer encrypted messaging over onion addresses
//!
//! Parties are identified by the self-certifying hostname of their hidden
//! service. Each node holds one RSA keypair, advertises its public key
//! through a signed *introduction* handshake, and thereafter exchanges
//! confidentiality- and integrity-protected messages.
//!
//! The crate implements the trust-establishment handshake and the
//! message-envelope protocol: key management, signing and verification,
//! chunked asymmetric encryption, the contact-request state machine, and the
//! inbound validation/dispatch pipeline. The anonymity-network transport,
//! the raw HTTP listener and the persistence backends are collaborators
//! behind the [`transport::Transport`], [`store`] and [`dispatch::MessageSink`]
//! seams.
//!
//! ## Protocol sketch
//!
//! ```text
//! A                                   B
//! |-- introduction (signed, pubPem) ->|   B validates, records incoming,
//! |<- introduction (signed, pubPem) --|   auto-reciprocates; both promote
//! |                                   |   the peer to a contact
//! |-- encryptedData(message) -------->|   B decrypts, verifies against the
//! |<- encryptedData(reply) -----------|   stored key, delivers and replies
//! ```
//!
//! All protocol logic runs through an explicit [`context::ProtocolContext`];
//! there is no ambient state. See `validate` in [`validator`] for the gate
//! every inbound envelope passes before any side effect occurs.

pub mod address;
pub mod config;
pub mod context;
pub mod crypto;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod handshake;
pub mod store;
pub mod transport;
pub mod validator;

pub use address::OnionAddress;
pub use context::ProtocolContext;
pub use error::{OnionChatError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum inbound request body accepted at the HTTP boundary, in bytes.
pub const MAX_REQUEST_BODY_BYTES: usize = 10_000_000;
