//! The protocol context: everything a component operation needs, passed
//! explicitly. There are no ambient singletons; tests build as many contexts
//! as they need and wire them to each other.

use crate::address::OnionAddress;
use crate::crypto::{CryptoIdentity, MIN_PEER_KEY_BITS};
use crate::dispatch::MessageSink;
use crate::handshake::IncomingPolicy;
use crate::store::{ContactStore, PendingRequestStore};
use crate::transport::Transport;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Bundle of the local identity and its collaborators.
pub struct ProtocolContext {
    /// The local keypair.
    pub identity: CryptoIdentity,
    /// This node's own onion address.
    pub my_address: OnionAddress,
    /// Trusted contacts.
    pub contacts: Arc<dyn ContactStore>,
    /// Handshakes in flight.
    pub pending: Arc<dyn PendingRequestStore>,
    /// Outbound delivery.
    pub transport: Arc<dyn Transport>,
    /// Application-layer recipient of delivered messages.
    pub sink: Arc<dyn MessageSink>,
    /// What to do with valid unsolicited introductions.
    pub incoming_policy: IncomingPolicy,
    /// Smallest peer key accepted, in bits.
    pub min_peer_key_bits: usize,
    /// Serializes contact/pending mutations. Individual store operations are
    /// atomic on their own, but a handshake transition spans a read, a send
    /// and a write; interleaving two of those for the same address could
    /// violate the one-record-per-address invariant.
    pub(crate) state_lock: Mutex<()>,
}

impl ProtocolContext {
    /// Builds a context with the default policy (auto-accept) and key floor.
    pub fn new(
        identity: CryptoIdentity,
        my_address: OnionAddress,
        contacts: Arc<dyn ContactStore>,
        pending: Arc<dyn PendingRequestStore>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        Self {
            identity,
            my_address,
            contacts,
            pending,
            transport,
            sink,
            incoming_policy: IncomingPolicy::AutoAccept,
            min_peer_key_bits: MIN_PEER_KEY_BITS,
            state_lock: Mutex::new(()),
        }
    }

    /// Sets the incoming-introduction policy.
    pub fn with_incoming_policy(mut self, policy: IncomingPolicy) -> Self {
        self.incoming_policy = policy;
        self
    }

    /// Overrides the minimum accepted peer key size.
    pub fn with_min_peer_key_bits(mut self, bits: usize) -> Self {
        self.min_peer_key_bits = bits;
        self
    }
}

impl std::fmt::Debug for ProtocolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolContext")
            .field("my_address", &self.my_address)
            .field("identity", &self.identity)
            .field("incoming_policy", &self.incoming_policy)
            .field("min_peer_key_bits", &self.min_peer_key_bits)
            .finish()
    }
}
