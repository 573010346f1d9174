//! Cryptographic identity and primitives.
//!
//! The protocol is built on plain RSA: every party holds one keypair, peers
//! learn each other's public keys through signed introductions, and message
//! payloads are encrypted directly with the recipient's public key. Because
//! RSA/OAEP bounds each operation to the key modulus, plaintexts are split
//! into fixed-size chunks and each chunk is encrypted independently; see
//! [`CryptoIdentity::encrypt`].
//!
//! ## Wire-format constants
//!
//! - Keys are 3072-bit RSA minimum; smaller peer keys are rejected.
//! - OAEP padding (SHA-1) reserves 42 bytes per chunk.
//! - Signatures are RSASSA-PSS over a SHA-256 digest with a 20-byte salt.

pub mod identity;

pub use identity::CryptoIdentity;

/// Key size for newly generated identities, in bits.
pub const DEFAULT_KEY_BITS: usize = 3072;

/// Minimum accepted peer key size, in bits.
pub const MIN_PEER_KEY_BITS: usize = 3072;

/// Bytes reserved by OAEP (SHA-1) padding in each encrypted chunk.
pub const OAEP_RESERVED_BYTES: usize = 42;

/// Salt length for PSS signatures, in bytes.
pub const PSS_SALT_LEN: usize = 20;

/// Strips carriage returns from PEM data.
///
/// Peers on other platforms may transmit PEM with CRLF line endings; the
/// parser wants bare LF.
pub fn fix_pem(pem: &str) -> String {
    pem.replace('\r', "")
}
