//! Error types for onionchat operations.

use thiserror::Error;

/// Result type alias for onionchat operations.
pub type Result<T> = std::result::Result<T, OnionChatError>;

/// Main error type for onionchat operations.
#[derive(Error, Debug)]
pub enum OnionChatError {
    /// Persisted private key material could not be parsed
    #[error("Key parse error: {0}")]
    KeyParse(String),

    /// A peer public key is malformed or below the minimum size
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Ciphertext is not a whole number of key-sized blocks, or a block failed to decrypt
    #[error("Malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    /// Wire envelope failed structural parsing
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Signature verification failed
    #[error("Invalid signature: {0}")]
    SignatureInvalid(String),

    /// Encrypted data arrived from an address with no stored contact key
    #[error("Unknown sender: {0}")]
    UnknownSender(String),

    /// A handshake already exists for this address
    #[error("Duplicate handshake: {0}")]
    DuplicateHandshake(String),

    /// Outbound transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Persistent store errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Peer address failed format validation
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl OnionChatError {
    /// Creates a new key parse error.
    pub fn key_parse<T: ToString>(msg: T) -> Self {
        Self::KeyParse(msg.to_string())
    }

    /// Creates a new invalid key error.
    pub fn invalid_key<T: ToString>(msg: T) -> Self {
        Self::InvalidKey(msg.to_string())
    }

    /// Creates a new malformed ciphertext error.
    pub fn malformed_ciphertext<T: ToString>(msg: T) -> Self {
        Self::MalformedCiphertext(msg.to_string())
    }

    /// Creates a new malformed envelope error.
    pub fn malformed_envelope<T: ToString>(msg: T) -> Self {
        Self::MalformedEnvelope(msg.to_string())
    }

    /// Creates a new invalid signature error.
    pub fn signature_invalid<T: ToString>(msg: T) -> Self {
        Self::SignatureInvalid(msg.to_string())
    }

    /// Creates a new unknown sender error.
    pub fn unknown_sender<T: ToString>(msg: T) -> Self {
        Self::UnknownSender(msg.to_string())
    }

    /// Creates a new duplicate handshake error.
    pub fn duplicate_handshake<T: ToString>(msg: T) -> Self {
        Self::DuplicateHandshake(msg.to_string())
    }

    /// Creates a new transport error.
    pub fn transport<T: ToString>(msg: T) -> Self {
        Self::Transport(msg.to_string())
    }

    /// Creates a new storage error.
    pub fn storage<T: ToString>(msg: T) -> Self {
        Self::Storage(msg.to_string())
    }

    /// Creates a new serialization error.
    pub fn serialization<T: ToString>(msg: T) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Creates a new invalid address error.
    pub fn invalid_address<T: ToString>(msg: T) -> Self {
        Self::InvalidAddress(msg.to_string())
    }

    /// Creates a new configuration error.
    pub fn config<T: ToString>(msg: T) -> Self {
        Self::Config(msg.to_string())
    }
}
