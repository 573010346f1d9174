//! RSA identity: key management, chunked encryption, signing.
//!
//! A [`CryptoIdentity`] is either *local* (holds the private key, loaded from
//! or persisted to the key store at startup) or *peer* (public key only,
//! parsed from the PEM carried in an introduction). Exactly one local
//! identity exists per process and it is immutable after creation.

use crate::crypto::{fix_pem, DEFAULT_KEY_BITS, OAEP_RESERVED_BYTES, PSS_SALT_LEN};
use crate::error::{OnionChatError, Result};
use crate::store::KeyStore;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, Pss, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// An RSA identity, local or peer-side.
#[derive(Clone)]
pub struct CryptoIdentity {
    /// Private key; `None` for peer identities.
    private_key: Option<RsaPrivateKey>,
    /// Public half, always present.
    public_key: RsaPublicKey,
    /// SPKI PEM encoding of the public key, as advertised in introductions.
    public_key_pem: String,
}

impl std::fmt::Debug for CryptoIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoIdentity")
            .field("key_size_bits", &self.key_size_bits())
            .field("has_private_key", &self.private_key.is_some())
            .finish()
    }
}

impl CryptoIdentity {
    /// Loads the local identity from the key store, generating and persisting
    /// a fresh keypair if no material is stored yet.
    ///
    /// Fails with `KeyParse` if stored material exists but cannot be parsed.
    pub fn load_or_create(store: &dyn KeyStore) -> Result<Self> {
        match store.load_private_pem()? {
            Some(pem) => {
                debug!("loading identity key from store");
                Self::from_private_pem(&pem)
            }
            None => {
                info!(bits = DEFAULT_KEY_BITS, "no stored key, generating identity keypair");
                let identity = Self::generate(DEFAULT_KEY_BITS)?;
                let pem = identity
                    .private_key
                    .as_ref()
                    .ok_or_else(|| OnionChatError::key_parse("generated identity lacks private key"))?
                    .to_pkcs8_pem(LineEnding::LF)
                    .map_err(|e| OnionChatError::key_parse(format!("PEM encoding failed: {}", e)))?;
                store.store_private_pem(&pem)?;
                Ok(identity)
            }
        }
    }

    /// Generates a new keypair of the given size.
    pub fn generate(bits: usize) -> Result<Self> {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| OnionChatError::key_parse(format!("key generation failed: {}", e)))?;
        Self::from_private_key(private_key)
    }

    /// Builds a local identity from private key PEM (PKCS#8 or PKCS#1).
    pub fn from_private_pem(pem: &str) -> Result<Self> {
        let pem = fix_pem(pem);
        let private_key = RsaPrivateKey::from_pkcs8_pem(&pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(&pem))
            .map_err(|e| OnionChatError::key_parse(format!("bad private key PEM: {}", e)))?;
        Self::from_private_key(private_key)
    }

    fn from_private_key(private_key: RsaPrivateKey) -> Result<Self> {
        let public_key = RsaPublicKey::from(&private_key);
        let public_key_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| OnionChatError::key_parse(format!("PEM encoding failed: {}", e)))?;
        Ok(Self {
            private_key: Some(private_key),
            public_key,
            public_key_pem,
        })
    }

    /// Builds a peer identity from public key PEM (SPKI or PKCS#1).
    ///
    /// Fails with `InvalidKey` on malformed PEM.
    pub fn from_public_pem(pem: &str) -> Result<Self> {
        let pem = fix_pem(pem);
        let public_key = RsaPublicKey::from_public_key_pem(&pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(&pem))
            .map_err(|e| OnionChatError::invalid_key(format!("bad public key PEM: {}", e)))?;
        let public_key_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| OnionChatError::invalid_key(format!("PEM encoding failed: {}", e)))?;
        Ok(Self {
            private_key: None,
            public_key,
            public_key_pem,
        })
    }

    /// Returns the public key PEM (SPKI).
    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    /// Returns the key size in bits, derived from the modulus length.
    pub fn key_size_bits(&self) -> usize {
        self.public_key.size() * 8
    }

    /// Returns the key size in bytes.
    pub fn key_size_bytes(&self) -> usize {
        self.public_key.size()
    }

    /// Returns true if this identity holds the private key.
    pub fn has_private_key(&self) -> bool {
        self.private_key.is_some()
    }

    /// Encrypts a plaintext of any length to the holder of this key.
    ///
    /// OAEP can encrypt at most `key_size_bytes - 42` bytes per operation, so
    /// the plaintext is split into chunks of that size, each chunk encrypted
    /// to a `key_size_bytes`-long block, and the blocks concatenated before
    /// base64 encoding.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let mut rng = rand::thread_rng();
        let chunk_size = self.key_size_bytes() - OAEP_RESERVED_BYTES;
        let mut ciphertext = Vec::with_capacity(
            plaintext.len().div_ceil(chunk_size).max(1) * self.key_size_bytes(),
        );

        // An empty plaintext still produces one (empty) chunk so that the
        // output is decryptable rather than zero-length.
        if plaintext.is_empty() {
            let block = self
                .public_key
                .encrypt(&mut rng, Oaep::new::<Sha1>(), plaintext)
                .map_err(|e| OnionChatError::invalid_key(format!("encryption failed: {}", e)))?;
            ciphertext.extend_from_slice(&block);
        } else {
            for chunk in plaintext.chunks(chunk_size) {
                let block = self
                    .public_key
                    .encrypt(&mut rng, Oaep::new::<Sha1>(), chunk)
                    .map_err(|e| OnionChatError::invalid_key(format!("encryption failed: {}", e)))?;
                ciphertext.extend_from_slice(&block);
            }
        }

        Ok(BASE64.encode(ciphertext))
    }

    /// Decrypts a base64 ciphertext produced by [`encrypt`](Self::encrypt).
    ///
    /// The decoded ciphertext must be a whole number of `key_size_bytes`
    /// blocks; anything else is `MalformedCiphertext`. Requires the private
    /// key.
    pub fn decrypt(&self, ciphertext_b64: &str) -> Result<Vec<u8>> {
        let private_key = self
            .private_key
            .as_ref()
            .ok_or_else(|| OnionChatError::invalid_key("peer identity cannot decrypt"))?;

        let ciphertext = BASE64
            .decode(ciphertext_b64)
            .map_err(|e| OnionChatError::malformed_ciphertext(format!("bad base64: {}", e)))?;

        let block_size = self.key_size_bytes();
        if ciphertext.is_empty() || ciphertext.len() % block_size != 0 {
            return Err(OnionChatError::malformed_ciphertext(format!(
                "ciphertext length {} is not a multiple of the {}-byte block size",
                ciphertext.len(),
                block_size
            )));
        }

        let mut plaintext = Vec::new();
        for block in ciphertext.chunks(block_size) {
            let chunk = private_key
                .decrypt(Oaep::new::<Sha1>(), block)
                .map_err(|e| OnionChatError::malformed_ciphertext(format!("block decryption failed: {}", e)))?;
            plaintext.extend_from_slice(&chunk);
        }
        Ok(plaintext)
    }

    /// Signs data: SHA-256 digest, RSASSA-PSS with a 20-byte salt, base64.
    pub fn sign(&self, data: &[u8]) -> Result<String> {
        let private_key = self
            .private_key
            .as_ref()
            .ok_or_else(|| OnionChatError::invalid_key("peer identity cannot sign"))?;

        let digest = Sha256::digest(data);
        let mut rng = rand::thread_rng();
        let signature = private_key
            .sign_with_rng(&mut rng, Pss::new_with_salt::<Sha256>(PSS_SALT_LEN), &digest)
            .map_err(|e| OnionChatError::signature_invalid(format!("signing failed: {}", e)))?;
        Ok(BASE64.encode(signature))
    }

    /// Verifies a base64 signature over `data` against this identity's
    /// public key.
    ///
    /// Never errors: malformed base64, a mismatched key, or an invalid
    /// signature all return `false`.
    pub fn verify(&self, data: &[u8], signature_b64: &str) -> bool {
        let signature = match BASE64.decode(signature_b64) {
            Ok(sig) => sig,
            Err(_) => return false,
        };
        let digest = Sha256::digest(data);
        self.public_key
            .verify(Pss::new_with_salt::<Sha256>(PSS_SALT_LEN), &digest, &signature)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::MIN_PEER_KEY_BITS;
    use crate::store::MemoryStore;

    // 2048 bits keeps key generation fast; the minimum-size gate lives in
    // the validator, not here.
    const TEST_KEY_BITS: usize = 2048;

    fn test_identity() -> CryptoIdentity {
        CryptoIdentity::generate(TEST_KEY_BITS).unwrap()
    }

    #[test]
    fn test_generate_reports_key_size() {
        let identity = test_identity();
        assert_eq!(identity.key_size_bits(), TEST_KEY_BITS);
        assert_eq!(identity.key_size_bytes(), TEST_KEY_BITS / 8);
        assert!(identity.has_private_key());
    }

    #[test]
    fn test_load_or_create_persists_new_key() {
        let store = MemoryStore::new();
        let identity = CryptoIdentity::load_or_create(&store).unwrap();
        assert!(identity.has_private_key());
        assert_eq!(identity.key_size_bits(), DEFAULT_KEY_BITS);

        // A second load must parse the stored material, not regenerate.
        let reloaded = CryptoIdentity::load_or_create(&store).unwrap();
        assert_eq!(reloaded.public_key_pem(), identity.public_key_pem());
    }

    #[test]
    fn test_load_or_create_rejects_garbage_material() {
        let store = MemoryStore::new();
        store.store_private_pem("not a pem at all").unwrap();
        let result = CryptoIdentity::load_or_create(&store);
        assert!(matches!(result, Err(OnionChatError::KeyParse(_))));
    }

    #[test]
    fn test_from_public_pem_round_trip() {
        let identity = test_identity();
        let peer = CryptoIdentity::from_public_pem(identity.public_key_pem()).unwrap();
        assert_eq!(peer.key_size_bits(), TEST_KEY_BITS);
        assert!(!peer.has_private_key());
    }

    #[test]
    fn test_from_public_pem_accepts_crlf() {
        let identity = test_identity();
        let crlf_pem = identity.public_key_pem().replace('\n', "\r\n");
        let peer = CryptoIdentity::from_public_pem(&crlf_pem).unwrap();
        assert_eq!(peer.public_key_pem(), identity.public_key_pem());
    }

    #[test]
    fn test_from_public_pem_rejects_garbage() {
        let result = CryptoIdentity::from_public_pem("-----BEGIN PUBLIC KEY-----\nnope\n-----END PUBLIC KEY-----\n");
        assert!(matches!(result, Err(OnionChatError::InvalidKey(_))));
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let identity = test_identity();
        let message = b"hello across the onion network";
        let ciphertext = identity.encrypt(message).unwrap();
        let plaintext = identity.decrypt(&ciphertext).unwrap();
        assert_eq!(plaintext, message);
    }

    #[test]
    fn test_encrypt_decrypt_empty_payload() {
        let identity = test_identity();
        let ciphertext = identity.encrypt(b"").unwrap();
        let plaintext = identity.decrypt(&ciphertext).unwrap();
        assert!(plaintext.is_empty());
    }

    #[test]
    fn test_encrypt_decrypt_spans_chunk_boundaries() {
        let identity = test_identity();
        let chunk_size = identity.key_size_bytes() - OAEP_RESERVED_BYTES;

        for len in [chunk_size - 1, chunk_size, chunk_size + 1, chunk_size * 3 + 7] {
            let message: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let ciphertext = identity.encrypt(&message).unwrap();
            let plaintext = identity.decrypt(&ciphertext).unwrap();
            assert_eq!(plaintext, message, "round trip failed at length {}", len);
        }
    }

    #[test]
    fn test_peer_identity_encrypts_only_holder_decrypts() {
        let identity = test_identity();
        let peer = CryptoIdentity::from_public_pem(identity.public_key_pem()).unwrap();

        let ciphertext = peer.encrypt(b"for your eyes only").unwrap();
        assert!(matches!(
            peer.decrypt(&ciphertext),
            Err(OnionChatError::InvalidKey(_))
        ));
        assert_eq!(identity.decrypt(&ciphertext).unwrap(), b"for your eyes only");
    }

    #[test]
    fn test_decrypt_rejects_partial_block() {
        let identity = test_identity();
        let ciphertext = identity.encrypt(b"whole blocks only").unwrap();
        let mut raw = BASE64.decode(&ciphertext).unwrap();
        raw.truncate(raw.len() - 1);
        let truncated = BASE64.encode(raw);
        assert!(matches!(
            identity.decrypt(&truncated),
            Err(OnionChatError::MalformedCiphertext(_))
        ));
    }

    #[test]
    fn test_decrypt_rejects_bad_base64() {
        let identity = test_identity();
        assert!(matches!(
            identity.decrypt("%%% not base64 %%%"),
            Err(OnionChatError::MalformedCiphertext(_))
        ));
    }

    #[test]
    fn test_sign_verify() {
        let identity = test_identity();
        let data = b"signed statement";
        let signature = identity.sign(data).unwrap();
        assert!(identity.verify(data, &signature));
        assert!(!identity.verify(b"different statement", &signature));
    }

    #[test]
    fn test_verify_by_peer_identity() {
        let identity = test_identity();
        let peer = CryptoIdentity::from_public_pem(identity.public_key_pem()).unwrap();
        let signature = identity.sign(b"attest").unwrap();
        assert!(peer.verify(b"attest", &signature));
    }

    #[test]
    fn test_verify_never_panics_on_garbage() {
        let identity = test_identity();
        assert!(!identity.verify(b"data", "!!! not base64 !!!"));
        assert!(!identity.verify(b"data", ""));
        assert!(!identity.verify(b"data", &BASE64.encode([0u8; 8])));
        assert!(!identity.verify(b"data", &BASE64.encode(vec![0xffu8; 512])));
    }

    #[test]
    fn test_verify_rejects_signature_from_other_key() {
        let a = test_identity();
        let b = test_identity();
        let signature = a.sign(b"claim").unwrap();
        assert!(!b.verify(b"claim", &signature));
    }

    #[test]
    fn test_min_key_size_constant_matches_default() {
        // New identities must always pass the peer gate.
        assert!(DEFAULT_KEY_BITS >= MIN_PEER_KEY_BITS);
    }
}
