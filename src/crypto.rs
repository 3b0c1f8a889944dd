//! Cryptographic primitives for VoteChain
//!
//! Block digests are SHA-256 rendered as lowercase hex. Party choices on the
//! public ledger are sealed with AES-256-GCM under a process-wide key; the
//! ledger only sees the [`PartyCipher`] capability and never handles the key.

use crate::error::ChainError;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;

/// SHA-256 of `data` as a 64-character lowercase hex string.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Encrypts party choices for the public ledger.
pub trait PartyCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, ChainError>;
    fn decrypt(&self, ciphertext: &str) -> Result<String, ChainError>;
}

/// AES-256-GCM cipher producing `base64(nonce || ciphertext)` tokens.
pub struct BallotCipher {
    cipher: Aes256Gcm,
}

impl BallotCipher {
    pub fn from_key_bytes(key_bytes: &[u8]) -> Result<Self, ChainError> {
        if key_bytes.len() != KEY_SIZE {
            return Err(ChainError::Crypto(format!(
                "AES-256-GCM requires a {}-byte key, got {}",
                KEY_SIZE,
                key_bytes.len()
            )));
        }
        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Fresh random key. Ciphertexts will not be readable after a restart.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        }
    }

    /// Random key encoded the way `ballot.secret_key` expects it.
    pub fn generate_encoded_key() -> String {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        STANDARD.encode(key)
    }
}

impl std::fmt::Debug for BallotCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BallotCipher").finish_non_exhaustive()
    }
}

impl PartyCipher for BallotCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, ChainError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| ChainError::Crypto(format!("AES-256-GCM encryption failed: {}", e)))?;

        let mut token = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        token.extend_from_slice(&nonce_bytes);
        token.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(token))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, ChainError> {
        let token = STANDARD
            .decode(ciphertext)
            .map_err(|e| ChainError::Crypto(format!("Ciphertext is not base64: {}", e)))?;
        if token.len() <= NONCE_SIZE {
            return Err(ChainError::Crypto("Ciphertext too short".to_string()));
        }

        let (nonce_bytes, body) = token.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), body)
            .map_err(|_| ChainError::Crypto("Ciphertext authentication failed".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|e| ChainError::Crypto(format!("Plaintext is not UTF-8: {}", e)))
    }
}
