use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum EncryptionError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("Invalid key length")]
    InvalidKeyLength,
    #[error("Invalid key encoding: {0}")]
    InvalidKeyEncoding(#[from] hex::FromHexError),
}

/// Symmetric encryption for notification channel configurations (AES-256-GCM).
pub struct EncryptionService {
    cipher: Aes256Gcm,
}

impl EncryptionService {
    /// Creates a new EncryptionService with a 32-byte key.
    pub fn new(key: &[u8]) -> Result<Self, EncryptionError> {
        Ok(Self {
            cipher: Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::InvalidKeyLength)?,
        })
    }

    /// Creates the service from a 64-character hex key, as found in the config.
    pub fn from_hex_key(key_hex: &str) -> Result<Self, EncryptionError> {
        let key = hex::decode(key_hex.trim())?;
        Self::new(&key)
    }

    /// Encrypts a plaintext byte slice.
    /// Prepends a 12-byte (96-bit) nonce to the ciphertext.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| EncryptionError::EncryptionFailed(e.to_string()))?;

        let mut result = nonce.to_vec();
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    /// Decrypts data produced by [`EncryptionService::encrypt`].
    pub fn decrypt(&self, encrypted_data: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        if encrypted_data.len() < NONCE_LEN {
            return Err(EncryptionError::DecryptionFailed(
                "Invalid encrypted data: too short to contain a nonce".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = encrypted_data.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| EncryptionError::DecryptionFailed(e.to_string()))
    }
}
