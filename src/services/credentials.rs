//! Stored credential encryption using ChaCha20-Poly1305
//!
//! Secrets at rest (database passwords, isolated SSH passwords, S3 keys) are
//! stored as a single base64 token: `salt (16) || nonce (12) || ciphertext`.
//! The key is derived from the configured encryption key with Argon2id and
//! the per-secret salt.

use argon2::Argon2;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    ChaCha20Poly1305, Key, Nonce,
};

use crate::utils::BackupError;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// Encrypts and decrypts stored secrets with the application key
#[derive(Clone)]
pub struct SecretCipher {
    key: String,
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipher").finish_non_exhaustive()
    }
}

impl SecretCipher {
    pub fn new(key: impl Into<String>) -> Result<Self, BackupError> {
        let key = key.into();
        if key.is_empty() {
            return Err(BackupError::config("Encryption key is not configured"));
        }
        Ok(Self { key })
    }

    /// Encrypt a plaintext secret into a storable token
    pub fn encrypt(&self, plaintext: &str) -> Result<String, BackupError> {
        let salt: [u8; SALT_LEN] = rand::random();
        let key = self.derive_key(&salt)?;

        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| BackupError::config(format!("Encryption failed: {}", e)))?;

        let mut token = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
        token.extend_from_slice(&salt);
        token.extend_from_slice(&nonce);
        token.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(token))
    }

    /// Decrypt a stored token
    pub fn decrypt(&self, token: &str) -> Result<String, BackupError> {
        let raw = BASE64
            .decode(token.trim())
            .map_err(|_| BackupError::config("Stored secret is not valid base64"))?;

        if raw.len() <= SALT_LEN + NONCE_LEN {
            return Err(BackupError::config("Stored secret is truncated"));
        }

        let (salt, rest) = raw.split_at(SALT_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

        let key = self.derive_key(salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| {
                BackupError::config("Failed to decrypt stored secret - wrong encryption key?")
            })?;

        String::from_utf8(plaintext)
            .map_err(|_| BackupError::config("Decrypted secret is not valid UTF-8"))
    }

    /// Decrypt an optional stored value, passing `None` and empty strings through
    pub fn decrypt_optional(&self, token: Option<&str>) -> Result<Option<String>, BackupError> {
        match token {
            Some(t) if !t.is_empty() => self.decrypt(t).map(Some),
            _ => Ok(None),
        }
    }

    fn derive_key(&self, salt: &[u8]) -> Result<[u8; 32], BackupError> {
        let mut key = [0u8; 32];
        Argon2::default()
            .hash_password_into(self.key.as_bytes(), salt, &mut key)
            .map_err(|e| BackupError::config(format!("Key derivation failed: {}", e)))?;
        Ok(key)
    }
}
