//! AES-256-GCM sealing for stored secrets.
//!
//! Every secret gets a fresh nonce, and the row it belongs to
//! (`service`, `username`) is bound in as associated data: a ciphertext
//! copied onto another row fails to open.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Key, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Size of the store key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// 96-bit GCM nonce
const NONCE_SIZE: usize = 12;

/// A sealed secret as persisted: both fields base64.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: String,
    pub nonce: String,
}

/// Cipher bound to the store key.
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Encrypts `plaintext` for the `(service, username)` row.
    pub fn seal(&self, service: &str, username: &str, plaintext: &str) -> Result<Sealed> {
        let aad = associated_data(service, username);
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: &aad,
                },
            )
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        Ok(Sealed {
            ciphertext: BASE64.encode(ciphertext),
            nonce: BASE64.encode(nonce),
        })
    }

    /// Decrypts a secret read from the `(service, username)` row.
    ///
    /// Fails on a different key, which is how the store notices that the
    /// machine fingerprint changed.
    pub fn open(&self, service: &str, username: &str, sealed: &Sealed) -> Result<String> {
        let ciphertext = BASE64
            .decode(&sealed.ciphertext)
            .context("Failed to decode ciphertext")?;
        let nonce = BASE64.decode(&sealed.nonce).context("Failed to decode nonce")?;
        if nonce.len() != NONCE_SIZE {
            return Err(anyhow!(
                "Invalid nonce size: expected {}, got {}",
                NONCE_SIZE,
                nonce.len()
            ));
        }

        let aad = associated_data(service, username);
        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|e| anyhow!("Decryption failed (wrong key or corrupted data): {}", e))?;

        String::from_utf8(plaintext).context("Decrypted data is not valid UTF-8")
    }
}

fn associated_data(service: &str, username: &str) -> Vec<u8> {
    let mut aad = Vec::with_capacity(service.len() + username.len() + 1);
    aad.extend_from_slice(service.as_bytes());
    aad.push(0);
    aad.extend_from_slice(username.as_bytes());
    aad
}
