//! Credential encryption using AES-256-GCM
//!
//! Per-employee notetaker API keys are stored encrypted in the database and
//! decrypted only in memory for the duration of a sync. The key comes from
//! the PARLEY_ENCRYPTION_KEY environment variable; rotation overwrites the
//! encrypted column.

use base64::Engine;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{Error, Result};

/// Length of the nonce in bytes (96 bits for GCM)
const NONCE_LENGTH: usize = 12;

/// Secret encryptor/decryptor for stored credentials
pub struct SecretBox {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl SecretBox {
    /// Create a secret box from the environment
    ///
    /// Expects PARLEY_ENCRYPTION_KEY to be a 32-byte base64-encoded key
    pub fn from_env() -> Result<Self> {
        let key_b64 = std::env::var("PARLEY_ENCRYPTION_KEY").map_err(|_| {
            Error::Configuration(
                "PARLEY_ENCRYPTION_KEY not set. Generate with: openssl rand -base64 32".to_string(),
            )
        })?;

        Self::from_base64_key(&key_b64)
    }

    /// Create a secret box from a base64-encoded 32-byte key
    pub fn from_base64_key(key_b64: &str) -> Result<Self> {
        let key_bytes = base64::engine::general_purpose::STANDARD
            .decode(key_b64)
            .map_err(|e| Error::Configuration(format!("Invalid base64 key: {e}")))?;

        if key_bytes.len() != 32 {
            return Err(Error::Configuration(format!(
                "Invalid key length: expected 32 bytes, got {}",
                key_bytes.len()
            )));
        }

        let unbound_key = UnboundKey::new(&AES_256_GCM, &key_bytes)
            .map_err(|_| Error::Configuration("Failed to create encryption key".to_string()))?;

        Ok(Self {
            key: LessSafeKey::new(unbound_key),
            rng: SystemRandom::new(),
        })
    }

    /// Encrypt a plaintext secret
    ///
    /// Returns base64-encoded ciphertext with format: nonce || encrypted_data || tag
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| Error::Other("Failed to generate nonce".to_string()))?;

        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.as_bytes().to_vec();
        in_out.reserve(AES_256_GCM.tag_len());

        self.key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| Error::Other("Encryption failed".to_string()))?;

        let mut result = nonce_bytes.to_vec();
        result.extend_from_slice(&in_out);

        Ok(base64::engine::general_purpose::STANDARD.encode(&result))
    }

    /// Decrypt a base64-encoded ciphertext
    ///
    /// Expects format: nonce || encrypted_data || tag
    pub fn decrypt(&self, ciphertext_b64: &str) -> Result<String> {
        if ciphertext_b64.is_empty() {
            return Ok(String::new());
        }

        let ciphertext = base64::engine::general_purpose::STANDARD
            .decode(ciphertext_b64)
            .map_err(|e| Error::Other(format!("Invalid base64 ciphertext: {e}")))?;

        if ciphertext.len() < NONCE_LENGTH {
            return Err(Error::Other("Ciphertext too short".to_string()));
        }

        let (nonce_bytes, encrypted) = ciphertext.split_at(NONCE_LENGTH);
        let mut nonce_array = [0u8; NONCE_LENGTH];
        nonce_array.copy_from_slice(nonce_bytes);
        let nonce = Nonce::assume_unique_for_key(nonce_array);

        let mut in_out = encrypted.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| Error::Other("Decryption failed or data tampered".to_string()))?;

        String::from_utf8(plaintext.to_vec())
            .map_err(|e| Error::Other(format!("Invalid UTF-8 after decryption: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_box() -> SecretBox {
        let key_bytes = b"12345678901234567890123456789012";
        let key_b64 = base64::engine::general_purpose::STANDARD.encode(key_bytes);
        SecretBox::from_base64_key(&key_b64).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt() {
        let secret_box = test_box();

        let plaintext = "api-key-aaaa.bbbbbbbb";
        let ciphertext = secret_box.encrypt(plaintext).unwrap();
        assert_ne!(ciphertext, plaintext);

        let decrypted = secret_box.decrypt(&ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_empty_string() {
        let secret_box = test_box();
        assert_eq!(secret_box.encrypt("").unwrap(), "");
        assert_eq!(secret_box.decrypt("").unwrap(), "");
    }

    #[test]
    fn test_tampered_ciphertext() {
        let secret_box = test_box();

        let mut ciphertext = secret_box.encrypt("secret").unwrap();
        ciphertext.push('X');

        assert!(secret_box.decrypt(&ciphertext).is_err());
    }

    #[test]
    fn test_invalid_key_length() {
        let short = base64::engine::general_purpose::STANDARD.encode(b"short");
        assert!(SecretBox::from_base64_key(&short).is_err());
    }
}
