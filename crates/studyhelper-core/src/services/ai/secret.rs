//! Secret codec seam
//!
//! Credentials are persisted as ciphertext only. The concrete cipher is
//! injected; the core only calls `encrypt` on write and `decrypt` right
//! before a secret is handed to a provider client.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::digest::{digest, SHA256};
use ring::rand::{SecureRandom, SystemRandom};

use super::error::AiError;

/// Minimum length of the deployment secret the cipher key is derived from
pub const MIN_SECRET_KEY_LEN: usize = 16;

/// Reversible encryption of API key secrets at rest
pub trait SecretCodec: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, AiError>;
    fn decrypt(&self, ciphertext: &str) -> Result<String, AiError>;
}

/// AES-256-GCM under a key derived from the deployment secret
/// (`STUDYHELPER_SECRET_KEY`).
///
/// Stored form is `base64url(nonce || ciphertext || tag)` with a fresh random
/// nonce per call, so encrypting the same key twice gives different output.
pub struct AesGcmCodec {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl AesGcmCodec {
    pub fn from_secret(secret: &str) -> Result<Self, AiError> {
        if secret.trim().len() < MIN_SECRET_KEY_LEN {
            return Err(AiError::Secret(format!(
                "secret key must be at least {} characters",
                MIN_SECRET_KEY_LEN
            )));
        }
        let key_bytes = digest(&SHA256, secret.as_bytes());
        let unbound = UnboundKey::new(&AES_256_GCM, key_bytes.as_ref())
            .map_err(|_| AiError::Secret("failed to build cipher key".to_string()))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }
}

impl SecretCodec for AesGcmCodec {
    fn encrypt(&self, plaintext: &str) -> Result<String, AiError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| AiError::Secret("failed to generate nonce".to_string()))?;

        let mut in_out = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| AiError::Secret("encryption failed".to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + in_out.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&in_out);
        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, AiError> {
        let sealed = URL_SAFE_NO_PAD
            .decode(ciphertext.as_bytes())
            .map_err(|e| AiError::Secret(format!("invalid base64: {}", e)))?;
        if sealed.len() <= NONCE_LEN {
            return Err(AiError::Secret("ciphertext too short".to_string()));
        }

        let (nonce_bytes, body) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| AiError::Secret("invalid nonce".to_string()))?;
        let mut in_out = body.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| AiError::Secret("decryption failed (wrong key or tampered data)".to_string()))?;

        String::from_utf8(plaintext.to_vec())
            .map_err(|e| AiError::Secret(format!("invalid utf-8: {}", e)))
    }
}
