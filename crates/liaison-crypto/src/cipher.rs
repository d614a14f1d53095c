//! Message body encryption using `XChaCha20-Poly1305`
//!
//! All functions are pure - the IV must be provided by the caller.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};

use crate::{CryptoError, SymmetricKey};

/// Size of the initialization vector (24-byte `XChaCha20` nonce)
pub const IV_SIZE: usize = 24;

/// Poly1305 tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

/// A message body sealed under a session key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedBody {
    /// The ciphertext including 16-byte Poly1305 tag
    pub ciphertext: Vec<u8>,
    /// The IV the ciphertext was produced with
    pub iv: [u8; IV_SIZE],
}

impl EncryptedBody {
    /// Plaintext length (ciphertext length minus authentication tag).
    pub fn plaintext_len(&self) -> usize {
        self.ciphertext.len().saturating_sub(TAG_SIZE)
    }

    /// Wire form: `(base64 ciphertext, base64 iv)`.
    pub fn to_base64(&self) -> (String, String) {
        (STANDARD.encode(&self.ciphertext), STANDARD.encode(self.iv))
    }

    /// Parse the wire form produced by [`EncryptedBody::to_base64`].
    ///
    /// # Errors
    ///
    /// - `MalformedEncoding`: either field is not valid base64
    /// - `InvalidIvLength`: the IV does not decode to [`IV_SIZE`] bytes
    pub fn from_base64(ciphertext: &str, iv: &str) -> Result<Self, CryptoError> {
        let ciphertext = STANDARD.decode(ciphertext).map_err(|e| {
            CryptoError::MalformedEncoding { field: "ciphertext", reason: e.to_string() }
        })?;
        let iv_bytes = STANDARD
            .decode(iv)
            .map_err(|e| CryptoError::MalformedEncoding { field: "iv", reason: e.to_string() })?;
        let iv: [u8; IV_SIZE] = iv_bytes.as_slice().try_into().map_err(|_| {
            CryptoError::InvalidIvLength { expected: IV_SIZE, actual: iv_bytes.len() }
        })?;

        Ok(Self { ciphertext, iv })
    }
}

/// Encrypt a message body.
///
/// `associated_data` is authenticated but not encrypted; callers bind the
/// conversation id here so a body only decrypts in the conversation it was
/// written for.
///
/// # Security
///
/// - Caller MUST provide a fresh, cryptographically random IV per call
/// - Reusing an IV under the same key leaks the XOR of the two plaintexts
pub fn encrypt_body(
    key: &SymmetricKey,
    plaintext: &[u8],
    associated_data: &[u8],
    iv: [u8; IV_SIZE],
) -> EncryptedBody {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let payload = Payload { msg: plaintext, aad: associated_data };

    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(&iv), payload) else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    EncryptedBody { ciphertext, iv }
}

/// Decrypt a message body.
///
/// # Errors
///
/// - `DecryptionFailed`: truncated ciphertext, or the authentication tag does
///   not verify (wrong key, wrong associated data, tampering)
pub fn decrypt_body(
    key: &SymmetricKey,
    body: &EncryptedBody,
    associated_data: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if body.ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::DecryptionFailed {
            reason: format!(
                "ciphertext too short: {} bytes, tag alone is {TAG_SIZE}",
                body.ciphertext.len()
            ),
        });
    }

    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let payload = Payload { msg: body.ciphertext.as_slice(), aad: associated_data };

    cipher.decrypt(XNonce::from_slice(&body.iv), payload).map_err(|_| {
        CryptoError::DecryptionFailed { reason: "authentication failed".to_string() }
    })
}
