//! Session key material.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::CryptoError;

/// Size of the symmetric key (32 bytes)
pub const KEY_SIZE: usize = 32;

/// Symmetric key shared by every conversation of a counselor session.
///
/// # Invariants
///
/// - Always exactly [`KEY_SIZE`] bytes
/// - Bytes are zeroized when the key is dropped
/// - `Debug` output never contains key material
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    /// Wrap raw key bytes.
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Build a key from a byte slice.
    ///
    /// # Errors
    ///
    /// - `InvalidKeyLength` if the slice is not [`KEY_SIZE`] bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKeyLength { expected: KEY_SIZE, actual: bytes.len() }
        })?;
        Ok(Self(array))
    }

    /// Decode a key delivered as standard base64 by the credentials endpoint.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let mut bytes = STANDARD.decode(encoded.trim()).map_err(|e| {
            CryptoError::MalformedEncoding { field: "key", reason: e.to_string() }
        })?;
        let key = Self::from_slice(&bytes);
        bytes.zeroize();
        key
    }

    /// Encode the key as standard base64.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(<redacted>)")
    }
}
