//! Errors raised by the cipher and the wire codec.

use thiserror::Error;

/// Failures while decoding or decrypting a message body.
///
/// Encryption itself is infallible once a [`crate::SymmetricKey`] exists; every
/// variant here describes bad input on the decrypt path or a bad key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Key material has the wrong length
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength {
        /// Required key length
        expected: usize,
        /// Length that was supplied
        actual: usize,
    },

    /// IV has the wrong length
    #[error("invalid iv length: expected {expected} bytes, got {actual}")]
    InvalidIvLength {
        /// Required IV length
        expected: usize,
        /// Length that was supplied
        actual: usize,
    },

    /// A base64 field could not be decoded
    #[error("malformed {field} encoding: {reason}")]
    MalformedEncoding {
        /// Which field failed (`key`, `ciphertext` or `iv`)
        field: &'static str,
        /// Decoder message
        reason: String,
    },

    /// Authentication tag did not verify (wrong key, wrong conversation, or
    /// tampered data)
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Why the body was rejected
        reason: String,
    },

    /// Decrypted bytes are not valid UTF-8 text
    #[error("decrypted body is not valid utf-8")]
    InvalidPlaintext,
}
