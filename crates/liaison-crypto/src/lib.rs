//! Liaison Cryptographic Primitives
//!
//! Symmetric encryption for chat message bodies. Pure functions with
//! deterministic outputs: callers provide the IV bytes, so tests can pin them
//! and production code draws them from a secure RNG.
//!
//! # Key Lifecycle
//!
//! ```text
//! Identity backend ("chat credentials" endpoint)
//!        │  base64
//!        ▼
//! SymmetricKey (per counselor session, zeroized on drop)
//!        │
//!        ▼
//! XChaCha20-Poly1305(key, iv, aad = conversation id) → EncryptedBody
//!        │
//!        ▼
//! base64(ciphertext), base64(iv) → stored message
//! ```
//!
//! # Security
//!
//! Authenticity:
//! - XChaCha20-Poly1305 AEAD rejects any modified ciphertext or IV
//! - Associated data binds a body to its conversation; replaying the
//!   ciphertext into another conversation fails authentication
//!
//! Nonce uniqueness:
//! - 24-byte IVs are drawn at random per message; the extended nonce makes
//!   random generation collision-safe for the lifetime of a key
//!
//! Key hygiene:
//! - [`SymmetricKey`] zeroizes its bytes on drop and never prints them

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod cipher;
mod error;
mod key;

pub use cipher::{EncryptedBody, IV_SIZE, TAG_SIZE, decrypt_body, encrypt_body};
pub use error::CryptoError;
pub use key::{KEY_SIZE, SymmetricKey};
