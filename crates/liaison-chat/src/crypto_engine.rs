//! Message body sealing and opening.
//!
//! Wraps the pure primitives of `liaison_crypto` with the session
//! environment (IV generation) and the wire form of [`SealedBody`].

use liaison_core::{ConversationId, Environment, SealedBody};
use liaison_crypto::{CryptoError, EncryptedBody, IV_SIZE, SymmetricKey, decrypt_body, encrypt_body};

/// A message body as presented to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    /// Decrypted text
    Text(String),
    /// Stored before bodies were encrypted; shown verbatim
    LegacyPlaintext(String),
    /// Carries an IV but failed to decrypt
    Undecipherable,
}

impl MessageBody {
    /// Displayable text, `None` for undecipherable bodies.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(text) | Self::LegacyPlaintext(text) => Some(text),
            Self::Undecipherable => None,
        }
    }
}

/// Seals and opens message bodies for one session.
#[derive(Clone)]
pub struct CryptoEngine<E: Environment> {
    env: E,
}

impl<E: Environment> CryptoEngine<E> {
    /// Create an engine drawing IVs from `env`.
    pub fn new(env: E) -> Self {
        Self { env }
    }

    /// Encrypt `plaintext` for `conversation` with a fresh random IV.
    pub fn encrypt(
        &self,
        key: &SymmetricKey,
        conversation: &ConversationId,
        plaintext: &str,
    ) -> SealedBody {
        let mut iv = [0u8; IV_SIZE];
        self.env.random_bytes(&mut iv);

        let sealed = encrypt_body(key, plaintext.as_bytes(), conversation.as_str().as_bytes(), iv);
        let (ciphertext, iv) = sealed.to_base64();
        SealedBody::encrypted(ciphertext, iv)
    }

    /// Decrypt a base64 ciphertext/IV pair written for `conversation`.
    ///
    /// # Errors
    ///
    /// - `MalformedEncoding`: either field is not valid base64
    /// - `InvalidIvLength`: the IV does not decode to 24 bytes
    /// - `DecryptionFailed`: wrong key, wrong conversation, or tampering
    /// - `InvalidPlaintext`: the plaintext is not UTF-8
    pub fn decrypt(
        &self,
        key: &SymmetricKey,
        conversation: &ConversationId,
        ciphertext: &str,
        iv: &str,
    ) -> Result<String, CryptoError> {
        let body = EncryptedBody::from_base64(ciphertext, iv)?;
        let plaintext = decrypt_body(key, &body, conversation.as_str().as_bytes())?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidPlaintext)
    }

    /// Open a stored body.
    ///
    /// A body without IV is legacy plaintext and returned verbatim. A body
    /// with an IV must decrypt; its failure is reported, never masked as
    /// legacy text.
    ///
    /// # Errors
    ///
    /// Same as [`CryptoEngine::decrypt`].
    pub fn decrypt_or_fallback(
        &self,
        key: &SymmetricKey,
        conversation: &ConversationId,
        body: &SealedBody,
    ) -> Result<MessageBody, CryptoError> {
        match &body.iv {
            None => Ok(MessageBody::LegacyPlaintext(body.ciphertext.clone())),
            Some(iv) => self.decrypt(key, conversation, &body.ciphertext, iv).map(MessageBody::Text),
        }
    }

    /// Like [`CryptoEngine::decrypt_or_fallback`], with failures turned into
    /// [`MessageBody::Undecipherable`].
    pub(crate) fn open(
        &self,
        key: &SymmetricKey,
        conversation: &ConversationId,
        body: &SealedBody,
    ) -> MessageBody {
        self.decrypt_or_fallback(key, conversation, body).unwrap_or_else(|error| {
            tracing::warn!(conversation = %conversation, %error, "undecipherable message body");
            MessageBody::Undecipherable
        })
    }
}
