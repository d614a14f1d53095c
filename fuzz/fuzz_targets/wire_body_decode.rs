//! Fuzz target for stored message bodies
//!
//! Stored bodies arrive as two base64 strings plus a base64 key from the
//! identity backend. This fuzzer feeds arbitrary strings through:
//! - `SymmetricKey::from_base64`
//! - `EncryptedBody::from_base64`
//! - `decrypt_body`
//!
//! The fuzzer should NEVER panic. All invalid inputs should return an error.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use liaison_crypto::{decrypt_body, EncryptedBody, SymmetricKey, KEY_SIZE};

#[derive(Debug, Arbitrary)]
struct WireBody {
    key: String,
    ciphertext: String,
    iv: String,
    conversation: String,
}

fuzz_target!(|body: WireBody| {
    let key = SymmetricKey::from_base64(&body.key)
        .unwrap_or_else(|_| SymmetricKey::new([7u8; KEY_SIZE]));

    let Ok(encrypted) = EncryptedBody::from_base64(&body.ciphertext, &body.iv) else {
        return;
    };

    if let Ok(plaintext) = decrypt_body(&key, &encrypted, body.conversation.as_bytes()) {
        assert_eq!(plaintext.len(), encrypted.plaintext_len());
    }
});
