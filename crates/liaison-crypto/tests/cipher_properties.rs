//! Property-based tests for body encryption.

use liaison_crypto::{
    CryptoError, EncryptedBody, IV_SIZE, KEY_SIZE, SymmetricKey, decrypt_body, encrypt_body,
};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: decrypt(k, encrypt(k, p)) == p, including through the wire form
    #[test]
    fn prop_roundtrip_through_wire_form(
        key in any::<[u8; KEY_SIZE]>(),
        iv in any::<[u8; IV_SIZE]>(),
        plaintext in prop::collection::vec(any::<u8>(), 0..2048),
        conversation in "[a-z0-9-]{1,24}",
    ) {
        let key = SymmetricKey::new(key);
        let sealed = encrypt_body(&key, &plaintext, conversation.as_bytes(), iv);
        let (ciphertext, iv) = sealed.to_base64();

        let parsed = EncryptedBody::from_base64(&ciphertext, &iv)?;
        let opened = decrypt_body(&key, &parsed, conversation.as_bytes())?;
        prop_assert_eq!(opened, plaintext);
    }

    /// Property: flipping any ciphertext bit is always detected
    #[test]
    fn prop_any_bit_flip_is_rejected(
        key in any::<[u8; KEY_SIZE]>(),
        iv in any::<[u8; IV_SIZE]>(),
        plaintext in prop::collection::vec(any::<u8>(), 1..256),
        position in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let key = SymmetricKey::new(key);
        let mut sealed = encrypt_body(&key, &plaintext, b"conv", iv);
        let index = position.index(sealed.ciphertext.len());
        sealed.ciphertext[index] ^= 1 << bit;

        let result = decrypt_body(&key, &sealed, b"conv");
        let is_auth_failure = matches!(result, Err(CryptoError::DecryptionFailed { .. }));
        prop_assert!(is_auth_failure);
    }
}
