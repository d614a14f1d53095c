//! Fuzz target for ciphertext integrity
//!
//! Encrypts a fuzzer-chosen body, then applies one mutation:
//! - flip a byte of the ciphertext or tag
//! - flip a byte of the IV
//! - decrypt under a different conversation id
//!
//! # Invariants
//!
//! - The untouched body always decrypts to the original plaintext
//! - Any mutation is rejected with an error, never a panic

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use liaison_crypto::{decrypt_body, encrypt_body, SymmetricKey, IV_SIZE, KEY_SIZE};

#[derive(Debug, Arbitrary)]
enum Mutation {
    Ciphertext { index: usize, mask: u8 },
    Iv { index: usize, mask: u8 },
    Conversation { other: String },
}

#[derive(Debug, Arbitrary)]
struct Input {
    key: [u8; KEY_SIZE],
    iv: [u8; IV_SIZE],
    conversation: String,
    plaintext: Vec<u8>,
    mutation: Mutation,
}

fuzz_target!(|input: Input| {
    let key = SymmetricKey::new(input.key);
    let aad = input.conversation.as_bytes();
    let sealed = encrypt_body(&key, &input.plaintext, aad, input.iv);

    let opened = decrypt_body(&key, &sealed, aad).expect("untouched body must decrypt");
    assert_eq!(opened, input.plaintext);

    let mut tampered = sealed.clone();
    let aad = match &input.mutation {
        Mutation::Ciphertext { index, mask } => {
            if *mask == 0 {
                return;
            }
            let len = tampered.ciphertext.len();
            tampered.ciphertext[index % len] ^= mask;
            aad.to_vec()
        }
        Mutation::Iv { index, mask } => {
            if *mask == 0 {
                return;
            }
            tampered.iv[index % IV_SIZE] ^= mask;
            aad.to_vec()
        }
        Mutation::Conversation { other } => {
            if other == &input.conversation {
                return;
            }
            other.as_bytes().to_vec()
        }
    };

    assert!(decrypt_body(&key, &tampered, &aad).is_err());
});
