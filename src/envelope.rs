//! Envelope codec: password-based AES-256-CBC framing for modem payloads.
//!
//! Wire format, byte-exact with peer implementations:
//!
//! ```text
//! IV (16 bytes) | L (1 byte, L > 0, L % 16 == 0) | ciphertext (L bytes)
//! ```
//!
//! The whole envelope must fit the physical-layer payload (170 bytes).
//!
//! The key is PBKDF2-HMAC-SHA256 over the password with the password itself
//! as salt. Peers derive it the same way, so the missing independent salt
//! cannot be fixed here without breaking interoperability.

use crate::defaults::{
    BLOCK_LEN, ENVELOPE_HEADER_LEN, IV_LEN, KDF_ITERATIONS, PAYLOAD_CAPACITY,
};
use crate::error::{ChirpError, Result};
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::Hmac;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use zeroize::Zeroizing;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Largest ciphertext that fits next to the header in one payload.
pub const MAX_CIPHERTEXT_LEN: usize = PAYLOAD_CAPACITY - ENVELOPE_HEADER_LEN;

/// Largest plaintext that still encrypts into an envelope that fits.
///
/// PKCS#7 always adds at least one byte, so this is one less than the
/// largest block-aligned ciphertext.
pub const MAX_PLAINTEXT_LEN: usize = (MAX_CIPHERTEXT_LEN / BLOCK_LEN) * BLOCK_LEN - 1;

/// An encoded envelope, ready to hand to the modem encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    bytes: Vec<u8>,
}

impl Envelope {
    /// The full wire representation.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn iv(&self) -> &[u8] {
        &self.bytes[..IV_LEN]
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.bytes[ENVELOPE_HEADER_LEN..]
    }
}

impl AsRef<[u8]> for Envelope {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

/// Decrypted payload, split by meaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Zero-length plaintext, used as a liveness probe.
    Ping,
    /// A regular message.
    Message(Vec<u8>),
}

impl Payload {
    pub fn classify(plaintext: Vec<u8>) -> Self {
        if plaintext.is_empty() {
            Payload::Ping
        } else {
            Payload::Message(plaintext)
        }
    }

    pub fn is_ping(&self) -> bool {
        matches!(self, Payload::Ping)
    }
}

/// Derive the 256-bit key from a password.
fn derive_key(password: &str) -> Result<Zeroizing<[u8; 32]>> {
    let mut key = Zeroizing::new([0u8; 32]);
    pbkdf2::pbkdf2::<Hmac<Sha256>>(
        password.as_bytes(),
        password.as_bytes(),
        KDF_ITERATIONS,
        &mut key[..],
    )
    .map_err(|e| ChirpError::Other(format!("Key derivation failed: {}", e)))?;
    Ok(key)
}

/// Encrypt `plaintext` under `password` with a fresh random IV.
///
/// # Errors
/// Returns `ChirpError::Capacity` when the result would not fit one payload.
pub fn encrypt(plaintext: &[u8], password: &str) -> Result<Envelope> {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    encrypt_with_iv(plaintext, password, &iv)
}

/// Encrypt with a caller-chosen IV.
///
/// Only [`encrypt`] should be used for real transmissions; a fixed IV is for
/// reproducible vectors.
pub fn encrypt_with_iv(plaintext: &[u8], password: &str, iv: &[u8; IV_LEN]) -> Result<Envelope> {
    let padded_len = (plaintext.len() / BLOCK_LEN + 1) * BLOCK_LEN;
    if padded_len > MAX_CIPHERTEXT_LEN || padded_len > u8::MAX as usize {
        return Err(ChirpError::Capacity {
            size: ENVELOPE_HEADER_LEN + padded_len,
            limit: PAYLOAD_CAPACITY,
        });
    }

    let key = derive_key(password)?;
    let cipher = Aes256CbcEnc::new_from_slices(&key[..], iv)
        .map_err(|e| ChirpError::Other(format!("Cipher setup failed: {}", e)))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut bytes = Vec::with_capacity(ENVELOPE_HEADER_LEN + ciphertext.len());
    bytes.extend_from_slice(iv);
    bytes.push(ciphertext.len() as u8);
    bytes.extend_from_slice(&ciphertext);
    Ok(Envelope { bytes })
}

/// Validate the envelope header and return `(iv, ciphertext)`.
///
/// Trailing bytes past the declared length are ignored: the modem hands back
/// its whole fixed-size payload buffer.
fn split_envelope(data: &[u8]) -> Result<(&[u8], &[u8])> {
    if data.len() < ENVELOPE_HEADER_LEN {
        return Err(ChirpError::Format {
            message: format!(
                "{} bytes is shorter than the {} byte header",
                data.len(),
                ENVELOPE_HEADER_LEN
            ),
        });
    }
    let length = data[IV_LEN] as usize;
    if length == 0 || length % BLOCK_LEN != 0 {
        return Err(ChirpError::Format {
            message: format!("length {} is not a positive multiple of {}", length, BLOCK_LEN),
        });
    }
    let body = &data[ENVELOPE_HEADER_LEN..];
    if body.len() < length {
        return Err(ChirpError::Format {
            message: format!("declared {} ciphertext bytes, {} present", length, body.len()),
        });
    }
    Ok((&data[..IV_LEN], &body[..length]))
}

/// Decrypt an envelope. An empty result is a ping, not an error.
///
/// # Errors
/// - `ChirpError::Format` for a malformed header, before any key derivation
/// - `ChirpError::Auth` when the padding does not check out
pub fn decrypt(data: &[u8], password: &str) -> Result<Vec<u8>> {
    let (iv, ciphertext) = split_envelope(data)?;
    let key = derive_key(password)?;
    let cipher = Aes256CbcDec::new_from_slices(&key[..], iv)
        .map_err(|e| ChirpError::Other(format!("Cipher setup failed: {}", e)))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| ChirpError::Auth {
            message: "invalid padding".to_string(),
        })
}

/// Plaintext bytes still available for `text`; negative when over capacity.
pub fn remaining_capacity(text: &str) -> isize {
    MAX_PLAINTEXT_LEN as isize - text.len() as isize
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const FIXED_IV: [u8; 16] = [
        0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e,
        0x0f,
    ];

    // AES-256-CBC of "HELLO" under PBKDF2("secret", "secret", 2048) with FIXED_IV.
    const HELLO_CIPHERTEXT: [u8; 16] = [
        0xf0, 0x69, 0xe8, 0x58, 0xab, 0xc3, 0x8c, 0xb9, 0x96, 0xb1, 0x28, 0x7c, 0x58, 0x85, 0x97,
        0x6f,
    ];

    #[test]
    fn test_capacity_constants() {
        assert_eq!(MAX_CIPHERTEXT_LEN, 153);
        assert_eq!(MAX_PLAINTEXT_LEN, 143);
    }

    #[test]
    fn test_derive_key_matches_reference() {
        let key = derive_key("secret").unwrap();
        assert_eq!(
            *key,
            [
                0x06, 0x95, 0xba, 0x14, 0x25, 0x0f, 0xf5, 0x58, 0x65, 0xf5, 0x70, 0xf2, 0xc1, 0xe4,
                0xba, 0x37, 0x63, 0xe1, 0x74, 0x5c, 0xae, 0xfa, 0x47, 0xb4, 0xcd, 0x71, 0x50, 0xbd,
                0x89, 0xaa, 0xdd, 0xcc,
            ]
        );
    }

    #[test]
    fn test_hello_vector_is_byte_exact() {
        let envelope = encrypt_with_iv(b"HELLO", "secret", &FIXED_IV).unwrap();
        assert_eq!(envelope.len(), 33);
        assert_eq!(envelope.iv(), &FIXED_IV);
        assert_eq!(envelope.as_bytes()[16], 16);
        assert_eq!(envelope.ciphertext(), &HELLO_CIPHERTEXT);
    }

    #[test]
    fn test_hello_round_trip_with_random_iv() {
        let envelope = encrypt(b"HELLO", "secret").unwrap();
        assert_eq!(envelope.len(), 33);
        assert_eq!(decrypt(envelope.as_bytes(), "secret").unwrap(), b"HELLO");
    }

    #[test]
    fn test_wrong_password_is_auth_error() {
        let envelope = encrypt_with_iv(b"HELLO", "secret", &FIXED_IV).unwrap();
        match decrypt(envelope.as_bytes(), "wrong") {
            Err(ChirpError::Auth { .. }) => {}
            other => panic!("Expected Auth error, got {:?}", other),
        }
    }

    #[test]
    fn test_random_ivs_differ() {
        let a = encrypt(b"same", "pw").unwrap();
        let b = encrypt(b"same", "pw").unwrap();
        assert_ne!(a.iv(), b.iv());
    }

    #[test]
    fn test_ping_round_trip() {
        let envelope = encrypt(b"", "pw").unwrap();
        assert_eq!(envelope.len(), 33);
        let plaintext = decrypt(envelope.as_bytes(), "pw").unwrap();
        assert!(plaintext.is_empty());
        assert_eq!(Payload::classify(plaintext), Payload::Ping);
        assert_eq!(
            Payload::classify(b"hi".to_vec()),
            Payload::Message(b"hi".to_vec())
        );
    }

    #[test]
    fn test_largest_plaintext_fits() {
        let text = vec![b'x'; MAX_PLAINTEXT_LEN];
        let envelope = encrypt(&text, "pw").unwrap();
        assert_eq!(envelope.len(), 17 + 144);
        assert!(envelope.len() <= PAYLOAD_CAPACITY);
        assert_eq!(decrypt(envelope.as_bytes(), "pw").unwrap(), text);
    }

    #[test]
    fn test_one_byte_over_is_capacity_error() {
        let text = vec![b'x'; MAX_PLAINTEXT_LEN + 1];
        match encrypt(&text, "pw") {
            Err(ChirpError::Capacity { size, limit }) => {
                assert_eq!(size, 17 + 160);
                assert_eq!(limit, 170);
            }
            other => panic!("Expected Capacity error, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_length_rejected_as_format() {
        let mut data = vec![0u8; 17 + 16];
        data[16] = 0;
        assert!(matches!(
            decrypt(&data, "pw"),
            Err(ChirpError::Format { .. })
        ));
    }

    #[test]
    fn test_unaligned_length_rejected_as_format() {
        for length in [1u8, 15, 17, 31, 255] {
            let mut data = vec![0u8; 17 + 255];
            data[16] = length;
            assert!(
                matches!(decrypt(&data, "pw"), Err(ChirpError::Format { .. })),
                "length {} should be rejected",
                length
            );
        }
    }

    #[test]
    fn test_truncated_body_rejected_as_format() {
        let envelope = encrypt(b"HELLO", "pw").unwrap();
        let truncated = &envelope.as_bytes()[..envelope.len() - 1];
        assert!(matches!(
            decrypt(truncated, "pw"),
            Err(ChirpError::Format { .. })
        ));
        assert!(matches!(
            decrypt(&[0u8; 10], "pw"),
            Err(ChirpError::Format { .. })
        ));
    }

    #[test]
    fn test_trailing_payload_bytes_ignored() {
        let envelope = encrypt(b"HELLO", "pw").unwrap();
        let mut buffer = vec![0u8; PAYLOAD_CAPACITY];
        buffer[..envelope.len()].copy_from_slice(envelope.as_bytes());
        assert_eq!(decrypt(&buffer, "pw").unwrap(), b"HELLO");
    }

    #[test]
    fn test_every_single_bit_flip_of_hello_changes_result() {
        let envelope = encrypt_with_iv(b"HELLO", "secret", &FIXED_IV).unwrap();
        for bit in 0..HELLO_CIPHERTEXT.len() * 8 {
            let mut data = envelope.as_bytes().to_vec();
            data[17 + bit / 8] ^= 1 << (bit % 8);
            let result = decrypt(&data, "secret");
            assert!(
                !matches!(&result, Ok(p) if p.as_slice() == b"HELLO"),
                "flipping bit {} still decrypted to the original",
                bit
            );
        }
    }

    #[test]
    fn test_remaining_capacity() {
        assert_eq!(remaining_capacity(""), 143);
        assert_eq!(remaining_capacity("HELLO"), 138);
        assert_eq!(remaining_capacity(&"x".repeat(150)), -7);
        // counted in UTF-8 bytes, not characters
        assert_eq!(remaining_capacity("é"), 141);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_round_trip(
            plaintext in proptest::collection::vec(any::<u8>(), 0..=MAX_PLAINTEXT_LEN),
            password in "[ -~]{0,24}",
        ) {
            let envelope = encrypt(&plaintext, &password).unwrap();
            prop_assert!(envelope.len() <= PAYLOAD_CAPACITY);
            prop_assert_eq!((envelope.len() - 17) % 16, 0);
            prop_assert_eq!(decrypt(envelope.as_bytes(), &password).unwrap(), plaintext);
        }

        #[test]
        fn prop_ciphertext_bit_flip_never_yields_original(
            plaintext in proptest::collection::vec(any::<u8>(), 0..64),
            seed in any::<usize>(),
        ) {
            let envelope = encrypt(&plaintext, "pw").unwrap();
            let mut data = envelope.clone().into_bytes();
            let bits = envelope.ciphertext().len() * 8;
            let bit = seed % bits;
            data[17 + bit / 8] ^= 1 << (bit % 8);
            let result = decrypt(&data, "pw");
            prop_assert!(!matches!(&result, Ok(p) if *p == plaintext));
        }
    }
}
