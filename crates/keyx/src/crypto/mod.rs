//! RSA-OAEP primitives shared by the key store and the protocol engine.
//!
//! Every ciphertext exchanged with clients is RSA-OAEP with SHA-256 for both
//! the label hash and MGF1, matching WebCrypto's `{ name: "RSA-OAEP", hash: "SHA-256" }`.

use std::fmt;

use rand::RngCore;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

pub mod jwk;
pub mod server_key;

pub use jwk::{ClientPublicKey, KeyImportError, KeyPolicy, RsaJwk};
pub use server_key::ServerKeyPair;

/// Length of a registration challenge in bytes
pub const CHALLENGE_LEN: usize = 32;

/// Errors raised by encryption, decryption and key handling
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Ciphertext is not a valid OAEP encoding under this key")]
    Decryption,

    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Key encoding failed: {0}")]
    KeyEncoding(String),

    #[error("Failed to unlock the server private key (wrong passphrase or corrupted record)")]
    Unlock,

    #[error(transparent)]
    Import(#[from] KeyImportError),
}

/// Encrypt `plaintext` for the holder of `key`
pub fn encrypt(key: &RsaPublicKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    key.encrypt(&mut rand::thread_rng(), Oaep::new::<Sha256>(), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))
}

/// Decrypt `ciphertext` with `key`
///
/// Wrong key, corrupted bytes and a length that does not match the modulus
/// all collapse into [`CryptoError::Decryption`].
pub fn decrypt(key: &RsaPrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    key.decrypt_blinded(&mut rand::thread_rng(), Oaep::new::<Sha256>(), ciphertext)
        .map_err(|_| CryptoError::Decryption)
}

/// A fresh random value a client must decrypt to prove key possession
#[derive(Clone)]
pub struct Challenge([u8; CHALLENGE_LEN]);

impl Challenge {
    /// Draw a new challenge from the thread-local CSPRNG
    pub fn random() -> Self {
        let mut bytes = [0_u8; CHALLENGE_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CHALLENGE_LEN] {
        &self.0
    }

    /// Compare a presented answer against this challenge in constant time.
    ///
    /// Only an answer of exactly [`CHALLENGE_LEN`] bytes can match.
    pub fn matches(&self, presented: &[u8]) -> bool {
        if presented.len() != CHALLENGE_LEN {
            return false;
        }
        self.0.as_slice().ct_eq(presented).into()
    }
}

impl fmt::Debug for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Challenge(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{CLIENT_KEY, SERVER_KEY};

    #[test]
    fn test_decrypt_roundtrip_and_failures() {
        let public = SERVER_KEY.to_public_key();

        for message in [&b""[..], &b"hello"[..], &[0xff_u8; 190][..]] {
            let ciphertext = encrypt(&public, message).unwrap();
            assert_eq!(decrypt(&SERVER_KEY, &ciphertext).unwrap(), message);
        }

        let ciphertext = encrypt(&public, b"addressed to the server").unwrap();
        assert!(matches!(decrypt(&CLIENT_KEY, &ciphertext), Err(CryptoError::Decryption)));
        assert!(matches!(decrypt(&SERVER_KEY, &[7_u8; 256]), Err(CryptoError::Decryption)));
        assert!(matches!(decrypt(&SERVER_KEY, b"short"), Err(CryptoError::Decryption)));
    }

    #[test]
    fn test_challenge_is_fixed_length_and_fresh() {
        let first = Challenge::random();
        let second = Challenge::random();

        assert_eq!(first.as_bytes().len(), CHALLENGE_LEN);
        assert_ne!(first.as_bytes(), second.as_bytes(), "two draws must differ");
    }

    #[test]
    fn test_challenge_matches_exact_bytes_only() {
        let challenge = Challenge::random();
        let exact = challenge.as_bytes().to_vec();
        assert!(challenge.matches(&exact));

        for bit in [0_usize, 7, 100, 255] {
            let mut flipped = exact.clone();
            flipped[bit / 8] ^= 1 << (bit % 8);
            assert!(!challenge.matches(&flipped), "bit {bit} flipped must not match");
        }

        assert!(!challenge.matches(&exact[..CHALLENGE_LEN - 1]));
        let mut longer = exact.clone();
        longer.push(0);
        assert!(!challenge.matches(&longer));
        assert!(!challenge.matches(&[]));
    }

    #[test]
    fn test_challenge_debug_is_redacted() {
        let challenge = Challenge::random();
        assert_eq!(format!("{challenge:?}"), "Challenge(..)");
    }
}
