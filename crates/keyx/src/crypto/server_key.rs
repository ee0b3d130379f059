use std::fmt;

use pkcs8::pkcs5::pbes2;
use pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding, PrivateKeyInfo};
use rand::RngCore;
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::crypto::{self, CryptoError, RsaJwk};

const ENCRYPTED_PRIVATE_KEY_LABEL: &str = "ENCRYPTED PRIVATE KEY";

/// The service's own RSA-OAEP key pair
///
/// The private half never leaves this type except as an encrypted PKCS#8
/// document produced by [`ServerKeyPair::seal`].
pub struct ServerKeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
    public_jwk: RsaJwk,
}

impl ServerKeyPair {
    /// Generate a new key pair. CPU bound, run it off the async executor.
    pub fn generate(modulus_bits: usize) -> Result<Self, CryptoError> {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), modulus_bits)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Ok(Self::from_private_key(private))
    }

    pub fn from_private_key(private: RsaPrivateKey) -> Self {
        let public = private.to_public_key();
        let public_jwk = RsaJwk::from_public_key(&public);
        Self {
            private,
            public,
            public_jwk,
        }
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// Public half as distributed to clients
    pub fn public_jwk(&self) -> &RsaJwk {
        &self.public_jwk
    }

    pub fn modulus_bits(&self) -> usize {
        self.public.n().bits()
    }

    /// Decrypt a message addressed to the server
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        crypto::decrypt(&self.private, ciphertext)
    }

    /// Export the private key as a PEM `ENCRYPTED PRIVATE KEY`
    ///
    /// PBES2 with PBKDF2-HMAC-SHA256 and AES-256-CBC, fresh salt and IV per call.
    pub fn seal(&self, passphrase: &str, kdf_iterations: u32) -> Result<String, CryptoError> {
        let der = self
            .private
            .to_pkcs8_der()
            .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;
        let info = PrivateKeyInfo::try_from(der.as_bytes())
            .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;

        let mut rng = rand::thread_rng();
        let mut salt = [0_u8; 16];
        let mut iv = [0_u8; 16];
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut iv);

        let params = pbes2::Parameters::pbkdf2_sha256_aes256cbc(kdf_iterations, &salt, &iv)
            .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;
        let encrypted = info
            .encrypt_with_params(params, passphrase.as_bytes())
            .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;

        let pem = encrypted
            .to_pem(ENCRYPTED_PRIVATE_KEY_LABEL, LineEnding::LF)
            .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;

        Ok(pem.as_str().to_owned())
    }

    /// Inverse of [`ServerKeyPair::seal`]
    pub fn unseal(pem: &str, passphrase: &str) -> Result<Self, CryptoError> {
        let private = RsaPrivateKey::from_pkcs8_encrypted_pem(pem, passphrase.as_bytes())
            .map_err(|_| CryptoError::Unlock)?;
        Ok(Self::from_private_key(private))
    }
}

impl fmt::Debug for ServerKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerKeyPair")
            .field("modulus_bits", &self.modulus_bits())
            .finish_non_exhaustive()
    }
}
