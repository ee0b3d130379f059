use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, NO_PAD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPublicKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{self, CryptoError};

/// JWK `alg` value WebCrypto uses for RSA-OAEP with SHA-256
pub const JWK_ALG_RSA_OAEP_256: &str = "RSA-OAEP-256";

/// base64url without padding on output, padding tolerated on input
const BASE64_URL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    NO_PAD.with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Reasons a submitted public key is refused
#[derive(Debug, Error)]
pub enum KeyImportError {
    #[error("Unsupported key type `{0}`, expected `RSA`")]
    UnsupportedKeyType(String),

    #[error("Unsupported algorithm `{0}`, expected `{JWK_ALG_RSA_OAEP_256}`")]
    UnsupportedAlgorithm(String),

    #[error("Key usage does not permit encryption: {0}")]
    UnsupportedUsage(String),

    #[error("Private key material is not accepted")]
    PrivateMaterial,

    #[error("Invalid base64url in `{0}`")]
    Encoding(&'static str),

    #[error("Modulus is {bits} bits, accepted range is {min}..={max}")]
    ModulusSize { bits: usize, min: usize, max: usize },

    #[error("Invalid RSA public key: {0}")]
    Invalid(String),
}

/// Size bounds applied to client keys on import
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPolicy {
    pub min_modulus_bits: usize,
    pub max_modulus_bits: usize,
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self {
            min_modulus_bits: 2048,
            max_modulus_bits: 4096,
        }
    }
}

/// An RSA public key in JSON Web Key form
///
/// Only the members relevant to an RSA encryption key are modelled. A
/// private exponent (`d`) is captured solely so it can be rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsaJwk {
    pub kty: String,
    pub n: String,
    pub e: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_ops: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<bool>,
    #[serde(default, skip_serializing)]
    pub d: Option<String>,
}

impl RsaJwk {
    /// Export a public key the way WebCrypto exports an RSA-OAEP/SHA-256 encrypt key
    pub fn from_public_key(key: &RsaPublicKey) -> Self {
        Self {
            kty: "RSA".to_owned(),
            n: BASE64_URL.encode(key.n().to_bytes_be()),
            e: BASE64_URL.encode(key.e().to_bytes_be()),
            alg: Some(JWK_ALG_RSA_OAEP_256.to_owned()),
            key_use: None,
            key_ops: Some(vec!["encrypt".to_owned()]),
            ext: Some(true),
            d: None,
        }
    }

    /// Import for RSA-OAEP/SHA-256, encrypt-only use
    pub fn to_public_key(&self, policy: &KeyPolicy) -> Result<RsaPublicKey, KeyImportError> {
        if self.kty != "RSA" {
            return Err(KeyImportError::UnsupportedKeyType(self.kty.clone()));
        }

        if self.d.is_some() {
            return Err(KeyImportError::PrivateMaterial);
        }

        if let Some(alg) = &self.alg {
            if alg != JWK_ALG_RSA_OAEP_256 {
                return Err(KeyImportError::UnsupportedAlgorithm(alg.clone()));
            }
        }

        if let Some(key_use) = &self.key_use {
            if key_use != "enc" {
                return Err(KeyImportError::UnsupportedUsage(format!("use={key_use}")));
            }
        }

        if let Some(key_ops) = &self.key_ops {
            if !key_ops.iter().any(|op| op == "encrypt") {
                return Err(KeyImportError::UnsupportedUsage(format!(
                    "key_ops={key_ops:?}"
                )));
            }
        }

        let n = BASE64_URL
            .decode(&self.n)
            .map_err(|_| KeyImportError::Encoding("n"))?;
        let e = BASE64_URL
            .decode(&self.e)
            .map_err(|_| KeyImportError::Encoding("e"))?;

        let n = BigUint::from_bytes_be(&n);
        let bits = n.bits();
        if bits < policy.min_modulus_bits || bits > policy.max_modulus_bits {
            return Err(KeyImportError::ModulusSize {
                bits,
                min: policy.min_modulus_bits,
                max: policy.max_modulus_bits,
            });
        }

        RsaPublicKey::new_with_max_size(n, BigUint::from_bytes_be(&e), policy.max_modulus_bits)
            .map_err(|e| KeyImportError::Invalid(e.to_string()))
    }
}

/// A client public key that passed import validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientPublicKey {
    key: RsaPublicKey,
}

impl ClientPublicKey {
    pub fn from_jwk(jwk: &RsaJwk, policy: &KeyPolicy) -> Result<Self, KeyImportError> {
        jwk.to_public_key(policy).map(|key| Self { key })
    }

    pub fn key(&self) -> &RsaPublicKey {
        &self.key
    }

    /// Normalised JWK export, the form persisted for registered identities
    pub fn to_jwk(&self) -> RsaJwk {
        RsaJwk::from_public_key(&self.key)
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        crypto::encrypt(&self.key, plaintext)
    }
}

impl From<RsaPublicKey> for ClientPublicKey {
    fn from(key: RsaPublicKey) -> Self {
        Self { key }
    }
}

#[cfg(test)]
mod tests {
    use rsa::RsaPrivateKey;

    use super::*;
    use crate::test_utils::CLIENT_KEY;

    fn client_jwk() -> RsaJwk {
        RsaJwk::from_public_key(&CLIENT_KEY.to_public_key())
    }

    #[test]
    fn test_export_import_preserves_key() {
        let jwk = client_jwk();
        assert_eq!(jwk.kty, "RSA");
        assert_eq!(jwk.e, "AQAB");
        assert_eq!(jwk.alg.as_deref(), Some(JWK_ALG_RSA_OAEP_256));

        let imported = jwk.to_public_key(&KeyPolicy::default()).unwrap();
        assert_eq!(imported, CLIENT_KEY.to_public_key());
    }

    #[test]
    fn test_parses_browser_export() {
        let jwk = client_jwk();
        let browser = serde_json::json!({
            "alg": "RSA-OAEP-256",
            "e": jwk.e,
            "ext": true,
            "key_ops": ["encrypt"],
            "kty": "RSA",
            "n": jwk.n,
        });

        let parsed: RsaJwk = serde_json::from_value(browser).unwrap();
        assert!(ClientPublicKey::from_jwk(&parsed, &KeyPolicy::default()).is_ok());
    }

    #[test]
    fn test_minimal_jwk_is_accepted() {
        let mut jwk = client_jwk();
        jwk.alg = None;
        jwk.key_ops = None;
        jwk.ext = None;

        assert!(jwk.to_public_key(&KeyPolicy::default()).is_ok());
    }

    #[test]
    fn test_padded_base64_is_tolerated() {
        let mut jwk = client_jwk();
        // 256-byte modulus encodes to 342 chars + 2 padding
        jwk.n = format!("{}==", jwk.n);
        assert!(jwk.to_public_key(&KeyPolicy::default()).is_ok());
    }

    #[test]
    fn test_rejects_wrong_family() {
        let mut jwk = client_jwk();
        jwk.kty = "EC".to_owned();

        assert!(matches!(
            jwk.to_public_key(&KeyPolicy::default()),
            Err(KeyImportError::UnsupportedKeyType(kty)) if kty == "EC"
        ));
    }

    #[test]
    fn test_rejects_wrong_algorithm_and_usage() {
        let mut jwk = client_jwk();
        jwk.alg = Some("RSA-OAEP".to_owned());
        assert!(matches!(
            jwk.to_public_key(&KeyPolicy::default()),
            Err(KeyImportError::UnsupportedAlgorithm(_))
        ));

        let mut jwk = client_jwk();
        jwk.key_ops = Some(vec!["verify".to_owned()]);
        assert!(matches!(
            jwk.to_public_key(&KeyPolicy::default()),
            Err(KeyImportError::UnsupportedUsage(_))
        ));

        let mut jwk = client_jwk();
        jwk.key_use = Some("sig".to_owned());
        assert!(matches!(
            jwk.to_public_key(&KeyPolicy::default()),
            Err(KeyImportError::UnsupportedUsage(_))
        ));
    }

    #[test]
    fn test_rejects_private_jwk() {
        let mut jwk = client_jwk();
        jwk.d = Some("AQAB".to_owned());

        assert!(matches!(
            jwk.to_public_key(&KeyPolicy::default()),
            Err(KeyImportError::PrivateMaterial)
        ));
    }

    #[test]
    fn test_rejects_bad_encoding() {
        let mut jwk = client_jwk();
        jwk.n = "not*base64".to_owned();

        assert!(matches!(
            jwk.to_public_key(&KeyPolicy::default()),
            Err(KeyImportError::Encoding("n"))
        ));
    }

    #[test]
    fn test_rejects_small_modulus() {
        let small = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let jwk = RsaJwk::from_public_key(&small.to_public_key());

        assert!(matches!(
            jwk.to_public_key(&KeyPolicy::default()),
            Err(KeyImportError::ModulusSize { bits: 1024, min: 2048, .. })
        ));
    }

    #[test]
    fn test_rejects_modulus_above_policy() {
        let jwk = client_jwk();
        let policy = KeyPolicy {
            min_modulus_bits: 1024,
            max_modulus_bits: 1536,
        };

        assert!(matches!(
            jwk.to_public_key(&policy),
            Err(KeyImportError::ModulusSize { bits: 2048, .. })
        ));
    }

    #[test]
    fn test_serialization_omits_private_member() {
        let mut jwk = client_jwk();
        jwk.d = Some("secret".to_owned());

        let value = serde_json::to_value(&jwk).unwrap();
        assert!(value.get("d").is_none());
        assert_eq!(value["key_ops"], serde_json::json!(["encrypt"]));
    }
}
