use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::crypto::{ClientPublicKey, CryptoError, KeyImportError, KeyPolicy, RsaJwk, ServerKeyPair};
use crate::registry::{IdentityRegistry, RegistryError, RequestMetadata};
use crate::storage::StorageError;

/// Outcomes of a protocol operation that did not succeed
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(#[from] KeyImportError),

    #[error("Malformed identity token")]
    MalformedIdentity,

    #[error("Unknown identity")]
    UnknownIdentity,

    #[error("Challenge mismatch")]
    ChallengeMismatch,

    #[error("Message could not be decrypted")]
    DecryptionFailure,

    #[error("Failed to persist identity: {0}")]
    Storage(#[from] StorageError),

    #[error("Encryption failed: {0}")]
    Crypto(CryptoError),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<RegistryError> for ProtocolError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownIdentity => Self::UnknownIdentity,
            RegistryError::Storage(err) => Self::Storage(err),
        }
    }
}

/// Result of a successful hello
#[derive(Debug, Clone)]
pub struct HelloOutcome {
    /// Identity token, returned to the client out of band
    pub token: Uuid,
    /// The 32-byte challenge encrypted under the submitted key
    pub encrypted_challenge: Vec<u8>,
}

/// Registration handshake and encrypted message exchange
///
/// ```text
/// hello(jwk)         -> token + E(client, challenge)     Pending
/// ack(token, bytes)  -> ()                               Pending -> Registered
/// fetch(token)       -> E(client, status)                Registered only
/// deliver(E(server)) -> plaintext
/// ```
pub struct ProtocolEngine {
    registry: Arc<IdentityRegistry>,
    server_key: Arc<ServerKeyPair>,
    key_policy: KeyPolicy,
}

impl ProtocolEngine {
    pub fn new(
        registry: Arc<IdentityRegistry>,
        server_key: Arc<ServerKeyPair>,
        key_policy: KeyPolicy,
    ) -> Self {
        Self {
            registry,
            server_key,
            key_policy,
        }
    }

    pub fn registry(&self) -> &IdentityRegistry {
        &self.registry
    }

    pub fn server_key(&self) -> &ServerKeyPair {
        &self.server_key
    }

    /// Start a registration: import the client key and issue an encrypted challenge
    pub fn hello(&self, jwk: &RsaJwk) -> Result<HelloOutcome, ProtocolError> {
        let public_key = ClientPublicKey::from_jwk(jwk, &self.key_policy)?;

        let (token, challenge) = self.registry.create_pending(public_key.clone());
        let encrypted_challenge = public_key
            .encrypt(challenge.as_bytes())
            .map_err(ProtocolError::Crypto)?;

        info!(%token, "Issued identity token");

        Ok(HelloOutcome {
            token,
            encrypted_challenge,
        })
    }

    /// Complete a registration by echoing the decrypted challenge
    ///
    /// A mismatch leaves the record pending with the same challenge, so the
    /// client may retry without a new hello.
    pub async fn ack(
        &self,
        token: Uuid,
        answer: &[u8],
        metadata: RequestMetadata,
    ) -> Result<(), ProtocolError> {
        let mut guard = self.registry.lock(&token).await?;

        let Some(challenge) = guard.challenge() else {
            debug!(%token, "Ack for an identity that is already registered");
            return Err(ProtocolError::UnknownIdentity);
        };

        if !challenge.matches(answer) {
            warn!(%token, answer_len = answer.len(), "Challenge mismatch");
            return Err(ProtocolError::ChallengeMismatch);
        }

        self.registry.promote(&mut guard, metadata).await?;

        info!(%token, "Identity registered");
        Ok(())
    }

    /// Encrypt a server status message for a registered identity
    pub async fn fetch(&self, token: Uuid) -> Result<Vec<u8>, ProtocolError> {
        let mut guard = self.registry.lock(&token).await?;

        if !guard.is_registered() {
            debug!(%token, "Fetch for an identity that is not registered");
            return Err(ProtocolError::UnknownIdentity);
        }

        let now = Utc::now();
        let payload = guard
            .public_key
            .encrypt(status_message(now).as_bytes())
            .map_err(ProtocolError::Crypto)?;

        if let Err(err) = self.registry.touch(&mut guard, now).await {
            warn!(%token, %err, "Failed to record last access");
        }

        Ok(payload)
    }

    /// Decrypt a message addressed to the server
    ///
    /// Not bound to any identity: anyone holding the server public key may deliver.
    pub async fn deliver(&self, ciphertext: Vec<u8>) -> Result<Vec<u8>, ProtocolError> {
        let server_key = Arc::clone(&self.server_key);

        let plaintext = tokio::task::spawn_blocking(move || server_key.decrypt(&ciphertext))
            .await
            .map_err(|e| ProtocolError::Task(e.to_string()))?
            .map_err(|_| ProtocolError::DecryptionFailure)?;

        info!(bytes = plaintext.len(), "Received message");
        Ok(plaintext)
    }
}

/// Human-readable server status returned by fetch
pub fn status_message(now: DateTime<Utc>) -> String {
    format!(
        "pid: {}, platform {} {} server time now is {}",
        std::process::id(),
        std::env::consts::ARCH,
        std::env::consts::OS,
        now.to_rfc3339_opts(SecondsFormat::Millis, true),
    )
}
