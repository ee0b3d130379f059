use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::RsaJwk;

/// Storage prefixes for different types of data
pub mod prefixes {
    /// Prefix for registered identities, followed by the token
    pub const IDENTITY: &str = "identity:";

    /// Singleton holding the server key pair
    pub const SERVER_KEY_PAIR: &str = "server:keypair";
}

/// Durable record of a registered identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredIdentity {
    /// When the registration completed
    pub created: DateTime<Utc>,

    /// The identity token
    pub uuid: Uuid,

    /// Source address seen on the registering request
    pub ip: Option<String>,

    /// User agent seen on the registering request
    pub agent: Option<String>,

    /// The client's public key
    pub public_key: RsaJwk,

    /// Last successful message retrieval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_access: Option<DateTime<Utc>>,
}

impl StoredIdentity {
    pub fn storage_key(&self) -> String {
        identity_key(&self.uuid)
    }
}

/// Storage key of the record for `token`
pub fn identity_key(token: &Uuid) -> String {
    format!("{}{}", prefixes::IDENTITY, token.as_hyphenated())
}

/// Durable record of the server key pair
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerKeyRecord {
    pub created: DateTime<Utc>,

    pub public_key: RsaJwk,

    /// PEM encoded, passphrase encrypted PKCS#8
    pub private_key: String,
}
