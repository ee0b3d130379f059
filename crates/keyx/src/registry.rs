use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::crypto::{Challenge, ClientPublicKey, KeyPolicy};
use crate::key_store::KeyStore;
use crate::storage::{StorageError, StoredIdentity};

/// Lifecycle stage of an identity. The challenge lives only inside `Pending`.
#[derive(Debug, Clone)]
pub enum IdentityState {
    Pending { challenge: Challenge },
    Registered,
}

/// Audit fields captured from the registering request, stored verbatim
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMetadata {
    pub source_address: Option<String>,
    pub user_agent: Option<String>,
}

/// In-memory view of one identity
#[derive(Debug, Clone)]
pub struct IdentityRecord {
    pub token: Uuid,
    pub public_key: ClientPublicKey,
    pub state: IdentityState,
    /// Issue time while pending, registration time once registered
    pub created_at: DateTime<Utc>,
    pub last_access_at: Option<DateTime<Utc>>,
    pub metadata: RequestMetadata,
}

impl IdentityRecord {
    pub fn is_registered(&self) -> bool {
        matches!(self.state, IdentityState::Registered)
    }

    pub fn challenge(&self) -> Option<&Challenge> {
        match &self.state {
            IdentityState::Pending { challenge } => Some(challenge),
            IdentityState::Registered => None,
        }
    }

    fn to_stored(&self) -> StoredIdentity {
        StoredIdentity {
            created: self.created_at,
            uuid: self.token,
            ip: self.metadata.source_address.clone(),
            agent: self.metadata.user_agent.clone(),
            public_key: self.public_key.to_jwk(),
            last_access: self.last_access_at,
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Token never issued, or not in the lifecycle stage the operation needs
    #[error("Unknown identity")]
    UnknownIdentity,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Exclusive access to one identity; other operations on the same token wait
pub type IdentityGuard = OwnedMutexGuard<IdentityRecord>;

/// Token → identity map shared by every request
///
/// Each record sits behind its own async mutex so mutations are serialized
/// per token while different tokens proceed independently.
pub struct IdentityRegistry {
    identities: DashMap<Uuid, Arc<Mutex<IdentityRecord>>>,
    key_store: KeyStore,
}

impl IdentityRegistry {
    /// Create an empty registry
    pub fn new(key_store: KeyStore) -> Self {
        Self {
            identities: DashMap::new(),
            key_store,
        }
    }

    /// Create a registry seeded with every identity the key store holds
    pub async fn load(key_store: KeyStore, policy: &KeyPolicy) -> Result<Self, StorageError> {
        let registry = Self::new(key_store);

        for stored in registry.key_store.list_registered_identities().await? {
            let public_key = match ClientPublicKey::from_jwk(&stored.public_key, policy) {
                Ok(key) => key,
                Err(err) => {
                    warn!(token = %stored.uuid, %err, "Skipping identity with unusable public key");
                    continue;
                }
            };

            let record = IdentityRecord {
                token: stored.uuid,
                public_key,
                state: IdentityState::Registered,
                created_at: stored.created,
                last_access_at: stored.last_access,
                metadata: RequestMetadata {
                    source_address: stored.ip,
                    user_agent: stored.agent,
                },
            };
            let _previous = registry
                .identities
                .insert(stored.uuid, Arc::new(Mutex::new(record)));
        }

        debug!(count = registry.len(), "Identity registry loaded");
        Ok(registry)
    }

    /// Allocate a fresh token holding a pending record with a new challenge
    pub fn create_pending(&self, public_key: ClientPublicKey) -> (Uuid, Challenge) {
        loop {
            let token = Uuid::new_v4();

            // Records are never removed, so a vacant slot means the token was never issued
            if let Entry::Vacant(vacant) = self.identities.entry(token) {
                let challenge = Challenge::random();
                let record = IdentityRecord {
                    token,
                    public_key,
                    state: IdentityState::Pending {
                        challenge: challenge.clone(),
                    },
                    created_at: Utc::now(),
                    last_access_at: None,
                    metadata: RequestMetadata::default(),
                };
                let _slot = vacant.insert(Arc::new(Mutex::new(record)));
                return (token, challenge);
            }
        }
    }

    /// Snapshot of the record for `token`
    pub async fn get(&self, token: &Uuid) -> Result<IdentityRecord, RegistryError> {
        Ok(self.lock(token).await?.clone())
    }

    /// Take the per-token lock
    pub async fn lock(&self, token: &Uuid) -> Result<IdentityGuard, RegistryError> {
        let slot = self
            .identities
            .get(token)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(RegistryError::UnknownIdentity)?;

        Ok(slot.lock_owned().await)
    }

    /// Transition a pending record to registered
    ///
    /// The durable write happens first; if it fails the record stays pending
    /// with its challenge intact.
    pub async fn promote(
        &self,
        guard: &mut IdentityGuard,
        metadata: RequestMetadata,
    ) -> Result<(), RegistryError> {
        if guard.is_registered() {
            return Err(RegistryError::UnknownIdentity);
        }

        let promoted = IdentityRecord {
            state: IdentityState::Registered,
            created_at: Utc::now(),
            last_access_at: None,
            metadata,
            ..(**guard).clone()
        };

        self.key_store.persist(&promoted.to_stored()).await?;

        **guard = promoted;
        Ok(())
    }

    /// Record a successful message retrieval
    ///
    /// Memory is always updated; the returned error only reports the durable write.
    pub async fn touch(
        &self,
        guard: &mut IdentityGuard,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        guard.last_access_at = Some(at);
        self.key_store.touch(&guard.token, at).await
    }

    /// Number of known identities, pending and registered
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::storage::{MemoryStorage, Storage};
    use crate::test_utils::{client_public_key, FailingStorage};

    fn registry() -> (IdentityRegistry, KeyStore) {
        let key_store = KeyStore::new(Arc::new(MemoryStorage::new()));
        (IdentityRegistry::new(key_store.clone()), key_store)
    }

    #[tokio::test]
    async fn test_create_pending_issues_unique_tokens() {
        let (registry, _) = registry();
        let mut seen = HashSet::new();

        for _ in 0..64 {
            let (token, challenge) = registry.create_pending(client_public_key());
            assert!(seen.insert(token), "token {token} issued twice");
            assert_eq!(challenge.as_bytes().len(), 32);
        }

        assert_eq!(registry.len(), 64);
    }

    #[tokio::test]
    async fn test_pending_record_holds_challenge() {
        let (registry, _) = registry();
        let (token, challenge) = registry.create_pending(client_public_key());

        let record = registry.get(&token).await.unwrap();
        assert!(!record.is_registered());
        assert_eq!(record.challenge().unwrap().as_bytes(), challenge.as_bytes());
    }

    #[tokio::test]
    async fn test_get_unknown_token() {
        let (registry, _) = registry();

        assert!(matches!(
            registry.get(&Uuid::new_v4()).await,
            Err(RegistryError::UnknownIdentity)
        ));
    }

    #[tokio::test]
    async fn test_promote_persists_and_clears_challenge() {
        let (registry, key_store) = registry();
        let (token, _) = registry.create_pending(client_public_key());
        let metadata = RequestMetadata {
            source_address: Some("198.51.100.1".to_owned()),
            user_agent: Some("agent/1.0".to_owned()),
        };

        let mut guard = registry.lock(&token).await.unwrap();
        registry.promote(&mut guard, metadata.clone()).await.unwrap();
        drop(guard);

        let record = registry.get(&token).await.unwrap();
        assert!(record.is_registered());
        assert!(record.challenge().is_none());
        assert_eq!(record.metadata, metadata);

        let stored = key_store.get_identity(&token).await.unwrap().unwrap();
        assert_eq!(stored.ip.as_deref(), Some("198.51.100.1"));
        assert_eq!(stored.agent.as_deref(), Some("agent/1.0"));
        assert_eq!(stored.public_key, client_public_key().to_jwk());
    }

    #[tokio::test]
    async fn test_promote_twice_is_refused() {
        let (registry, _) = registry();
        let (token, _) = registry.create_pending(client_public_key());

        let mut guard = registry.lock(&token).await.unwrap();
        registry
            .promote(&mut guard, RequestMetadata::default())
            .await
            .unwrap();

        assert!(matches!(
            registry.promote(&mut guard, RequestMetadata::default()).await,
            Err(RegistryError::UnknownIdentity)
        ));
    }

    #[tokio::test]
    async fn test_failed_persist_keeps_record_pending() {
        let registry = IdentityRegistry::new(KeyStore::new(Arc::new(FailingStorage)));
        let (token, challenge) = registry.create_pending(client_public_key());

        let mut guard = registry.lock(&token).await.unwrap();
        assert!(matches!(
            registry.promote(&mut guard, RequestMetadata::default()).await,
            Err(RegistryError::Storage(_))
        ));
        drop(guard);

        let record = registry.get(&token).await.unwrap();
        assert!(!record.is_registered());
        assert_eq!(record.challenge().unwrap().as_bytes(), challenge.as_bytes());
    }

    #[tokio::test]
    async fn test_load_rehydrates_registered_identities() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let first = IdentityRegistry::new(KeyStore::new(Arc::clone(&storage)));
        let (registered, _) = first.create_pending(client_public_key());
        let (pending, _) = first.create_pending(client_public_key());

        let mut guard = first.lock(&registered).await.unwrap();
        first
            .promote(&mut guard, RequestMetadata::default())
            .await
            .unwrap();
        drop(guard);

        let reloaded = IdentityRegistry::load(KeyStore::new(storage), &KeyPolicy::default())
            .await
            .unwrap();

        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.get(&registered).await.unwrap().is_registered());
        assert!(matches!(
            reloaded.get(&pending).await,
            Err(RegistryError::UnknownIdentity)
        ));
    }

    #[tokio::test]
    async fn test_touch_updates_memory_and_store() {
        let (registry, key_store) = registry();
        let (token, _) = registry.create_pending(client_public_key());

        let mut guard = registry.lock(&token).await.unwrap();
        registry
            .promote(&mut guard, RequestMetadata::default())
            .await
            .unwrap();

        let at = Utc::now();
        registry.touch(&mut guard, at).await.unwrap();
        drop(guard);

        assert_eq!(registry.get(&token).await.unwrap().last_access_at, Some(at));
        assert_eq!(
            key_store.get_identity(&token).await.unwrap().unwrap().last_access,
            Some(at)
        );
    }
}
