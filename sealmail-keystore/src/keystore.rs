//! Main keystore: per-identity RSA key pairs over a pluggable storage backend.

use crate::audit::{AuditAction, AuditEvent, AuditSinkSync};
use crate::error::KeystoreError;
use crate::storage::StorageBackend;
use crate::types::{Identity, KeyHalf, KeyStatus};

use sealmail_envelope::{KeyPair, KeyStrength, PrivateKey, PublicKey};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockTable = Mutex<HashMap<Identity, Arc<AsyncMutex<()>>>>;

/// Holds one identity's lock. The table entry is dropped with the last holder,
/// so lookups of unknown identities leave nothing behind.
struct IdentityGuard<'a> {
    table: &'a LockTable,
    id: Identity,
    slot: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for IdentityGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters clone the slot under the table lock, so a count of two
        // (table + this guard) means nobody else holds or awaits it.
        if let Ok(mut locks) = self.table.lock() {
            let idle = locks
                .get(&self.id)
                .is_some_and(|slot| Arc::ptr_eq(slot, &self.slot) && Arc::strong_count(slot) == 2);
            if idle {
                locks.remove(&self.id);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Keystore
// ---------------------------------------------------------------------------

/// One key pair per identity.
///
/// Every operation on an identity holds that identity's lock for its whole
/// duration, so a pair is never observed half-written. Different identities
/// never block each other.
pub struct KeyStore {
    storage: Arc<dyn StorageBackend>,
    audit: Arc<dyn AuditSinkSync>,
    locks: LockTable,
}

impl KeyStore {
    /// Create a new keystore with the given storage backend and audit sink.
    pub fn new(storage: Arc<dyn StorageBackend>, audit: Arc<dyn AuditSinkSync>) -> Self {
        Self {
            storage,
            audit,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock(&self, id: &Identity) -> Result<IdentityGuard<'_>, KeystoreError> {
        let slot = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|_| KeystoreError::StorageError("identity lock table poisoned".into()))?;
            locks.entry(id.clone()).or_default().clone()
        };
        let guard = slot.clone().lock_owned().await;
        Ok(IdentityGuard {
            table: &self.locks,
            id: id.clone(),
            slot,
            guard: Some(guard),
        })
    }

    #[cfg(test)]
    pub(crate) fn lock_table_len(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }

    // -----------------------------------------------------------------------
    // Key generation and persistence
    // -----------------------------------------------------------------------

    /// Generate and persist a fresh pair, replacing any existing one.
    ///
    /// Only 2048 and 4096 bits are accepted.
    pub async fn generate(&self, id: &Identity, bits: usize) -> Result<KeyPair, KeystoreError> {
        let strength = KeyStrength::from_bits(bits).ok_or_else(|| {
            KeystoreError::InvalidParameter(format!("unsupported key size {} (use 2048 or 4096)", bits))
        })?;

        tracing::debug!(identity = %id, %strength, "generating key pair");
        let pair = tokio::task::spawn_blocking(move || KeyPair::generate(strength))
            .await
            .map_err(|e| KeystoreError::StorageError(format!("key generation task: {}", e)))??;

        let _guard = self.lock(id).await?;
        if let Err(e) = self.write_pair(id, &pair) {
            self.audit.record(
                AuditEvent::key_event(id, AuditAction::KeyGenerated { bits }).with_failure(),
            );
            return Err(e);
        }
        self.audit.record(
            AuditEvent::key_event(id, AuditAction::KeyGenerated { bits })
                .with_detail(pair.public.fingerprint()?),
        );
        tracing::info!(identity = %id, bits, "key pair generated");
        Ok(pair)
    }

    /// Persist both halves of `pair` for `id`.
    pub async fn save(&self, id: &Identity, pair: &KeyPair) -> Result<(), KeystoreError> {
        if !pair.is_consistent() {
            return Err(KeystoreError::InvalidParameter(
                "public and private halves do not match".into(),
            ));
        }
        let _guard = self.lock(id).await?;
        let result = self.write_pair(id, pair);
        let event = AuditEvent::key_event(id, AuditAction::KeyPairSaved);
        self.audit.record(if result.is_ok() { event } else { event.with_failure() });
        result
    }

    /// Caller holds the identity lock. On failure the previous public half is restored.
    fn write_pair(&self, id: &Identity, pair: &KeyPair) -> Result<(), KeystoreError> {
        let public_pem = pair.public.to_pem()?;
        let private_pem = pair.private.to_pem()?;

        let previous = self.storage.get(id, KeyHalf::Public)?;
        self.storage.put(id, KeyHalf::Public, &public_pem)?;
        if let Err(e) = self.storage.put(id, KeyHalf::Private, &private_pem) {
            let rollback = match previous {
                Some(pem) => self.storage.put(id, KeyHalf::Public, &pem),
                None => self.storage.delete(id, KeyHalf::Public).map(|_| ()),
            };
            if let Err(rb) = rollback {
                tracing::warn!(identity = %id, error = %rb, "rollback of public half failed");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Remove both halves. True if at least one was removed.
    pub async fn delete(&self, id: &Identity) -> Result<bool, KeystoreError> {
        let _guard = self.lock(id).await?;
        let removed = match self.remove_pair(id) {
            Ok(removed) => removed,
            Err(e) => {
                self.audit.record(
                    AuditEvent::key_event(id, AuditAction::KeyPairDeleted { removed: false })
                        .with_failure(),
                );
                return Err(e);
            }
        };
        self.audit
            .record(AuditEvent::key_event(id, AuditAction::KeyPairDeleted { removed }));
        if removed {
            tracing::info!(identity = %id, "key pair deleted");
        }
        Ok(removed)
    }

    /// Caller holds the identity lock. On failure the private half is restored.
    fn remove_pair(&self, id: &Identity) -> Result<bool, KeystoreError> {
        let previous = self.storage.get(id, KeyHalf::Private)?;
        let private = self.storage.delete(id, KeyHalf::Private)?;
        match self.storage.delete(id, KeyHalf::Public) {
            Ok(public) => Ok(public || private),
            Err(e) => {
                if let Some(pem) = previous {
                    if let Err(rb) = self.storage.put(id, KeyHalf::Private, &pem) {
                        tracing::warn!(identity = %id, error = %rb, "rollback of private half failed");
                    }
                }
                Err(e)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Key retrieval
    // -----------------------------------------------------------------------

    pub async fn load_public(&self, id: &Identity) -> Result<PublicKey, KeystoreError> {
        let _guard = self.lock(id).await?;
        self.read_public(id)
    }

    /// Load the private half. Every successful access is audited.
    pub async fn load_private(&self, id: &Identity) -> Result<PrivateKey, KeystoreError> {
        let _guard = self.lock(id).await?;
        let key = self.read_private(id)?;
        self.audit
            .record(AuditEvent::key_event(id, AuditAction::PrivateKeyAccessed));
        Ok(key)
    }

    fn read_public(&self, id: &Identity) -> Result<PublicKey, KeystoreError> {
        let pem = self
            .storage
            .get(id, KeyHalf::Public)?
            .ok_or_else(|| KeystoreError::not_found(id, KeyHalf::Public))?;
        PublicKey::from_pem(&pem).map_err(|e| {
            tracing::warn!(identity = %id, error = %e, "stored public key is unreadable");
            KeystoreError::not_found(id, KeyHalf::Public)
        })
    }

    fn read_private(&self, id: &Identity) -> Result<PrivateKey, KeystoreError> {
        let pem = self
            .storage
            .get(id, KeyHalf::Private)?
            .ok_or_else(|| KeystoreError::not_found(id, KeyHalf::Private))?;
        PrivateKey::from_pem(&pem).map_err(|_| {
            tracing::warn!(identity = %id, "stored private key is unreadable");
            KeystoreError::not_found(id, KeyHalf::Private)
        })
    }

    // -----------------------------------------------------------------------
    // Existence checks
    // -----------------------------------------------------------------------

    /// Which halves are present and readable.
    pub async fn status(&self, id: &Identity) -> Result<KeyStatus, KeystoreError> {
        let _guard = self.lock(id).await?;
        Ok(KeyStatus {
            has_public: present(self.read_public(id))?,
            has_private: present(self.read_private(id))?,
        })
    }

    /// True only if both halves are present and readable.
    pub async fn exists(&self, id: &Identity) -> Result<bool, KeystoreError> {
        Ok(self.status(id).await?.is_complete())
    }

    pub async fn has_public(&self, id: &Identity) -> Result<bool, KeystoreError> {
        let _guard = self.lock(id).await?;
        present(self.read_public(id))
    }

    pub async fn has_private(&self, id: &Identity) -> Result<bool, KeystoreError> {
        let _guard = self.lock(id).await?;
        present(self.read_private(id))
    }

    /// Every identity with at least one stored half.
    pub async fn list(&self) -> Result<Vec<(Identity, KeyStatus)>, KeystoreError> {
        let ids = self.storage.list()?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let status = self.status(&id).await?;
            out.push((id, status));
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Public key exchange
    // -----------------------------------------------------------------------

    /// Canonical shareable encoding of the identity's public key.
    pub async fn export_public(&self, id: &Identity) -> Result<String, KeystoreError> {
        let key = self.load_public(id).await?;
        let blob = key.export()?;
        self.audit.record(
            AuditEvent::key_event(id, AuditAction::PublicKeyExported).with_detail(key.fingerprint()?),
        );
        Ok(blob)
    }

    /// Store someone's public key. No private half is needed locally.
    ///
    /// Rejected if a local private key exists for `id` and does not belong to it.
    pub async fn import_public(&self, id: &Identity, encoded: &str) -> Result<PublicKey, KeystoreError> {
        let key = PublicKey::import(encoded)?;
        let fingerprint = key.fingerprint()?;

        let _guard = self.lock(id).await?;
        if let Ok(local) = self.read_private(id) {
            if local.public_key() != key {
                self.audit.record(
                    AuditEvent::key_event(id, AuditAction::PublicKeyImported)
                        .with_detail(fingerprint)
                        .with_failure(),
                );
                return Err(KeystoreError::InvalidParameter(format!(
                    "imported key does not match the local private key of {}",
                    id
                )));
            }
        }
        self.storage.put(id, KeyHalf::Public, &key.to_pem()?)?;
        self.audit.record(
            AuditEvent::key_event(id, AuditAction::PublicKeyImported).with_detail(fingerprint.clone()),
        );
        tracing::info!(identity = %id, %fingerprint, "public key imported");
        Ok(key)
    }
}

fn present<T>(read: Result<T, KeystoreError>) -> Result<bool, KeystoreError> {
    match read {
        Ok(_) => Ok(true),
        Err(KeystoreError::KeyNotFound { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}
