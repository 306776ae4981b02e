//! Storage backends: where the encoded key halves live.

use crate::error::KeystoreError;
use crate::types::{Identity, KeyHalf};

use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use zeroize::Zeroizing;

// ---------------------------------------------------------------------------
// Storage trait
// ---------------------------------------------------------------------------

/// Backend for persisting encoded key halves (PEM text).
///
/// Implement this for your infrastructure:
/// - InMemoryBackend (testing)
/// - FileBackend (one file per half)
pub trait StorageBackend: Send + Sync {
    fn get(&self, id: &Identity, half: KeyHalf) -> Result<Option<Zeroizing<String>>, KeystoreError>;
    fn put(&self, id: &Identity, half: KeyHalf, encoded: &str) -> Result<(), KeystoreError>;
    /// True if something was removed.
    fn delete(&self, id: &Identity, half: KeyHalf) -> Result<bool, KeystoreError>;
    /// Identities with at least one stored half, sorted.
    fn list(&self) -> Result<Vec<Identity>, KeystoreError>;
}

fn poisoned<T>(_: T) -> KeystoreError {
    KeystoreError::StorageError("in-memory store lock poisoned".into())
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// In-memory storage (for testing and ephemeral use).
pub struct InMemoryBackend {
    halves: RwLock<HashMap<(Identity, KeyHalf), Zeroizing<String>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            halves: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for InMemoryBackend {
    fn get(&self, id: &Identity, half: KeyHalf) -> Result<Option<Zeroizing<String>>, KeystoreError> {
        let halves = self.halves.read().map_err(poisoned)?;
        Ok(halves.get(&(id.clone(), half)).cloned())
    }

    fn put(&self, id: &Identity, half: KeyHalf, encoded: &str) -> Result<(), KeystoreError> {
        let mut halves = self.halves.write().map_err(poisoned)?;
        halves.insert((id.clone(), half), Zeroizing::new(encoded.to_owned()));
        Ok(())
    }

    fn delete(&self, id: &Identity, half: KeyHalf) -> Result<bool, KeystoreError> {
        let mut halves = self.halves.write().map_err(poisoned)?;
        Ok(halves.remove(&(id.clone(), half)).is_some())
    }

    fn list(&self) -> Result<Vec<Identity>, KeystoreError> {
        let halves = self.halves.read().map_err(poisoned)?;
        let ids: BTreeSet<Identity> = halves.keys().map(|(id, _)| id.clone()).collect();
        Ok(ids.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// File backend
// ---------------------------------------------------------------------------

/// File-based storage (one PEM file per half).
///
/// Directory layout:
/// ```text
/// keys/
///   {identity_stem}_public.pem
///   {identity_stem}_private.pem    (0600 on unix)
/// ```
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, KeystoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| KeystoreError::StorageError(format!("create dir: {}", e)))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, id: &Identity, half: KeyHalf) -> PathBuf {
        self.dir.join(format!("{}{}", id.file_stem(), suffix(half)))
    }
}

fn suffix(half: KeyHalf) -> &'static str {
    match half {
        KeyHalf::Public => "_public.pem",
        KeyHalf::Private => "_private.pem",
    }
}

fn open_for_write(path: &Path, half: KeyHalf) -> std::io::Result<std::fs::File> {
    let mut opts = std::fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        if half == KeyHalf::Private {
            opts.mode(0o600);
        }
    }
    #[cfg(not(unix))]
    let _ = half;
    opts.open(path)
}

impl StorageBackend for FileBackend {
    fn get(&self, id: &Identity, half: KeyHalf) -> Result<Option<Zeroizing<String>>, KeystoreError> {
        let path = self.key_path(id, half);
        if !path.exists() {
            return Ok(None);
        }
        std::fs::read_to_string(&path)
            .map(|s| Some(Zeroizing::new(s)))
            .map_err(|e| KeystoreError::StorageError(format!("read: {}", e)))
    }

    fn put(&self, id: &Identity, half: KeyHalf, encoded: &str) -> Result<(), KeystoreError> {
        let path = self.key_path(id, half);
        // Atomic write: write to temp, then rename
        let tmp = path.with_extension("pem.tmp");
        let mut file = open_for_write(&tmp, half)
            .map_err(|e| KeystoreError::StorageError(format!("create: {}", e)))?;
        file.write_all(encoded.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| KeystoreError::StorageError(format!("write: {}", e)))?;
        drop(file);
        std::fs::rename(&tmp, &path)
            .map_err(|e| KeystoreError::StorageError(format!("rename: {}", e)))?;
        Ok(())
    }

    fn delete(&self, id: &Identity, half: KeyHalf) -> Result<bool, KeystoreError> {
        let path = self.key_path(id, half);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path)
            .map_err(|e| KeystoreError::StorageError(format!("delete: {}", e)))?;
        Ok(true)
    }

    fn list(&self) -> Result<Vec<Identity>, KeystoreError> {
        let mut ids = BTreeSet::new();
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| KeystoreError::StorageError(format!("readdir: {}", e)))?;
        for entry in entries {
            let entry = entry.map_err(|e| KeystoreError::StorageError(format!("entry: {}", e)))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let stem = KeyHalf::BOTH
                .iter()
                .find_map(|h| name.strip_suffix(suffix(*h)));
            if let Some(id) = stem.and_then(Identity::from_file_stem) {
                ids.insert(id);
            }
        }
        Ok(ids.into_iter().collect())
    }
}
