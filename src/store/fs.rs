//! Filesystem storage backend
//!
//! One directory per named store under a root path. Entry keys are
//! request URLs and not safe as file names, so each entry is stored in a
//! file named by the sha256 of its key, with the key itself framed into
//! the file: `[key-len u32 LE][key bytes][blob bytes]`. Writes go to a
//! sibling `.tmp` file and are renamed into place, which gives the
//! per-key atomicity the lifecycle protocol relies on.

use crate::store::{CacheStorage, Store, StoreError, StoreHandle, StoreResult};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

const ENTRY_EXT: &str = "entry";
const TMP_EXT: &str = "tmp";

/// Filesystem implementation of the host storage capability
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    /// Create a backend rooted at the given directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn store_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

#[async_trait]
impl CacheStorage for FsStorage {
    async fn open(&self, name: &str) -> StoreResult<StoreHandle> {
        let dir = self.store_dir(name);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(format!("creating store dir {}", dir.display()), e))?;
        Ok(Box::new(FsStore {
            name: name.to_string(),
            dir,
        }))
    }

    async fn delete(&self, name: &str) -> StoreResult<()> {
        let dir = self.store_dir(name);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(
                format!("deleting store dir {}", dir.display()),
                e,
            )),
        }
    }

    async fn exists(&self, name: &str) -> StoreResult<bool> {
        Ok(fs::try_exists(self.store_dir(name)).await.unwrap_or(false))
    }
}

/// Handle onto one on-disk store directory
struct FsStore {
    name: String,
    dir: PathBuf,
}

impl FsStore {
    fn entry_path(&self, key: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        self.dir
            .join(hex::encode(hasher.finalize()))
            .with_extension(ENTRY_EXT)
    }

    fn frame(key: &str, blob: &[u8]) -> Vec<u8> {
        let mut framed = Vec::with_capacity(4 + key.len() + blob.len());
        framed.extend_from_slice(&(key.len() as u32).to_le_bytes());
        framed.extend_from_slice(key.as_bytes());
        framed.extend_from_slice(blob);
        framed
    }

    fn unframe<'a>(&self, path: &Path, bytes: &'a [u8]) -> StoreResult<(String, &'a [u8])> {
        if bytes.len() < 4 {
            return Err(StoreError::corrupt(
                &self.name,
                format!("{}: truncated header", path.display()),
            ));
        }
        let key_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if bytes.len() < 4 + key_len {
            return Err(StoreError::corrupt(
                &self.name,
                format!("{}: truncated key", path.display()),
            ));
        }
        let key = std::str::from_utf8(&bytes[4..4 + key_len])
            .map_err(|e| {
                StoreError::corrupt(&self.name, format!("{}: {}", path.display(), e))
            })?
            .to_string();
        Ok((key, &bytes[4 + key_len..]))
    }

    async fn read_entry(&self, path: &Path) -> StoreResult<Option<(String, Vec<u8>)>> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::io(
                    format!("reading entry {}", path.display()),
                    e,
                ))
            }
        };
        let (key, blob) = self.unframe(path, &bytes)?;
        Ok(Some((key, blob.to_vec())))
    }
}

#[async_trait]
impl Store for FsStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        match self.read_entry(&self.entry_path(key)).await? {
            Some((_, blob)) => Ok(Some(blob)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, blob: Vec<u8>) -> StoreResult<()> {
        let path = self.entry_path(key);
        let tmp = path.with_extension(TMP_EXT);
        fs::write(&tmp, Self::frame(key, &blob))
            .await
            .map_err(|e| StoreError::io(format!("writing entry {}", tmp.display()), e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::io(format!("committing entry {}", path.display()), e))
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let path = self.entry_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(
                format!("deleting entry {}", path.display()),
                e,
            )),
        }
    }

    async fn keys(&self) -> StoreResult<Vec<String>> {
        let mut dir = fs::read_dir(&self.dir)
            .await
            .map_err(|e| StoreError::io(format!("listing store {}", self.dir.display()), e))?;
        let mut keys = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| StoreError::io(format!("listing store {}", self.dir.display()), e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXT) {
                continue;
            }
            if let Some((key, _)) = self.read_entry(&path).await? {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}
