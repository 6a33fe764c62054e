use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use super::traits::{ImmutableStore, NameService, StorageBackend, StoreAddress};

/// Filesystem-based store using SHA-256 content addressing.
///
/// Layout:
/// - `objects/<sha256>`: immutable content
/// - `names/<name>`: naming records, each holding one address
/// - `identity`: this node's identity
pub struct FilesystemStorage {
    base_path: PathBuf,
}

impl FilesystemStorage {
    /// Create a new filesystem storage backend
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self> {
        Ok(FilesystemStorage {
            base_path: base_path.as_ref().to_path_buf(),
        })
    }

    fn objects_dir(&self) -> PathBuf {
        self.base_path.join("objects")
    }

    fn names_dir(&self) -> PathBuf {
        self.base_path.join("names")
    }

    fn identity_path(&self) -> PathBuf {
        self.base_path.join("identity")
    }

    /// Compute SHA-256 hash of content
    fn compute_hash(content: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content);
        hex::encode(hasher.finalize())
    }

    /// Reject keys that would escape their directory
    fn checked_key<'a>(kind: &str, key: &'a str) -> Result<&'a str> {
        if key.is_empty() || key.contains('/') || key.contains('\\') || key.starts_with('.') {
            anyhow::bail!("Invalid {} {:?}", kind, key);
        }
        Ok(key)
    }
}

impl ImmutableStore for FilesystemStorage {
    fn put(&self, content: &[u8]) -> Result<StoreAddress> {
        let hash_hex = Self::compute_hash(content);
        let path = self.objects_dir().join(&hash_hex);

        // Only write if doesn't exist (immutable)
        if !path.exists() {
            fs::write(&path, content)
                .with_context(|| format!("Failed to write object {}", hash_hex))?;
            tracing::trace!("Stored object {} ({} bytes)", hash_hex, content.len());
        }

        Ok(hash_hex)
    }

    fn get(&self, address: &str) -> Result<Vec<u8>> {
        let path = self
            .objects_dir()
            .join(Self::checked_key("address", address)?);
        fs::read(&path).with_context(|| format!("Failed to read object {}", address))
    }
}

impl NameService for FilesystemStorage {
    fn resolve_name(&self, name: &str) -> Result<Option<StoreAddress>> {
        let path = self.names_dir().join(Self::checked_key("name", name)?);
        if !path.exists() {
            return Ok(None);
        }
        let address = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read naming record {}", name))?;
        Ok(Some(address.trim().to_string()))
    }

    fn publish_name(&self, name: &str, address: &str) -> Result<()> {
        let identity = self.identity()?;
        if name != identity {
            anyhow::bail!(
                "Cannot publish name {}: this node can only publish {}",
                name,
                identity
            );
        }

        let path = self.names_dir().join(Self::checked_key("name", name)?);
        let temp_path = self.names_dir().join(format!(".{}.tmp", name));

        // 1. Write to temp file
        fs::write(&temp_path, format!("{}\n", address))
            .with_context(|| format!("Failed to write naming record {}", name))?;

        // 2. Atomic rename (atomic on POSIX systems)
        fs::rename(&temp_path, &path)
            .with_context(|| format!("Failed to replace naming record {}", name))?;

        Ok(())
    }

    fn identity(&self) -> Result<String> {
        let content = fs::read_to_string(self.identity_path())
            .context("Failed to read store identity (is the store initialized?)")?;
        Ok(content.trim().to_string())
    }
}

impl StorageBackend for FilesystemStorage {
    fn initialize(&self) -> Result<()> {
        fs::create_dir_all(self.objects_dir())
            .with_context(|| format!("Failed to create {:?}", self.objects_dir()))?;
        fs::create_dir_all(self.names_dir())
            .with_context(|| format!("Failed to create {:?}", self.names_dir()))?;

        let identity_path = self.identity_path();
        if !identity_path.exists() {
            let canonical = fs::canonicalize(&self.base_path)
                .with_context(|| format!("Failed to resolve {:?}", self.base_path))?;
            let identity = Self::compute_hash(canonical.to_string_lossy().as_bytes());
            fs::write(&identity_path, format!("{}\n", &identity[..40]))
                .context("Failed to write store identity")?;
        }
        Ok(())
    }
}
