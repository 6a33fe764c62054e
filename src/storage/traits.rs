use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};

/// Opaque content-derived address returned by the store.
/// Identical content always yields the same address.
pub type StoreAddress = String;

/// Trait for immutable, content-addressed storage operations
pub trait ImmutableStore {
    /// Write content and return its address.
    /// Writing content that already exists returns the existing address.
    fn put(&self, content: &[u8]) -> Result<StoreAddress>;

    /// Read object by address into memory.
    /// Returns error if object doesn't exist.
    fn get(&self, address: &str) -> Result<Vec<u8>>;

    /// Serialize `value` as JSON and store it
    fn put_json<T: Serialize>(&self, value: &T) -> Result<StoreAddress> {
        let content = serde_json::to_vec(value).context("Failed to serialize object as JSON")?;
        self.put(&content)
    }

    /// Read an object and decode it as JSON
    fn get_json<T: DeserializeOwned>(&self, address: &str) -> Result<T> {
        let content = self.get(address)?;
        serde_json::from_slice(&content)
            .with_context(|| format!("Object {} is not the expected JSON document", address))
    }
}

/// Trait for the mutable naming records that point at a root object
pub trait NameService {
    /// Current address behind `name`, or `None` if nothing was published yet
    fn resolve_name(&self, name: &str) -> Result<Option<StoreAddress>>;

    /// Point `name` at `address`.
    /// Only the node whose identity equals `name` may publish it.
    fn publish_name(&self, name: &str, address: &str) -> Result<()>;

    /// Identity of this node; also the name it is allowed to publish
    fn identity(&self) -> Result<String>;
}

/// Combined storage backend trait
pub trait StorageBackend: ImmutableStore + NameService {
    /// Initialize storage (create directories, verify access, etc.)
    fn initialize(&self) -> Result<()>;
}
