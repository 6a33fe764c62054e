//! Store wrapper that counts calls, for engine tests

use std::cell::Cell;

use anyhow::Result;
use tempfile::TempDir;

use super::{FilesystemStorage, ImmutableStore, NameService, StorageBackend, StoreAddress};

pub struct CountingStorage {
    inner: FilesystemStorage,
    _dir: TempDir,
    puts: Cell<usize>,
    gets: Cell<usize>,
    publishes: Cell<usize>,
}

impl CountingStorage {
    /// A fresh, initialized store in a temporary directory
    pub fn new() -> Result<Self> {
        let dir = TempDir::new()?;
        let inner = FilesystemStorage::new(dir.path())?;
        inner.initialize()?;
        Ok(Self {
            inner,
            _dir: dir,
            puts: Cell::new(0),
            gets: Cell::new(0),
            publishes: Cell::new(0),
        })
    }

    pub fn puts(&self) -> usize {
        self.puts.get()
    }

    pub fn gets(&self) -> usize {
        self.gets.get()
    }

    pub fn publishes(&self) -> usize {
        self.publishes.get()
    }

    pub fn reset_counts(&self) {
        self.puts.set(0);
        self.gets.set(0);
        self.publishes.set(0);
    }
}

impl ImmutableStore for CountingStorage {
    fn put(&self, content: &[u8]) -> Result<StoreAddress> {
        self.puts.set(self.puts.get() + 1);
        self.inner.put(content)
    }

    fn get(&self, address: &str) -> Result<Vec<u8>> {
        self.gets.set(self.gets.get() + 1);
        self.inner.get(address)
    }
}

impl NameService for CountingStorage {
    fn resolve_name(&self, name: &str) -> Result<Option<StoreAddress>> {
        self.inner.resolve_name(name)
    }

    fn publish_name(&self, name: &str, address: &str) -> Result<()> {
        self.publishes.set(self.publishes.get() + 1);
        self.inner.publish_name(name, address)
    }

    fn identity(&self) -> Result<String> {
        self.inner.identity()
    }
}

impl StorageBackend for CountingStorage {
    fn initialize(&self) -> Result<()> {
        self.inner.initialize()
    }
}
