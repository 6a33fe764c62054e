//! A configured remote: its private directory, its mark table, and the
//! root metadata object that anchors it in the store.

mod locator;
mod metadata;

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

pub use locator::RemoteLocator;
pub use metadata::RepositoryMetadata;

use crate::{
    marks::MarkTable,
    storage::{StorageBackend, StoreAddress},
};

pub struct Remote {
    alias: String,
    temporary: bool,
    locator: RemoteLocator,
    prefix: String,
    private_dir: PathBuf,
    marks: MarkTable,
}

impl Remote {
    /// Open the remote `alias` at `url` for the repository in `git_dir`.
    ///
    /// When git invokes us for a bare URL the alias equals the URL; such a
    /// remote gets a hashed alias and its private directory is removed by
    /// [`Remote::cleanup`].
    pub fn open(git_dir: &Path, alias: &str, url: &str) -> Result<Self> {
        let locator = RemoteLocator::parse(url)?;

        let (alias, temporary) = if alias == url {
            (hex::encode(Sha256::digest(url.as_bytes())), true)
        } else {
            (alias.to_string(), false)
        };

        let private_dir = git_dir.join("cas").join(&alias);
        if !private_dir.is_dir() {
            tracing::debug!("Creating directory {:?}", private_dir);
            fs::create_dir_all(&private_dir)
                .with_context(|| format!("Failed to create {:?}", private_dir))?;
        }

        let marks = MarkTable::load(&private_dir.join("state.json"))?;

        Ok(Self {
            prefix: format!("refs/cas/{}", alias),
            alias,
            temporary,
            locator,
            private_dir,
            marks,
        })
    }

    /// Seed the ref table from the remote's root metadata when nothing is
    /// cached locally yet
    pub fn bootstrap<S: StorageBackend>(&mut self, storage: &S) -> Result<()> {
        if self.marks.has_refs() {
            return Ok(());
        }

        let root = match &self.locator {
            RemoteLocator::Direct(address) => Some(address.clone()),
            RemoteLocator::Named(name) => {
                tracing::info!("Resolving name {}", name);
                let resolved = storage.resolve_name(name)?;
                if resolved.is_none() {
                    tracing::info!("Name {} is not published yet, starting empty", name);
                }
                resolved
            }
        };
        let Some(root) = root else {
            return Ok(());
        };

        tracing::debug!("Found repository root {}", root);
        self.seed_refs(storage, &root)
    }

    /// Pick up refs published since this remote last looked.
    ///
    /// Only a naming record can move; a direct root never changes.
    pub fn refresh<S: StorageBackend>(&mut self, storage: &S) -> Result<()> {
        let RemoteLocator::Named(name) = &self.locator else {
            return Ok(());
        };
        let Some(root) = storage.resolve_name(name)? else {
            return Ok(());
        };
        if self.last_root()?.as_deref() == Some(root.as_str()) {
            return Ok(());
        }

        tracing::info!("{} now points at {}", name, root);
        self.seed_refs(storage, &root)
    }

    /// Replace the ref table with the one recorded in `root`
    fn seed_refs<S: StorageBackend>(&mut self, storage: &S, root: &str) -> Result<()> {
        let metadata = RepositoryMetadata::read(storage, root)?;
        for (ref_name, address) in &metadata.refs {
            tracing::debug!("Found ref {} = {:?}", ref_name, address);
        }
        self.marks.replace_refs(metadata.refs);
        self.persist_marks()?;
        self.record_root(root)
    }

    fn last_root(&self) -> Result<Option<StoreAddress>> {
        let path = self.repo_path();
        if !path.is_file() {
            return Ok(None);
        }
        let content =
            fs::read_to_string(&path).with_context(|| format!("Failed to read {:?}", path))?;
        Ok(Some(content.trim().to_string()))
    }

    fn record_root(&self, root: &str) -> Result<()> {
        fs::write(self.repo_path(), format!("{}\n", root))
            .with_context(|| format!("Failed to write {:?}", self.repo_path()))
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Namespace the remote's refs are imported under
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Marks file git itself reads and writes during fast-import/export
    pub fn git_marks_path(&self) -> PathBuf {
        self.private_dir.join("marks")
    }

    fn state_path(&self) -> PathBuf {
        self.private_dir.join("state.json")
    }

    /// Last root metadata address this remote read or published
    pub fn repo_path(&self) -> PathBuf {
        self.private_dir.join("repo")
    }

    pub fn marks(&self) -> &MarkTable {
        &self.marks
    }

    pub fn marks_mut(&mut self) -> &mut MarkTable {
        &mut self.marks
    }

    /// Replace the mark table wholesale
    pub fn install_marks(&mut self, marks: MarkTable) {
        self.marks = marks;
    }

    /// Rewrite `refs/...` into this remote's private namespace
    pub fn adjust_ref(&self, ref_name: &str) -> String {
        match ref_name.strip_prefix("refs/") {
            Some(rest) => format!("{}/{}", self.prefix, rest),
            None => ref_name.to_string(),
        }
    }

    pub fn persist_marks(&self) -> Result<()> {
        self.marks.save(&self.state_path())
    }

    /// Write a new root metadata object for the current refs and point the
    /// remote at it
    pub fn publish<S: StorageBackend>(&self, storage: &S) -> Result<StoreAddress> {
        let metadata = RepositoryMetadata::new(self.marks.refs().clone());
        let root = storage
            .put_json(&metadata)
            .context("Failed to store root metadata")?;

        self.record_root(&root)?;
        tracing::info!("Repository root = {}", root);

        match &self.locator {
            RemoteLocator::Named(name) => {
                if *name == storage.identity()? {
                    storage.publish_name(name, &root)?;
                    tracing::info!("Published {} -> {}", name, root);
                } else {
                    tracing::warn!(
                        "Name {} is owned by another node, not publishing {}",
                        name,
                        root
                    );
                }
            }
            RemoteLocator::Direct(_) => {
                tracing::warn!("Remote URL is a fixed root; the new root is {}", root);
            }
        }
        Ok(root)
    }

    /// Remove the private directory of a temporary remote
    pub fn cleanup(&self) -> Result<()> {
        if self.temporary && self.private_dir.is_dir() {
            tracing::debug!("Removing directory {:?}", self.private_dir);
            fs::remove_dir_all(&self.private_dir)
                .with_context(|| format!("Failed to remove {:?}", self.private_dir))?;
        }
        Ok(())
    }
}
