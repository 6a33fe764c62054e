use std::{
    collections::{BTreeMap, HashMap},
    fs,
    io::Write,
    path::Path,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::{error::Error, git::stream::Mark, storage::StoreAddress};

/// On-disk form of the mark table (state.json)
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedMarks {
    #[serde(default)]
    refs: BTreeMap<String, Option<StoreAddress>>,
    #[serde(default)]
    marks: BTreeMap<Mark, StoreAddress>,
    #[serde(default)]
    last_mark: u64,
}

/// Result of looking up the mark for a store address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkLookup {
    /// The address was already marked
    Existing(Mark),
    /// A fresh mark was issued and bound to the address
    Allocated(Mark),
}

impl MarkLookup {
    pub fn mark(self) -> Mark {
        match self {
            MarkLookup::Existing(mark) | MarkLookup::Allocated(mark) => mark,
        }
    }
}

/// Translation table between stream marks and store addresses.
///
/// `marks` maps every bound mark to its address, `rev_marks` maps each
/// address back to the first mark bound to it. A mark, once bound, never
/// changes address.
#[derive(Debug, Clone, Default)]
pub struct MarkTable {
    marks: BTreeMap<Mark, StoreAddress>,
    rev_marks: HashMap<StoreAddress, Mark>,
    refs: BTreeMap<String, Option<StoreAddress>>,
    last_mark: u64,
}

impl MarkTable {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the table from `path`; a missing file yields an empty table
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No mark table at {:?}, starting empty", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read mark table from {:?}", path))?;
        let persisted: PersistedMarks = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse mark table from {:?}", path))?;

        let mut table = Self {
            refs: persisted.refs,
            last_mark: persisted.last_mark,
            ..Self::default()
        };
        for (mark, address) in persisted.marks {
            table.bind_mark(mark, &address)?;
        }
        tracing::debug!(
            "Loaded {} marks and {} refs from {:?}",
            table.marks.len(),
            table.refs.len(),
            path
        );
        Ok(table)
    }

    /// Write the whole table atomically (temp file in the same directory, then rename)
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .with_context(|| format!("Mark table path {:?} has no parent directory", path))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;

        let persisted = PersistedMarks {
            refs: self.refs.clone(),
            marks: self.marks.clone(),
            last_mark: self.last_mark,
        };
        let content =
            serde_json::to_string_pretty(&persisted).context("Failed to serialize mark table")?;

        let mut temp = NamedTempFile::new_in(parent)
            .with_context(|| format!("Failed to create temporary file in {:?}", parent))?;
        temp.write_all(content.as_bytes())
            .context("Failed to write mark table")?;
        temp.persist(path)
            .with_context(|| format!("Failed to replace mark table at {:?}", path))?;

        tracing::debug!("Saved {} marks to {:?}", self.marks.len(), path);
        Ok(())
    }

    /// Issue a mark greater than any mark seen so far
    pub fn next_mark(&mut self) -> Mark {
        self.last_mark += 1;
        Mark(self.last_mark)
    }

    /// Bind `mark` to `address`.
    ///
    /// Rebinding a mark to the same address is a no-op; rebinding it to a
    /// different address fails, and so does binding an address that already
    /// has a different mark.
    pub fn bind_mark(&mut self, mark: Mark, address: &str) -> Result<()> {
        if let Some(existing) = self.marks.get(&mark) {
            if existing == address {
                return Ok(());
            }
            return Err(Error::MarkConflict {
                mark,
                existing: existing.clone(),
                requested: address.to_string(),
            }
            .into());
        }
        if let Some(&existing) = self.rev_marks.get(address) {
            return Err(Error::AddressConflict {
                address: address.to_string(),
                existing,
                requested: mark,
            }
            .into());
        }

        self.marks.insert(mark, address.to_string());
        self.rev_marks.insert(address.to_string(), mark);
        self.last_mark = self.last_mark.max(mark.0);
        Ok(())
    }

    pub fn address_of(&self, mark: Mark) -> Result<&StoreAddress> {
        self.marks
            .get(&mark)
            .ok_or_else(|| Error::UnresolvedMark(mark).into())
    }

    /// Mark for `address`, allocating and binding a fresh one if needed
    pub fn mark_of(&mut self, address: &str) -> MarkLookup {
        if let Some(mark) = self.existing_mark(address) {
            return MarkLookup::Existing(mark);
        }
        let mark = self.next_mark();
        self.marks.insert(mark, address.to_string());
        self.rev_marks.insert(address.to_string(), mark);
        MarkLookup::Allocated(mark)
    }

    pub fn existing_mark(&self, address: &str) -> Option<Mark> {
        self.rev_marks.get(address).copied()
    }

    pub fn has_address(&self, address: &str) -> bool {
        self.rev_marks.contains_key(address)
    }

    pub fn set_ref(&mut self, name: &str, address: Option<StoreAddress>) {
        self.refs.insert(name.to_string(), address);
    }

    /// Address a ref points to; `None` for an unborn ref
    pub fn get_ref(&self, name: &str) -> Result<Option<&StoreAddress>> {
        self.refs
            .get(name)
            .map(Option::as_ref)
            .ok_or_else(|| Error::UnknownReference(name.to_string()).into())
    }

    /// Replace every ref at once, keeping all marks
    pub fn replace_refs(&mut self, refs: BTreeMap<String, Option<StoreAddress>>) {
        self.refs = refs;
    }

    pub fn refs(&self) -> &BTreeMap<String, Option<StoreAddress>> {
        &self.refs
    }

    pub fn has_refs(&self) -> bool {
        !self.refs.is_empty()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.marks.len()
    }
}
