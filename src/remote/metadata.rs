use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    error::Error,
    storage::{ImmutableStore, StoreAddress},
};

/// Layout version of the root metadata object this build reads and writes
pub const FORMAT_VERSION: u32 = 1;

/// Root object of a repository: every ref and the object it points to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryMetadata {
    pub version: u32,
    pub refs: BTreeMap<String, Option<StoreAddress>>,
}

impl RepositoryMetadata {
    pub fn new(refs: BTreeMap<String, Option<StoreAddress>>) -> Self {
        Self {
            version: FORMAT_VERSION,
            refs,
        }
    }

    /// Decode a root object, rejecting any layout version but the current one.
    ///
    /// The version is checked before the rest of the document so a future
    /// layout is reported as incompatible rather than as malformed JSON.
    pub fn from_slice(content: &[u8]) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_slice(content).context("Root metadata is not valid JSON")?;

        let found = value
            .get("version")
            .and_then(serde_json::Value::as_u64)
            .and_then(|version| u32::try_from(version).ok())
            .unwrap_or(0);
        if found != FORMAT_VERSION {
            return Err(Error::IncompatibleFormat {
                found,
                expected: FORMAT_VERSION,
            }
            .into());
        }

        serde_json::from_value(value).context("Failed to decode root metadata")
    }

    pub fn read<S: ImmutableStore>(storage: &S, address: &str) -> Result<Self> {
        let content = storage
            .get(address)
            .with_context(|| format!("Failed to read root metadata {}", address))?;
        Self::from_slice(&content)
    }
}
