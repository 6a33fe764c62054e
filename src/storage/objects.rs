//! Commit and tag records as they are kept in the store.
//!
//! Blobs are stored raw. Commits and tags are JSON documents whose
//! references are store addresses, never marks.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::StoreAddress;
use crate::{
    git::stream::{Commit, FileOp, Mark, Tag},
    marks::MarkTable,
};

/// Raw byte payloads as base64 strings
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoredObject {
    Commit(StoredCommit),
    Tag(StoredTag),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCommit {
    #[serde(rename = "ref")]
    pub ref_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub committer: String,
    #[serde(with = "base64_bytes")]
    pub message: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<StoreAddress>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merges: Vec<StoreAddress>,
    #[serde(default)]
    pub files: Vec<FileOp<StoreAddress>>,
}

impl StoredCommit {
    /// Translate every mark in `commit` to the address it is bound to
    pub fn resolve(commit: Commit, marks: &MarkTable) -> Result<Self> {
        let parent = commit
            .from
            .map(|mark| marks.address_of(mark).cloned())
            .transpose()?;
        let merges = commit
            .merges
            .iter()
            .map(|mark| marks.address_of(*mark).cloned())
            .collect::<Result<Vec<_>>>()?;
        let files = commit
            .file_ops
            .into_iter()
            .map(|op| op.try_map(|mark| marks.address_of(mark).cloned()))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            ref_name: commit.ref_name,
            author: commit.author,
            committer: commit.committer,
            message: commit.message,
            parent,
            merges,
            files,
        })
    }

    /// First parent followed by the merge parents
    pub fn parents(&self) -> impl Iterator<Item = &StoreAddress> {
        self.parent.iter().chain(self.merges.iter())
    }

    /// Rebuild the interchange commit, using the marks already bound to
    /// every parent and file content
    pub fn to_interchange(&self, ref_name: &str, mark: Mark, marks: &MarkTable) -> Result<Commit> {
        let mark_for = |address: &StoreAddress| {
            marks
                .existing_mark(address)
                .ok_or_else(|| anyhow::anyhow!("Object {} has not been exported yet", address))
        };

        Ok(Commit {
            mark: Some(mark),
            ref_name: ref_name.to_string(),
            author: self.author.clone(),
            committer: self.committer.clone(),
            message: self.message.clone(),
            from: self.parent.as_ref().map(mark_for).transpose()?,
            merges: self.merges.iter().map(mark_for).collect::<Result<_>>()?,
            file_ops: self
                .files
                .iter()
                .cloned()
                .map(|op| op.try_map(|address| mark_for(&address)))
                .collect::<Result<_>>()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTag {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<StoreAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tagger: Option<String>,
    #[serde(with = "base64_bytes")]
    pub message: Vec<u8>,
}

impl StoredTag {
    pub fn resolve(tag: Tag, marks: &MarkTable) -> Result<Self> {
        let target = tag
            .from
            .map(|mark| marks.address_of(mark).cloned())
            .transpose()?;
        Ok(Self {
            name: tag.name,
            target,
            tagger: tag.tagger,
            message: tag.message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn sample_commit() -> Commit {
        Commit {
            mark: Some(Mark(3)),
            ref_name: "refs/heads/master".to_string(),
            author: None,
            committer: "C <c@example.com> 1 +0000".to_string(),
            message: b"msg\n".to_vec(),
            from: Some(Mark(2)),
            merges: vec![],
            file_ops: vec![
                FileOp::Modify {
                    mode: "100644".to_string(),
                    content: Mark(1),
                    path: "a.txt".to_string(),
                },
                FileOp::Delete {
                    path: "b.txt".to_string(),
                },
            ],
        }
    }

    #[test]
    fn test_resolve_rewrites_marks() {
        let mut marks = MarkTable::new();
        marks.bind_mark(Mark(1), "blob-addr").unwrap();
        marks.bind_mark(Mark(2), "parent-addr").unwrap();

        let stored = StoredCommit::resolve(sample_commit(), &marks).unwrap();
        assert_eq!(stored.parent.as_deref(), Some("parent-addr"));
        assert_eq!(stored.files[0].content(), Some(&"blob-addr".to_string()));
        assert_eq!(stored.parents().count(), 1);
    }

    #[test]
    fn test_resolve_fails_on_unbound_mark() {
        let mut marks = MarkTable::new();
        marks.bind_mark(Mark(1), "blob-addr").unwrap();

        let err = StoredCommit::resolve(sample_commit(), &marks).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::UnresolvedMark(Mark(2)))
        ));
    }

    #[test]
    fn test_json_layout() {
        let mut marks = MarkTable::new();
        marks.bind_mark(Mark(1), "blob-addr").unwrap();
        marks.bind_mark(Mark(2), "parent-addr").unwrap();
        let stored = StoredObject::Commit(StoredCommit::resolve(sample_commit(), &marks).unwrap());

        let json = serde_json::to_value(&stored).unwrap();
        assert_eq!(json["kind"], "commit");
        assert_eq!(json["ref"], "refs/heads/master");
        assert_eq!(json["message"], "bXNnCg==");
        assert_eq!(json["files"][0]["action"], "M");
        assert_eq!(json["files"][1]["action"], "D");
        assert!(json.get("author").is_none());

        let back: StoredObject = serde_json::from_value(json).unwrap();
        assert_eq!(back, stored);
    }

    #[test]
    fn test_to_interchange_uses_existing_marks() {
        let mut marks = MarkTable::new();
        marks.bind_mark(Mark(1), "blob-addr").unwrap();
        marks.bind_mark(Mark(2), "parent-addr").unwrap();
        let stored = StoredCommit::resolve(sample_commit(), &marks).unwrap();

        let mut fresh = MarkTable::new();
        fresh.bind_mark(Mark(10), "parent-addr").unwrap();
        fresh.bind_mark(Mark(11), "blob-addr").unwrap();
        let commit = stored
            .to_interchange("refs/cas/origin/heads/master", Mark(12), &fresh)
            .unwrap();
        assert_eq!(commit.from, Some(Mark(10)));
        assert_eq!(commit.file_ops[0].content(), Some(&Mark(11)));
        assert_eq!(commit.ref_name, "refs/cas/origin/heads/master");

        assert!(stored
            .to_interchange("refs/heads/x", Mark(1), &MarkTable::new())
            .is_err());
    }
}
