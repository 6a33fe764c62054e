//! Typed records of the fast-export / fast-import interchange stream

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Session-local object reference (`:N`) used inside an interchange stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Mark(pub u64);

impl fmt::Display for Mark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.0)
    }
}

impl FromStr for Mark {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix(':')
            .ok_or_else(|| format!("not a mark reference: {:?}", s))?;
        digits
            .parse::<u64>()
            .map(Mark)
            .map_err(|_| format!("invalid mark number: {:?}", s))
    }
}

impl From<Mark> for String {
    fn from(mark: Mark) -> Self {
        mark.to_string()
    }
}

impl TryFrom<String> for Mark {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A single file change inside a commit.
///
/// `R` is the content reference: a [`Mark`] while the commit is in flight,
/// a store address once it has been written to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum FileOp<R> {
    #[serde(rename = "M")]
    Modify { mode: String, content: R, path: String },
    #[serde(rename = "D")]
    Delete { path: String },
    #[serde(rename = "C")]
    Copy { src: String, dst: String },
    #[serde(rename = "R")]
    Rename { src: String, dst: String },
}

impl<R> FileOp<R> {
    /// Rewrite the content reference, leaving every other field untouched
    pub fn try_map<T, E, F>(self, f: F) -> Result<FileOp<T>, E>
    where
        F: FnOnce(R) -> Result<T, E>,
    {
        Ok(match self {
            FileOp::Modify {
                mode,
                content,
                path,
            } => FileOp::Modify {
                mode,
                content: f(content)?,
                path,
            },
            FileOp::Delete { path } => FileOp::Delete { path },
            FileOp::Copy { src, dst } => FileOp::Copy { src, dst },
            FileOp::Rename { src, dst } => FileOp::Rename { src, dst },
        })
    }

    /// Content reference of a modify op
    pub fn content(&self) -> Option<&R> {
        match self {
            FileOp::Modify { content, .. } => Some(content),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub mark: Option<Mark>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub mark: Option<Mark>,
    pub ref_name: String,
    pub author: Option<String>,
    pub committer: String,
    pub message: Vec<u8>,
    pub from: Option<Mark>,
    pub merges: Vec<Mark>,
    pub file_ops: Vec<FileOp<Mark>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reset {
    pub ref_name: String,
    pub from: Option<Mark>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    pub mark: Option<Mark>,
    pub from: Option<Mark>,
    pub tagger: Option<String>,
    pub message: Vec<u8>,
}

/// One complete record of the interchange stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterchangeObject {
    Blob(Blob),
    Commit(Commit),
    Reset(Reset),
    Tag(Tag),
    Feature(String),
    Done,
}
