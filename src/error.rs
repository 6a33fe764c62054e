use thiserror::Error;

use crate::git::stream::Mark;

/// Failures the bridge itself detects.
///
/// Every variant aborts the session; the driving loop reports it on stderr
/// and the process exits non-zero.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed interchange input
    #[error("protocol error: {reason} (line {line:?})")]
    Protocol { line: String, reason: String },

    #[error("command not implemented: {0}")]
    UnsupportedCommand(String),

    #[error("feature not implemented: {0}")]
    UnsupportedFeature(String),

    /// A mark was referenced before any blob or commit defined it
    #[error("unresolved mark {0}")]
    UnresolvedMark(Mark),

    #[error("mark {mark} is already bound to {existing}, cannot rebind it to {requested}")]
    MarkConflict {
        mark: Mark,
        existing: String,
        requested: String,
    },

    #[error("{address} is already bound to mark {existing}, cannot bind it to {requested}")]
    AddressConflict {
        address: String,
        existing: Mark,
        requested: Mark,
    },

    #[error("unknown reference: {0}")]
    UnknownReference(String),

    #[error("incompatible repository format: found version {found}, expected {expected}")]
    IncompatibleFormat { found: u32, expected: u32 },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl Error {
    pub fn protocol(line: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Protocol {
            line: line.into(),
            reason: reason.into(),
        }
    }
}
