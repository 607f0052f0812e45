use thiserror::Error;

use crate::tree::ItemId;

/// Result type alias for tree engine operations
pub type Result<T> = std::result::Result<T, TreeError>;

/// Broad category of a [`TreeError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller supplied input the engine refuses to interpret
    Precondition,
    /// Internal logic error; the current operation is aborted
    Invariant,
}

/// Errors raised by the tree, serializer, merger and restructure operations
#[derive(Error, Debug)]
pub enum TreeError {
    #[error("depth jumps from {from} to {to} at entry {index} ('{path}')")]
    DepthJump {
        index: usize,
        path: String,
        from: usize,
        to: usize,
    },

    #[error("schema version is missing")]
    MissingVersion,

    #[error("schema version is not a positive integer: {0}")]
    InvalidVersion(String),

    #[error("schema version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u64, supported: u64 },

    #[error("malformed document: {0}")]
    MalformedDocument(String),

    #[error("malformed entry {index} ('{path}'): {reason}")]
    MalformedEntry {
        index: usize,
        path: String,
        reason: String,
    },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid group name '{0}'")]
    InvalidGroupName(String),

    #[error("nothing selected")]
    EmptySelection,

    #[error("'{0}' is not a group")]
    NotAGroup(String),

    #[error("partially pinned is a derived state and cannot be written")]
    PartialPinWrite,

    #[error("expected one live node of anchor type '{node_type}', found {count}")]
    MultipleAnchors { node_type: String, count: usize },

    #[error("cannot parent {item:?} under itself or its descendant {parent:?}")]
    Cycle { item: ItemId, parent: ItemId },

    #[error("item {0:?} is not part of the tree")]
    StaleItem(ItemId),
}

impl TreeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TreeError::Cycle { .. } | TreeError::StaleItem(_) => ErrorKind::Invariant,
            _ => ErrorKind::Precondition,
        }
    }
}
