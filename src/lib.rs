#![forbid(unsafe_code)]

//! Scene panel engine for rig-based node graphs
//!
//! Keeps a user-organized tree (groups, ordering, pins) over the nodes of a
//! live backing store, persists it as a versioned JSON string on the rig
//! root, and reconciles it against the store whenever the panel refreshes.

pub mod builder;
pub mod config;
pub mod constants;
pub mod error;
pub mod merger;
pub mod persistence;
pub mod restructure;
pub mod serializer;
pub mod session;
pub mod tree;

pub use builder::{Builder, LiveNode};
pub use config::PanelConfig;
pub use error::{ErrorKind, TreeError};
pub use merger::{build_from_live, reconcile, ReconcileReport, Reconciled};
pub use persistence::SceneFile;
pub use restructure::{create_subtree, move_items, pick_out, prune_to_outermost, unique_name, Rename};
pub use serializer::{construct, flatten, from_json, to_json, NodeData, PendingTreeEntry};
pub use session::{Clipboard, PanelSession};
pub use tree::{BackingRef, ItemData, ItemId, PinState, SceneTree};
