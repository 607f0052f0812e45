//! Scene panel tree
//!
//! An ordered tree mixing user groups with references to live backing-store
//! nodes, plus the tri-state pin annotation carried by every item.

mod item;
mod pin;

pub use item::{
    rebase_name, short_name_of, validate_group_name, BackingRef, ItemData, ItemId, SceneTree, TreeItem,
};
pub use pin::PinState;
