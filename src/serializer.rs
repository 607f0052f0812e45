//! Flat, versioned wire format for the scene panel tree
//!
//! A tree is persisted as a depth-first preorder list of entries, each
//! carrying its full display-name path. There are no parent indices: the
//! structure is rebuilt purely from the depth change between consecutive
//! entries.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::constants::wire::{GROUP_TYPE, NODES_KEY, PATH_SEPARATOR, SCHEMA_VERSION, VERSION_KEY};
use crate::error::{Result, TreeError};
use crate::tree::{validate_group_name, BackingRef, ItemData, ItemId, PinState, SceneTree};

/// Per-entry payload: `{}` for groups, `{pin_state, name}` for backing nodes
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin_state: Option<PinState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// One flattened tree item, serialized as `[tree_path, node_type, node_data]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawEntry", into = "RawEntry")]
pub struct PendingTreeEntry {
    pub tree_path: String,
    pub node_type: String,
    pub node_data: NodeData,
}

#[derive(Serialize, Deserialize)]
struct RawEntry(String, String, NodeData);

impl From<RawEntry> for PendingTreeEntry {
    fn from(RawEntry(tree_path, node_type, node_data): RawEntry) -> Self {
        Self {
            tree_path,
            node_type,
            node_data,
        }
    }
}

impl From<PendingTreeEntry> for RawEntry {
    fn from(entry: PendingTreeEntry) -> Self {
        RawEntry(entry.tree_path, entry.node_type, entry.node_data)
    }
}

impl PendingTreeEntry {
    pub fn group(tree_path: impl Into<String>) -> Self {
        Self {
            tree_path: tree_path.into(),
            node_type: GROUP_TYPE.to_string(),
            node_data: NodeData::default(),
        }
    }

    pub fn leaf(
        tree_path: impl Into<String>,
        node_type: impl Into<String>,
        name: impl Into<String>,
        pin_state: PinState,
    ) -> Self {
        Self {
            tree_path: tree_path.into(),
            node_type: node_type.into(),
            node_data: NodeData {
                pin_state: Some(pin_state),
                name: Some(name.into()),
            },
        }
    }

    /// Number of path separators in `tree_path`
    pub fn depth(&self) -> usize {
        self.tree_path.matches(PATH_SEPARATOR).count()
    }

    /// Last path segment
    pub fn display_name(&self) -> &str {
        self.tree_path
            .rsplit(PATH_SEPARATOR)
            .next()
            .unwrap_or(&self.tree_path)
    }

    pub fn is_group(&self) -> bool {
        self.node_type == GROUP_TYPE
    }

    /// Backing-store unique name (leaves only)
    pub fn name(&self) -> Option<&str> {
        self.node_data.name.as_deref()
    }

    pub fn pin_state(&self) -> PinState {
        self.node_data.pin_state.unwrap_or_default()
    }

    /// Point this entry at a live node, keeping its position and pin state
    pub fn rebind(&mut self, unique_name: &str, short_name: &str) {
        self.node_data.name = Some(unique_name.to_string());
        self.set_display_name(short_name);
    }

    /// Replace the last path segment
    pub fn set_display_name(&mut self, display_name: &str) {
        let prefix_len = self.tree_path.len() - self.display_name().len();
        self.tree_path.truncate(prefix_len);
        self.tree_path.push_str(display_name);
    }
}

// ==============================================================================
// Tree <-> entries
// ==============================================================================

/// Flatten a tree into depth-first preorder entries
///
/// With `from = None` every top-level item and its subtree is emitted (the
/// conceptual root itself has no entry). With `Some(item)` the item is
/// emitted first, followed by its descendants.
pub fn flatten(tree: &SceneTree, from: Option<ItemId>) -> Vec<PendingTreeEntry> {
    let mut stack: Vec<ItemId> = match from {
        None => tree.roots().iter().rev().copied().collect(),
        Some(id) if tree.contains(id) => vec![id],
        Some(_) => Vec::new(),
    };

    let mut entries = Vec::new();
    while let Some(id) = stack.pop() {
        let Some(data) = tree.data(id) else { continue };
        let path = tree.tree_path(id);
        let entry = match data {
            ItemData::Group { .. } => PendingTreeEntry::group(path),
            ItemData::Backing(backing) => PendingTreeEntry::leaf(
                path,
                backing.node_type.clone(),
                backing.unique_name.clone(),
                tree.pin_state(id),
            ),
        };
        entries.push(entry);
        stack.extend(tree.children(id).iter().rev());
    }
    entries
}

/// Rebuild a tree from depth-first preorder entries
///
/// The first entry becomes a top-level item. Each following entry is placed
/// by the depth change from its predecessor: `+1` is a child, `0` a sibling,
/// a negative change ascends that many extra levels. A jump of more than one
/// level is rejected. Returns the tree and the pinned backing nodes in
/// encounter order.
pub fn construct(entries: &[PendingTreeEntry]) -> Result<(SceneTree, Vec<BackingRef>)> {
    check_depths(entries)?;

    let mut tree = SceneTree::new();
    let mut pinned = Vec::new();
    let mut last: Option<(ItemId, usize)> = None;

    for (index, entry) in entries.iter().enumerate() {
        let depth = entry.depth();
        let data = item_data_for(index, entry)?;

        let parent = match last {
            None => None,
            Some((last_item, last_depth)) => {
                let diff = depth as isize - last_depth as isize;
                // 1 -> child of last, 0 -> sibling of last, <0 -> climb further
                let mut target = Some(last_item);
                for _ in 0..(1 - diff) {
                    target = target.and_then(|id| tree.parent(id));
                }
                target
            }
        };

        let backing = data.as_backing().cloned();
        let id = tree.push_item(parent, data)?;

        if let Some(backing) = backing {
            let state = match entry.pin_state() {
                PinState::PartiallyPinned => {
                    warn!(path = %entry.tree_path, "Leaf entry stored as partially pinned, treating as unpinned");
                    PinState::Unpinned
                }
                state => state,
            };
            tree.store_pin(id, state)?;
            if state.is_pinned() {
                pinned.push(backing);
            }
        }

        last = Some((id, depth));
    }

    debug!(entries = entries.len(), pinned = pinned.len(), "Constructed tree from entries");
    Ok((tree, pinned))
}

/// Reject lists where consecutive depths grow by more than one level
pub fn check_depths(entries: &[PendingTreeEntry]) -> Result<()> {
    for (index, pair) in entries.windows(2).enumerate() {
        let (from, to) = (pair[0].depth(), pair[1].depth());
        if to > from + 1 {
            return Err(TreeError::DepthJump {
                index: index + 1,
                path: pair[1].tree_path.clone(),
                from,
                to,
            });
        }
    }
    Ok(())
}

fn item_data_for(index: usize, entry: &PendingTreeEntry) -> Result<ItemData> {
    let malformed = |reason: &str| TreeError::MalformedEntry {
        index,
        path: entry.tree_path.clone(),
        reason: reason.to_string(),
    };

    if !entry.tree_path.starts_with(PATH_SEPARATOR) {
        return Err(malformed("tree path must start with '|'"));
    }
    if entry.tree_path[1..].split(PATH_SEPARATOR).any(str::is_empty) {
        return Err(malformed("tree path has an empty segment"));
    }

    let display_name = entry.display_name();
    if entry.is_group() {
        validate_group_name(display_name)?;
        return Ok(ItemData::group(display_name));
    }

    let unique_name = entry
        .name()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| malformed("backing entry has no name"))?;
    Ok(ItemData::Backing(BackingRef {
        unique_name: unique_name.to_string(),
        short_name: display_name.to_string(),
        node_type: entry.node_type.clone(),
    }))
}

// ==============================================================================
// Entries <-> JSON
// ==============================================================================

#[derive(Serialize)]
struct DocumentOut<'a> {
    version: u64,
    nodes: &'a [PendingTreeEntry],
}

/// Wrap entries in a document stamped with the current schema version
pub fn to_json(entries: &[PendingTreeEntry]) -> Result<String> {
    let document = DocumentOut {
        version: SCHEMA_VERSION,
        nodes: entries,
    };
    Ok(serde_json::to_string(&document)?)
}

/// Parse a persisted document, checking its schema version first
pub fn from_json(text: &str) -> Result<Vec<PendingTreeEntry>> {
    let mut document: Value = serde_json::from_str(text)?;
    let object = document
        .as_object_mut()
        .ok_or_else(|| TreeError::MalformedDocument("expected a JSON object".to_string()))?;

    let version = match object.get(VERSION_KEY) {
        None | Some(Value::Null) => return Err(TreeError::MissingVersion),
        Some(value) => value
            .as_u64()
            .filter(|&version| version > 0)
            .ok_or_else(|| TreeError::InvalidVersion(value.to_string()))?,
    };
    if version > SCHEMA_VERSION {
        return Err(TreeError::UnsupportedVersion {
            found: version,
            supported: SCHEMA_VERSION,
        });
    }

    let nodes = object
        .remove(NODES_KEY)
        .ok_or_else(|| TreeError::MalformedDocument(format!("missing '{NODES_KEY}'")))?;
    let entries: Vec<PendingTreeEntry> = serde_json::from_value(nodes)?;

    debug!(version, count = entries.len(), "Parsed scene panel document");
    Ok(entries)
}
