use std::cell::Cell;
use tracing::debug;

use super::pin::PinState;
use crate::constants::wire::{GROUP_TYPE, PATH_SEPARATOR};
use crate::error::{Result, TreeError};

/// Handle to an item inside a [`SceneTree`]
///
/// Ids are never reused within one tree, so a stale id fails lookups
/// instead of aliasing a newer item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(usize);

impl ItemId {
    pub(crate) fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

/// Reference to a node owned by the backing store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackingRef {
    /// Fully-qualified backing-store identifier, e.g. `|rig|tissue1`
    pub unique_name: String,
    /// Display name (last segment of the unique name)
    pub short_name: String,
    /// Backing-store type tag
    pub node_type: String,
}

impl BackingRef {
    pub fn new(unique_name: impl Into<String>, node_type: impl Into<String>) -> Self {
        let unique_name = unique_name.into();
        let short_name = short_name_of(&unique_name).to_string();
        Self {
            unique_name,
            short_name,
            node_type: node_type.into(),
        }
    }
}

/// Last `|`-separated segment of a unique name
pub fn short_name_of(unique_name: &str) -> &str {
    unique_name
        .rsplit(PATH_SEPARATOR)
        .next()
        .unwrap_or(unique_name)
}

/// Rebase `name` from `old` onto `new` when it is `old` or lies below it
///
/// `|rig|a` rebased from `|rig` onto `|body` is `|body|a`; `|rig2` is left alone.
pub fn rebase_name(name: &str, old: &str, new: &str) -> Option<String> {
    if name == old {
        return Some(new.to_string());
    }
    name.strip_prefix(old)
        .filter(|rest| rest.starts_with(PATH_SEPARATOR))
        .map(|rest| format!("{new}{rest}"))
}

/// Payload of a tree item: a user group or a backing-store node, never both
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemData {
    Group { name: String },
    Backing(BackingRef),
}

impl ItemData {
    pub fn group(name: impl Into<String>) -> Self {
        ItemData::Group { name: name.into() }
    }

    pub fn display_name(&self) -> &str {
        match self {
            ItemData::Group { name } => name,
            ItemData::Backing(backing) => &backing.short_name,
        }
    }

    /// Type tag as written to the wire format
    pub fn node_type(&self) -> &str {
        match self {
            ItemData::Group { .. } => GROUP_TYPE,
            ItemData::Backing(backing) => &backing.node_type,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, ItemData::Group { .. })
    }

    pub fn as_backing(&self) -> Option<&BackingRef> {
        match self {
            ItemData::Backing(backing) => Some(backing),
            ItemData::Group { .. } => None,
        }
    }
}

/// Check that a user-supplied group name is usable as a path segment
///
/// Names start with a letter or underscore and contain only ASCII
/// alphanumerics and underscores.
pub fn validate_group_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(TreeError::InvalidGroupName(name.to_string()))
    }
}

/// One node of the scene panel tree
#[derive(Debug, Clone)]
pub struct TreeItem {
    parent: Option<ItemId>,
    children: Vec<ItemId>,
    data: ItemData,
    /// Stored flag for leaves; last explicit write for groups
    pin: PinState,
    /// Derived group state, cleared whenever the subtree changes
    pin_cache: Cell<Option<PinState>>,
}

impl TreeItem {
    fn new(data: ItemData) -> Self {
        Self {
            parent: None,
            children: Vec::new(),
            data,
            pin: PinState::Unpinned,
            pin_cache: Cell::new(None),
        }
    }

    pub fn parent(&self) -> Option<ItemId> {
        self.parent
    }

    pub fn children(&self) -> &[ItemId] {
        &self.children
    }

    pub fn data(&self) -> &ItemData {
        &self.data
    }

    fn derives_pin(&self) -> bool {
        self.data.is_group() && !self.children.is_empty()
    }
}

/// Ordered tree of groups and backing-store references
///
/// Items live in an arena and refer to each other by [`ItemId`]. The
/// conceptual root is implicit: top-level items are listed in `roots`,
/// have no parent and contribute the first segment of every tree path.
#[derive(Debug, Clone, Default)]
pub struct SceneTree {
    items: Vec<Option<TreeItem>>,
    roots: Vec<ItemId>,
}

impl SceneTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live items, attached or not
    pub fn len(&self) -> usize {
        self.items.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Allocate a detached item; it becomes visible once appended somewhere
    pub fn create_item(&mut self, data: ItemData) -> ItemId {
        let id = ItemId(self.items.len());
        self.items.push(Some(TreeItem::new(data)));
        id
    }

    /// Create an item and insert it at `row` under `parent` (`None` = top level)
    pub fn insert_item(&mut self, parent: Option<ItemId>, row: usize, data: ItemData) -> Result<ItemId> {
        let id = self.create_item(data);
        self.insert_children(parent, row, &[id])?;
        Ok(id)
    }

    /// Create an item and append it under `parent` (`None` = top level)
    pub fn push_item(&mut self, parent: Option<ItemId>, data: ItemData) -> Result<ItemId> {
        let id = self.create_item(data);
        self.append_children(parent, &[id])?;
        Ok(id)
    }

    pub fn get(&self, id: ItemId) -> Option<&TreeItem> {
        self.items.get(id.0).and_then(Option::as_ref)
    }

    fn item(&self, id: ItemId) -> Result<&TreeItem> {
        self.get(id).ok_or(TreeError::StaleItem(id))
    }

    fn item_mut(&mut self, id: ItemId) -> Result<&mut TreeItem> {
        self.items
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(TreeError::StaleItem(id))
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.get(id).is_some()
    }

    pub fn roots(&self) -> &[ItemId] {
        &self.roots
    }

    /// First top-level item; new backing nodes are appended under it
    pub fn primary_root(&self) -> Option<ItemId> {
        self.roots.first().copied()
    }

    pub fn parent(&self, id: ItemId) -> Option<ItemId> {
        self.get(id).and_then(|item| item.parent)
    }

    pub fn children(&self, id: ItemId) -> &[ItemId] {
        self.get(id).map(|item| item.children.as_slice()).unwrap_or(&[])
    }

    /// Child list of `parent`, or the top-level list for `None`
    pub fn container(&self, parent: Option<ItemId>) -> Result<&[ItemId]> {
        match parent {
            Some(id) => Ok(&self.item(id)?.children),
            None => Ok(&self.roots),
        }
    }

    fn container_mut(&mut self, parent: Option<ItemId>) -> Result<&mut Vec<ItemId>> {
        match parent {
            Some(id) => Ok(&mut self.item_mut(id)?.children),
            None => Ok(&mut self.roots),
        }
    }

    pub fn data(&self, id: ItemId) -> Option<&ItemData> {
        self.get(id).map(|item| &item.data)
    }

    pub fn backing(&self, id: ItemId) -> Option<&BackingRef> {
        self.data(id).and_then(ItemData::as_backing)
    }

    pub fn display_name(&self, id: ItemId) -> Option<&str> {
        self.data(id).map(ItemData::display_name)
    }

    pub fn is_group(&self, id: ItemId) -> bool {
        self.data(id).is_some_and(ItemData::is_group)
    }

    /// Rename an item in place; group names are validated
    ///
    /// For backing items only the display name changes. The unique name is
    /// owned by the backing store and updated through [`Self::rebind_backing`].
    pub fn set_display_name(&mut self, id: ItemId, name: &str) -> Result<()> {
        match &mut self.item_mut(id)?.data {
            ItemData::Group { name: current } => {
                validate_group_name(name)?;
                *current = name.to_string();
            }
            ItemData::Backing(backing) => backing.short_name = name.to_string(),
        }
        Ok(())
    }

    /// Point a backing item at a (possibly renamed) backing-store node
    pub fn rebind_backing(&mut self, id: ItemId, unique_name: &str) -> Result<()> {
        let item = self.item_mut(id)?;
        match &mut item.data {
            ItemData::Backing(backing) => {
                backing.unique_name = unique_name.to_string();
                backing.short_name = short_name_of(unique_name).to_string();
                Ok(())
            }
            ItemData::Group { name } => Err(TreeError::MalformedDocument(format!(
                "cannot bind group '{name}' to backing node '{unique_name}'"
            ))),
        }
    }

    /// True if `ancestor` is a strict ancestor of `id`
    pub fn is_ancestor(&self, ancestor: ItemId, id: ItemId) -> bool {
        let mut current = self.parent(id);
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.parent(parent);
        }
        false
    }

    /// Outermost ancestor of `id` (itself when top-level)
    pub fn top_level_ancestor(&self, id: ItemId) -> Option<ItemId> {
        self.get(id)?;
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            current = parent;
        }
        Some(current)
    }

    /// True if `id` is reachable from the top-level list
    pub fn is_attached(&self, id: ItemId) -> bool {
        self.top_level_ancestor(id)
            .is_some_and(|top| self.roots.contains(&top))
    }

    pub fn append_children(&mut self, parent: Option<ItemId>, items: &[ItemId]) -> Result<()> {
        let at = self.container(parent)?.len();
        self.insert_children(parent, at, items)
    }

    /// Insert `items` at `at` under `parent`, splicing each out of its current container
    ///
    /// Items that are already children of `parent` are left where they are.
    pub fn insert_children(&mut self, parent: Option<ItemId>, at: usize, items: &[ItemId]) -> Result<()> {
        // Validate everything before touching the tree
        self.container(parent)?;
        for &id in items {
            self.item(id)?;
            if let Some(parent) = parent
                && (parent == id || self.is_ancestor(id, parent))
            {
                return Err(TreeError::Cycle { item: id, parent });
            }
        }

        let mut at = at.min(self.container(parent)?.len());
        for &id in items {
            if self.container(parent)?.contains(&id) {
                continue;
            }
            self.detach(id)?;
            let container = self.container_mut(parent)?;
            let row = at.min(container.len());
            container.insert(row, id);
            self.item_mut(id)?.parent = parent;
            at = row + 1;
        }
        self.invalidate_pin_cache(parent);
        Ok(())
    }

    /// Detach `items` from `parent` and free their subtrees
    pub fn remove_children(&mut self, parent: Option<ItemId>, items: &[ItemId]) -> Result<()> {
        for &id in items {
            if !self.container(parent)?.contains(&id) {
                debug!(item = ?id, "remove_children: not a child, skipping");
                continue;
            }
            self.detach(id)?;
            self.free_subtree(id);
        }
        Ok(())
    }

    /// Splice `id` out of whatever container holds it
    pub(crate) fn detach(&mut self, id: ItemId) -> Result<()> {
        let parent = self.item(id)?.parent;
        let container = self.container_mut(parent)?;
        container.retain(|&child| child != id);
        self.item_mut(id)?.parent = None;
        self.invalidate_pin_cache(parent);
        Ok(())
    }

    /// Free a detached item whose children have already been moved away
    pub(crate) fn discard(&mut self, id: ItemId) {
        if let Some(slot) = self.items.get_mut(id.0) {
            *slot = None;
        }
    }

    fn free_subtree(&mut self, id: ItemId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(slot) = self.items.get_mut(current.0)
                && let Some(item) = slot.take()
            {
                stack.extend(item.children);
            }
        }
    }

    /// Other items sharing the same container, in display order
    pub fn siblings(&self, id: ItemId) -> Vec<ItemId> {
        let Some(item) = self.get(id) else {
            return Vec::new();
        };
        self.container(item.parent)
            .map(|container| container.iter().copied().filter(|&other| other != id).collect())
            .unwrap_or_default()
    }

    /// Position of `id` within its container
    pub fn row(&self, id: ItemId) -> Option<usize> {
        let item = self.get(id)?;
        self.container(item.parent).ok()?.iter().position(|&child| child == id)
    }

    /// Pipe-joined display names from the top level down to `id`, e.g. `|rig|group1|tissue2`
    pub fn tree_path(&self, id: ItemId) -> String {
        let mut segments = Vec::new();
        let mut current = Some(id);
        while let Some(item_id) = current {
            let Some(item) = self.get(item_id) else { break };
            segments.push(item.data.display_name());
            current = item.parent;
        }
        segments
            .iter()
            .rev()
            .fold(String::new(), |mut path, segment| {
                path.push(PATH_SEPARATOR);
                path.push_str(segment);
                path
            })
    }

    /// Strict descendants of `id` in depth-first preorder
    pub fn descendants(&self, id: ItemId) -> Vec<ItemId> {
        let mut out = Vec::new();
        let mut stack: Vec<ItemId> = self.children(id).iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.children(current).iter().rev());
        }
        out
    }

    /// Every attached item in depth-first preorder
    pub fn preorder(&self) -> Vec<ItemId> {
        let mut out = Vec::new();
        for &root in &self.roots {
            out.push(root);
            out.extend(self.descendants(root));
        }
        out
    }

    /// Resolve a tree path; the first matching name wins at each level
    pub fn find_by_path(&self, path: &str) -> Option<ItemId> {
        let mut segments = path.split(PATH_SEPARATOR).skip_while(|segment| segment.is_empty());
        let first = segments.next()?;
        let mut current = self
            .roots
            .iter()
            .copied()
            .find(|&id| self.display_name(id) == Some(first))?;
        for segment in segments {
            current = self
                .children(current)
                .iter()
                .copied()
                .find(|&id| self.display_name(id) == Some(segment))?;
        }
        Some(current)
    }

    // ==========================================================================
    // Pin state
    // ==========================================================================

    /// Current pin state of `id`
    ///
    /// Leaves report their stored flag. Groups with children derive their
    /// state from them; a childless group reports its last stored value.
    /// Unknown ids read as unpinned.
    pub fn pin_state(&self, id: ItemId) -> PinState {
        match self.get(id) {
            Some(item) if item.derives_pin() && item.pin_cache.get().is_none() => self.derive_pin(id),
            Some(_) => self.cached_or_stored(id),
            None => PinState::Unpinned,
        }
    }

    /// Write a pin state; on a group the state cascades to every descendant
    pub fn set_pin_state(&mut self, id: ItemId, state: PinState) -> Result<()> {
        if state == PinState::PartiallyPinned {
            return Err(TreeError::PartialPinWrite);
        }
        let cascade = if self.item(id)?.data.is_group() {
            self.descendants(id)
        } else {
            Vec::new()
        };
        for target in std::iter::once(id).chain(cascade) {
            let item = self.item_mut(target)?;
            item.pin = state;
            item.pin_cache.set(None);
        }
        self.invalidate_pin_cache(Some(id));
        Ok(())
    }

    /// Store a pin flag without cascading (used when rebuilding from entries)
    pub(crate) fn store_pin(&mut self, id: ItemId, state: PinState) -> Result<()> {
        self.item_mut(id)?.pin = state;
        let parent = self.parent(id);
        self.invalidate_pin_cache(parent);
        Ok(())
    }

    fn cached_or_stored(&self, id: ItemId) -> PinState {
        match self.get(id) {
            Some(item) if item.derives_pin() => item.pin_cache.get().unwrap_or(item.pin),
            Some(item) => item.pin,
            None => PinState::Unpinned,
        }
    }

    /// Bottom-up derivation with an explicit stack, filling caches on the way
    fn derive_pin(&self, id: ItemId) -> PinState {
        let mut stack = vec![(id, false)];
        while let Some((current, expanded)) = stack.pop() {
            let Some(item) = self.get(current) else { continue };
            if !expanded {
                stack.push((current, true));
                for &child in &item.children {
                    if self
                        .get(child)
                        .is_some_and(|c| c.derives_pin() && c.pin_cache.get().is_none())
                    {
                        stack.push((child, false));
                    }
                }
            } else {
                let derived = PinState::combine(item.children.iter().map(|&child| self.cached_or_stored(child)))
                    .unwrap_or(item.pin);
                item.pin_cache.set(Some(derived));
            }
        }
        self.cached_or_stored(id)
    }

    /// Clear derived caches from `from` up to the top level
    fn invalidate_pin_cache(&self, from: Option<ItemId>) {
        let mut current = from;
        while let Some(id) = current {
            let Some(item) = self.get(id) else { break };
            item.pin_cache.set(None);
            current = item.parent;
        }
    }
}
