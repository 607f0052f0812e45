//! Panel session: the controller that ties the tree to its backing store
//!
//! A session owns one [`Builder`], the tree built from it and the clipboard.
//! Every user-facing operation either fully applies or returns an error and
//! leaves the session usable.

use anyhow::{bail, Context, Result};
use std::collections::{HashMap, HashSet};
use tracing::{debug, error, info, warn};

use crate::builder::{Builder, LiveNode};
use crate::config::PanelConfig;
use crate::error::TreeError;
use crate::merger::{reconcile, ReconcileReport, Reconciled};
use crate::restructure::{self, dedupe_sibling_names, prune_to_outermost, Rename};
use crate::serializer::{construct, flatten, from_json, to_json, PendingTreeEntry};
use crate::tree::{
    rebase_name, short_name_of, validate_group_name, BackingRef, ItemData, ItemId, PinState, SceneTree,
};

/// Items waiting to be pasted
#[derive(Debug, Clone, Default)]
pub struct Clipboard {
    items: Vec<ItemId>,
}

impl Clipboard {
    pub fn items(&self) -> &[ItemId] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    fn take(&mut self) -> Vec<ItemId> {
        std::mem::take(&mut self.items)
    }
}

pub struct PanelSession<B: Builder> {
    builder: B,
    /// Rig root requested by the caller; `None` shows every rig
    root: Option<String>,
    config: PanelConfig,
    tree: SceneTree,
    pinned: Vec<BackingRef>,
    report: ReconcileReport,
    clipboard: Clipboard,
}

impl<B: Builder> PanelSession<B> {
    /// New session with an empty tree; call [`Self::refresh`] to populate it
    pub fn new(builder: B, root: Option<String>, config: PanelConfig) -> Self {
        Self {
            builder,
            root,
            config,
            tree: SceneTree::new(),
            pinned: Vec::new(),
            report: ReconcileReport::default(),
            clipboard: Clipboard::default(),
        }
    }

    pub fn builder(&self) -> &B {
        &self.builder
    }

    pub fn builder_mut(&mut self) -> &mut B {
        &mut self.builder
    }

    pub fn into_builder(self) -> B {
        self.builder
    }

    pub fn tree(&self) -> &SceneTree {
        &self.tree
    }

    pub fn config(&self) -> &PanelConfig {
        &self.config
    }

    pub fn root(&self) -> Option<&str> {
        self.root.as_deref()
    }

    /// Pinned backing nodes from the last refresh
    pub fn pinned(&self) -> &[BackingRef] {
        &self.pinned
    }

    /// What the last refresh changed
    pub fn last_report(&self) -> &ReconcileReport {
        &self.report
    }

    pub fn clipboard(&self) -> &Clipboard {
        &self.clipboard
    }

    /// Resolve a `|`-separated display path
    pub fn find(&self, path: &str) -> Option<ItemId> {
        self.tree.find_by_path(path)
    }

    // ==========================================================================
    // Refresh and save
    // ==========================================================================

    /// Rebuild the tree from the backing store and the persisted panel strings
    ///
    /// Every rig is reconciled against the layout stored on its own root.
    /// On failure the previous tree is kept.
    pub fn refresh(&mut self) -> Result<&ReconcileReport> {
        self.clipboard.clear();

        let live = self
            .builder
            .enumerate(self.root.as_deref())
            .context("Failed to enumerate backing nodes")?;
        let rigs = match &self.root {
            Some(root) => vec![(Some(root.clone()), live)],
            None => split_by_rig(live, &self.config.anchor_types),
        };

        let mut parts = Vec::with_capacity(rigs.len());
        for (rig, nodes) in &rigs {
            parts.push(self.reconcile_rig(rig.as_deref(), nodes)?);
        }
        let reconciled = combine(parts)?;

        info!(
            rigs = rigs.len(),
            items = reconciled.tree.len(),
            added = reconciled.report.added.len(),
            dropped = reconciled.report.dropped.len(),
            rebound = reconciled.report.rebound.len(),
            "Refreshed panel"
        );
        self.tree = reconciled.tree;
        self.pinned = reconciled.pinned;
        self.report = reconciled.report;
        Ok(&self.report)
    }

    fn reconcile_rig(&self, rig: Option<&str>, nodes: &[LiveNode]) -> Result<Reconciled> {
        let persisted = match rig {
            Some(root) => self
                .builder
                .get_persisted_string(root)
                .with_context(|| format!("Failed to read panel string from '{}'", root))?,
            None => None,
        };
        let entries = match persisted.as_deref() {
            Some(text) => from_json(text)
                .with_context(|| format!("Failed to parse saved panel layout of '{}'", rig.unwrap_or_default()))?,
            None => Vec::new(),
        };
        reconcile(nodes, &entries, &self.config.anchor_types)
            .with_context(|| format!("Failed to reconcile panel layout of '{}'", rig.unwrap_or("scene")))
    }

    /// Persist the layout of every rig onto its root node
    pub fn save(&mut self) -> Result<()> {
        let documents = self.documents()?;
        for (root, entries) in &documents {
            let json = to_json(entries)?;
            self.builder
                .set_persisted_string(root, &json)
                .with_context(|| format!("Failed to store panel string on '{}'", root))?;
            info!(root = %root, entries = entries.len(), "Saved panel layout");
        }
        Ok(())
    }

    /// Entries to store per rig root
    ///
    /// Top-level items that are not rig roots travel with the rig above them,
    /// or with the first rig when they come before every rig.
    fn documents(&self) -> Result<Vec<(String, Vec<PendingTreeEntry>)>> {
        if let Some(root) = &self.root {
            return Ok(vec![(root.clone(), flatten(&self.tree, None))]);
        }

        let mut documents: Vec<(String, Vec<PendingTreeEntry>)> = Vec::new();
        let mut leading = Vec::new();
        for &top in self.tree.roots() {
            let entries = flatten(&self.tree, Some(top));
            if self.is_anchor(top)
                && let Some(backing) = self.tree.backing(top)
            {
                documents.push((backing.unique_name.clone(), entries));
            } else if let Some((_, document)) = documents.last_mut() {
                document.extend(entries);
            } else {
                leading.extend(entries);
            }
        }

        let Some((_, first)) = documents.first_mut() else {
            bail!("No rig root to store the panel layout on");
        };
        first.splice(0..0, leading);
        Ok(documents)
    }

    // ==========================================================================
    // Restructuring
    // ==========================================================================

    /// Wrap `items` in a new group, named after the config default when `name` is `None`
    pub fn group_selected(&mut self, items: &[ItemId], name: Option<&str>) -> Result<ItemId> {
        if items.is_empty() {
            return Err(TreeError::EmptySelection.into());
        }
        let name = name.unwrap_or(self.config.default_group_name.as_str()).to_string();
        validate_group_name(&name)?;

        let rigs: HashSet<ItemId> = items
            .iter()
            .filter_map(|&id| self.tree.top_level_ancestor(id))
            .collect();
        if rigs.len() > 1 {
            warn!(rigs = rigs.len(), "Refusing to group items from more than one rig");
            bail!("Selection spans {} rigs; group items from one rig at a time", rigs.len());
        }
        self.ensure_no_anchors(items, "group")?;

        self.transact("group", |session| {
            let (group, renames) = restructure::create_subtree(&mut session.tree, items, ItemData::group(name))?;
            session.forward_renames(&renames)?;
            Ok(group)
        })
    }

    /// Dissolve a group, moving its children into its place
    pub fn ungroup(&mut self, item: ItemId) -> Result<Vec<Rename>> {
        let data = self.tree.data(item).ok_or(TreeError::StaleItem(item))?;
        if !data.is_group() {
            return Err(TreeError::NotAGroup(data.display_name().to_string()).into());
        }
        self.transact("ungroup", |session| {
            let renames = restructure::pick_out(&mut session.tree, item)?;
            session.forward_renames(&renames)?;
            Ok(renames)
        })
    }

    /// Drag-reparent `items` under `parent` at `row`
    pub fn move_items(&mut self, items: &[ItemId], parent: Option<ItemId>, row: usize) -> Result<Vec<Rename>> {
        self.ensure_no_anchors(items, "move")?;
        // Anchors stay ahead of their siblings
        let leading_anchors = self
            .tree
            .container(parent)?
            .iter()
            .take_while(|&&id| self.is_anchor(id))
            .count();
        self.transact("move", |session| {
            let renames = restructure::move_items(&mut session.tree, items, parent, row.max(leading_anchors))?;
            session.forward_renames(&renames)?;
            Ok(renames)
        })
    }

    pub fn cut(&mut self, items: &[ItemId]) -> Result<usize> {
        self.ensure_no_anchors(items, "cut")?;
        self.clipboard.items = prune_to_outermost(&self.tree, items);
        debug!(count = self.clipboard.items.len(), "Cut items");
        Ok(self.clipboard.items.len())
    }

    /// Move the clipboard contents to the end of `target` (top level for `None`)
    pub fn paste(&mut self, target: Option<ItemId>) -> Result<Vec<Rename>> {
        let items: Vec<ItemId> = self
            .clipboard
            .take()
            .into_iter()
            .filter(|&id| self.tree.is_attached(id))
            .collect();
        if items.is_empty() {
            bail!("Nothing to paste");
        }
        let row = self.tree.container(target)?.len();
        let renames = self.transact("paste", |session| {
            let renames = restructure::move_items(&mut session.tree, &items, target, row)?;
            session.forward_renames(&renames)?;
            Ok(renames)
        })?;
        info!(count = items.len(), "Pasted items");
        Ok(renames)
    }

    /// Rename an item, bumping the name if a sibling already uses it
    ///
    /// Returns the name actually applied.
    pub fn rename(&mut self, item: ItemId, new_name: &str) -> Result<String> {
        let data = self.tree.data(item).ok_or(TreeError::StaleItem(item))?.clone();
        if data.is_group() {
            validate_group_name(new_name)?;
        }
        let taken: HashSet<String> = self
            .tree
            .siblings(item)
            .into_iter()
            .filter_map(|id| self.tree.display_name(id).map(str::to_string))
            .collect();
        let name = restructure::unique_name(new_name, |candidate| taken.contains(candidate));
        if name == data.display_name() {
            return Ok(name);
        }

        let applied = match data {
            ItemData::Group { .. } => {
                self.tree.set_display_name(item, &name)?;
                name
            }
            ItemData::Backing(backing) => {
                let new_unique = self
                    .builder
                    .rename(&backing.unique_name, &name)
                    .with_context(|| format!("Failed to rename '{}'", backing.unique_name))?;
                self.apply_backing_rename(&backing.unique_name, &new_unique)?;
                short_name_of(&new_unique).to_string()
            }
        };
        info!(item = %self.tree.tree_path(item), "Renamed item");
        Ok(applied)
    }

    // ==========================================================================
    // Pins
    // ==========================================================================

    pub fn set_pinned(&mut self, items: &[ItemId], state: PinState) -> Result<()> {
        for &item in items {
            self.tree.set_pin_state(item, state)?;
        }
        debug!(count = items.len(), state = %state, "Set pin state");
        Ok(())
    }

    /// Flip one item; a partially pinned group becomes pinned
    pub fn toggle_pin(&mut self, item: ItemId) -> Result<PinState> {
        if !self.tree.contains(item) {
            return Err(TreeError::StaleItem(item).into());
        }
        let state = self.tree.pin_state(item).toggled();
        self.tree.set_pin_state(item, state)?;
        Ok(state)
    }

    // ==========================================================================
    // Helpers
    // ==========================================================================

    fn is_anchor(&self, item: ItemId) -> bool {
        self.tree
            .backing(item)
            .is_some_and(|backing| self.config.anchor_types.contains(&backing.node_type))
    }

    fn ensure_no_anchors(&self, items: &[ItemId], action: &str) -> Result<()> {
        if let Some(&anchor) = items.iter().find(|&&id| self.is_anchor(id)) {
            let path = self.tree.tree_path(anchor);
            warn!(item = %path, action = action, "Refusing to restructure an anchor node");
            bail!("Cannot {} anchor node '{}'", action, path);
        }
        Ok(())
    }

    /// Run a tree operation, restoring the tree and root when it fails
    fn transact<T>(&mut self, action: &str, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let tree = self.tree.clone();
        let root = self.root.clone();
        op(self).inspect_err(|e| {
            warn!(action = action, error = %e, "Operation failed, restoring previous tree");
            self.tree = tree;
            self.root = root;
        })
    }

    /// Push display renames of backing items through to the backing store
    ///
    /// When one rename fails, the renames already applied are reverted.
    fn forward_renames(&mut self, renames: &[Rename]) -> Result<()> {
        let mut applied: Vec<(String, String)> = Vec::new();
        for rename in renames {
            let Some(backing) = self.tree.backing(rename.item).cloned() else {
                continue;
            };
            let new_unique = match self.builder.rename(&backing.unique_name, &rename.new_name) {
                Ok(new_unique) => new_unique,
                Err(e) => {
                    self.revert_backing_renames(&applied);
                    return Err(e.context(format!(
                        "Failed to rename '{}' to '{}'",
                        backing.unique_name, rename.new_name
                    )));
                }
            };
            self.apply_backing_rename(&backing.unique_name, &new_unique)?;
            applied.push((backing.unique_name, new_unique));
        }
        Ok(())
    }

    fn revert_backing_renames(&mut self, applied: &[(String, String)]) {
        for (old, new) in applied.iter().rev() {
            if let Err(e) = self.builder.rename(new, short_name_of(old)) {
                error!(node = %new, restore = %old, error = %e, "Failed to revert backing rename");
            }
        }
    }

    /// Rebind every tree item (and the root names) that lived under a renamed node
    fn apply_backing_rename(&mut self, old: &str, new: &str) -> Result<()> {
        for id in self.tree.preorder() {
            let Some(rebased) = self
                .tree
                .backing(id)
                .and_then(|backing| rebase_name(&backing.unique_name, old, new))
            else {
                continue;
            };
            self.tree.rebind_backing(id, &rebased)?;
        }
        if let Some(rebased) = self.root.as_deref().and_then(|root| rebase_name(root, old, new)) {
            self.root = Some(rebased);
        }
        debug!(from = %old, to = %new, "Rebound backing items");
        Ok(())
    }
}

/// Split an enumeration into one node list per rig
///
/// A rig root is an anchor with no anchor above it. Nodes outside every rig
/// join the first rig. Without any rig the list comes back whole.
fn split_by_rig(live: Vec<LiveNode>, anchor_types: &[String]) -> Vec<(Option<String>, Vec<LiveNode>)> {
    let owners: Vec<Option<String>> = {
        let parents: HashMap<&str, Option<&str>> = live
            .iter()
            .map(|node| (node.unique_name.as_str(), node.parent.as_deref()))
            .collect();
        let anchors: HashSet<&str> = live
            .iter()
            .filter(|node| anchor_types.contains(&node.node_type))
            .map(|node| node.unique_name.as_str())
            .collect();
        live.iter()
            .map(|node| outermost_anchor(&node.unique_name, &parents, &anchors).map(str::to_string))
            .collect()
    };

    let mut rigs: Vec<(Option<String>, Vec<LiveNode>)> = owners
        .iter()
        .zip(&live)
        .filter(|(owner, node)| owner.as_deref() == Some(node.unique_name.as_str()))
        .map(|(owner, _)| (owner.clone(), Vec::new()))
        .collect();
    if rigs.is_empty() {
        return vec![(None, live)];
    }

    for (owner, node) in owners.into_iter().zip(live) {
        let index = owner
            .and_then(|owner| rigs.iter().position(|(rig, _)| rig.as_deref() == Some(owner.as_str())))
            .unwrap_or(0);
        rigs[index].1.push(node);
    }
    debug!(rigs = rigs.len(), "Split enumeration by rig");
    rigs
}

/// Outermost anchor on the parent chain of `name`, itself included
fn outermost_anchor<'a>(
    name: &'a str,
    parents: &HashMap<&'a str, Option<&'a str>>,
    anchors: &HashSet<&'a str>,
) -> Option<&'a str> {
    let mut found = None;
    let mut current = Some(name);
    // Bounded so a parent cycle in the store cannot spin forever
    for _ in 0..=parents.len() {
        let Some(node) = current else { break };
        if anchors.contains(node) {
            found = Some(node);
        }
        current = parents.get(node).copied().flatten();
    }
    found
}

/// Join per-rig results into one tree, rigs in order
fn combine(mut parts: Vec<Reconciled>) -> Result<Reconciled> {
    if parts.len() == 1
        && let Some(only) = parts.pop()
    {
        return Ok(only);
    }

    let mut entries = Vec::new();
    let mut report = ReconcileReport::default();
    for part in parts {
        entries.extend(flatten(&part.tree, None));
        report.added.extend(part.report.added);
        report.dropped.extend(part.report.dropped);
        report.rebound.extend(part.report.rebound);
    }
    let (mut tree, pinned) = construct(&entries)?;
    dedupe_sibling_names(&mut tree)?;
    Ok(Reconciled { tree, pinned, report })
}
