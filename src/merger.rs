//! Reconcile a fresh backing-store enumeration against the persisted tree
//!
//! User organization (groups, pins, ordering) is carried over from the
//! persisted entries. Backing nodes that vanished are dropped, new ones are
//! appended under the primary root, and anchor nodes are matched by type so
//! that renaming a rig root does not lose its layout.

use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::builder::LiveNode;
use crate::constants::wire::PATH_SEPARATOR;
use crate::error::{Result, TreeError};
use crate::restructure::dedupe_sibling_names;
use crate::serializer::{check_depths, construct, PendingTreeEntry};
use crate::tree::{BackingRef, ItemData, ItemId, SceneTree};

/// What changed between the persisted tree and the live enumeration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Live nodes with no persisted entry, in enumeration order
    pub added: Vec<String>,
    /// Persisted names with no live counterpart (or duplicate entries)
    pub dropped: Vec<String>,
    /// Anchors matched by type whose name changed: (persisted, live)
    pub rebound: Vec<(String, String)>,
}

impl ReconcileReport {
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.dropped.is_empty() && self.rebound.is_empty()
    }
}

/// Output of [`reconcile`]
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub tree: SceneTree,
    /// Pinned backing nodes in tree order
    pub pinned: Vec<BackingRef>,
    pub report: ReconcileReport,
}

fn is_anchor(anchor_types: &[String], node_type: &str) -> bool {
    anchor_types.iter().any(|anchor| anchor == node_type)
}

fn backing_for(node: &LiveNode) -> ItemData {
    ItemData::Backing(BackingRef {
        unique_name: node.unique_name.clone(),
        short_name: node.short_name.clone(),
        node_type: node.node_type.clone(),
    })
}

/// Merge `live` with `persisted` into a new tree
pub fn reconcile(
    live: &[LiveNode],
    persisted: &[PendingTreeEntry],
    anchor_types: &[String],
) -> Result<Reconciled> {
    if persisted.is_empty() {
        info!(nodes = live.len(), "No saved layout, building tree from live nodes");
        let tree = build_from_live(live, anchor_types)?;
        let report = ReconcileReport {
            added: live.iter().map(|node| node.unique_name.clone()).collect(),
            ..Default::default()
        };
        return Ok(Reconciled {
            tree,
            pinned: Vec::new(),
            report,
        });
    }

    // Corrupt input fails here, before anything is dropped or re-pathed
    check_depths(persisted)?;

    let mut live_by_name: HashMap<&str, &LiveNode> = HashMap::with_capacity(live.len());
    for node in live {
        if live_by_name.contains_key(node.unique_name.as_str()) {
            warn!(node = %node.unique_name, "Duplicate live node name, keeping the first");
            continue;
        }
        live_by_name.insert(&node.unique_name, node);
    }

    let mut live_anchors: HashMap<&str, &LiveNode> = HashMap::new();
    for anchor_type in anchor_types {
        let matches: Vec<&LiveNode> = live.iter().filter(|node| &node.node_type == anchor_type).collect();
        match matches.as_slice() {
            [] => {}
            [node] => {
                live_anchors.insert(anchor_type.as_str(), *node);
            }
            _ => {
                return Err(TreeError::MultipleAnchors {
                    node_type: anchor_type.clone(),
                    count: matches.len(),
                });
            }
        }
    }

    let persisted_names: HashSet<&str> = persisted
        .iter()
        .filter(|entry| !entry.is_group())
        .filter_map(PendingTreeEntry::name)
        .collect();

    let added: Vec<&LiveNode> = live
        .iter()
        .filter(|node| !is_anchor(anchor_types, &node.node_type))
        .filter(|node| !persisted_names.contains(node.unique_name.as_str()))
        .collect();

    let mut report = ReconcileReport::default();
    let mut seen_names: HashSet<&str> = HashSet::new();
    let mut seen_anchor_types: HashSet<&str> = HashSet::new();

    // Kept ancestors as (persisted depth, rewritten path); dropped entries are
    // never pushed, so their descendants climb to the nearest survivor
    let mut ancestors: Vec<(usize, String)> = Vec::new();
    let mut kept: Vec<PendingTreeEntry> = Vec::with_capacity(persisted.len());

    for entry in persisted {
        let depth = entry.depth();
        while ancestors.last().is_some_and(|(ancestor_depth, _)| *ancestor_depth >= depth) {
            ancestors.pop();
        }

        let resolved = if entry.is_group() {
            Some(entry.clone())
        } else if is_anchor(anchor_types, &entry.node_type) {
            match live_anchors.get(entry.node_type.as_str()) {
                Some(node) if seen_anchor_types.insert(entry.node_type.as_str()) => {
                    let persisted_name = entry.name().unwrap_or_default();
                    if persisted_name != node.unique_name {
                        info!(from = %persisted_name, to = %node.unique_name, "Anchor renamed, rebinding by type");
                        report
                            .rebound
                            .push((persisted_name.to_string(), node.unique_name.clone()));
                    }
                    seen_names.insert(&node.unique_name);
                    let mut rebound = entry.clone();
                    rebound.rebind(&node.unique_name, &node.short_name);
                    Some(rebound)
                }
                _ => None,
            }
        } else {
            match entry.name().and_then(|name| live_by_name.get(name)) {
                Some(node) if seen_names.insert(&node.unique_name) => {
                    let mut rebound = entry.clone();
                    rebound.rebind(&node.unique_name, &node.short_name);
                    Some(rebound)
                }
                _ => None,
            }
        };

        match resolved {
            Some(mut entry) => {
                let parent_path = ancestors.last().map(|(_, path)| path.as_str()).unwrap_or("");
                entry.tree_path = format!("{parent_path}{PATH_SEPARATOR}{}", entry.display_name());
                ancestors.push((depth, entry.tree_path.clone()));
                kept.push(entry);
            }
            None => {
                let name = entry.name().unwrap_or(&entry.tree_path).to_string();
                info!(node = %name, path = %entry.tree_path, "Dropping saved entry with no live node");
                report.dropped.push(name);
            }
        }
    }

    let (mut tree, pinned) = construct(&kept)?;

    let mut items_by_name: HashMap<String, ItemId> = tree
        .preorder()
        .into_iter()
        .filter_map(|id| tree.backing(id).map(|backing| (backing.unique_name.clone(), id)))
        .collect();

    // Live anchors the saved layout has never seen go first, under their live
    // parent when it is in the tree
    let mut inserted_per_parent: HashMap<Option<ItemId>, usize> = HashMap::new();
    for anchor_type in anchor_types {
        let Some(node) = live_anchors.get(anchor_type.as_str()) else { continue };
        if seen_anchor_types.contains(anchor_type.as_str()) {
            continue;
        }
        let parent = node
            .parent
            .as_deref()
            .and_then(|parent| items_by_name.get(parent))
            .copied();
        let row = inserted_per_parent.entry(parent).or_default();
        let id = tree.insert_item(parent, *row, backing_for(node))?;
        *row += 1;
        items_by_name.insert(node.unique_name.clone(), id);
        info!(anchor = %node.unique_name, "Inserted new anchor node");
        report.added.push(node.unique_name.clone());
    }

    let root = tree.primary_root();
    for node in &added {
        tree.push_item(root, backing_for(node))?;
        debug!(node = %node.unique_name, "Appended new live node");
        report.added.push(node.unique_name.clone());
    }

    dedupe_sibling_names(&mut tree)?;

    if !report.is_unchanged() {
        info!(
            added = report.added.len(),
            dropped = report.dropped.len(),
            rebound = report.rebound.len(),
            "Reconciled saved layout with live nodes"
        );
    }

    Ok(Reconciled { tree, pinned, report })
}

/// Build a tree straight from enumeration, with no saved layout
///
/// Anchors come first in configured order. Every other node goes under its
/// live parent when that parent was enumerated too, otherwise under the
/// first anchor, otherwise at the top level.
pub fn build_from_live(live: &[LiveNode], anchor_types: &[String]) -> Result<SceneTree> {
    let mut ordered: Vec<&LiveNode> = anchor_types
        .iter()
        .flat_map(|anchor_type| live.iter().filter(move |node| &node.node_type == anchor_type))
        .collect();
    ordered.extend(live.iter().filter(|node| !is_anchor(anchor_types, &node.node_type)));

    let mut tree = SceneTree::new();
    let mut ids: HashMap<&str, ItemId> = HashMap::with_capacity(ordered.len());
    let mut created: Vec<(&LiveNode, ItemId)> = Vec::with_capacity(ordered.len());
    for node in ordered {
        if ids.contains_key(node.unique_name.as_str()) {
            warn!(node = %node.unique_name, "Duplicate live node name, keeping the first");
            continue;
        }
        let id = tree.create_item(backing_for(node));
        ids.insert(&node.unique_name, id);
        created.push((node, id));
    }

    let primary = created
        .first()
        .filter(|(node, _)| is_anchor(anchor_types, &node.node_type))
        .map(|(_, id)| *id);

    for (node, id) in &created {
        let parent = node
            .parent
            .as_deref()
            .and_then(|parent| ids.get(parent))
            .copied()
            .filter(|parent| parent != id)
            .or_else(|| primary.filter(|primary| primary != id));
        tree.append_children(parent, &[*id])?;
    }

    dedupe_sibling_names(&mut tree)?;
    debug!(nodes = created.len(), top_level = tree.roots().len(), "Built tree from live nodes");
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::flatten;
    use crate::tree::PinState;

    fn anchors() -> Vec<String> {
        vec!["anchor".to_string()]
    }

    fn live(names: &[(&str, &str)]) -> Vec<LiveNode> {
        names
            .iter()
            .map(|(name, node_type)| LiveNode::new(*name, *node_type))
            .collect()
    }

    fn child_names(tree: &SceneTree, id: ItemId) -> Vec<String> {
        tree.children(id)
            .iter()
            .map(|&child| tree.display_name(child).unwrap().to_string())
            .collect()
    }

    /// S -> g -> { a (pinned), b (pinned) }
    fn persisted_s_g_ab() -> Vec<PendingTreeEntry> {
        vec![
            PendingTreeEntry::leaf("|S", "anchor", "|S", PinState::Unpinned),
            PendingTreeEntry::group("|S|g"),
            PendingTreeEntry::leaf("|S|g|a", "leaf", "|a", PinState::Pinned),
            PendingTreeEntry::leaf("|S|g|b", "leaf", "|b", PinState::Pinned),
        ]
    }

    #[test]
    fn test_scenario_b_deletion() {
        let live = live(&[("|S", "anchor"), ("|b", "leaf")]);
        let merged = reconcile(&live, &persisted_s_g_ab(), &anchors()).unwrap();
        let tree = &merged.tree;

        let s = tree.primary_root().unwrap();
        assert_eq!(child_names(tree, s), vec!["g"]);
        let g = tree.children(s)[0];
        assert_eq!(child_names(tree, g), vec!["b"]);
        let b = tree.children(g)[0];
        assert_eq!(tree.pin_state(b), PinState::Pinned);
        assert_eq!(merged.report.dropped, vec!["|a".to_string()]);
        assert_eq!(merged.pinned.len(), 1);
        assert_eq!(merged.pinned[0].unique_name, "|b");
    }

    #[test]
    fn test_scenario_c_addition() {
        let persisted = vec![
            PendingTreeEntry::leaf("|S", "anchor", "|S", PinState::Unpinned),
            PendingTreeEntry::leaf("|S|a", "leaf", "|a", PinState::Pinned),
        ];
        let live = live(&[("|S", "anchor"), ("|a", "leaf"), ("|c", "leaf")]);
        let merged = reconcile(&live, &persisted, &anchors()).unwrap();
        let tree = &merged.tree;

        let s = tree.primary_root().unwrap();
        assert_eq!(child_names(tree, s), vec!["a", "c"]);
        let c = tree.children(s)[1];
        assert_eq!(tree.pin_state(c), PinState::Unpinned);
        assert_eq!(merged.report.added, vec!["|c".to_string()]);
    }

    #[test]
    fn test_idempotent_merge() {
        let live = live(&[("|S", "anchor"), ("|b", "leaf"), ("|d", "leaf")]);
        let first = reconcile(&live, &persisted_s_g_ab(), &anchors()).unwrap();
        let saved = flatten(&first.tree, None);
        let second = reconcile(&live, &saved, &anchors()).unwrap();

        assert_eq!(flatten(&second.tree, None), saved);
        assert!(second.report.is_unchanged());
        let first_pins: Vec<_> = first.tree.preorder().into_iter().map(|id| first.tree.pin_state(id)).collect();
        let second_pins: Vec<_> = second.tree.preorder().into_iter().map(|id| second.tree.pin_state(id)).collect();
        assert_eq!(first_pins, second_pins);
    }

    #[test]
    fn test_anchor_rename_keeps_position() {
        let live = live(&[("|S_renamed", "anchor"), ("|a", "leaf"), ("|b", "leaf")]);
        let merged = reconcile(&live, &persisted_s_g_ab(), &anchors()).unwrap();
        let tree = &merged.tree;

        let root = tree.primary_root().unwrap();
        assert_eq!(tree.backing(root).unwrap().unique_name, "|S_renamed");
        assert_eq!(tree.tree_path(tree.children(tree.children(root)[0])[1]), "|S_renamed|g|b");
        assert_eq!(
            merged.report.rebound,
            vec![("|S".to_string(), "|S_renamed".to_string())]
        );
        assert!(merged.report.added.is_empty());
    }

    #[test]
    fn test_multiple_live_anchors_rejected() {
        let live = live(&[("|S", "anchor"), ("|S2", "anchor"), ("|a", "leaf")]);
        let err = reconcile(&live, &persisted_s_g_ab(), &anchors()).unwrap_err();
        assert!(matches!(err, TreeError::MultipleAnchors { count: 2, .. }));
    }

    #[test]
    fn test_dropped_parent_promotes_children() {
        let persisted = vec![
            PendingTreeEntry::leaf("|S", "anchor", "|S", PinState::Unpinned),
            PendingTreeEntry::leaf("|S|bone", "zBone", "|bone", PinState::Unpinned),
            PendingTreeEntry::group("|S|bone|g"),
            PendingTreeEntry::leaf("|S|bone|g|a", "leaf", "|a", PinState::Pinned),
            PendingTreeEntry::leaf("|S|c", "leaf", "|c", PinState::Unpinned),
        ];
        let live = live(&[("|S", "anchor"), ("|a", "leaf"), ("|c", "leaf")]);
        let merged = reconcile(&live, &persisted, &anchors()).unwrap();
        let tree = &merged.tree;

        let s = tree.primary_root().unwrap();
        assert_eq!(child_names(tree, s), vec!["g", "c"]);
        assert_eq!(tree.find_by_path("|S|g|a").map(|id| tree.pin_state(id)), Some(PinState::Pinned));
        assert_eq!(merged.report.dropped, vec!["|bone".to_string()]);
    }

    #[test]
    fn test_missing_anchor_dropped_and_children_promoted() {
        let live = live(&[("|a", "leaf"), ("|b", "leaf")]);
        let merged = reconcile(&live, &persisted_s_g_ab(), &anchors()).unwrap();
        let tree = &merged.tree;
        let g = tree.primary_root().unwrap();
        assert!(tree.is_group(g));
        assert_eq!(child_names(tree, g), vec!["a", "b"]);
    }

    #[test]
    fn test_new_anchor_inserted_first() {
        let persisted = vec![
            PendingTreeEntry::leaf("|a", "leaf", "|a", PinState::Unpinned),
        ];
        let live = live(&[("|a", "leaf"), ("|S", "anchor")]);
        let merged = reconcile(&live, &persisted, &anchors()).unwrap();
        let tree = &merged.tree;
        let names: Vec<_> = tree.roots().iter().map(|&id| tree.display_name(id).unwrap()).collect();
        assert_eq!(names, vec!["S", "a"]);
    }

    #[test]
    fn test_duplicate_persisted_entry_dropped() {
        let persisted = vec![
            PendingTreeEntry::leaf("|S", "anchor", "|S", PinState::Unpinned),
            PendingTreeEntry::leaf("|S|a", "leaf", "|a", PinState::Pinned),
            PendingTreeEntry::group("|S|g"),
            PendingTreeEntry::leaf("|S|g|a", "leaf", "|a", PinState::Unpinned),
        ];
        let live = live(&[("|S", "anchor"), ("|a", "leaf")]);
        let merged = reconcile(&live, &persisted, &anchors()).unwrap();
        let tree = &merged.tree;
        assert_eq!(tree.len(), 3);
        assert_eq!(merged.report.dropped, vec!["|a".to_string()]);
        assert!(tree.find_by_path("|S|g").is_some_and(|g| tree.children(g).is_empty()));
    }

    #[test]
    fn test_corrupt_persisted_list_fails() {
        let persisted = vec![
            PendingTreeEntry::leaf("|S", "anchor", "|S", PinState::Unpinned),
            PendingTreeEntry::leaf("|S|g|a", "leaf", "|a", PinState::Unpinned),
        ];
        let live = live(&[("|S", "anchor"), ("|a", "leaf")]);
        let err = reconcile(&live, &persisted, &anchors()).unwrap_err();
        assert!(matches!(err, TreeError::DepthJump { .. }));
    }

    #[test]
    fn test_build_from_live_uses_live_parents() {
        let nodes = vec![
            LiveNode::new("|S", "anchor"),
            LiveNode::new("|S|bone", "zBone").with_parent("|S"),
            LiveNode::new("|S|bone|attachment", "zAttachment").with_parent("|S|bone"),
            LiveNode::new("|tissue", "zTissue"),
        ];
        let merged = reconcile(&nodes, &[], &anchors()).unwrap();
        let tree = &merged.tree;

        assert_eq!(tree.roots().len(), 1);
        let s = tree.primary_root().unwrap();
        assert_eq!(child_names(tree, s), vec!["bone", "tissue"]);
        assert!(tree.find_by_path("|S|bone|attachment").is_some());
        assert!(merged.pinned.is_empty());
        assert_eq!(merged.report.added.len(), 4);
    }

    #[test]
    fn test_equal_short_names_get_unique_display_names() {
        let live = live(&[("|S", "anchor"), ("|x", "leaf"), ("|y|x", "leaf")]);
        let first = reconcile(&live, &[], &anchors()).unwrap();
        let s = first.tree.primary_root().unwrap();
        assert_eq!(child_names(&first.tree, s), vec!["x", "x1"]);
        let second_x = first.tree.find_by_path("|S|x1").unwrap();
        assert_eq!(first.tree.backing(second_x).unwrap().unique_name, "|y|x");

        let saved = flatten(&first.tree, None);
        let second = reconcile(&live, &saved, &anchors()).unwrap();
        assert_eq!(flatten(&second.tree, None), saved);
        assert!(second.report.is_unchanged());
    }

    #[test]
    fn test_build_from_live_anchor_first() {
        let nodes = vec![LiveNode::new("|tissue", "zTissue"), LiveNode::new("|S", "anchor")];
        let tree = build_from_live(&nodes, &anchors()).unwrap();
        let s = tree.primary_root().unwrap();
        assert_eq!(tree.display_name(s), Some("S"));
        assert_eq!(child_names(&tree, s), vec!["tissue"]);
    }

    #[test]
    fn test_build_from_live_without_anchor() {
        let nodes = live(&[("|a", "leaf"), ("|b", "leaf")]);
        let tree = build_from_live(&nodes, &anchors()).unwrap();
        assert_eq!(tree.roots().len(), 2);
    }
}
