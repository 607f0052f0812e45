//! Bulk grouping, ungrouping and drag-reparenting
//!
//! Every operation keeps sibling names unique: an item that would collide
//! with an existing sibling is renamed by bumping its trailing number, and
//! each such rename is returned so callers can audit it or forward it to the
//! backing store.

use std::collections::{HashMap, HashSet};
use tracing::info;

use crate::error::{Result, TreeError};
use crate::tree::{ItemData, ItemId, SceneTree};

/// A display-name change applied to keep siblings unique
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    pub item: ItemId,
    pub old_name: String,
    pub new_name: String,
}

/// First name derived from `base` that `is_taken` rejects
///
/// A trailing number is incremented (`group9` -> `group10`); a name without
/// one gets `1` appended (`x` -> `x1`). `base` itself is returned when free.
pub fn unique_name(base: &str, is_taken: impl Fn(&str) -> bool) -> String {
    if !is_taken(base) {
        return base.to_string();
    }
    let mut stem = base.trim_end_matches(|c: char| c.is_ascii_digit());
    let mut counter: u64 = base[stem.len()..].parse().unwrap_or(0);
    loop {
        // An exhausted suffix counts on from the whole name instead
        counter = match counter.checked_add(1) {
            Some(next) => next,
            None => {
                stem = base;
                1
            }
        };
        let candidate = format!("{stem}{counter}");
        if !is_taken(&candidate) {
            return candidate;
        }
    }
}

/// Give every item a display name no earlier sibling uses
///
/// Only display names change; backing items keep their unique names. Used
/// after reconcile, where the backing store may report equal short names
/// under one parent.
pub fn dedupe_sibling_names(tree: &mut SceneTree) -> Result<Vec<Rename>> {
    let mut renames = Vec::new();
    let mut parents: Vec<Option<ItemId>> = vec![None];
    parents.extend(tree.preorder().into_iter().map(Some));

    for parent in parents {
        let children = tree.container(parent)?.to_vec();
        if children.len() < 2 {
            continue;
        }
        let mut taken: HashSet<String> = HashSet::with_capacity(children.len());
        for id in children {
            let name = tree.display_name(id).unwrap_or_default().to_string();
            let fixed = unique_name(&name, |candidate| taken.contains(candidate));
            if fixed != name {
                tree.set_display_name(id, &fixed)?;
                info!(from = %name, to = %fixed, "Renamed duplicate sibling");
                renames.push(Rename {
                    item: id,
                    old_name: name,
                    new_name: fixed.clone(),
                });
            }
            taken.insert(fixed);
        }
    }
    Ok(renames)
}

/// Drop every item whose ancestor is also selected
///
/// The result is in display order so bulk moves keep the visual order.
pub fn prune_to_outermost(tree: &SceneTree, items: &[ItemId]) -> Vec<ItemId> {
    let selected: HashSet<ItemId> = items.iter().copied().filter(|&id| tree.contains(id)).collect();

    let mut outermost: Vec<ItemId> = selected
        .iter()
        .copied()
        .filter(|&id| {
            let mut current = tree.parent(id);
            while let Some(parent) = current {
                if selected.contains(&parent) {
                    return false;
                }
                current = tree.parent(parent);
            }
            true
        })
        .collect();

    let order: HashMap<ItemId, usize> = tree
        .preorder()
        .into_iter()
        .enumerate()
        .map(|(position, id)| (id, position))
        .collect();
    outermost.sort_by_key(|id| (order.get(id).copied().unwrap_or(usize::MAX), *id));
    outermost
}

/// Wrap the outermost `items` in a new item carrying `payload`
///
/// The new item takes the place of the first selected item. Returns its id
/// and every rename applied along the way.
pub fn create_subtree(tree: &mut SceneTree, items: &[ItemId], payload: ItemData) -> Result<(ItemId, Vec<Rename>)> {
    let survivors = prune_to_outermost(tree, items);
    let Some(&first) = survivors.first() else {
        return Err(TreeError::EmptySelection);
    };
    if let Some(&detached) = survivors.iter().find(|&&id| !tree.is_attached(id)) {
        return Err(TreeError::StaleItem(detached));
    }

    let parent = tree.parent(first);
    let row = tree.row(first).ok_or(TreeError::StaleItem(first))?;

    // The survivors are about to leave, so they do not block the new name
    let taken: HashSet<String> = tree
        .container(parent)?
        .iter()
        .filter(|id| !survivors.contains(id))
        .filter_map(|&id| tree.display_name(id).map(str::to_string))
        .collect();
    let wanted = payload.display_name().to_string();
    let name = unique_name(&wanted, |candidate| taken.contains(candidate));

    let subtree = tree.insert_item(parent, row, payload)?;
    let mut renames = Vec::new();
    if name != wanted {
        tree.set_display_name(subtree, &name)?;
        info!(from = %wanted, to = %name, "Renamed new item to keep siblings unique");
        renames.push(Rename {
            item: subtree,
            old_name: wanted,
            new_name: name,
        });
    }

    renames.extend(place_items(tree, Some(subtree), 0, &survivors)?);
    info!(item = %tree.tree_path(subtree), count = survivors.len(), "Created subtree");
    Ok((subtree, renames))
}

/// Remove `node`, moving its children into its former slot among its siblings
pub fn pick_out(tree: &mut SceneTree, node: ItemId) -> Result<Vec<Rename>> {
    if !tree.is_attached(node) {
        return Err(TreeError::StaleItem(node));
    }
    let parent = tree.parent(node);
    let row = tree.row(node).ok_or(TreeError::StaleItem(node))?;
    let children = tree.children(node).to_vec();
    let path = tree.tree_path(node);

    tree.detach(node)?;
    let renames = place_items(tree, parent, row, &children)?;
    tree.discard(node);

    info!(item = %path, children = children.len(), renamed = renames.len(), "Picked out item");
    Ok(renames)
}

/// Drag-reparent: move the outermost `items` to `row` under `parent`
pub fn move_items(tree: &mut SceneTree, items: &[ItemId], parent: Option<ItemId>, row: usize) -> Result<Vec<Rename>> {
    let survivors = prune_to_outermost(tree, items);
    if survivors.is_empty() {
        return Err(TreeError::EmptySelection);
    }
    place_items(tree, parent, row, &survivors)
}

/// Move `items` in order to `row` under `parent`, renaming on collision
fn place_items(tree: &mut SceneTree, parent: Option<ItemId>, row: usize, items: &[ItemId]) -> Result<Vec<Rename>> {
    // Refuse cycles before anything moves
    tree.container(parent)?;
    for &id in items {
        if !tree.contains(id) {
            return Err(TreeError::StaleItem(id));
        }
        if let Some(parent) = parent
            && (parent == id || tree.is_ancestor(id, parent))
        {
            return Err(TreeError::Cycle { item: id, parent });
        }
    }

    let mut row = row.min(tree.container(parent)?.len());
    let mut renames = Vec::new();
    for &id in items {
        // Leaving a slot above the target shifts the target up by one
        if tree.parent(id) == parent
            && let Some(current) = tree.row(id)
            && current < row
        {
            row -= 1;
        }
        tree.detach(id)?;

        let name = tree.display_name(id).unwrap_or_default().to_string();
        let taken: HashSet<String> = tree
            .container(parent)?
            .iter()
            .filter_map(|&sibling| tree.display_name(sibling).map(str::to_string))
            .collect();
        let fixed = unique_name(&name, |candidate| taken.contains(candidate));
        if fixed != name {
            tree.set_display_name(id, &fixed)?;
            info!(from = %name, to = %fixed, "Renamed item to keep siblings unique");
            renames.push(Rename {
                item: id,
                old_name: name,
                new_name: fixed,
            });
        }

        tree.insert_children(parent, row, &[id])?;
        row += 1;
    }
    Ok(renames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{BackingRef, PinState};

    fn leaf(name: &str) -> ItemData {
        ItemData::Backing(BackingRef::new(format!("|{name}"), "zTissue"))
    }

    fn names(tree: &SceneTree, parent: Option<ItemId>) -> Vec<String> {
        tree.container(parent)
            .unwrap()
            .iter()
            .map(|&id| tree.display_name(id).unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_unique_name() {
        let taken = ["x", "x1", "group9", "a"];
        let is_taken = |name: &str| taken.contains(&name);
        assert_eq!(unique_name("x", is_taken), "x2");
        assert_eq!(unique_name("group9", is_taken), "group10");
        assert_eq!(unique_name("free", is_taken), "free");
        assert_eq!(unique_name("a", is_taken), "a1");
    }

    #[test]
    fn test_unique_name_exhausted_suffix() {
        let base = format!("x{}", u64::MAX);
        let taken = [base.clone()];
        let is_taken = |name: &str| taken.iter().any(|t| t == name);
        assert_eq!(unique_name(&base, is_taken), format!("{base}1"));
    }

    #[test]
    fn test_dedupe_sibling_names() {
        let mut tree = SceneTree::new();
        let rig = tree.push_item(None, leaf("rig")).unwrap();
        let first = tree.push_item(Some(rig), leaf("x")).unwrap();
        let second = tree.push_item(Some(rig), ItemData::Backing(BackingRef::new("|y|x", "zTissue"))).unwrap();
        let third = tree.push_item(Some(rig), leaf("x1")).unwrap();

        let renames = dedupe_sibling_names(&mut tree).unwrap();
        assert_eq!(renames.len(), 2);
        assert_eq!(tree.display_name(first), Some("x"));
        assert_eq!(tree.display_name(second), Some("x1"));
        assert_eq!(tree.display_name(third), Some("x2"));
        assert_eq!(tree.backing(second).unwrap().unique_name, "|y|x");
        assert_eq!(tree.find_by_path("|rig|x2"), Some(third));

        assert!(dedupe_sibling_names(&mut tree).unwrap().is_empty());
    }

    #[test]
    fn test_prune_to_outermost() {
        let mut tree = SceneTree::new();
        let rig = tree.push_item(None, leaf("rig")).unwrap();
        let g = tree.push_item(Some(rig), ItemData::group("g")).unwrap();
        let a = tree.push_item(Some(g), leaf("a")).unwrap();
        let b = tree.push_item(Some(rig), leaf("b")).unwrap();

        assert_eq!(prune_to_outermost(&tree, &[b, a, g]), vec![g, b]);
        assert_eq!(prune_to_outermost(&tree, &[a, rig]), vec![rig]);
        assert_eq!(prune_to_outermost(&tree, &[a, a]), vec![a]);
    }

    #[test]
    fn test_create_subtree_takes_first_slot() {
        let mut tree = SceneTree::new();
        let rig = tree.push_item(None, leaf("rig")).unwrap();
        let a = tree.push_item(Some(rig), leaf("a")).unwrap();
        let b = tree.push_item(Some(rig), leaf("b")).unwrap();
        let c = tree.push_item(Some(rig), leaf("c")).unwrap();

        let (group, renames) = create_subtree(&mut tree, &[c, b], ItemData::group("group")).unwrap();
        assert!(renames.is_empty());
        assert_eq!(tree.children(rig), &[a, group]);
        assert_eq!(tree.children(group), &[b, c]);
        assert_eq!(tree.tree_path(c), "|rig|group|c");
    }

    #[test]
    fn test_create_subtree_renames_colliding_group() {
        let mut tree = SceneTree::new();
        let rig = tree.push_item(None, leaf("rig")).unwrap();
        tree.push_item(Some(rig), ItemData::group("group")).unwrap();
        let a = tree.push_item(Some(rig), leaf("a")).unwrap();

        let (group, renames) = create_subtree(&mut tree, &[a], ItemData::group("group")).unwrap();
        assert_eq!(tree.display_name(group), Some("group1"));
        assert_eq!(renames.len(), 1);
        assert_eq!(names(&tree, Some(rig)), vec!["group", "group1"]);
    }

    #[test]
    fn test_create_subtree_preserves_pins() {
        let mut tree = SceneTree::new();
        let rig = tree.push_item(None, leaf("rig")).unwrap();
        let a = tree.push_item(Some(rig), leaf("a")).unwrap();
        tree.set_pin_state(a, PinState::Pinned).unwrap();
        let (group, _) = create_subtree(&mut tree, &[a], ItemData::group("g")).unwrap();
        assert_eq!(tree.pin_state(group), PinState::Pinned);
    }

    #[test]
    fn test_create_subtree_empty_selection() {
        let mut tree = SceneTree::new();
        let err = create_subtree(&mut tree, &[], ItemData::group("g")).unwrap_err();
        assert!(matches!(err, TreeError::EmptySelection));
    }

    #[test]
    fn test_scenario_d_pick_out_collision() {
        let mut tree = SceneTree::new();
        let rig = tree.push_item(None, leaf("rig")).unwrap();
        let x = tree.push_item(Some(rig), leaf("x")).unwrap();
        let g = tree.push_item(Some(rig), ItemData::group("g")).unwrap();
        let inner_x = tree.push_item(Some(g), leaf("x")).unwrap();

        let renames = pick_out(&mut tree, g).unwrap();
        assert_eq!(
            renames,
            vec![Rename {
                item: inner_x,
                old_name: "x".to_string(),
                new_name: "x1".to_string(),
            }]
        );
        assert_eq!(tree.children(rig), &[x, inner_x]);
        assert_eq!(names(&tree, Some(rig)), vec!["x", "x1"]);
        assert!(!tree.contains(g));
    }

    #[test]
    fn test_pick_out_keeps_position() {
        let mut tree = SceneTree::new();
        let a = tree.push_item(None, leaf("a")).unwrap();
        let g = tree.push_item(None, ItemData::group("g")).unwrap();
        let b = tree.push_item(Some(g), leaf("b")).unwrap();
        let c = tree.push_item(Some(g), leaf("c")).unwrap();
        let d = tree.push_item(None, leaf("d")).unwrap();

        let renames = pick_out(&mut tree, g).unwrap();
        assert!(renames.is_empty());
        assert_eq!(tree.roots(), &[a, b, c, d]);
        assert_eq!(tree.parent(b), None);
    }

    #[test]
    fn test_pick_out_detached_rejected() {
        let mut tree = SceneTree::new();
        let floating = tree.create_item(ItemData::group("g"));
        assert!(matches!(pick_out(&mut tree, floating).unwrap_err(), TreeError::StaleItem(_)));
    }

    #[test]
    fn test_move_items_reorders_within_parent() {
        let mut tree = SceneTree::new();
        let rig = tree.push_item(None, leaf("rig")).unwrap();
        let a = tree.push_item(Some(rig), leaf("a")).unwrap();
        let b = tree.push_item(Some(rig), leaf("b")).unwrap();
        let c = tree.push_item(Some(rig), leaf("c")).unwrap();
        let d = tree.push_item(Some(rig), leaf("d")).unwrap();

        move_items(&mut tree, &[a], Some(rig), 3).unwrap();
        assert_eq!(tree.children(rig), &[b, c, a, d]);

        move_items(&mut tree, &[b, c], Some(rig), 4).unwrap();
        assert_eq!(tree.children(rig), &[a, d, b, c]);
    }

    #[test]
    fn test_move_items_into_descendant_rejected() {
        let mut tree = SceneTree::new();
        let g = tree.push_item(None, ItemData::group("g")).unwrap();
        let inner = tree.push_item(Some(g), ItemData::group("inner")).unwrap();

        let err = move_items(&mut tree, &[g], Some(inner), 0).unwrap_err();
        assert!(matches!(err, TreeError::Cycle { .. }));
        assert_eq!(tree.roots(), &[g]);
    }

    #[test]
    fn test_move_items_renames_on_collision() {
        let mut tree = SceneTree::new();
        let g1 = tree.push_item(None, ItemData::group("g1")).unwrap();
        let g2 = tree.push_item(None, ItemData::group("g2")).unwrap();
        tree.push_item(Some(g1), ItemData::group("sub")).unwrap();
        let moved = tree.push_item(Some(g2), ItemData::group("sub")).unwrap();

        let renames = move_items(&mut tree, &[moved], Some(g1), usize::MAX).unwrap();
        assert_eq!(renames.len(), 1);
        assert_eq!(tree.tree_path(moved), "|g1|sub1");
    }
}
