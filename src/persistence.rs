//! JSON scene file that stands in for the live backing store
//!
//! The panel string is stored as an attribute of the rig root node, so it
//! follows the node through renames.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::builder::{Builder, LiveNode};
use crate::constants::wire::PATH_SEPARATOR;
use crate::tree::rebase_name;

/// A backing node plus the attributes the panel stores on it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredNode {
    #[serde(flatten)]
    pub node: LiveNode,
    /// Persisted panel document, only set on rig roots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panel: Option<String>,
}

/// In-memory scene loaded from (and saved back to) a JSON file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneFile {
    #[serde(default)]
    pub nodes: Vec<StoredNode>,
}

impl SceneFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read scene from {:?}", path))?;
        let scene: SceneFile = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse scene JSON from {:?}", path))?;
        info!(path = %path.display(), nodes = scene.nodes.len(), "Loaded scene");
        Ok(scene)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create scene directory {:?}", parent))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize scene to JSON")?;
        fs::write(path, json).with_context(|| format!("Failed to write scene to {:?}", path))?;
        info!(path = %path.display(), nodes = self.nodes.len(), "Saved scene");
        Ok(())
    }

    /// Append a node, registering it in its parent's child list
    pub fn push(&mut self, node: LiveNode) {
        if let Some(parent_name) = node.parent.as_deref()
            && let Some(parent) = self.find_mut(parent_name)
            && !parent.node.children.contains(&node.unique_name)
        {
            parent.node.children.push(node.unique_name.clone());
        }
        self.nodes.push(StoredNode { node, panel: None });
    }

    /// Builder-style variant of [`Self::push`]
    pub fn with(mut self, node: LiveNode) -> Self {
        self.push(node);
        self
    }

    pub fn find(&self, unique_name: &str) -> Option<&StoredNode> {
        self.nodes.iter().find(|stored| stored.node.unique_name == unique_name)
    }

    fn find_mut(&mut self, unique_name: &str) -> Option<&mut StoredNode> {
        self.nodes.iter_mut().find(|stored| stored.node.unique_name == unique_name)
    }

    fn require(&self, unique_name: &str) -> Result<&StoredNode> {
        self.find(unique_name)
            .with_context(|| format!("No node named '{}' in scene", unique_name))
    }

    /// `root` and every node below it, in document order
    fn subtree_names<'a>(&'a self, root: &'a str) -> HashSet<&'a str> {
        let mut members: HashSet<&str> = HashSet::from([root]);
        // Parents may appear after their children, so sweep until stable
        loop {
            let before = members.len();
            for stored in &self.nodes {
                if let Some(parent) = stored.node.parent.as_deref()
                    && members.contains(parent)
                {
                    members.insert(stored.node.unique_name.as_str());
                }
            }
            if members.len() == before {
                return members;
            }
        }
    }
}

impl Builder for SceneFile {
    fn enumerate(&self, root_filter: Option<&str>) -> Result<Vec<LiveNode>> {
        let Some(root) = root_filter else {
            return Ok(self.nodes.iter().map(|stored| stored.node.clone()).collect());
        };
        self.require(root)?;
        let members = self.subtree_names(root);
        let nodes: Vec<LiveNode> = self
            .nodes
            .iter()
            .filter(|stored| members.contains(stored.node.unique_name.as_str()))
            .map(|stored| stored.node.clone())
            .collect();
        debug!(root = %root, count = nodes.len(), "Enumerated scene nodes");
        Ok(nodes)
    }

    fn rename(&mut self, node: &str, new_short_name: &str) -> Result<String> {
        if new_short_name.is_empty() || new_short_name.contains(PATH_SEPARATOR) {
            bail!("'{}' is not a valid node name", new_short_name);
        }
        self.require(node)?;

        let new_unique = match node.rfind(PATH_SEPARATOR) {
            Some(split) => format!("{}{}{}", &node[..split], PATH_SEPARATOR, new_short_name),
            None => new_short_name.to_string(),
        };
        if new_unique == node {
            return Ok(new_unique);
        }
        if self.find(&new_unique).is_some() {
            bail!("Cannot rename '{}': a node named '{}' already exists", node, new_unique);
        }

        for stored in &mut self.nodes {
            let entry = &mut stored.node;
            if let Some(renamed) = rebase_name(&entry.unique_name, node, &new_unique) {
                if entry.unique_name == node {
                    entry.short_name = new_short_name.to_string();
                }
                entry.unique_name = renamed;
            }
            if let Some(parent) = entry.parent.as_deref()
                && let Some(renamed) = rebase_name(parent, node, &new_unique)
            {
                entry.parent = Some(renamed);
            }
            for child in &mut entry.children {
                if let Some(renamed) = rebase_name(child, node, &new_unique) {
                    *child = renamed;
                }
            }
        }
        info!(from = %node, to = %new_unique, "Renamed scene node");
        Ok(new_unique)
    }

    fn get_persisted_string(&self, root: &str) -> Result<Option<String>> {
        Ok(self.require(root)?.panel.clone())
    }

    fn set_persisted_string(&mut self, root: &str, value: &str) -> Result<()> {
        let stored = self
            .find_mut(root)
            .with_context(|| format!("No node named '{}' in scene", root))?;
        stored.panel = Some(value.to_string());
        debug!(root = %root, bytes = value.len(), "Stored panel string");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rig() -> SceneFile {
        SceneFile::new()
            .with(LiveNode::new("|rig", "zSolverTransform"))
            .with(LiveNode::new("|rig|solver", "zSolver").with_parent("|rig"))
            .with(LiveNode::new("|rig|solver|bone", "zBone").with_parent("|rig|solver"))
            .with(LiveNode::new("|other", "zSolverTransform"))
    }

    #[test]
    fn test_push_registers_child() {
        let scene = rig();
        assert_eq!(scene.find("|rig").unwrap().node.children, vec!["|rig|solver"]);
    }

    #[test]
    fn test_enumerate_with_root_filter() {
        let scene = rig();
        let names: Vec<String> = scene
            .enumerate(Some("|rig"))
            .unwrap()
            .into_iter()
            .map(|node| node.unique_name)
            .collect();
        assert_eq!(names, vec!["|rig", "|rig|solver", "|rig|solver|bone"]);
        assert_eq!(scene.enumerate(None).unwrap().len(), 4);
        assert!(scene.enumerate(Some("|missing")).is_err());
    }

    #[test]
    fn test_rename_rewrites_descendants() {
        let mut scene = rig();
        let renamed = scene.rename("|rig|solver", "solverB").unwrap();
        assert_eq!(renamed, "|rig|solverB");

        let bone = scene.find("|rig|solverB|bone").unwrap();
        assert_eq!(bone.node.parent.as_deref(), Some("|rig|solverB"));
        assert_eq!(bone.node.short_name, "bone");
        assert_eq!(scene.find("|rig").unwrap().node.children, vec!["|rig|solverB"]);
        assert_eq!(scene.find("|rig|solverB").unwrap().node.short_name, "solverB");
    }

    #[test]
    fn test_rename_rejects_collision() {
        let mut scene = rig();
        let err = scene.rename("|rig", "other").unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert!(scene.find("|rig").is_some());
    }

    #[test]
    fn test_rename_leaves_similar_prefix_alone() {
        let mut scene = rig().with(LiveNode::new("|rig2", "zTissue"));
        scene.rename("|rig", "body").unwrap();
        assert!(scene.find("|rig2").is_some());
        assert!(scene.find("|body|solver|bone").is_some());
    }

    #[test]
    fn test_persisted_string_follows_rename() {
        let mut scene = rig();
        assert_eq!(scene.get_persisted_string("|rig").unwrap(), None);
        scene.set_persisted_string("|rig", "{}").unwrap();
        scene.rename("|rig", "body").unwrap();
        assert_eq!(scene.get_persisted_string("|body").unwrap().as_deref(), Some("{}"));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.json");
        let mut scene = rig();
        scene.set_persisted_string("|rig", r#"{"version":1,"nodes":[]}"#).unwrap();
        scene.save(&path).unwrap();
        assert_eq!(SceneFile::load(&path).unwrap(), scene);
    }

    #[test]
    fn test_load_missing_file_fails_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = SceneFile::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to read scene"));
    }
}
