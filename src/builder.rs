//! Backing-store collaborator interface
//!
//! The engine never talks to the host application directly. Everything it
//! needs from the live object graph goes through [`Builder`].

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::tree::short_name_of;

/// A backing-store node as reported by enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveNode {
    pub unique_name: String,
    pub short_name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
}

impl LiveNode {
    /// Node with the short name derived from the unique name
    pub fn new(unique_name: impl Into<String>, node_type: impl Into<String>) -> Self {
        let unique_name = unique_name.into();
        Self {
            short_name: short_name_of(&unique_name).to_string(),
            unique_name,
            node_type: node_type.into(),
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }
}

/// Enumerates and mutates the live backing store
pub trait Builder {
    /// Ordered list of live nodes, restricted to one rig when `root_filter` is given
    fn enumerate(&self, root_filter: Option<&str>) -> Result<Vec<LiveNode>>;

    /// Rename a node, returning its new unique name
    fn rename(&mut self, node: &str, new_short_name: &str) -> Result<String>;

    /// Panel string stored on the rig root, if any
    fn get_persisted_string(&self, root: &str) -> Result<Option<String>>;

    fn set_persisted_string(&mut self, root: &str, value: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_node_short_name() {
        let node = LiveNode::new("|rig|muscle_L", "zTissue").with_parent("|rig");
        assert_eq!(node.short_name, "muscle_L");
        assert_eq!(node.parent.as_deref(), Some("|rig"));
    }

    #[test]
    fn test_live_node_serde_uses_type_key() {
        let node = LiveNode::new("|rig", "zSolverTransform");
        let json = serde_json::to_string(&node).unwrap();
        assert_eq!(json, r#"{"unique_name":"|rig","short_name":"rig","type":"zSolverTransform"}"#);
        let back: LiveNode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, node);
    }
}
