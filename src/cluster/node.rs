use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::cluster::host::{HostConfig, HostGroup};
use crate::error::{ClustermError, Result};
use crate::inventory::{AssetStatus, Inventory};

/// Monitoring state reported for a node by discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    #[default]
    Unknown,
    Discovered,
    Disappeared,
}

impl std::fmt::Display for MonitorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorState::Unknown => write!(f, "unknown"),
            MonitorState::Discovered => write!(f, "discovered"),
            MonitorState::Disappeared => write!(f, "disappeared"),
        }
    }
}

/// A cluster node known to the manager.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub monitor: MonitorState,
    pub cfg: HostConfig,
}

impl Node {
    pub fn new(name: impl Into<String>, address: impl Into<String>, tag: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            cfg: HostConfig::new(name.clone(), address, tag),
            name,
            monitor: MonitorState::Discovered,
        }
    }

    pub fn with_group(mut self, group: HostGroup) -> Self {
        self.cfg.group = Some(group);
        self
    }

    pub fn with_monitor(mut self, monitor: MonitorState) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn mgmt_address(&self) -> &str {
        &self.cfg.address
    }

    pub fn tag(&self) -> &str {
        &self.cfg.tag
    }

    pub fn group(&self) -> Option<HostGroup> {
        self.cfg.group
    }

    pub fn is_discovered(&self) -> bool {
        self.monitor == MonitorState::Discovered
    }
}

/// Entry of the JSON node seed file.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub group: Option<HostGroup>,
    #[serde(default = "default_monitor_state")]
    pub state: MonitorState,
    #[serde(default = "default_asset_status")]
    pub asset_status: AssetStatus,
}

fn default_monitor_state() -> MonitorState {
    MonitorState::Discovered
}

fn default_asset_status() -> AssetStatus {
    AssetStatus::Unallocated
}

impl NodeSpec {
    pub fn into_node(self) -> (Node, AssetStatus) {
        let tag = self.tag.unwrap_or_else(|| self.name.clone());
        let mut node = Node::new(self.name, self.address, tag).with_monitor(self.state);
        node.cfg.group = self.group;
        (node, self.asset_status)
    }
}

/// All nodes known to the manager, keyed by name.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: HashMap<String, Node>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: Node) {
        self.nodes.insert(node.name.clone(), node);
    }

    pub fn get(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.nodes.get_mut(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Node)> {
        self.nodes.iter()
    }

    /// Nodes sorted by name
    pub fn sorted(&self) -> Vec<&Node> {
        let mut nodes: Vec<&Node> = self.nodes.values().collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn node(&self, name: &str) -> Result<&Node> {
        self.nodes
            .get(name)
            .ok_or_else(|| ClustermError::NodeNotFound(name.to_string()))
    }

    /// True when the node is discovered and its asset is commissioned.
    pub fn is_discovered_and_allocated(&self, name: &str, inventory: &dyn Inventory) -> Result<bool> {
        let node = self.node(name)?;
        if !node.is_discovered() {
            return Ok(false);
        }
        Ok(inventory.asset_status(name)? == AssetStatus::Commissioned)
    }

    pub fn is_master_node(&self, name: &str) -> Result<bool> {
        Ok(self.node(name)?.group() == Some(HostGroup::Master))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::MemInventory;

    #[test]
    fn node_spec_defaults() {
        let spec: NodeSpec = serde_json::from_str(r#"{"name":"n1","address":"10.0.0.1"}"#).unwrap();
        let (node, status) = spec.into_node();
        assert_eq!(node.tag(), "n1");
        assert_eq!(node.monitor, MonitorState::Discovered);
        assert_eq!(node.group(), None);
        assert_eq!(status, AssetStatus::Unallocated);
    }

    #[test]
    fn node_spec_full() {
        let spec: NodeSpec = serde_json::from_str(
            r#"{"name":"m1","address":"10.0.0.5","tag":"master-1","group":"service-master",
                "state":"discovered","asset_status":"commissioned"}"#,
        )
        .unwrap();
        let (node, status) = spec.into_node();
        assert_eq!(node.tag(), "master-1");
        assert_eq!(node.group(), Some(HostGroup::Master));
        assert_eq!(status, AssetStatus::Commissioned);
    }

    #[test]
    fn predicates() {
        let inv = MemInventory::new();
        let mut registry = NodeRegistry::new();
        registry.insert(Node::new("m1", "10.0.0.5", "master-1").with_group(HostGroup::Master));
        registry.insert(
            Node::new("gone", "10.0.0.9", "gone").with_monitor(MonitorState::Disappeared),
        );
        inv.add_asset("m1", AssetStatus::Commissioned);
        inv.add_asset("gone", AssetStatus::Commissioned);

        assert!(registry.is_discovered_and_allocated("m1", &inv).unwrap());
        assert!(!registry.is_discovered_and_allocated("gone", &inv).unwrap());
        assert!(registry.is_master_node("m1").unwrap());
        assert!(!registry.is_master_node("gone").unwrap());
        assert!(matches!(
            registry.is_master_node("ghost"),
            Err(ClustermError::NodeNotFound(_))
        ));
    }

    #[test]
    fn predicate_fails_without_asset() {
        let inv = MemInventory::new();
        let mut registry = NodeRegistry::new();
        registry.insert(Node::new("n1", "10.0.0.1", "n1"));

        assert!(matches!(
            registry.is_discovered_and_allocated("n1", &inv),
            Err(ClustermError::AssetNotFound(_))
        ));
    }
}
