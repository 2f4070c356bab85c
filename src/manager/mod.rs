//! Cluster manager: owns the node registry, asset inventory, configuration
//! engine and active job gate, and runs workflow events against them.

pub mod commission;

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::cluster::{check_host_name, HostGroup, MonitorState, Node, NodeRegistry, NodeSpec};
use crate::config::ManagerConfig;
use crate::error::{ClustermError, Result};
use crate::inventory::{
    set_assets_status_atomic, set_assets_status_best_effort, AssetStatus, Inventory,
    MemInventory, StatusOutcome,
};
use crate::scheduler::ActiveJobGate;
use crate::worker::{AnsibleEngine, ConfigurationEngine};

pub use commission::{CommissionEvent, CommissionState};

/// Node view for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    pub name: String,
    pub address: String,
    pub tag: String,
    pub group: Option<HostGroup>,
    pub monitor: MonitorState,
    pub asset_status: Option<AssetStatus>,
}

/// Shared handle to the cluster state. Clones share everything.
#[derive(Clone)]
pub struct Manager {
    config: ManagerConfig,
    nodes: Arc<RwLock<NodeRegistry>>,
    inventory: Arc<dyn Inventory>,
    engine: Arc<dyn ConfigurationEngine>,
    gate: ActiveJobGate,
}

impl Manager {
    pub fn new(
        config: ManagerConfig,
        inventory: Arc<dyn Inventory>,
        engine: Arc<dyn ConfigurationEngine>,
    ) -> Self {
        let gate = ActiveJobGate::new().with_max_log_lines(config.max_job_log_lines);
        Self {
            config,
            nodes: Arc::new(RwLock::new(NodeRegistry::new())),
            inventory,
            engine,
            gate,
        }
    }

    /// Replace the job gate, e.g. with one using a fixed clock.
    pub fn with_gate(mut self, gate: ActiveJobGate) -> Self {
        self.gate = gate;
        self
    }

    /// Build a manager with an in-memory inventory and the playbook engine,
    /// seeded from `config.nodes_file` when set.
    pub async fn from_config(config: ManagerConfig) -> Result<Self> {
        let inventory = Arc::new(MemInventory::new());
        let specs = match &config.nodes_file {
            Some(path) => load_node_specs(path).await?,
            None => Vec::new(),
        };

        let mut registry = NodeRegistry::new();
        for spec in specs {
            let (node, status) = spec.into_node();
            inventory.add_asset(node.name.clone(), status);
            registry.insert(node);
        }
        tracing::info!(nodes = registry.len(), "Node registry loaded");

        let engine = Arc::new(AnsibleEngine::new(config.engine.clone()));
        let manager = Self::new(config, inventory, engine);
        *manager.nodes.write().await = registry;
        Ok(manager)
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn nodes(&self) -> &Arc<RwLock<NodeRegistry>> {
        &self.nodes
    }

    pub fn inventory(&self) -> &Arc<dyn Inventory> {
        &self.inventory
    }

    pub fn engine(&self) -> &Arc<dyn ConfigurationEngine> {
        &self.engine
    }

    pub fn gate(&self) -> &ActiveJobGate {
        &self.gate
    }

    pub async fn add_node(&self, node: Node) {
        self.nodes.write().await.insert(node);
    }

    /// Resolve `names` to nodes eligible for a workflow event.
    ///
    /// The set must be non-empty and free of duplicates, and every node must
    /// exist and be in discovered state.
    pub fn common_event_validate(
        &self,
        registry: &NodeRegistry,
        names: &[String],
    ) -> Result<HashMap<String, Node>> {
        if names.is_empty() {
            return Err(ClustermError::EmptyNodeSet);
        }

        let mut seen = HashSet::new();
        let mut nodes = HashMap::with_capacity(names.len());
        for name in names {
            if !seen.insert(name.as_str()) {
                return Err(ClustermError::DuplicateNode(name.clone()));
            }
            let node = registry
                .get(name)
                .ok_or_else(|| ClustermError::NodeNotFound(name.clone()))?;
            if !node.is_discovered() {
                return Err(ClustermError::NodeNotDiscovered(name.clone()));
            }
            check_host_name(name)?;
            nodes.insert(name.clone(), node.clone());
        }
        Ok(nodes)
    }

    pub fn set_assets_status_atomic(
        &self,
        names: &[String],
        to: AssetStatus,
        rollback: AssetStatus,
    ) -> Result<()> {
        set_assets_status_atomic(self.inventory.as_ref(), names, to, rollback)
    }

    pub fn set_assets_status_best_effort(
        &self,
        names: &[String],
        to: AssetStatus,
    ) -> Vec<StatusOutcome> {
        set_assets_status_best_effort(self.inventory.as_ref(), names, to)
    }

    /// Start commissioning `names` into `host_group`. Returns the job id once
    /// the job is accepted; configuration continues in the background.
    pub async fn commission(
        &self,
        names: Vec<String>,
        extra_vars: impl Into<String>,
        host_group: impl Into<String>,
    ) -> Result<Uuid> {
        let mut event = CommissionEvent::new(self.clone(), names, extra_vars, host_group);
        event.process().await
    }

    pub async fn node_summaries(&self) -> Vec<NodeSummary> {
        let registry = self.nodes.read().await;
        registry
            .sorted()
            .into_iter()
            .map(|node| NodeSummary {
                name: node.name.clone(),
                address: node.mgmt_address().to_string(),
                tag: node.tag().to_string(),
                group: node.group(),
                monitor: node.monitor,
                asset_status: self.inventory.asset_status(&node.name).ok(),
            })
            .collect()
    }
}

/// Read the JSON node seed file (an array of [`NodeSpec`]).
pub async fn load_node_specs(path: &Path) -> Result<Vec<NodeSpec>> {
    let data = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&data)?)
}
