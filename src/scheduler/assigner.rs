use std::collections::HashSet;

use serde::Serialize;

use crate::cluster::{
    HostConfigurator, HostGroup, NodeRegistry, MASTER_ADDR_HOST_VAR, MASTER_NAME_HOST_VAR,
};
use crate::error::{ClustermError, Result};
use crate::inventory::Inventory;

/// Address and tag of an already commissioned master node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MasterIdentity {
    pub node: String,
    pub address: String,
    pub name: String,
}

/// Decides the host group and master variables for nodes being commissioned.
///
/// Reads registry and inventory state without extra locking; callers must
/// hold the active job gate so no other job mutates either concurrently.
pub struct TopologyAssigner<'a> {
    registry: &'a NodeRegistry,
    inventory: &'a dyn Inventory,
}

impl<'a> TopologyAssigner<'a> {
    pub fn new(registry: &'a NodeRegistry, inventory: &'a dyn Inventory) -> Self {
        Self {
            registry,
            inventory,
        }
    }

    /// First node outside `excluded` that is discovered, allocated, and in the
    /// master group.
    ///
    /// Registry iteration order is unspecified, so when several masters exist
    /// any one of them may be returned.
    pub fn find_master(&self, excluded: &HashSet<String>) -> Option<MasterIdentity> {
        for (name, node) in self.registry.iter() {
            if excluded.contains(name) {
                continue;
            }

            match self.registry.is_discovered_and_allocated(name, self.inventory) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    tracing::debug!(node = %name, error = %e, "A node check failed");
                    continue;
                }
            }

            match self.registry.is_master_node(name) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    tracing::debug!(node = %name, error = %e, "A node check failed");
                    continue;
                }
            }

            return Some(MasterIdentity {
                node: name.clone(),
                address: node.mgmt_address().to_string(),
                name: node.tag().to_string(),
            });
        }
        None
    }

    /// Assign `group` and the master variables to every host.
    ///
    /// Fails with [`ClustermError::NoMasterNode`] when a worker is requested
    /// and no master exists; hosts are left untouched in that case. A master
    /// request with no existing master proceeds with empty master variables.
    pub fn assign<H: HostConfigurator>(
        &self,
        group: HostGroup,
        excluded: &HashSet<String>,
        hosts: &mut [H],
    ) -> Result<Option<MasterIdentity>> {
        let master = self.find_master(excluded);
        if master.is_none() && group == HostGroup::Worker {
            return Err(ClustermError::NoMasterNode);
        }

        let (addr, name) = master
            .as_ref()
            .map(|m| (m.address.as_str(), m.name.as_str()))
            .unwrap_or(("", ""));
        for host in hosts.iter_mut() {
            host.set_group(group);
            host.set_var(MASTER_ADDR_HOST_VAR, addr);
            host.set_var(MASTER_NAME_HOST_VAR, name);
        }

        match &master {
            Some(m) => tracing::info!(
                group = %group,
                hosts = hosts.len(),
                master = %m.node,
                master_addr = %m.address,
                "Assigned hosts to existing master"
            ),
            None => tracing::info!(group = %group, hosts = hosts.len(), "No master found, hosts form the first master group"),
        }

        Ok(master)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{HostConfig, MonitorState, Node};
    use crate::inventory::{AssetStatus, MemInventory};

    fn cluster() -> (NodeRegistry, MemInventory) {
        let mut registry = NodeRegistry::new();
        let inv = MemInventory::new();
        for name in ["n1", "n2"] {
            registry.insert(Node::new(name, format!("10.0.1.{}", &name[1..]), name));
            inv.add_asset(name, AssetStatus::Unallocated);
        }
        (registry, inv)
    }

    fn targets() -> HashSet<String> {
        ["n1", "n2"].iter().map(|s| s.to_string()).collect()
    }

    fn hosts() -> Vec<HostConfig> {
        vec![
            HostConfig::new("n1", "10.0.1.1", "n1"),
            HostConfig::new("n2", "10.0.1.2", "n2"),
        ]
    }

    #[test]
    fn worker_joins_existing_master() {
        let (mut registry, inv) = cluster();
        registry.insert(Node::new("m1", "10.0.0.5", "master-1").with_group(HostGroup::Master));
        inv.add_asset("m1", AssetStatus::Commissioned);

        let mut hosts = hosts();
        let master = TopologyAssigner::new(&registry, &inv)
            .assign(HostGroup::Worker, &targets(), &mut hosts)
            .unwrap()
            .unwrap();

        assert_eq!(master.node, "m1");
        for host in &hosts {
            assert_eq!(host.group, Some(HostGroup::Worker));
            assert_eq!(host.var(MASTER_ADDR_HOST_VAR), Some("10.0.0.5"));
            assert_eq!(host.var(MASTER_NAME_HOST_VAR), Some("master-1"));
        }
    }

    #[test]
    fn worker_without_master_fails() {
        let (registry, inv) = cluster();
        let mut hosts = hosts();

        let err = TopologyAssigner::new(&registry, &inv)
            .assign(HostGroup::Worker, &targets(), &mut hosts)
            .unwrap_err();

        assert!(matches!(err, ClustermError::NoMasterNode));
        assert!(hosts.iter().all(|h| h.group.is_none() && h.vars.is_empty()));
    }

    #[test]
    fn first_master_gets_empty_master_vars() {
        let (registry, inv) = cluster();
        let mut hosts = hosts();

        let master = TopologyAssigner::new(&registry, &inv)
            .assign(HostGroup::Master, &targets(), &mut hosts)
            .unwrap();

        assert!(master.is_none());
        for host in &hosts {
            assert_eq!(host.group, Some(HostGroup::Master));
            assert_eq!(host.var(MASTER_ADDR_HOST_VAR), Some(""));
            assert_eq!(host.var(MASTER_NAME_HOST_VAR), Some(""));
        }
    }

    #[test]
    fn ineligible_masters_are_skipped() {
        let (mut registry, inv) = cluster();
        // Master group but not commissioned.
        registry.insert(Node::new("m1", "10.0.0.5", "m1").with_group(HostGroup::Master));
        inv.add_asset("m1", AssetStatus::Provisioning);
        // Commissioned master that disappeared.
        registry.insert(
            Node::new("m2", "10.0.0.6", "m2")
                .with_group(HostGroup::Master)
                .with_monitor(MonitorState::Disappeared),
        );
        inv.add_asset("m2", AssetStatus::Commissioned);
        // Commissioned worker.
        registry.insert(Node::new("w1", "10.0.0.7", "w1").with_group(HostGroup::Worker));
        inv.add_asset("w1", AssetStatus::Commissioned);
        // Master with no asset record: the predicate errors and is skipped.
        registry.insert(Node::new("m3", "10.0.0.8", "m3").with_group(HostGroup::Master));

        let assigner = TopologyAssigner::new(&registry, &inv);
        assert!(assigner.find_master(&targets()).is_none());
    }

    #[test]
    fn nodes_being_commissioned_are_not_masters() {
        let (mut registry, inv) = cluster();
        registry.insert(Node::new("n3", "10.0.1.3", "n3").with_group(HostGroup::Master));
        inv.add_asset("n3", AssetStatus::Commissioned);

        let mut excluded = targets();
        excluded.insert("n3".to_string());
        assert!(TopologyAssigner::new(&registry, &inv)
            .find_master(&excluded)
            .is_none());
    }

    #[test]
    fn one_of_several_masters_is_used() {
        let (mut registry, inv) = cluster();
        for (name, addr) in [("m1", "10.0.0.5"), ("m2", "10.0.0.6")] {
            registry.insert(Node::new(name, addr, name).with_group(HostGroup::Master));
            inv.add_asset(name, AssetStatus::Commissioned);
        }

        let master = TopologyAssigner::new(&registry, &inv)
            .find_master(&targets())
            .unwrap();
        assert!(master.node == "m1" || master.node == "m2");
    }
}
