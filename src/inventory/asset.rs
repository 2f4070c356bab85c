use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{ClustermError, Result};

/// Allocation lifecycle of a node's asset record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetStatus {
    Unallocated,
    Provisioning,
    Commissioned,
    Errored,
}

impl AssetStatus {
    /// Whether the inventory accepts a move from `self` to `to`.
    pub fn can_transition_to(self, to: AssetStatus) -> bool {
        matches!(
            (self, to),
            (AssetStatus::Unallocated, AssetStatus::Provisioning)
                | (AssetStatus::Provisioning, AssetStatus::Commissioned)
                | (AssetStatus::Provisioning, AssetStatus::Unallocated)
        )
    }
}

impl std::fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssetStatus::Unallocated => write!(f, "unallocated"),
            AssetStatus::Provisioning => write!(f, "provisioning"),
            AssetStatus::Commissioned => write!(f, "commissioned"),
            AssetStatus::Errored => write!(f, "errored"),
        }
    }
}

/// Asset tracking backend.
///
/// Implementations must reject illegal transitions with
/// [`ClustermError::InvalidTransition`] and leave the asset untouched.
pub trait Inventory: Send + Sync {
    fn asset_status(&self, name: &str) -> Result<AssetStatus>;

    fn set_asset_status(&self, name: &str, to: AssetStatus) -> Result<()>;

    fn set_asset_unallocated(&self, name: &str) -> Result<()> {
        self.set_asset_status(name, AssetStatus::Unallocated)
    }

    fn set_asset_provisioning(&self, name: &str) -> Result<()> {
        self.set_asset_status(name, AssetStatus::Provisioning)
    }

    fn set_asset_commissioned(&self, name: &str) -> Result<()> {
        self.set_asset_status(name, AssetStatus::Commissioned)
    }
}

/// In-memory inventory keyed by node name.
#[derive(Debug, Default)]
pub struct MemInventory {
    assets: Mutex<HashMap<String, AssetStatus>>,
}

impl MemInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an asset (or overwrite its status) without transition checks.
    pub fn add_asset(&self, name: impl Into<String>, status: AssetStatus) {
        let mut assets = self.assets.lock().unwrap_or_else(|e| e.into_inner());
        assets.insert(name.into(), status);
    }

    /// Snapshot of every asset and its status.
    pub fn assets(&self) -> HashMap<String, AssetStatus> {
        self.assets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Inventory for MemInventory {
    fn asset_status(&self, name: &str) -> Result<AssetStatus> {
        let assets = self.assets.lock().unwrap_or_else(|e| e.into_inner());
        assets
            .get(name)
            .copied()
            .ok_or_else(|| ClustermError::AssetNotFound(name.to_string()))
    }

    fn set_asset_status(&self, name: &str, to: AssetStatus) -> Result<()> {
        let mut assets = self.assets.lock().unwrap_or_else(|e| e.into_inner());
        let current = assets
            .get_mut(name)
            .ok_or_else(|| ClustermError::AssetNotFound(name.to_string()))?;
        if !current.can_transition_to(to) {
            return Err(ClustermError::InvalidTransition {
                name: name.to_string(),
                from: *current,
                to,
            });
        }
        tracing::debug!(asset = name, from = %current, to = %to, "Asset status changed");
        *current = to;
        Ok(())
    }
}
