use serde::Serialize;

use crate::error::Result;
use crate::inventory::{AssetStatus, Inventory};

/// Result of a single asset update within a best-effort batch.
#[derive(Debug, Clone, Serialize)]
pub struct StatusOutcome {
    pub name: String,
    pub status: AssetStatus,
    pub error: Option<String>,
}

impl StatusOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Move every named asset to `to`, or none of them.
///
/// Assets are updated in order. On the first failure the assets already moved
/// are set back to `rollback` and the original error is returned. Rollback
/// failures are logged.
pub fn set_assets_status_atomic(
    inventory: &dyn Inventory,
    names: &[String],
    to: AssetStatus,
    rollback: AssetStatus,
) -> Result<()> {
    for (done, name) in names.iter().enumerate() {
        if let Err(e) = inventory.set_asset_status(name, to) {
            tracing::warn!(asset = %name, to = %to, error = %e, "Asset update failed, rolling back batch");
            for prev in &names[..done] {
                if let Err(re) = inventory.set_asset_status(prev, rollback) {
                    tracing::error!(
                        asset = %prev,
                        to = %rollback,
                        error = %re,
                        "Failed to roll back asset status"
                    );
                }
            }
            return Err(e);
        }
    }
    Ok(())
}

/// Move each named asset to `to` independently.
///
/// Failures don't stop the batch; every attempt is reported in the returned
/// outcomes (and failures are logged).
pub fn set_assets_status_best_effort(
    inventory: &dyn Inventory,
    names: &[String],
    to: AssetStatus,
) -> Vec<StatusOutcome> {
    names
        .iter()
        .map(|name| {
            let error = match inventory.set_asset_status(name, to) {
                Ok(()) => None,
                Err(e) => {
                    tracing::error!(asset = %name, to = %to, error = %e, "Failed to update asset status");
                    Some(e.to_string())
                }
            };
            StatusOutcome {
                name: name.clone(),
                status: to,
                error,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::MemInventory;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn atomic_moves_all_assets() {
        let inv = MemInventory::new();
        inv.add_asset("n1", AssetStatus::Unallocated);
        inv.add_asset("n2", AssetStatus::Unallocated);

        set_assets_status_atomic(
            &inv,
            &names(&["n1", "n2"]),
            AssetStatus::Provisioning,
            AssetStatus::Unallocated,
        )
        .unwrap();

        assert_eq!(inv.asset_status("n1").unwrap(), AssetStatus::Provisioning);
        assert_eq!(inv.asset_status("n2").unwrap(), AssetStatus::Provisioning);
    }

    #[test]
    fn atomic_rolls_back_on_partial_failure() {
        let inv = MemInventory::new();
        inv.add_asset("n1", AssetStatus::Unallocated);
        inv.add_asset("n2", AssetStatus::Unallocated);
        inv.add_asset("n3", AssetStatus::Commissioned);

        let result = set_assets_status_atomic(
            &inv,
            &names(&["n1", "n2", "n3"]),
            AssetStatus::Provisioning,
            AssetStatus::Unallocated,
        );

        assert!(result.is_err());
        assert_eq!(inv.asset_status("n1").unwrap(), AssetStatus::Unallocated);
        assert_eq!(inv.asset_status("n2").unwrap(), AssetStatus::Unallocated);
        assert_eq!(inv.asset_status("n3").unwrap(), AssetStatus::Commissioned);
    }

    #[test]
    fn best_effort_reports_each_outcome() {
        let inv = MemInventory::new();
        inv.add_asset("n1", AssetStatus::Provisioning);
        inv.add_asset("n2", AssetStatus::Unallocated);

        let outcomes =
            set_assets_status_best_effort(&inv, &names(&["n1", "n2", "n3"]), AssetStatus::Commissioned);

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].is_ok());
        assert!(!outcomes[1].is_ok());
        assert!(!outcomes[2].is_ok());
        assert_eq!(inv.asset_status("n1").unwrap(), AssetStatus::Commissioned);
        assert_eq!(inv.asset_status("n2").unwrap(), AssetStatus::Unallocated);
    }
}
