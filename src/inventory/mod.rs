//! Asset status tracking for cluster nodes.
//!
//! Every write to a node's allocation state goes through this module, either
//! as an all-or-nothing batch ([`set_assets_status_atomic`]) or as a per-node
//! best-effort batch ([`set_assets_status_best_effort`]).

pub mod asset;
pub mod status;

pub use asset::{AssetStatus, Inventory, MemInventory};
pub use status::{set_assets_status_atomic, set_assets_status_best_effort, StatusOutcome};
