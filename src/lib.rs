pub mod api;
pub mod cluster;
pub mod config;
pub mod error;
pub mod inventory;
pub mod manager;
pub mod scheduler;
pub mod shutdown;
pub mod worker;

pub use error::{ClustermError, Result};
pub use manager::{CommissionEvent, Manager};
