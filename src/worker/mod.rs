//! Configuration engine and the execution protocol around it.
//!
//! # Components
//!
//! - [`ConfigurationEngine`]: contract for the external automation system
//! - [`AnsibleEngine`]: runs playbooks through an Ansible-compatible runner
//! - [`configure_or_cleanup`]: configures hosts and runs cleanup on failure
//!
//! # Execution Flow
//!
//! 1. [`ConfigurationEngine::configure`] returns an [`EngineRun`]
//! 2. Output lines are streamed into the job log until the engine finishes
//! 3. On failure [`ConfigurationEngine::cleanup`] runs against the same hosts
//! 4. The configuration error (never the cleanup error) is returned

pub mod engine;
pub mod executor;

pub use engine::{AnsibleEngine, ConfigurationEngine, EngineRun, EngineRunSender};
pub use executor::{configure_or_cleanup, log_output_and_return_status};
