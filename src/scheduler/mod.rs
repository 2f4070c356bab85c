pub mod assigner;
pub mod gate;
pub mod job;

pub use assigner::{MasterIdentity, TopologyAssigner};
pub use gate::ActiveJobGate;
pub use job::{JobInfo, JobLog, JobRunner, JobStatus, OnComplete};
