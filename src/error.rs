use thiserror::Error;

use crate::inventory::AssetStatus;

/// Coarse classification of [`ClustermError`], used to pick API status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Conflict,
    Validation,
    Topology,
    StatusTransition,
    Configuration,
    Internal,
}

#[derive(Error, Debug)]
pub enum ClustermError {
    #[error("there is already an active job, please try in sometime. Job: {0}")]
    ActiveJob(String),

    #[error("invalid or empty host-group specified: {0:?}")]
    InvalidHostGroup(String),

    #[error("extra variables must be a JSON object: {0}")]
    InvalidExtraVars(String),

    #[error("no nodes specified for the event")]
    EmptyNodeSet,

    #[error("node {0:?} was specified more than once")]
    DuplicateNode(String),

    #[error("node with name {0:?} doesn't exist")]
    NodeNotFound(String),

    #[error("node {0:?} is not in discovered state")]
    NodeNotDiscovered(String),

    #[error("node name {0:?} cannot be used as an inventory host")]
    InvalidHostName(String),

    #[error(
        "cannot commission a worker node without existence of a master node in the cluster, \
         make sure at least one master node is commissioned"
    )]
    NoMasterNode,

    #[error("asset {0:?} not found in inventory")]
    AssetNotFound(String),

    #[error("asset {name:?} cannot move from {from} to {to}")]
    InvalidTransition {
        name: String,
        from: AssetStatus,
        to: AssetStatus,
    },

    #[error("configuration failed: {0}")]
    Configuration(String),

    #[error("job was cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClustermError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClustermError::ActiveJob(_) => ErrorKind::Conflict,
            ClustermError::InvalidHostGroup(_)
            | ClustermError::InvalidExtraVars(_)
            | ClustermError::EmptyNodeSet
            | ClustermError::DuplicateNode(_)
            | ClustermError::NodeNotFound(_)
            | ClustermError::NodeNotDiscovered(_)
            | ClustermError::InvalidHostName(_) => ErrorKind::Validation,
            ClustermError::NoMasterNode => ErrorKind::Topology,
            ClustermError::AssetNotFound(_) | ClustermError::InvalidTransition { .. } => {
                ErrorKind::StatusTransition
            }
            ClustermError::Configuration(_) | ClustermError::Cancelled => {
                ErrorKind::Configuration
            }
            ClustermError::Io(_) | ClustermError::Json(_) | ClustermError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ClustermError>;
