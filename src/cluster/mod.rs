pub mod host;
pub mod node;

pub use host::{
    check_host_name, HostConfig, HostConfigurator, HostGroup, MASTER_ADDR_HOST_VAR,
    MASTER_NAME_HOST_VAR,
};
pub use node::{MonitorState, Node, NodeRegistry, NodeSpec};
