use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ClustermError, Result};

/// Host variable carrying the management address of the existing master.
pub const MASTER_ADDR_HOST_VAR: &str = "service_master_addr";
/// Host variable carrying the tag of the existing master.
pub const MASTER_NAME_HOST_VAR: &str = "service_master_name";

/// Topology role a node plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostGroup {
    #[serde(rename = "service-master")]
    Master,
    #[serde(rename = "service-worker")]
    Worker,
}

impl HostGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostGroup::Master => "service-master",
            HostGroup::Worker => "service-worker",
        }
    }
}

impl std::fmt::Display for HostGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HostGroup {
    type Err = ClustermError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "service-master" => Ok(HostGroup::Master),
            "service-worker" => Ok(HostGroup::Worker),
            other => Err(ClustermError::InvalidHostGroup(other.to_string())),
        }
    }
}

/// Check that a node name can stand as a bare host token in an INI
/// inventory line.
pub fn check_host_name(name: &str) -> Result<()> {
    let usable = !name.is_empty()
        && !name.chars().any(|c| {
            c.is_whitespace()
                || c.is_control()
                || matches!(c, '=' | '[' | ']' | '#' | ';' | '"' | '\\')
        });
    if usable {
        Ok(())
    } else {
        Err(ClustermError::InvalidHostName(name.to_string()))
    }
}

/// Narrow view of a host's configuration record.
///
/// Topology assignment only needs to read the tag and write the group and
/// variables, so it works against this trait rather than [`HostConfig`].
pub trait HostConfigurator {
    fn set_group(&mut self, group: HostGroup);
    fn set_var(&mut self, name: &str, value: &str);
    fn tag(&self) -> &str;
}

/// Per-host payload handed to the configuration engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    pub name: String,
    pub address: String,
    pub tag: String,
    pub group: Option<HostGroup>,
    pub vars: BTreeMap<String, String>,
}

impl HostConfig {
    pub fn new(name: impl Into<String>, address: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            tag: tag.into(),
            group: None,
            vars: BTreeMap::new(),
        }
    }

    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }
}

impl HostConfigurator for HostConfig {
    fn set_group(&mut self, group: HostGroup) {
        self.group = Some(group);
    }

    fn set_var(&mut self, name: &str, value: &str) {
        self.vars.insert(name.to_string(), value.to_string());
    }

    fn tag(&self) -> &str {
        &self.tag
    }
}
