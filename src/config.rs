use std::net::SocketAddr;
use std::path::PathBuf;

use serde_json::{Map, Value};

/// Configuration for the playbook-based configuration engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Program that runs playbooks (e.g. "ansible-playbook")
    pub runner: String,
    /// Arguments placed before the generated ones (e.g. a wrapper script)
    pub runner_args: Vec<String>,
    /// Directory holding the playbooks
    pub playbook_dir: PathBuf,
    /// Playbook run to configure hosts
    pub configure_playbook: String,
    /// Playbook run against the same hosts when configuration fails
    pub cleanup_playbook: String,
    /// Remote user for host connections
    pub user: String,
    /// SSH private key for host connections
    pub private_key: Option<PathBuf>,
    /// Variables passed to every run; request variables take precedence
    pub extra_vars: Map<String, Value>,
    /// Where generated inventory files are written
    pub work_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            runner: "ansible-playbook".to_string(),
            runner_args: Vec::new(),
            playbook_dir: PathBuf::from("/etc/clusterm/ansible"),
            configure_playbook: "site.yml".to_string(),
            cleanup_playbook: "cleanup.yml".to_string(),
            user: "cluster-admin".to_string(),
            private_key: None,
            extra_vars: Map::new(),
            work_dir: std::env::temp_dir(),
        }
    }
}

impl EngineConfig {
    pub fn configure_playbook_path(&self) -> PathBuf {
        self.playbook_dir.join(&self.configure_playbook)
    }

    pub fn cleanup_playbook_path(&self) -> PathBuf {
        self.playbook_dir.join(&self.cleanup_playbook)
    }
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub listen_addr: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "127.0.0.1:9007"
                .parse()
                .expect("default listen address is valid"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub engine: EngineConfig,
    pub api: ApiConfig,
    /// JSON file listing the nodes known at startup
    pub nodes_file: Option<PathBuf>,
    /// Log lines retained per job
    pub max_job_log_lines: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            api: ApiConfig::default(),
            nodes_file: None,
            max_job_log_lines: 10_000,
        }
    }
}

impl ManagerConfig {
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_nodes_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.nodes_file = Some(path.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_default() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.runner, "ansible-playbook");
        assert!(cfg.runner_args.is_empty());
        assert_eq!(cfg.configure_playbook, "site.yml");
        assert_eq!(cfg.cleanup_playbook, "cleanup.yml");
        assert!(cfg.private_key.is_none());
        assert!(cfg.extra_vars.is_empty());
    }

    #[test]
    fn engine_config_playbook_paths() {
        let cfg = EngineConfig {
            playbook_dir: PathBuf::from("/opt/playbooks"),
            ..EngineConfig::default()
        };
        assert_eq!(
            cfg.configure_playbook_path(),
            PathBuf::from("/opt/playbooks/site.yml")
        );
        assert_eq!(
            cfg.cleanup_playbook_path(),
            PathBuf::from("/opt/playbooks/cleanup.yml")
        );
    }

    #[test]
    fn manager_config_default() {
        let cfg = ManagerConfig::default();
        assert_eq!(cfg.api.listen_addr.to_string(), "127.0.0.1:9007");
        assert!(cfg.nodes_file.is_none());
        assert_eq!(cfg.max_job_log_lines, 10_000);
    }

    #[test]
    fn manager_config_builders() {
        let cfg = ManagerConfig::default()
            .with_nodes_file("/etc/clusterm/nodes.json")
            .with_engine(EngineConfig {
                user: "ops".to_string(),
                ..EngineConfig::default()
            });
        assert_eq!(
            cfg.nodes_file,
            Some(PathBuf::from("/etc/clusterm/nodes.json"))
        );
        assert_eq!(cfg.engine.user, "ops");
    }
}
