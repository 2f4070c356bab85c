use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;

use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cluster::{check_host_name, HostConfig};
use crate::config::EngineConfig;
use crate::error::{ClustermError, Result};

const OUTPUT_BUFFER: usize = 256;

pub type OutputStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Handle to one engine invocation.
///
/// `output` yields the engine's output lines and ends when the engine is done
/// writing. `cancel` stops the engine. `result` resolves once with the final
/// status.
pub struct EngineRun {
    pub output: OutputStream,
    pub cancel: CancellationToken,
    pub result: oneshot::Receiver<Result<()>>,
}

/// Producer side of an [`EngineRun`].
pub struct EngineRunSender {
    pub output: mpsc::Sender<String>,
    pub cancel: CancellationToken,
    pub result: oneshot::Sender<Result<()>>,
}

impl EngineRun {
    pub fn channel() -> (EngineRunSender, EngineRun) {
        let (output_tx, output_rx) = mpsc::channel(OUTPUT_BUFFER);
        let (result_tx, result_rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        (
            EngineRunSender {
                output: output_tx,
                cancel: cancel.clone(),
                result: result_tx,
            },
            EngineRun {
                output: Box::pin(ReceiverStream::new(output_rx)),
                cancel,
                result: result_rx,
            },
        )
    }
}

/// External automation system that applies provisioning steps to hosts.
pub trait ConfigurationEngine: Send + Sync {
    fn configure(&self, hosts: &[HostConfig], extra_vars: &str) -> EngineRun;

    fn cleanup(&self, hosts: &[HostConfig], extra_vars: &str) -> EngineRun;
}

/// Parse request extra variables. Empty input is an empty object.
pub fn parse_extra_vars(extra_vars: &str) -> Result<Map<String, Value>> {
    if extra_vars.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(extra_vars) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ClustermError::InvalidExtraVars(format!(
            "expected an object, got {}",
            other
        ))),
        Err(e) => Err(ClustermError::InvalidExtraVars(e.to_string())),
    }
}

/// Configured defaults overlaid with the request's variables.
pub fn merge_extra_vars(defaults: &Map<String, Value>, extra_vars: &str) -> Result<Map<String, Value>> {
    let mut merged = defaults.clone();
    merged.extend(parse_extra_vars(extra_vars)?);
    Ok(merged)
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Render hosts as an INI inventory, one section per host group. Fails on a
/// host name that would not parse back as a single host.
pub fn render_inventory(hosts: &[HostConfig]) -> Result<String> {
    let mut groups: BTreeMap<&str, Vec<&HostConfig>> = BTreeMap::new();
    for host in hosts {
        check_host_name(&host.name)?;
        let group = host.group.map(|g| g.as_str()).unwrap_or("ungrouped");
        groups.entry(group).or_default().push(host);
    }

    let mut out = String::new();
    for (group, hosts) in groups {
        out.push_str(&format!("[{}]\n", group));
        for host in hosts {
            out.push_str(&format!(
                "{} ansible_host={} node_name={} node_addr={}",
                host.name,
                quote(&host.address),
                quote(&host.name),
                quote(&host.address)
            ));
            for (name, value) in &host.vars {
                out.push_str(&format!(" {}={}", name, quote(value)));
            }
            out.push('\n');
        }
        out.push('\n');
    }
    Ok(out)
}

/// Runs playbooks with an Ansible-compatible command line.
#[derive(Debug, Clone)]
pub struct AnsibleEngine {
    config: EngineConfig,
}

impl AnsibleEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn args(&self, inventory: &Path, playbook: &Path, extra_vars: &Map<String, Value>) -> Vec<String> {
        let mut args = self.config.runner_args.clone();
        args.extend([
            "-i".to_string(),
            inventory.display().to_string(),
            "--user".to_string(),
            self.config.user.clone(),
        ]);
        if let Some(ref key) = self.config.private_key {
            args.push("--private-key".to_string());
            args.push(key.display().to_string());
        }
        args.push("--extra-vars".to_string());
        args.push(Value::Object(extra_vars.clone()).to_string());
        args.push(playbook.display().to_string());
        args
    }

    fn run_playbook(&self, playbook: PathBuf, hosts: &[HostConfig], extra_vars: &str) -> EngineRun {
        let (tx, run) = EngineRun::channel();
        let engine = self.clone();
        let inventory = render_inventory(hosts);
        let extra_vars = merge_extra_vars(&self.config.extra_vars, extra_vars);

        tokio::spawn(async move {
            let EngineRunSender {
                output,
                cancel,
                result,
            } = tx;
            let status = match (inventory, extra_vars) {
                (Ok(inventory), Ok(vars)) => {
                    engine.execute(&playbook, &inventory, &vars, output, cancel).await
                }
                (Err(e), _) | (_, Err(e)) => Err(e),
            };
            let _ = result.send(status);
        });

        run
    }

    async fn execute(
        &self,
        playbook: &Path,
        inventory: &str,
        extra_vars: &Map<String, Value>,
        output: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(ClustermError::Cancelled);
        }

        let inventory_path = self
            .config
            .work_dir
            .join(format!("clusterm-inventory-{}.ini", Uuid::new_v4()));
        tokio::fs::write(&inventory_path, inventory).await?;

        let result = self
            .spawn_and_wait(playbook, &inventory_path, extra_vars, output, cancel)
            .await;

        if let Err(e) = tokio::fs::remove_file(&inventory_path).await {
            tracing::warn!(path = %inventory_path.display(), error = %e, "Failed to remove inventory file");
        }
        result
    }

    async fn spawn_and_wait(
        &self,
        playbook: &Path,
        inventory_path: &Path,
        extra_vars: &Map<String, Value>,
        output: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let args = self.args(inventory_path, playbook, extra_vars);
        tracing::info!(runner = %self.config.runner, playbook = %playbook.display(), "Running playbook");

        let mut child = Command::new(&self.config.runner)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ClustermError::Configuration(format!("failed to start {}: {}", self.config.runner, e))
            })?;

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_lines(stdout, output.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_lines(stderr, output.clone())));
        }
        drop(output);

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancel.cancelled() => {
                tracing::warn!(playbook = %playbook.display(), "Playbook cancelled, killing runner");
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "Failed to kill playbook runner");
                }
                for reader in readers {
                    reader.abort();
                }
                return Err(ClustermError::Cancelled);
            }
        };

        for reader in readers {
            let _ = reader.await;
        }

        if status.success() {
            Ok(())
        } else {
            Err(ClustermError::Configuration(format!(
                "{} exited with {}",
                playbook.display(),
                status
                    .code()
                    .map(|c| format!("code {}", c))
                    .unwrap_or_else(|| "a signal".to_string())
            )))
        }
    }
}

async fn forward_lines<R>(reader: R, output: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if output.send(line).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read playbook output");
                break;
            }
        }
    }
}

impl ConfigurationEngine for AnsibleEngine {
    fn configure(&self, hosts: &[HostConfig], extra_vars: &str) -> EngineRun {
        self.run_playbook(self.config.configure_playbook_path(), hosts, extra_vars)
    }

    fn cleanup(&self, hosts: &[HostConfig], extra_vars: &str) -> EngineRun {
        self.run_playbook(self.config.cleanup_playbook_path(), hosts, extra_vars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{HostConfigurator, HostGroup, MASTER_ADDR_HOST_VAR};
    use serde_json::json;

    #[test]
    fn parse_extra_vars_accepts_empty_and_objects() {
        assert!(parse_extra_vars("").unwrap().is_empty());
        assert!(parse_extra_vars("  ").unwrap().is_empty());
        let vars = parse_extra_vars(r#"{"env":"prod"}"#).unwrap();
        assert_eq!(vars.get("env"), Some(&json!("prod")));
    }

    #[test]
    fn parse_extra_vars_rejects_non_objects() {
        assert!(matches!(
            parse_extra_vars("[1,2]"),
            Err(ClustermError::InvalidExtraVars(_))
        ));
        assert!(matches!(
            parse_extra_vars("{not json"),
            Err(ClustermError::InvalidExtraVars(_))
        ));
    }

    #[test]
    fn request_vars_override_defaults() {
        let mut defaults = Map::new();
        defaults.insert("env".to_string(), json!("dev"));
        defaults.insert("region".to_string(), json!("us"));

        let merged = merge_extra_vars(&defaults, r#"{"env":"prod"}"#).unwrap();
        assert_eq!(merged.get("env"), Some(&json!("prod")));
        assert_eq!(merged.get("region"), Some(&json!("us")));
    }

    #[test]
    fn inventory_groups_hosts() {
        let mut master = HostConfig::new("m1", "10.0.0.5", "master-1");
        master.set_group(HostGroup::Master);
        let mut worker = HostConfig::new("n1", "10.0.1.1", "n1");
        worker.set_group(HostGroup::Worker);
        worker.set_var(MASTER_ADDR_HOST_VAR, "10.0.0.5");

        let rendered = render_inventory(&[worker, master]).unwrap();
        let master_idx = rendered.find("[service-master]").unwrap();
        let worker_idx = rendered.find("[service-worker]").unwrap();
        assert!(master_idx < worker_idx);
        assert!(rendered.contains(
            "n1 ansible_host=\"10.0.1.1\" node_name=\"n1\" node_addr=\"10.0.1.1\" service_master_addr=\"10.0.0.5\""
        ));
    }

    #[test]
    fn inventory_rejects_names_that_split_the_line() {
        let good = HostConfig::new("n1", "10.0.1.1", "n1");
        let bad = HostConfig::new("n2 ansible_host=10.9.9.9", "10.0.1.2", "n2");
        assert!(matches!(
            render_inventory(&[good, bad]),
            Err(ClustermError::InvalidHostName(_))
        ));
    }

    #[test]
    fn runner_args_come_first() {
        let engine = AnsibleEngine::new(EngineConfig {
            runner: "/bin/sh".to_string(),
            runner_args: vec!["/opt/wrap.sh".to_string()],
            ..EngineConfig::default()
        });
        let args = engine.args(Path::new("/tmp/inv.ini"), Path::new("site.yml"), &Map::new());
        assert_eq!(args[0], "/opt/wrap.sh");
        assert_eq!(args[1], "-i");
        assert_eq!(args.last().map(String::as_str), Some("site.yml"));
    }

    #[test]
    fn ansible_args() {
        let engine = AnsibleEngine::new(EngineConfig {
            private_key: Some(PathBuf::from("/keys/id_rsa")),
            ..EngineConfig::default()
        });
        let args = engine.args(
            Path::new("/tmp/inv.ini"),
            Path::new("/etc/clusterm/ansible/site.yml"),
            &Map::new(),
        );
        assert_eq!(
            args,
            vec![
                "-i",
                "/tmp/inv.ini",
                "--user",
                "cluster-admin",
                "--private-key",
                "/keys/id_rsa",
                "--extra-vars",
                "{}",
                "/etc/clusterm/ansible/site.yml",
            ]
        );
    }
}
