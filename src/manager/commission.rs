use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock};

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cluster::{HostConfig, HostConfigurator, HostGroup, Node};
use crate::error::{ClustermError, Result};
use crate::inventory::AssetStatus;
use crate::manager::Manager;
use crate::scheduler::job::BoxFuture;
use crate::scheduler::{JobLog, JobRunner, JobStatus, OnComplete, TopologyAssigner};
use crate::worker::{configure_or_cleanup, engine::parse_extra_vars};

/// Progress of a commission event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionState {
    Created,
    Validating,
    PreparingInventory,
    SettingProvisioning,
    Running,
    Committing,
    RollingBack,
    Done,
}

impl std::fmt::Display for CommissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CommissionState::Created => "created",
            CommissionState::Validating => "validating",
            CommissionState::PreparingInventory => "preparing_inventory",
            CommissionState::SettingProvisioning => "setting_provisioning",
            CommissionState::Running => "running",
            CommissionState::Committing => "committing",
            CommissionState::RollingBack => "rolling_back",
            CommissionState::Done => "done",
        };
        f.write_str(s)
    }
}

#[derive(Clone)]
struct StateCell(Arc<Mutex<CommissionState>>);

impl StateCell {
    fn get(&self) -> CommissionState {
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set(&self, state: CommissionState) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}

/// Brings a set of discovered nodes into the cluster.
///
/// `process` runs validation, topology assignment and the Provisioning
/// transition synchronously, then hands configuration to a background job.
/// The job's completion callback marks the nodes Commissioned, or returns
/// them to Unallocated when configuration failed.
pub struct CommissionEvent {
    mgr: Manager,
    node_names: Vec<String>,
    extra_vars: String,
    host_group: String,

    state: StateCell,
    hosts: Arc<OnceLock<Vec<HostConfig>>>,
    enodes: HashMap<String, Node>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Display for CommissionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "commissionEvent: {:?}", self.node_names)
    }
}

impl CommissionEvent {
    pub fn new(
        mgr: Manager,
        node_names: Vec<String>,
        extra_vars: impl Into<String>,
        host_group: impl Into<String>,
    ) -> Self {
        Self {
            mgr,
            node_names,
            extra_vars: extra_vars.into(),
            host_group: host_group.into(),
            state: StateCell(Arc::new(Mutex::new(CommissionState::Created))),
            hosts: Arc::new(OnceLock::new()),
            enodes: HashMap::new(),
            handle: None,
        }
    }

    pub fn state(&self) -> CommissionState {
        self.state.get()
    }

    /// Host configs handed to the engine, once prepared.
    pub fn hosts(&self) -> Option<&[HostConfig]> {
        self.hosts.get().map(Vec::as_slice)
    }

    /// Handle of the background configuration task, once launched.
    pub fn take_handle(&mut self) -> Option<JoinHandle<()>> {
        self.handle.take()
    }

    /// Accept or reject the commission request.
    ///
    /// Returns the job id once configuration has been launched. Any error
    /// after the gate was acquired resets the gate before returning.
    pub async fn process(&mut self) -> Result<Uuid> {
        let job_id = self.mgr.gate().check_and_set_active_job(
            self.to_string(),
            self.runner(),
            self.on_complete(),
        )?;

        match self.prepare_and_launch().await {
            Ok(()) => Ok(job_id),
            Err(e) => {
                tracing::warn!(event = %self, error = %e, "Commission request rejected");
                self.state.set(CommissionState::Done);
                self.mgr.gate().reset_active_job();
                Err(e)
            }
        }
    }

    async fn prepare_and_launch(&mut self) -> Result<()> {
        self.state.set(CommissionState::Validating);
        let group = self.event_validate().await?;

        self.state.set(CommissionState::PreparingInventory);
        self.prepare_inventory(group).await?;

        self.state.set(CommissionState::SettingProvisioning);
        self.mgr.set_assets_status_atomic(
            &self.node_names,
            AssetStatus::Provisioning,
            AssetStatus::Unallocated,
        )?;

        self.state.set(CommissionState::Running);
        match self.mgr.gate().run_active_job() {
            Ok(handle) => {
                tracing::info!(event = %self, group = %group, "Commission job launched");
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.mgr
                    .set_assets_status_best_effort(&self.node_names, AssetStatus::Unallocated);
                Err(e)
            }
        }
    }

    async fn event_validate(&mut self) -> Result<HostGroup> {
        let group: HostGroup = self.host_group.parse()?;
        parse_extra_vars(&self.extra_vars)?;

        let registry = self.mgr.nodes().read().await;
        self.enodes = self.mgr.common_event_validate(&registry, &self.node_names)?;
        Ok(group)
    }

    /// Assign the requested group to the event's nodes and point them at an
    /// existing master, if there is one.
    async fn prepare_inventory(&mut self, group: HostGroup) -> Result<()> {
        let excluded: HashSet<String> = self.enodes.keys().cloned().collect();
        let mut hosts: Vec<HostConfig> = self
            .node_names
            .iter()
            .filter_map(|name| self.enodes.get(name))
            .map(|node| node.cfg.clone())
            .collect();

        {
            let registry = self.mgr.nodes().read().await;
            TopologyAssigner::new(&registry, self.mgr.inventory().as_ref()).assign(
                group,
                &excluded,
                &mut hosts,
            )?;
        }

        self.hosts
            .set(hosts)
            .map_err(|_| ClustermError::Internal("event was already prepared".to_string()))
    }

    fn runner(&self) -> JobRunner {
        let engine = self.mgr.engine().clone();
        let hosts = self.hosts.clone();
        let extra_vars = self.extra_vars.clone();

        Box::new(
            move |cancel: CancellationToken, log: JobLog| -> BoxFuture<Result<()>> {
                Box::pin(async move {
                    let hosts = hosts.get().cloned().ok_or_else(|| {
                        ClustermError::Internal("commission hosts were not prepared".to_string())
                    })?;
                    configure_or_cleanup(engine.as_ref(), &hosts, &extra_vars, cancel, log).await
                })
            },
        )
    }

    fn on_complete(&self) -> OnComplete {
        let mgr = self.mgr.clone();
        let names = self.node_names.clone();
        let hosts = self.hosts.clone();
        let state = self.state.clone();

        Box::new(
            move |status: JobStatus, err: Option<ClustermError>| -> BoxFuture<()> {
                Box::pin(async move {
                    if status == JobStatus::Errored {
                        state.set(CommissionState::RollingBack);
                        let reason = err.map(|e| e.to_string()).unwrap_or_default();
                        tracing::error!(nodes = ?names, error = %reason, "Configuration job failed");
                        let outcomes =
                            mgr.set_assets_status_best_effort(&names, AssetStatus::Unallocated);
                        let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
                        if failed > 0 {
                            tracing::warn!(failed, "Some assets could not be set unallocated");
                        }
                        state.set(CommissionState::Done);
                        return;
                    }

                    state.set(CommissionState::Committing);
                    let outcomes =
                        mgr.set_assets_status_best_effort(&names, AssetStatus::Commissioned);

                    let commissioned: HashSet<&str> = outcomes
                        .iter()
                        .filter(|o| o.is_ok())
                        .map(|o| o.name.as_str())
                        .collect();
                    if let Some(hosts) = hosts.get() {
                        let mut registry = mgr.nodes().write().await;
                        for host in hosts {
                            if !commissioned.contains(host.name.as_str()) {
                                continue;
                            }
                            if let (Some(node), Some(group)) =
                                (registry.get_mut(&host.name), host.group)
                            {
                                node.cfg.set_group(group);
                            }
                        }
                    }

                    tracing::info!(
                        nodes = ?names,
                        committed = commissioned.len(),
                        "Commission job completed"
                    );
                    state.set(CommissionState::Done);
                })
            },
        )
    }
}
