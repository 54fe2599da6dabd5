//! Cluster lifecycle: deterministic tear-down-then-bring-up.
//!
//! Bring-up takes the cluster from "unknown prior state" to "ready to
//! serve" in a fixed, totally ordered sequence; tear-down is the
//! idempotent kill step alone. The sequence is built as a list of
//! [`Step`]s first and executed second, so the ordering invariants
//! (bootstrap exactly once, before any other consensus node; service
//! start last) can be checked without a live fleet.
//!
//! The external service exposes no readiness signal, so each
//! state-changing step is followed by an explicit settle delay, a
//! bounded wait rather than a race to be fixed.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;

use crate::command::RemoteOp;
use crate::config::HarnessConfig;
use crate::hosts::ClusterConfig;
use crate::ssh::{Session, SshError};
use crate::workload::binary_name;

/// Errors from cluster lifecycle operations.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// SSH transport failure.
    #[error("ssh error: {0}")]
    Ssh(#[from] SshError),

    /// A gating bring-up step failed; later steps depend on its side
    /// effect, so the run aborts.
    #[error("bring-up step {step:?} failed on {host}: {detail}")]
    StepFailed {
        /// Step description.
        step: &'static str,
        /// Host the step ran on.
        host: String,
        /// Failure detail.
        detail: String,
    },

    /// A step referenced a host with no open session.
    #[error("no session for host {0}")]
    NoSession(String),
}

/// How a step's remote command runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    /// Run to completion over the channel.
    Blocking,
    /// Fork detached on the remote host, output to the step's log file.
    Detached,
}

/// One planned lifecycle action on one host.
#[derive(Debug, Clone)]
pub struct Step {
    /// Short description, used in errors and logs.
    pub what: &'static str,
    /// Target host name.
    pub host: String,
    /// The remote operation.
    pub op: RemoteOp,
    /// Blocking or detached execution.
    pub mode: StepMode,
    /// Log file for detached output.
    pub log: Option<String>,
    /// Settle delay after the step, in seconds.
    pub settle_secs: u64,
    /// Whether nonzero exit aborts the run. Kill/cleanup steps are
    /// idempotent and never gate.
    pub gating: bool,
}

/// Sequences cluster bring-up and tear-down over open sessions.
pub struct ClusterOrchestrator<'a> {
    config: &'a HarnessConfig,
}

impl<'a> ClusterOrchestrator<'a> {
    /// Build an orchestrator over the harness configuration.
    pub fn new(config: &'a HarnessConfig) -> Self {
        Self { config }
    }

    /// Plan the kill step: force-terminate all three service binaries on
    /// every server host, ascending ordinal order.
    pub fn teardown_plan(&self, cluster: &ClusterConfig) -> Vec<Step> {
        let binaries = [
            &self.config.binaries.consensus,
            &self.config.binaries.replicated_server,
            &self.config.binaries.standalone_server,
        ];
        let mut steps = Vec::new();
        for host in &cluster.servers {
            for binary in binaries {
                steps.push(Step {
                    what: "kill",
                    host: host.name.clone(),
                    op: RemoteOp::KillProcess {
                        binary: binary_name(binary),
                    },
                    mode: StepMode::Blocking,
                    log: None,
                    settle_secs: 0,
                    gating: false,
                });
            }
        }
        steps
    }

    /// Plan the full bring-up sequence for one run.
    pub fn bringup_plan(&self, cluster: &ClusterConfig, run_index: usize) -> Vec<Step> {
        let timing = &self.config.timing;
        let paths = &self.config.paths;
        let mut steps = self.teardown_plan(cluster);

        // Storage volume is shared; the highest ordinal cleans for all,
        // and only while nothing is running against it.
        let mut clean_paths = vec![paths.storage_dir.clone()];
        clean_paths.extend(paths.artifact_globs.iter().cloned());
        steps.push(Step {
            what: "clean storage",
            host: cluster.storage_host().name.clone(),
            op: RemoteOp::CleanStorage { paths: clean_paths },
            mode: StepMode::Blocking,
            log: None,
            settle_secs: 0,
            gating: true,
        });

        if cluster.fault_tolerant() {
            // Any other host starting first would have no group to join.
            let bootstrap = cluster.bootstrap_host();
            steps.push(Step {
                what: "bootstrap consensus",
                host: bootstrap.name.clone(),
                op: RemoteOp::BootstrapConsensus {
                    binary: self.config.binaries.consensus.clone(),
                    config_path: paths.consensus_config.clone(),
                },
                mode: StepMode::Detached,
                log: Some(consensus_log(paths, bootstrap.ordinal, run_index)),
                settle_secs: timing.bootstrap_settle_secs,
                gating: true,
            });

            for host in cluster.servers.iter().skip(1) {
                steps.push(Step {
                    what: "start consensus",
                    host: host.name.clone(),
                    op: RemoteOp::StartConsensus {
                        binary: self.config.binaries.consensus.clone(),
                        config_path: paths.consensus_config.clone(),
                    },
                    mode: StepMode::Detached,
                    log: Some(consensus_log(paths, host.ordinal, run_index)),
                    settle_secs: 0,
                    gating: true,
                });
            }
            if let Some(last) = steps.last_mut() {
                last.settle_secs = timing.node_settle_secs;
            }

            // Converts the bootstrap singleton into a fault-tolerant group.
            // Executed from a client host.
            steps.push(Step {
                what: "reconfigure membership",
                host: reconfigure_host(self.config),
                op: RemoteOp::Reconfigure {
                    tool: self.config.binaries.reconfigure.clone(),
                    membership: cluster.membership.clone(),
                },
                mode: StepMode::Blocking,
                log: None,
                settle_secs: timing.reconfigure_settle_secs,
                gating: true,
            });

            steps.push(Step {
                what: "start replicated service",
                host: cluster.storage_host().name.clone(),
                op: RemoteOp::StartReplicated {
                    binary: self.config.binaries.replicated_server.clone(),
                },
                mode: StepMode::Detached,
                log: Some(service_log(paths, run_index)),
                settle_secs: timing.service_settle_secs,
                gating: true,
            });
        } else {
            steps.push(Step {
                what: "start standalone service",
                host: cluster.servers[0].name.clone(),
                op: RemoteOp::StartStandalone {
                    binary: self.config.binaries.standalone_server.clone(),
                    port: cluster.service_port,
                },
                mode: StepMode::Detached,
                log: Some(service_log(paths, run_index)),
                settle_secs: timing.service_settle_secs,
                gating: true,
            });
        }
        steps
    }

    /// Execute bring-up: tear down, clean, bootstrap, start nodes,
    /// reconfigure, start the service.
    pub async fn bring_up(
        &self,
        cluster: &ClusterConfig,
        run_index: usize,
        sessions: &HashMap<String, Session>,
    ) -> Result<(), ClusterError> {
        // Detached starts append to per-run logs under the log directory.
        for host in &cluster.servers {
            let session = lookup(sessions, &host.name)?;
            session
                .exec(&format!("mkdir -p {}", self.config.paths.server_log_dir))
                .await?;
        }
        self.execute(&self.bringup_plan(cluster, run_index), sessions)
            .await
    }

    /// Execute tear-down. Idempotent: a cluster with nothing running
    /// tears down without error.
    pub async fn tear_down(
        &self,
        cluster: &ClusterConfig,
        sessions: &HashMap<String, Session>,
    ) -> Result<(), ClusterError> {
        self.execute(&self.teardown_plan(cluster), sessions).await
    }

    async fn execute(
        &self,
        plan: &[Step],
        sessions: &HashMap<String, Session>,
    ) -> Result<(), ClusterError> {
        for step in plan {
            let session = lookup(sessions, &step.host)?;
            tracing::info!(step = step.what, host = %step.host, cmd = %step.op, "lifecycle step");
            match step.mode {
                StepMode::Blocking => {
                    let result = session.exec(&step.op.render()).await?;
                    if !result.success() {
                        if step.gating {
                            return Err(ClusterError::StepFailed {
                                step: step.what,
                                host: step.host.clone(),
                                detail: format!(
                                    "exit={}, stderr={}",
                                    result.exit_code, result.stderr
                                ),
                            });
                        }
                        tracing::debug!(
                            step = step.what,
                            host = %step.host,
                            exit = result.exit_code,
                            "non-gating step returned nonzero"
                        );
                    }
                }
                StepMode::Detached => {
                    let log = step.log.as_deref().unwrap_or("/dev/null");
                    session
                        .exec_detached(&step.op.render(), log)
                        .await
                        .map_err(|e| {
                            if step.gating {
                                ClusterError::StepFailed {
                                    step: step.what,
                                    host: step.host.clone(),
                                    detail: e.to_string(),
                                }
                            } else {
                                ClusterError::Ssh(e)
                            }
                        })?;
                }
            }
            if step.settle_secs > 0 {
                tracing::debug!(step = step.what, secs = step.settle_secs, "settling");
                tokio::time::sleep(Duration::from_secs(step.settle_secs)).await;
            }
        }
        Ok(())
    }
}

fn lookup<'s>(
    sessions: &'s HashMap<String, Session>,
    host: &str,
) -> Result<&'s Session, ClusterError> {
    sessions
        .get(host)
        .ok_or_else(|| ClusterError::NoSession(host.to_string()))
}

/// Host the reconfiguration tool runs on (first client host).
fn reconfigure_host(config: &HarnessConfig) -> String {
    format!("{}1", config.fleet.client_prefix)
}

fn consensus_log(paths: &crate::config::PathsConfig, ordinal: usize, run_index: usize) -> String {
    format!(
        "{}/consensus_{}_run_{}.log",
        paths.server_log_dir, ordinal, run_index
    )
}

fn service_log(paths: &crate::config::PathsConfig, run_index: usize) -> String {
    format!("{}/service_run_{}.log", paths.server_log_dir, run_index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_for(servers: usize) -> (HarnessConfig, Vec<Step>) {
        let config = HarnessConfig::default();
        let cluster = config.cluster(servers).unwrap();
        let orchestrator = ClusterOrchestrator::new(&config);
        let plan = orchestrator.bringup_plan(&cluster, 3);
        (config, plan)
    }

    fn bootstrap_steps(plan: &[Step]) -> Vec<&Step> {
        plan.iter()
            .filter(|s| matches!(s.op, RemoteOp::BootstrapConsensus { .. }))
            .collect()
    }

    #[test]
    fn teardown_kills_every_binary_on_every_host_in_order() {
        let config = HarnessConfig::default();
        let cluster = config.cluster(3).unwrap();
        let plan = ClusterOrchestrator::new(&config).teardown_plan(&cluster);

        assert_eq!(plan.len(), 9);
        assert!(plan.iter().all(|s| !s.gating));
        let hosts: Vec<&str> = plan.iter().map(|s| s.host.as_str()).collect();
        assert_eq!(hosts[0..3], ["server_1"; 3]);
        assert_eq!(hosts[6..9], ["server_3"; 3]);
        assert!(plan
            .iter()
            .any(|s| s.op.render() == "killall -9 LogCabin"));
    }

    #[test]
    fn bootstrap_issued_exactly_once_before_other_nodes_start() {
        let (_, plan) = plan_for(5);
        assert_eq!(bootstrap_steps(&plan).len(), 1);

        let bootstrap_idx = plan
            .iter()
            .position(|s| matches!(s.op, RemoteOp::BootstrapConsensus { .. }))
            .unwrap();
        let first_start_idx = plan
            .iter()
            .position(|s| matches!(s.op, RemoteOp::StartConsensus { .. }))
            .unwrap();
        assert!(bootstrap_idx < first_start_idx);
        assert_eq!(plan[bootstrap_idx].host, "server_1");
        assert!(plan[bootstrap_idx].settle_secs > 0);
    }

    #[test]
    fn remaining_nodes_start_ascending_without_bootstrap_flag() {
        let (_, plan) = plan_for(5);
        let starts: Vec<&Step> = plan
            .iter()
            .filter(|s| matches!(s.op, RemoteOp::StartConsensus { .. }))
            .collect();
        assert_eq!(starts.len(), 4);
        let hosts: Vec<&str> = starts.iter().map(|s| s.host.as_str()).collect();
        assert_eq!(hosts, ["server_2", "server_3", "server_4", "server_5"]);
        assert!(starts.iter().all(|s| !s.op.render().contains("--bootstrap")));
    }

    #[test]
    fn reconfigure_runs_from_client_host_after_all_nodes() {
        let (_, plan) = plan_for(3);
        let reconfigure_idx = plan
            .iter()
            .position(|s| matches!(s.op, RemoteOp::Reconfigure { .. }))
            .unwrap();
        assert_eq!(plan[reconfigure_idx].host, "client_1");
        let last_start_idx = plan
            .iter()
            .rposition(|s| matches!(s.op, RemoteOp::StartConsensus { .. }))
            .unwrap();
        assert!(reconfigure_idx > last_start_idx);
        assert!(plan[reconfigure_idx]
            .op
            .render()
            .contains("server_1:5254,server_2:5254,server_3:5254"));
    }

    #[test]
    fn replicated_service_starts_last_on_storage_host() {
        let (_, plan) = plan_for(5);
        let last = plan.last().unwrap();
        assert!(matches!(last.op, RemoteOp::StartReplicated { .. }));
        assert_eq!(last.host, "server_5");
        assert_eq!(last.mode, StepMode::Detached);
    }

    #[test]
    fn single_node_plan_skips_consensus_entirely() {
        let (_, plan) = plan_for(1);
        assert!(bootstrap_steps(&plan).is_empty());
        assert!(!plan
            .iter()
            .any(|s| matches!(s.op, RemoteOp::StartConsensus { .. } | RemoteOp::Reconfigure { .. })));
        let last = plan.last().unwrap();
        assert_eq!(last.op.render(), "/home/server/bin/SimpleFileLock_Server 1234");
    }

    #[test]
    fn cleanup_runs_on_highest_ordinal_before_any_start() {
        let (_, plan) = plan_for(5);
        let clean_idx = plan
            .iter()
            .position(|s| matches!(s.op, RemoteOp::CleanStorage { .. }))
            .unwrap();
        assert_eq!(plan[clean_idx].host, "server_5");
        assert!(plan[clean_idx]
            .op
            .render()
            .starts_with("rm -rf /home/server/storage"));
        let first_detached = plan.iter().position(|s| s.mode == StepMode::Detached).unwrap();
        assert!(clean_idx < first_detached);
    }

    #[test]
    fn detached_steps_log_per_run_per_host() {
        let (_, plan) = plan_for(3);
        let bootstrap = &bootstrap_steps(&plan)[0];
        assert_eq!(
            bootstrap.log.as_deref(),
            Some("/home/server/logs/consensus_1_run_3.log")
        );
        let service = plan.last().unwrap();
        assert_eq!(
            service.log.as_deref(),
            Some("/home/server/logs/service_run_3.log")
        );
    }
}
