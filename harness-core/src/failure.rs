//! Failure injection: deliberate process kills overlapping live traffic.
//!
//! After a fixed activation delay from client start (long enough that
//! clients have begun issuing requests, short enough that the run has not
//! completed), the injector force-terminates the consensus daemon (the
//! standalone service for single-node clusters) on the lowest
//! `failure_count` server ordinals. Quorum preservation is a
//! configuration-level invariant checked before the run, not re-enforced
//! here. When any server was killed, clients are force-killed after an
//! additional bounded wait so the join step can never hang on a client
//! whose server died.

use std::time::Duration;

use crate::command::RemoteOp;
use crate::config::HarnessConfig;
use crate::hosts::ClusterConfig;
use crate::ssh::{Session, SSH_ERROR_EXIT};
use crate::workload::binary_name;

/// What the injector actually did, for explicit outcome modeling.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct InjectionReport {
    /// Server ordinals whose process was killed, ascending.
    pub killed_servers: Vec<usize>,
    /// Whether client processes were force-killed afterwards.
    pub clients_killed: bool,
}

/// Server ordinals the injector targets: the lowest `failure_count`.
pub fn kill_targets(failure_count: usize) -> Vec<usize> {
    (1..=failure_count).collect()
}

/// Binary the injector kills on a server host.
pub fn target_binary(config: &HarnessConfig, cluster: &ClusterConfig) -> String {
    if cluster.fault_tolerant() {
        binary_name(&config.binaries.consensus)
    } else {
        binary_name(&config.binaries.standalone_server)
    }
}

/// Kills a subset of server processes mid-run, then the clients.
///
/// Owns everything it needs so it can run as a spawned task concurrent
/// with the workload drivers.
pub struct FailureInjector {
    activation_delay: Duration,
    client_kill_delay: Duration,
    target_binary: String,
    client_binary: String,
    failure_count: usize,
}

impl FailureInjector {
    /// Build an injector for one run.
    pub fn new(config: &HarnessConfig, cluster: &ClusterConfig, failure_count: usize) -> Self {
        Self {
            activation_delay: Duration::from_secs(config.timing.injection_delay_secs),
            client_kill_delay: Duration::from_secs(config.timing.client_kill_delay_secs),
            target_binary: target_binary(config, cluster),
            client_binary: binary_name(&config.binaries.client),
            failure_count,
        }
    }

    /// Run the injection. Kill commands are fire-and-forget: a failure to
    /// kill is logged and reflected in the report, never fatal.
    ///
    /// `server_sessions` is ascending ordinal order; `client_sessions`
    /// covers every client host.
    pub async fn inject(
        self,
        server_sessions: Vec<Session>,
        client_sessions: Vec<Session>,
    ) -> InjectionReport {
        let mut report = InjectionReport::default();
        if self.failure_count == 0 {
            return report;
        }

        tokio::time::sleep(self.activation_delay).await;

        let kill = RemoteOp::KillProcess {
            binary: self.target_binary.clone(),
        };
        for ordinal in kill_targets(self.failure_count) {
            let session = &server_sessions[ordinal - 1];
            tracing::info!(ordinal, binary = %self.target_binary, "injecting server failure");
            // An ssh-layer exit means the kill never reached the host.
            match session.exec(&kill.render()).await {
                Ok(result) if result.exit_code != SSH_ERROR_EXIT => {
                    report.killed_servers.push(ordinal);
                }
                Ok(result) => {
                    tracing::warn!(ordinal, exit = result.exit_code, "server kill did not reach host");
                }
                Err(e) => {
                    tracing::warn!(ordinal, "server kill failed: {}", e);
                }
            }
        }

        // A client whose server died may never get a response; kill them
        // all after a bounded wait so join cannot hang.
        tokio::time::sleep(self.client_kill_delay).await;
        let kill_clients = RemoteOp::KillProcess {
            binary: self.client_binary.clone(),
        };
        for session in &client_sessions {
            tracing::info!(host = %session.host(), "force-killing clients");
            match session.exec(&kill_clients.render()).await {
                Ok(result) if result.exit_code != SSH_ERROR_EXIT => {
                    report.clients_killed = true;
                }
                Ok(result) => {
                    tracing::warn!(
                        host = %session.host(),
                        exit = result.exit_code,
                        "client kill did not reach host"
                    );
                }
                Err(e) => {
                    tracing::warn!(host = %session.host(), "client kill failed: {}", e);
                }
            }
        }
        report
    }
}
