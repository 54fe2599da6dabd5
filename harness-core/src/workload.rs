//! Concurrent client workload drivers.
//!
//! Runs one driver per client as an independent tokio task. Each driver
//! invokes the client binary over its host's session against a named
//! workload script, with combined output redirected to a per-run log file,
//! and completes when the remote command returns, including when the
//! remote process was force-killed mid-request. `start_all` is
//! non-blocking; `join_all` bounds total run duration: drivers still
//! running at the deadline are aborted and their remote processes killed.

use std::time::Duration;

use tokio::task::JoinHandle;

use crate::command::RemoteOp;
use crate::config::HarnessConfig;
use crate::hosts::{ClusterConfig, RunConfig};
use crate::ssh::Session;

/// Raw way a driver's remote invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawOutcome {
    /// The remote client command returned with this exit code.
    Exited(i32),
    /// The driver was still running at the join deadline and was
    /// force-terminated.
    TimedOut,
    /// The SSH channel failed before an exit status was observed.
    Transport(String),
}

/// Final per-client status after combining raw outcomes with the
/// injection report.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub enum ClientStatus {
    /// Client ran to completion with this exit code.
    Completed(i32),
    /// Client was deliberately terminated by the failure injector.
    KilledByInjection,
    /// Client missed the join deadline and was force-terminated.
    TimedOut,
    /// SSH transport failed mid-run.
    TransportFailed(String),
}

/// Classify a raw driver outcome.
///
/// Nonzero exits during a run whose injector killed the clients are an
/// expected, explicitly modeled consequence of the injected failure, not
/// inferred from timing.
pub fn classify(raw: &RawOutcome, clients_killed_by_injector: bool) -> ClientStatus {
    match raw {
        RawOutcome::Exited(0) => ClientStatus::Completed(0),
        RawOutcome::Exited(_) if clients_killed_by_injector => ClientStatus::KilledByInjection,
        RawOutcome::Exited(code) => ClientStatus::Completed(*code),
        RawOutcome::TimedOut => ClientStatus::TimedOut,
        RawOutcome::Transport(e) => ClientStatus::TransportFailed(e.clone()),
    }
}

/// A started driver awaiting join.
pub struct DriverHandle {
    /// 1-based client index.
    pub client: usize,
    session: Session,
    handle: JoinHandle<RawOutcome>,
}

/// Per-run log file for one client driver, namespaced by run index.
pub fn client_log_path(config: &HarnessConfig, client: usize, run_index: usize) -> String {
    format!(
        "{}/client_{}_run_{}.log",
        config.paths.client_log_dir, client, run_index
    )
}

/// Full remote command line for one driver, output redirect included.
pub fn driver_command(
    config: &HarnessConfig,
    cluster: &ClusterConfig,
    run: &RunConfig,
    client: usize,
) -> String {
    let op = RemoteOp::RunClient {
        binary: config.binaries.client.clone(),
        server: cluster.service_host().name.clone(),
        client_id: client,
        requests: config.workload.requests_per_client,
        port: cluster.service_port,
        script: format!("{}/{}", config.paths.script_dir, run.scripts[client - 1]),
    };
    let log = client_log_path(config, client, run.run_index);
    format!(
        "mkdir -p {} && {} >> {} 2>&1",
        config.paths.client_log_dir,
        op.render(),
        log
    )
}

/// Drives `client_count` workload clients concurrently.
pub struct WorkloadRunner<'a> {
    config: &'a HarnessConfig,
}

impl<'a> WorkloadRunner<'a> {
    /// Build a runner over the harness configuration.
    pub fn new(config: &'a HarnessConfig) -> Self {
        Self { config }
    }

    /// Spawn every driver and return immediately.
    ///
    /// `sessions` is index-aligned with clients (`sessions[i]` serves
    /// client `i + 1`); each driver holds its own clone of its session and
    /// shares no other mutable state.
    pub fn start_all(
        &self,
        cluster: &ClusterConfig,
        run: &RunConfig,
        sessions: &[Session],
    ) -> Vec<DriverHandle> {
        let mut handles = Vec::with_capacity(run.client_count);
        for client in 1..=run.client_count {
            let session = sessions[client - 1].clone();
            let cmd = driver_command(self.config, cluster, run, client);
            tracing::info!(client, host = %session.host(), "starting workload driver");
            let task_session = session.clone();
            let handle = tokio::spawn(async move {
                match task_session.exec(&cmd).await {
                    Ok(result) => RawOutcome::Exited(result.exit_code),
                    Err(e) => RawOutcome::Transport(e.to_string()),
                }
            });
            handles.push(DriverHandle {
                client,
                session,
                handle,
            });
        }
        handles
    }

    /// Wait for every driver to finish, up to `timeout` overall.
    ///
    /// Drivers that miss the shared deadline are aborted and their remote
    /// client processes force-killed, so a client whose server died can
    /// never hang the run. Returns raw outcomes ascending by client index.
    pub async fn join_all(
        &self,
        handles: Vec<DriverHandle>,
        timeout: Duration,
    ) -> Vec<(usize, RawOutcome)> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut outcomes = Vec::with_capacity(handles.len());

        for mut driver in handles {
            let outcome = match tokio::time::timeout_at(deadline, &mut driver.handle).await {
                Ok(Ok(raw)) => raw,
                Ok(Err(join_err)) => RawOutcome::Transport(join_err.to_string()),
                Err(_) => {
                    tracing::warn!(client = driver.client, "driver missed join deadline, killing");
                    driver.handle.abort();
                    let kill = RemoteOp::KillProcess {
                        binary: binary_name(&self.config.binaries.client),
                    };
                    if let Err(e) = driver.session.exec(&kill.render()).await {
                        tracing::debug!(client = driver.client, "kill after timeout failed: {}", e);
                    }
                    RawOutcome::TimedOut
                }
            };
            outcomes.push((driver.client, outcome));
        }
        outcomes
    }
}

/// Last path component of a binary path, as `killall` expects.
pub fn binary_name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_client_run(servers: usize) -> (HarnessConfig, ClusterConfig, RunConfig) {
        let config = HarnessConfig::default();
        let cluster = config.cluster(servers).unwrap();
        let run = RunConfig {
            client_count: 2,
            scripts: vec!["StarTrek.cmd".into(), "StarWars.cmd".into()],
            failure_count: 0,
            run_index: 7,
        };
        (config, cluster, run)
    }

    #[test]
    fn driver_targets_sole_server_when_single_node() {
        let (config, cluster, run) = two_client_run(1);
        let cmd = driver_command(&config, &cluster, &run, 1);
        assert!(cmd.contains(" server_1 1 100 1234 "));
        assert!(cmd.contains("/home/client/scripts/StarTrek.cmd"));
    }

    #[test]
    fn driver_targets_service_host_when_replicated() {
        let (config, cluster, run) = two_client_run(5);
        let cmd = driver_command(&config, &cluster, &run, 2);
        assert!(cmd.contains(" server_5 2 100 9001 "));
        assert!(cmd.contains("/home/client/scripts/StarWars.cmd"));
    }

    #[test]
    fn driver_logs_are_namespaced_by_run() {
        let (config, cluster, run) = two_client_run(1);
        let cmd = driver_command(&config, &cluster, &run, 1);
        assert!(cmd.ends_with(">> /home/client/logs/client_1_run_7.log 2>&1"));
        assert_eq!(
            client_log_path(&config, 2, 7),
            "/home/client/logs/client_2_run_7.log"
        );
    }

    #[test]
    fn classify_injection_kill_is_explicit() {
        assert_eq!(
            classify(&RawOutcome::Exited(137), true),
            ClientStatus::KilledByInjection
        );
        assert_eq!(
            classify(&RawOutcome::Exited(137), false),
            ClientStatus::Completed(137)
        );
    }

    #[test]
    fn classify_clean_exit_never_attributed_to_injection() {
        assert_eq!(classify(&RawOutcome::Exited(0), true), ClientStatus::Completed(0));
    }

    #[test]
    fn classify_timeout_and_transport() {
        assert_eq!(classify(&RawOutcome::TimedOut, true), ClientStatus::TimedOut);
        assert_eq!(
            classify(&RawOutcome::Transport("gone".into()), false),
            ClientStatus::TransportFailed("gone".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn join_all_aborts_drivers_past_deadline() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        use crate::hosts::Host;

        let config = HarnessConfig::default();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            flag.store(true, Ordering::SeqCst);
            RawOutcome::Exited(0)
        });
        let drivers = vec![DriverHandle {
            client: 1,
            session: crate::ssh::unreachable_session(Host::client("client_", 1)),
            handle,
        }];

        let runner = WorkloadRunner::new(&config);
        let outcomes = runner.join_all(drivers, Duration::from_secs(1)).await;
        assert_eq!(outcomes, vec![(1, RawOutcome::TimedOut)]);

        // An aborted driver must not resume once its sleep would elapse.
        tokio::time::sleep(Duration::from_secs(7200)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[test]
    fn binary_name_strips_directories() {
        assert_eq!(
            binary_name("/home/client/bin/FT_SimpleFileLock_Client"),
            "FT_SimpleFileLock_Client"
        );
        assert_eq!(binary_name("LogCabin"), "LogCabin");
    }
}
