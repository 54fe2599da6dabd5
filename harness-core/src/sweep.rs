//! Sweep controller: iterates the configuration matrix.
//!
//! One run per (clientCount, serverCount, workloads, failureCount) tuple
//! per repetition: bring-up, workload, optional injection, validation,
//! tear-down, one report token. Every run opens a fresh set of sessions
//! and closes all of them on exit regardless of outcome, and no failure
//! from one run aborts the sweep.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::cluster::{ClusterError, ClusterOrchestrator};
use crate::config::{HarnessConfig, SweepCaseConfig};
use crate::failure::{FailureInjector, InjectionReport};
use crate::hosts::{ClusterConfig, Host, RunConfig, TopologyError};
use crate::report::{ReportError, ReportWriter};
use crate::ssh::{Session, SessionPool, SshError};
use crate::validate::{OutcomeValidator, RunVerdict, ValidateError};
use crate::workload::{classify, ClientStatus, WorkloadRunner};

/// Errors that abort the sweep itself (never a single run's failure).
#[derive(Debug, Error)]
pub enum SweepError {
    /// Report file could not be written.
    #[error("report error: {0}")]
    Report(#[from] ReportError),
}

/// Errors internal to one run. Recorded, never propagated past the run.
#[derive(Debug, Error)]
enum RunError {
    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),
    #[error("ssh error: {0}")]
    Ssh(#[from] SshError),
    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),
    #[error("validation error: {0}")]
    Validate(#[from] ValidateError),
}

/// Result of one run, appended to the in-memory sweep summary.
#[derive(Debug, serde::Serialize)]
pub struct RunResult {
    /// Global run index across the sweep.
    pub run_index: usize,
    /// Category label.
    pub label: String,
    /// Final per-client statuses (empty if the run failed before joining).
    pub clients: Vec<(usize, ClientStatus)>,
    /// What the injector did.
    pub injection: InjectionReport,
    /// Golden-comparison verdict, if validation ran.
    pub verdict: Option<RunVerdict>,
    /// Aggregate pass/fail.
    pub passed: bool,
    /// Wall-clock duration.
    pub duration: Duration,
    /// Run-level failure description (connection failure, bring-up abort).
    pub failure: Option<String>,
}

/// Iterates the sweep matrix and aggregates the report.
pub struct SweepController {
    config: HarnessConfig,
}

impl SweepController {
    /// Build a controller over an immutable configuration.
    pub fn new(config: HarnessConfig) -> Self {
        Self { config }
    }

    /// Run every category and repetition, appending to the report as each
    /// run finishes.
    pub async fn run_sweep(&self) -> Result<Vec<RunResult>, SweepError> {
        let sweep_id = uuid::Uuid::new_v4();
        tracing::info!(%sweep_id, categories = self.config.sweep.len(), "starting sweep");

        let mut report = ReportWriter::open(&self.config.paths.report_file)?;
        let mut results = Vec::new();
        let mut run_index = 0;

        for case in &self.config.sweep {
            report.begin_category(&case.label())?;
            for repetition in 0..case.repetitions {
                tracing::info!(
                    label = %case.label(),
                    repetition,
                    run_index,
                    "starting run"
                );
                let result = self.run_once(case, run_index).await;
                tracing::info!(
                    run_index,
                    passed = result.passed,
                    secs = result.duration.as_secs(),
                    "run finished"
                );
                report.record(result.passed)?;
                results.push(result);
                run_index += 1;
            }
            report.end_category()?;
        }
        Ok(results)
    }

    /// Execute one full run. Never fails the sweep: every error becomes a
    /// failed [`RunResult`], and all sessions opened for the run are
    /// closed before returning.
    pub async fn run_once(&self, case: &SweepCaseConfig, run_index: usize) -> RunResult {
        let started = Instant::now();
        let label = case.label();
        let mut result = RunResult {
            run_index,
            label,
            clients: Vec::new(),
            injection: InjectionReport::default(),
            verdict: None,
            passed: false,
            duration: Duration::ZERO,
            failure: None,
        };

        let pool = match SessionPool::new(self.config.fleet.clone()) {
            Ok(pool) => pool,
            Err(e) => {
                result.failure = Some(e.to_string());
                result.duration = started.elapsed();
                return result;
            }
        };

        match self.drive(&pool, case, run_index).await {
            Ok((clients, injection, verdict)) => {
                result.passed = verdict.passed();
                result.clients = clients;
                result.injection = injection;
                result.verdict = Some(verdict);
            }
            Err(e) => {
                tracing::warn!(run_index, "run failed: {}", e);
                result.failure = Some(e.to_string());
            }
        }

        // A failed run must not leak channels into the next iteration.
        pool.close_all().await;
        if pool.opened() != pool.closed() {
            tracing::error!(
                opened = pool.opened(),
                closed = pool.closed(),
                "session accounting mismatch"
            );
        }

        result.duration = started.elapsed();
        result
    }

    async fn drive(
        &self,
        pool: &SessionPool,
        case: &SweepCaseConfig,
        run_index: usize,
    ) -> Result<(Vec<(usize, ClientStatus)>, InjectionReport, RunVerdict), RunError> {
        let cluster = self.config.cluster(case.servers)?;
        let run = RunConfig {
            client_count: case.clients,
            scripts: case.scripts.clone(),
            failure_count: case.failures,
            run_index,
        };
        run.validate(&cluster)?;

        // Connection failures surface here, before bring-up.
        let (sessions, server_sessions, client_sessions) =
            self.open_sessions(pool, &cluster, &run).await?;

        let orchestrator = ClusterOrchestrator::new(&self.config);
        orchestrator.bring_up(&cluster, run_index, &sessions).await?;

        let runner = WorkloadRunner::new(&self.config);
        let handles = runner.start_all(&cluster, &run, &client_sessions);

        // Injection overlaps live client traffic.
        let injector = FailureInjector::new(&self.config, &cluster, run.failure_count);
        let injection_task = tokio::spawn(
            injector.inject(server_sessions.clone(), client_sessions.clone()),
        );

        let join_timeout = Duration::from_secs(self.config.timing.join_timeout_secs);
        let raw_outcomes = runner.join_all(handles, join_timeout).await;
        let injection = injection_task.await.unwrap_or_default();

        tokio::time::sleep(Duration::from_secs(self.config.timing.validate_settle_secs)).await;

        let storage_session = &server_sessions[cluster.storage_host().ordinal - 1];
        let query_session = &client_sessions[0];
        let validator = OutcomeValidator::new(&self.config);
        let verdict = validator
            .validate(&cluster, &run, storage_session, query_session)
            .await?;

        orchestrator.tear_down(&cluster, &sessions).await?;

        let clients = raw_outcomes
            .iter()
            .map(|(client, raw)| (*client, classify(raw, injection.clients_killed)))
            .collect();
        Ok((clients, injection, verdict))
    }

    /// Open one session per server host and one per client host.
    async fn open_sessions(
        &self,
        pool: &SessionPool,
        cluster: &ClusterConfig,
        run: &RunConfig,
    ) -> Result<(HashMap<String, Session>, Vec<Session>, Vec<Session>), RunError> {
        let mut sessions = HashMap::new();
        let mut server_sessions = Vec::with_capacity(cluster.server_count());
        for host in &cluster.servers {
            let session = pool.open(host).await?;
            sessions.insert(host.name.clone(), session.clone());
            server_sessions.push(session);
        }

        let mut client_sessions = Vec::with_capacity(run.client_count);
        for ordinal in 1..=run.client_count {
            let host = Host::client(&self.config.fleet.client_prefix, ordinal);
            let session = pool.open(&host).await?;
            sessions.insert(host.name.clone(), session.clone());
            client_sessions.push(session);
        }
        Ok((sessions, server_sessions, client_sessions))
    }
}
