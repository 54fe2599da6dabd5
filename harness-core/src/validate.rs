//! Outcome validation: golden comparison of persisted client artifacts.
//!
//! After all clients have finished or been terminated and the cluster has
//! settled, each client's artifact is fetched and compared
//! byte-for-byte (trailing-whitespace-normalized) against the golden
//! string for its workload. Retrieval depends on topology: single-node
//! runs read the artifact off the shared filesystem, replicated runs go
//! through the read-query tool against the consensus store.

use serde::Serialize;
use thiserror::Error;

use crate::command::RemoteOp;
use crate::config::HarnessConfig;
use crate::hosts::{ClusterConfig, RunConfig};
use crate::ssh::{Session, SshError};

/// Errors from outcome validation.
#[derive(Debug, Error)]
pub enum ValidateError {
    /// Retrieval over SSH failed at the transport level.
    #[error("ssh error: {0}")]
    Ssh(#[from] SshError),

    /// A run references a workload with no declared golden output.
    /// Config validation normally rejects this before a run starts.
    #[error("no golden output declared for script {0:?}")]
    MissingGolden(String),
}

/// Verdict for one client's artifact.
#[derive(Debug, Clone, Serialize)]
pub struct ClientVerdict {
    /// 1-based client index.
    pub client: usize,
    /// Workload script the client ran.
    pub script: String,
    /// Whether the normalized artifact matched the golden string.
    pub matched: bool,
    /// Golden string (normalized).
    pub expected: String,
    /// Retrieved artifact (normalized; empty if missing).
    pub actual: String,
}

/// Aggregate verdict for a run: pass only if every client matched.
#[derive(Debug, Clone, Serialize)]
pub struct RunVerdict {
    /// Per-client verdicts, ascending client index.
    pub clients: Vec<ClientVerdict>,
}

impl RunVerdict {
    /// True if every client's artifact matched its golden string.
    pub fn passed(&self) -> bool {
        self.clients.iter().all(|c| c.matched)
    }
}

/// Normalize artifact text for comparison: strip trailing whitespace from
/// every line and drop trailing blank lines.
pub fn normalize(text: &str) -> String {
    let mut out: String = text
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    while out.ends_with('\n') {
        out.pop();
    }
    out.trim_end().to_string()
}

/// Compare a retrieved artifact against a golden string.
pub fn matches_golden(actual: &str, golden: &str) -> bool {
    normalize(actual) == normalize(golden)
}

/// Filesystem path of a client's artifact on the shared volume.
pub fn artifact_file(config: &HarnessConfig, client: usize) -> String {
    format!("{}{}", config.paths.artifact_file_prefix, client)
}

/// Store key of a client's artifact in the replicated store.
pub fn artifact_key(config: &HarnessConfig, client: usize) -> String {
    format!("{}{}", config.paths.artifact_key_prefix, client)
}

/// Fetches persisted client artifacts and compares them against golden
/// values.
pub struct OutcomeValidator<'a> {
    config: &'a HarnessConfig,
}

impl<'a> OutcomeValidator<'a> {
    /// Build a validator over the harness configuration.
    pub fn new(config: &'a HarnessConfig) -> Self {
        Self { config }
    }

    /// Validate every client of a run.
    ///
    /// `storage_session` must be bound to the storage host (single-node
    /// retrieval); `query_session` to a client host (replicated retrieval).
    pub async fn validate(
        &self,
        cluster: &ClusterConfig,
        run: &RunConfig,
        storage_session: &Session,
        query_session: &Session,
    ) -> Result<RunVerdict, ValidateError> {
        let mut clients = Vec::with_capacity(run.client_count);
        for client in 1..=run.client_count {
            let script = &run.scripts[client - 1];
            let golden = self
                .config
                .golden_for(script)
                .ok_or_else(|| ValidateError::MissingGolden(script.clone()))?;

            let actual = if cluster.fault_tolerant() {
                self.read_replicated(cluster, query_session, client).await?
            } else {
                self.read_local(storage_session, client).await?
            };

            let matched = matches_golden(&actual, golden);
            if !matched {
                tracing::warn!(
                    client,
                    script,
                    "artifact mismatch: expected {:?}, got {:?}",
                    normalize(golden),
                    normalize(&actual)
                );
            }
            clients.push(ClientVerdict {
                client,
                script: script.clone(),
                matched,
                expected: normalize(golden),
                actual: normalize(&actual),
            });
        }
        Ok(RunVerdict { clients })
    }

    /// Read an artifact directly from the shared filesystem. A missing
    /// file is treated as empty output, not a fatal error.
    async fn read_local(&self, session: &Session, client: usize) -> Result<String, ValidateError> {
        let path = artifact_file(self.config, client);
        let result = session.exec(&format!("cat {}", path)).await?;
        if result.success() {
            Ok(result.stdout)
        } else {
            tracing::debug!(client, path, "artifact missing, treating as empty");
            Ok(String::new())
        }
    }

    /// Read an artifact back through the replicated store's query tool.
    async fn read_replicated(
        &self,
        cluster: &ClusterConfig,
        session: &Session,
        client: usize,
    ) -> Result<String, ValidateError> {
        let op = RemoteOp::ReadArtifact {
            tool: self.config.binaries.read_query.clone(),
            membership: cluster.membership.clone(),
            key: artifact_key(self.config, client),
        };
        let result = session.exec(&op.render()).await?;
        if !result.success() {
            tracing::debug!(client, exit = result.exit_code, "read-query returned nonzero");
        }
        Ok(result.stdout)
    }
}
