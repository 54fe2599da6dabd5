//! Configuration loading for the harness.
//!
//! Configuration is loaded from a TOML file (default: `harness.toml`) into
//! one immutable [`HarnessConfig`] passed to the orchestrator and sweep
//! controller at construction. There is no process-wide mutable state.
//!
//! Defaults match the standard fleet layout: hosts named
//! `server_1..server_n` / `client_1..client_m`, LogCabin as the consensus
//! daemon on port 5254, the fault-tolerant service on 9001, the standalone
//! variant on 1234.

use serde::Deserialize;
use std::path::PathBuf;

use crate::hosts::{ClusterConfig, RunConfig, TopologyError};

/// Root configuration for the harness.
#[derive(Debug, Clone, Deserialize)]
pub struct HarnessConfig {
    /// Fleet naming and SSH access.
    #[serde(default)]
    pub fleet: FleetConfig,
    /// Remote binary paths.
    #[serde(default)]
    pub binaries: BinariesConfig,
    /// Fixed service ports.
    #[serde(default)]
    pub ports: PortsConfig,
    /// Remote and local filesystem paths.
    #[serde(default)]
    pub paths: PathsConfig,
    /// Settle delays and timeouts.
    #[serde(default)]
    pub timing: TimingConfig,
    /// Workload scripts and their golden outputs.
    #[serde(default)]
    pub workload: WorkloadConfig,
    /// Sweep matrix.
    #[serde(default)]
    pub sweep: Vec<SweepCaseConfig>,
}

/// Fleet naming and SSH access configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    /// Server host name prefix (ordinal appended).
    #[serde(default = "default_server_prefix")]
    pub server_prefix: String,
    /// Client host name prefix (ordinal appended).
    #[serde(default = "default_client_prefix")]
    pub client_prefix: String,
    /// SSH account on server hosts.
    #[serde(default = "default_server_user")]
    pub server_user: String,
    /// SSH account on client hosts.
    #[serde(default = "default_client_user")]
    pub client_user: String,
    /// Private key for public-key authentication (optional; falls back to
    /// the agent / default identities).
    pub identity_file: Option<PathBuf>,
    /// SSH connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

/// Remote binary paths for the service under test and its tooling.
#[derive(Debug, Clone, Deserialize)]
pub struct BinariesConfig {
    /// Standalone (single-node) service binary; takes a port argument.
    #[serde(default = "default_standalone_server")]
    pub standalone_server: String,
    /// Fault-tolerant service binary; takes no arguments.
    #[serde(default = "default_replicated_server")]
    pub replicated_server: String,
    /// Workload client binary.
    #[serde(default = "default_client_binary")]
    pub client: String,
    /// Consensus daemon binary.
    #[serde(default = "default_consensus_binary")]
    pub consensus: String,
    /// Membership reconfiguration tool.
    #[serde(default = "default_reconfigure_tool")]
    pub reconfigure: String,
    /// Read-query tool for the replicated store.
    #[serde(default = "default_read_query_tool")]
    pub read_query: String,
}

/// Fixed service ports.
#[derive(Debug, Clone, Deserialize)]
pub struct PortsConfig {
    /// Consensus daemon port.
    #[serde(default = "default_consensus_port")]
    pub consensus: u16,
    /// Fault-tolerant service port.
    #[serde(default = "default_replicated_port")]
    pub replicated_service: u16,
    /// Standalone service port.
    #[serde(default = "default_standalone_port")]
    pub standalone_service: u16,
}

/// Remote and local filesystem paths.
#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    /// Consensus storage directory on the shared volume.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: String,
    /// Stray artifact globs removed alongside the storage directory.
    #[serde(default = "default_artifact_globs")]
    pub artifact_globs: Vec<String>,
    /// Per-run log directory on server hosts.
    #[serde(default = "default_server_log_dir")]
    pub server_log_dir: String,
    /// Per-run log directory on client hosts.
    #[serde(default = "default_client_log_dir")]
    pub client_log_dir: String,
    /// Consensus daemon configuration file on server hosts.
    #[serde(default = "default_consensus_config")]
    pub consensus_config: String,
    /// Directory holding workload scripts on client hosts.
    #[serde(default = "default_script_dir")]
    pub script_dir: String,
    /// Filesystem path prefix of per-client artifacts (single-node runs;
    /// client index appended).
    #[serde(default = "default_artifact_file_prefix")]
    pub artifact_file_prefix: String,
    /// Store key prefix of per-client artifacts (replicated runs; client
    /// index appended).
    #[serde(default = "default_artifact_key_prefix")]
    pub artifact_key_prefix: String,
    /// Local append-only report file.
    #[serde(default = "default_report_file")]
    pub report_file: PathBuf,
}

/// Settle delays and timeouts, in seconds.
///
/// The external service exposes no readiness signal, so each state-changing
/// bring-up step is followed by a fixed bounded wait. These are explicit
/// protocol parameters, not tuning knobs to be removed.
#[derive(Debug, Clone, Deserialize)]
pub struct TimingConfig {
    /// Wait after bootstrapping the consensus group.
    #[serde(default = "default_bootstrap_settle")]
    pub bootstrap_settle_secs: u64,
    /// Wait after starting the remaining consensus nodes.
    #[serde(default = "default_node_settle")]
    pub node_settle_secs: u64,
    /// Wait after issuing the membership reconfiguration.
    #[serde(default = "default_reconfigure_settle")]
    pub reconfigure_settle_secs: u64,
    /// Wait after starting the application service.
    #[serde(default = "default_service_settle")]
    pub service_settle_secs: u64,
    /// Delay from client start to failure injection.
    #[serde(default = "default_injection_delay")]
    pub injection_delay_secs: u64,
    /// Extra wait before the injector force-kills clients.
    #[serde(default = "default_client_kill_delay")]
    pub client_kill_delay_secs: u64,
    /// Window for joining all client drivers before force-termination.
    #[serde(default = "default_join_timeout")]
    pub join_timeout_secs: u64,
    /// Wait before validation so the surviving cluster settles.
    #[serde(default = "default_validate_settle")]
    pub validate_settle_secs: u64,
}

/// Workload scripts and golden outputs.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkloadConfig {
    /// Requests each client issues, passed to the client binary.
    #[serde(default = "default_requests_per_client")]
    pub requests_per_client: u32,
    /// Known workload scripts with their expected outputs.
    #[serde(default = "default_scripts")]
    pub scripts: Vec<WorkloadScript>,
}

/// One workload script and the golden string its client must persist.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkloadScript {
    /// Script file name (resolved under `paths.script_dir`).
    pub script: String,
    /// Expected artifact content, compared after trailing-whitespace
    /// normalization.
    pub golden: String,
}

/// One category of the sweep matrix.
#[derive(Debug, Clone, Deserialize)]
pub struct SweepCaseConfig {
    /// Concurrent clients.
    pub clients: usize,
    /// Cluster size.
    pub servers: usize,
    /// Server processes to kill mid-run.
    #[serde(default)]
    pub failures: usize,
    /// Workload script per client, index-aligned.
    pub scripts: Vec<String>,
    /// Repetitions of this category.
    #[serde(default = "default_repetitions")]
    pub repetitions: usize,
    /// Report label (defaults to `c<clients>_s<servers>_f<failures>`).
    pub label: Option<String>,
}

impl SweepCaseConfig {
    /// Report label for this category.
    pub fn label(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| format!("c{}_s{}_f{}", self.clients, self.servers, self.failures))
    }
}

// Default value functions

fn default_server_prefix() -> String {
    "server_".to_string()
}

fn default_client_prefix() -> String {
    "client_".to_string()
}

fn default_server_user() -> String {
    "server".to_string()
}

fn default_client_user() -> String {
    "client".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_standalone_server() -> String {
    "/home/server/bin/SimpleFileLock_Server".to_string()
}

fn default_replicated_server() -> String {
    "/home/server/bin/FT_SimpleFileLock_Server".to_string()
}

fn default_client_binary() -> String {
    "/home/client/bin/FT_SimpleFileLock_Client".to_string()
}

fn default_consensus_binary() -> String {
    "/home/server/bin/LogCabin".to_string()
}

fn default_reconfigure_tool() -> String {
    "/home/client/bin/Reconfigure".to_string()
}

fn default_read_query_tool() -> String {
    "/home/client/bin/TreeOps".to_string()
}

fn default_consensus_port() -> u16 {
    5254
}

fn default_replicated_port() -> u16 {
    9001
}

fn default_standalone_port() -> u16 {
    1234
}

fn default_storage_dir() -> String {
    "/home/server/storage".to_string()
}

fn default_artifact_globs() -> Vec<String> {
    vec!["/home/server/lockDir/*".to_string()]
}

fn default_server_log_dir() -> String {
    "/home/server/logs".to_string()
}

fn default_client_log_dir() -> String {
    "/home/client/logs".to_string()
}

fn default_consensus_config() -> String {
    "/home/server/logcabin.conf".to_string()
}

fn default_script_dir() -> String {
    "/home/client/scripts".to_string()
}

fn default_artifact_file_prefix() -> String {
    "/home/server/lockDir/testFile_".to_string()
}

fn default_artifact_key_prefix() -> String {
    "/lockDir/testFile_".to_string()
}

fn default_report_file() -> PathBuf {
    PathBuf::from("report.txt")
}

fn default_bootstrap_settle() -> u64 {
    5
}

fn default_node_settle() -> u64 {
    3
}

fn default_reconfigure_settle() -> u64 {
    3
}

fn default_service_settle() -> u64 {
    3
}

fn default_injection_delay() -> u64 {
    5
}

fn default_client_kill_delay() -> u64 {
    10
}

fn default_join_timeout() -> u64 {
    120
}

fn default_validate_settle() -> u64 {
    3
}

fn default_requests_per_client() -> u32 {
    100
}

fn default_scripts() -> Vec<WorkloadScript> {
    vec![
        WorkloadScript {
            script: "StarTrek.cmd".to_string(),
            golden: "Space, the final frontier.".to_string(),
        },
        WorkloadScript {
            script: "StarWars.cmd".to_string(),
            golden: "A long time ago in a galaxy far, far away.".to_string(),
        },
    ]
}

fn default_repetitions() -> usize {
    1
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            server_prefix: default_server_prefix(),
            client_prefix: default_client_prefix(),
            server_user: default_server_user(),
            client_user: default_client_user(),
            identity_file: None,
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl Default for BinariesConfig {
    fn default() -> Self {
        Self {
            standalone_server: default_standalone_server(),
            replicated_server: default_replicated_server(),
            client: default_client_binary(),
            consensus: default_consensus_binary(),
            reconfigure: default_reconfigure_tool(),
            read_query: default_read_query_tool(),
        }
    }
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            consensus: default_consensus_port(),
            replicated_service: default_replicated_port(),
            standalone_service: default_standalone_port(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            artifact_globs: default_artifact_globs(),
            server_log_dir: default_server_log_dir(),
            client_log_dir: default_client_log_dir(),
            consensus_config: default_consensus_config(),
            script_dir: default_script_dir(),
            artifact_file_prefix: default_artifact_file_prefix(),
            artifact_key_prefix: default_artifact_key_prefix(),
            report_file: default_report_file(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            bootstrap_settle_secs: default_bootstrap_settle(),
            node_settle_secs: default_node_settle(),
            reconfigure_settle_secs: default_reconfigure_settle(),
            service_settle_secs: default_service_settle(),
            injection_delay_secs: default_injection_delay(),
            client_kill_delay_secs: default_client_kill_delay(),
            join_timeout_secs: default_join_timeout(),
            validate_settle_secs: default_validate_settle(),
        }
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            requests_per_client: default_requests_per_client(),
            scripts: default_scripts(),
        }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            fleet: FleetConfig::default(),
            binaries: BinariesConfig::default(),
            ports: PortsConfig::default(),
            paths: PathsConfig::default(),
            timing: TimingConfig::default(),
            workload: WorkloadConfig::default(),
            sweep: Vec::new(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from a TOML file and validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// sweep matrix violates a topology invariant.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Golden string for a workload script, if it is declared.
    pub fn golden_for(&self, script: &str) -> Option<&str> {
        self.workload
            .scripts
            .iter()
            .find(|w| w.script == script)
            .map(|w| w.golden.as_str())
    }

    /// Cluster shape for a given server count.
    pub fn cluster(&self, server_count: usize) -> Result<ClusterConfig, TopologyError> {
        let service_port = if server_count > 1 {
            self.ports.replicated_service
        } else {
            self.ports.standalone_service
        };
        ClusterConfig::new(
            &self.fleet.server_prefix,
            server_count,
            self.ports.consensus,
            service_port,
        )
    }

    /// Check the whole sweep matrix against the topology invariants and the
    /// declared workload table.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (i, case) in self.sweep.iter().enumerate() {
            let cluster = self
                .cluster(case.servers)
                .map_err(|source| ConfigError::InvalidCase { case: i, source })?;
            let run = RunConfig {
                client_count: case.clients,
                scripts: case.scripts.clone(),
                failure_count: case.failures,
                run_index: 0,
            };
            run.validate(&cluster)
                .map_err(|source| ConfigError::InvalidCase { case: i, source })?;
            for script in &case.scripts {
                if self.golden_for(script).is_none() {
                    return Err(ConfigError::UnknownScript {
                        case: i,
                        script: script.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A sweep case violates a topology invariant.
    #[error("sweep case {case}: {source}")]
    InvalidCase {
        /// Zero-based index into the sweep table.
        case: usize,
        /// Underlying topology error.
        source: TopologyError,
    },
    /// A sweep case references a script with no declared golden output.
    #[error("sweep case {case} references unknown workload script {script:?}")]
    UnknownScript {
        /// Zero-based index into the sweep table.
        case: usize,
        /// The unknown script name.
        script: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_standard_fleet() {
        let config = HarnessConfig::default();
        assert_eq!(config.fleet.server_prefix, "server_");
        assert_eq!(config.ports.consensus, 5254);
        assert_eq!(config.ports.replicated_service, 9001);
        assert_eq!(config.ports.standalone_service, 1234);
        assert!(config.binaries.consensus.ends_with("LogCabin"));
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[fleet]
server_prefix = "node_"
server_user = "tester"

[ports]
consensus = 6000

[timing]
bootstrap_settle_secs = 1
join_timeout_secs = 30

[[sweep]]
clients = 2
servers = 1
scripts = ["StarTrek.cmd", "StarWars.cmd"]
repetitions = 3
"#;
        let config: HarnessConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.fleet.server_prefix, "node_");
        assert_eq!(config.fleet.client_prefix, "client_");
        assert_eq!(config.ports.consensus, 6000);
        assert_eq!(config.timing.bootstrap_settle_secs, 1);
        assert_eq!(config.timing.join_timeout_secs, 30);
        assert_eq!(config.sweep.len(), 1);
        assert_eq!(config.sweep[0].repetitions, 3);
        config.validate().unwrap();
    }

    #[test]
    fn config_missing_sections_use_defaults() {
        let config: HarnessConfig = toml::from_str("").unwrap();
        assert_eq!(config.timing.injection_delay_secs, 5);
        assert_eq!(config.workload.requests_per_client, 100);
        assert_eq!(config.workload.scripts.len(), 2);
    }

    #[test]
    fn golden_lookup_by_script_name() {
        let config = HarnessConfig::default();
        assert!(config.golden_for("StarTrek.cmd").is_some());
        assert!(config.golden_for("StarWars.cmd").is_some());
        assert!(config.golden_for("Shrek.cmd").is_none());
    }

    #[test]
    fn cluster_port_depends_on_size() {
        let config = HarnessConfig::default();
        assert_eq!(config.cluster(1).unwrap().service_port, 1234);
        assert_eq!(config.cluster(5).unwrap().service_port, 9001);
    }

    #[test]
    fn validate_rejects_quorum_breaking_case() {
        let toml = r#"
[[sweep]]
clients = 1
servers = 3
failures = 2
scripts = ["StarTrek.cmd"]
"#;
        let config: HarnessConfig = toml::from_str(toml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidCase { case: 0, .. })
        ));
    }

    #[test]
    fn validate_rejects_unknown_script() {
        let toml = r#"
[[sweep]]
clients = 1
servers = 1
scripts = ["Shrek.cmd"]
"#;
        let config: HarnessConfig = toml::from_str(toml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownScript { case: 0, .. })
        ));
    }

    #[test]
    fn case_label_derivation() {
        let toml = r#"
[[sweep]]
clients = 2
servers = 5
failures = 2
scripts = ["StarTrek.cmd", "StarWars.cmd"]

[[sweep]]
clients = 1
servers = 1
scripts = ["StarTrek.cmd"]
label = "smoke"
"#;
        let config: HarnessConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.sweep[0].label(), "c2_s5_f2");
        assert_eq!(config.sweep[1].label(), "smoke");
    }
}
