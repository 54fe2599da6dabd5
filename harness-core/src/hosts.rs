//! Fleet topology types: hosts, cluster shape, and per-run parameters.
//!
//! Host names follow the fleet convention `<prefix><ordinal>` with 1-based
//! ordinals (`server_1`, `client_2`). The bootstrap host is always the
//! lowest server ordinal; the storage-cleanup host is the highest, because
//! the test storage volume is shared across the fleet.

use thiserror::Error;

/// Errors from topology construction and run-parameter validation.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// Cluster must have at least one server.
    #[error("cluster must have at least one server")]
    NoServers,

    /// One workload script is required per client.
    #[error("expected {clients} workload scripts, got {scripts}")]
    ScriptCountMismatch {
        /// Configured client count.
        clients: usize,
        /// Number of scripts supplied.
        scripts: usize,
    },

    /// Failure count would break the surviving quorum.
    #[error("failure count {failures} exceeds tolerance {tolerance} of a {servers}-server cluster")]
    FailureCountTooHigh {
        /// Requested failure count.
        failures: usize,
        /// Maximum failures the replication scheme tolerates.
        tolerance: usize,
        /// Server count.
        servers: usize,
    },
}

/// Role a fleet host plays in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Runs the consensus daemon and the service under test.
    Server,
    /// Runs workload client processes.
    Client,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Server => write!(f, "server"),
            Role::Client => write!(f, "client"),
        }
    }
}

/// One fleet host, identified by role and ordinal.
///
/// Immutable for the process lifetime; built from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Host {
    /// Host role.
    pub role: Role,
    /// 1-based ordinal within the role.
    pub ordinal: usize,
    /// Network name (`<prefix><ordinal>`).
    pub name: String,
}

impl Host {
    /// Build a server host from the fleet naming prefix.
    pub fn server(prefix: &str, ordinal: usize) -> Self {
        Self {
            role: Role::Server,
            ordinal,
            name: format!("{}{}", prefix, ordinal),
        }
    }

    /// Build a client host from the fleet naming prefix.
    pub fn client(prefix: &str, ordinal: usize) -> Self {
        Self {
            role: Role::Client,
            ordinal,
            name: format!("{}{}", prefix, ordinal),
        }
    }
}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Shape of the cluster under test for one run.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Server hosts, ascending ordinal order.
    pub servers: Vec<Host>,
    /// Consensus endpoints (`host:port`), same order as `servers`.
    pub endpoints: Vec<String>,
    /// Comma-separated consensus-group membership string.
    pub membership: String,
    /// Port the application service listens on.
    pub service_port: u16,
}

impl ClusterConfig {
    /// Derive the cluster shape from the fleet naming convention.
    pub fn new(
        server_prefix: &str,
        server_count: usize,
        consensus_port: u16,
        service_port: u16,
    ) -> Result<Self, TopologyError> {
        if server_count == 0 {
            return Err(TopologyError::NoServers);
        }
        let servers: Vec<Host> = (1..=server_count)
            .map(|i| Host::server(server_prefix, i))
            .collect();
        let endpoints: Vec<String> = servers
            .iter()
            .map(|h| format!("{}:{}", h.name, consensus_port))
            .collect();
        let membership = endpoints.join(",");
        Ok(Self {
            servers,
            endpoints,
            membership,
            service_port,
        })
    }

    /// Number of servers in the cluster.
    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    /// True if the cluster runs the fault-tolerant service variant.
    pub fn fault_tolerant(&self) -> bool {
        self.servers.len() > 1
    }

    /// Host that bootstraps the consensus group (lowest ordinal).
    pub fn bootstrap_host(&self) -> &Host {
        &self.servers[0]
    }

    /// Host that owns storage cleanup and runs the fault-tolerant service
    /// (highest ordinal; the storage volume is shared, so one host cleans
    /// for all).
    pub fn storage_host(&self) -> &Host {
        &self.servers[self.servers.len() - 1]
    }

    /// Host clients connect to: the fault-tolerant service host for
    /// multi-node clusters, the sole server otherwise.
    pub fn service_host(&self) -> &Host {
        if self.fault_tolerant() {
            self.storage_host()
        } else {
            &self.servers[0]
        }
    }

    /// Maximum failures the replication scheme tolerates while keeping a
    /// majority quorum.
    pub fn failure_tolerance(&self) -> usize {
        (self.servers.len() - 1) / 2
    }
}

/// Parameters for one run within a sweep.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Number of concurrent workload clients.
    pub client_count: usize,
    /// Workload script per client, index-aligned.
    pub scripts: Vec<String>,
    /// Number of server processes to kill mid-run.
    pub failure_count: usize,
    /// Index used to namespace per-run log artifacts.
    pub run_index: usize,
}

impl RunConfig {
    /// Check this run's parameters against the cluster shape.
    ///
    /// Failure counts that would break the surviving quorum are rejected
    /// here, at configuration level; the injector itself does not
    /// re-enforce this.
    pub fn validate(&self, cluster: &ClusterConfig) -> Result<(), TopologyError> {
        if self.scripts.len() != self.client_count {
            return Err(TopologyError::ScriptCountMismatch {
                clients: self.client_count,
                scripts: self.scripts.len(),
            });
        }
        let tolerance = cluster.failure_tolerance();
        if self.failure_count > tolerance {
            return Err(TopologyError::FailureCountTooHigh {
                failures: self.failure_count,
                tolerance,
                servers: cluster.server_count(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_names_follow_prefix_convention() {
        assert_eq!(Host::server("server_", 1).name, "server_1");
        assert_eq!(Host::server("server_", 5).name, "server_5");
        assert_eq!(Host::client("client_", 2).name, "client_2");
    }

    #[test]
    fn cluster_membership_string() {
        let cluster = ClusterConfig::new("server_", 3, 5254, 9001).unwrap();
        assert_eq!(
            cluster.membership,
            "server_1:5254,server_2:5254,server_3:5254"
        );
        assert_eq!(cluster.endpoints.len(), 3);
    }

    #[test]
    fn cluster_membership_matches_server_count() {
        for n in 1..=7 {
            let cluster = ClusterConfig::new("server_", n, 5254, 9001).unwrap();
            assert_eq!(cluster.membership.split(',').count(), n);
        }
    }

    #[test]
    fn cluster_zero_servers_rejected() {
        assert!(matches!(
            ClusterConfig::new("server_", 0, 5254, 9001),
            Err(TopologyError::NoServers)
        ));
    }

    #[test]
    fn bootstrap_is_lowest_storage_is_highest() {
        let cluster = ClusterConfig::new("server_", 5, 5254, 9001).unwrap();
        assert_eq!(cluster.bootstrap_host().name, "server_1");
        assert_eq!(cluster.storage_host().name, "server_5");
    }

    #[test]
    fn service_host_single_vs_replicated() {
        let single = ClusterConfig::new("server_", 1, 5254, 1234).unwrap();
        assert_eq!(single.service_host().name, "server_1");
        assert!(!single.fault_tolerant());

        let multi = ClusterConfig::new("server_", 5, 5254, 9001).unwrap();
        assert_eq!(multi.service_host().name, "server_5");
        assert!(multi.fault_tolerant());
    }

    #[test]
    fn failure_tolerance_is_minority() {
        let tolerances: Vec<usize> = (1..=7)
            .map(|n| {
                ClusterConfig::new("server_", n, 5254, 9001)
                    .unwrap()
                    .failure_tolerance()
            })
            .collect();
        assert_eq!(tolerances, vec![0, 0, 1, 1, 2, 2, 3]);
    }

    fn run(clients: usize, scripts: &[&str], failures: usize) -> RunConfig {
        RunConfig {
            client_count: clients,
            scripts: scripts.iter().map(|s| s.to_string()).collect(),
            failure_count: failures,
            run_index: 0,
        }
    }

    #[test]
    fn run_config_script_count_must_match() {
        let cluster = ClusterConfig::new("server_", 3, 5254, 9001).unwrap();
        let bad = run(2, &["StarTrek.cmd"], 0);
        assert!(matches!(
            bad.validate(&cluster),
            Err(TopologyError::ScriptCountMismatch { clients: 2, scripts: 1 })
        ));
    }

    #[test]
    fn run_config_quorum_breaking_failures_rejected() {
        let cluster = ClusterConfig::new("server_", 5, 5254, 9001).unwrap();
        assert!(run(1, &["StarTrek.cmd"], 2).validate(&cluster).is_ok());
        assert!(run(1, &["StarTrek.cmd"], 3).validate(&cluster).is_err());
    }

    #[test]
    fn run_config_single_node_allows_no_failures() {
        let cluster = ClusterConfig::new("server_", 1, 5254, 1234).unwrap();
        assert!(run(1, &["StarTrek.cmd"], 0).validate(&cluster).is_ok());
        assert!(run(1, &["StarTrek.cmd"], 1).validate(&cluster).is_err());
    }
}
