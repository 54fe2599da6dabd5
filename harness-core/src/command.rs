//! Typed builders for remote commands.
//!
//! Every action the harness performs on a fleet host (kill, clean, start,
//! reconfigure, read, run client) is a structured [`RemoteOp`] rendered to
//! a shell command line only at the execution boundary. This keeps the
//! orchestration logic testable without a live SSH channel.

/// A single remote action, rendered to shell text by [`RemoteOp::render`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOp {
    /// Force-terminate every process running the named binary.
    ///
    /// Idempotent: absence of a running process is not an error.
    KillProcess {
        /// Binary name as seen by `killall`.
        binary: String,
    },

    /// Delete persisted storage and stray artifacts from a previous run.
    CleanStorage {
        /// Paths (globs allowed) to remove.
        paths: Vec<String>,
    },

    /// Run the consensus daemon with its one-time bootstrap flag,
    /// establishing the host as the sole initial group member.
    BootstrapConsensus {
        /// Daemon binary path.
        binary: String,
        /// Daemon configuration file path on the remote host.
        config_path: String,
    },

    /// Run the consensus daemon as an ordinary member.
    StartConsensus {
        /// Daemon binary path.
        binary: String,
        /// Daemon configuration file path on the remote host.
        config_path: String,
    },

    /// Run the standalone (single-node) service variant.
    StartStandalone {
        /// Service binary path.
        binary: String,
        /// Port the service binds to.
        port: u16,
    },

    /// Run the fault-tolerant service variant. Takes no arguments; the
    /// binary reads its own configuration.
    StartReplicated {
        /// Service binary path.
        binary: String,
    },

    /// Set consensus-group membership to the full endpoint list. This is
    /// the step that converts the bootstrap singleton into a fault-tolerant
    /// group.
    Reconfigure {
        /// Reconfiguration tool binary path.
        tool: String,
        /// Comma-separated membership string.
        membership: String,
    },

    /// Read one artifact back from the replicated store.
    ReadArtifact {
        /// Read-query tool binary path.
        tool: String,
        /// Comma-separated membership string.
        membership: String,
        /// Artifact key to read.
        key: String,
    },

    /// Invoke the workload client against a named script.
    RunClient {
        /// Client binary path.
        binary: String,
        /// Server network name the client connects to.
        server: String,
        /// Client identity (1-based index).
        client_id: usize,
        /// Number of requests the client issues.
        requests: u32,
        /// Service port.
        port: u16,
        /// Workload script path on the client host.
        script: String,
    },
}

impl RemoteOp {
    /// Render the operation to a shell command line.
    pub fn render(&self) -> String {
        match self {
            RemoteOp::KillProcess { binary } => format!("killall -9 {}", binary),
            RemoteOp::CleanStorage { paths } => format!("rm -rf {}", paths.join(" ")),
            RemoteOp::BootstrapConsensus {
                binary,
                config_path,
            } => format!("{} --config {} --bootstrap", binary, config_path),
            RemoteOp::StartConsensus {
                binary,
                config_path,
            } => format!("{} --config {}", binary, config_path),
            RemoteOp::StartStandalone { binary, port } => format!("{} {}", binary, port),
            RemoteOp::StartReplicated { binary } => binary.clone(),
            RemoteOp::Reconfigure { tool, membership } => {
                format!("{} {}", tool, membership)
            }
            RemoteOp::ReadArtifact {
                tool,
                membership,
                key,
            } => format!("{} {} {}", tool, membership, sh_quote(key)),
            RemoteOp::RunClient {
                binary,
                server,
                client_id,
                requests,
                port,
                script,
            } => format!(
                "{} {} {} {} {} {}",
                binary,
                server,
                client_id,
                requests,
                port,
                sh_quote(script)
            ),
        }
    }
}

impl std::fmt::Display for RemoteOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// Quote a shell argument if it contains characters the remote shell would
/// interpret. Single quotes in the argument are escaped by splicing.
pub fn sh_quote(arg: &str) -> String {
    let safe = arg
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | ':' | ','));
    if safe && !arg.is_empty() {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
