//! SSH execution primitives: authenticated remote channels per fleet host.
//!
//! Shells out to `ssh`/`scp` via `tokio::process::Command`. Each
//! [`Session`] is backed by an OpenSSH ControlMaster connection so that one
//! authenticated channel per host serves every command of a run and is
//! closed exactly once at run end. Host keys are accepted on first use
//! (`StrictHostKeyChecking=no`); the fleet is a controlled test
//! environment, not a security boundary.
//!
//! No command is retried: each invocation is fire-and-forget from the
//! pool's perspective, with ordering left to the caller.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::command::sh_quote;
use crate::config::FleetConfig;
use crate::hosts::{Host, Role};

/// Exit code the ssh client reserves for its own failures (connection
/// refused, resolution failure, lost channel). Remote commands pass their
/// own exit codes through unchanged.
pub const SSH_ERROR_EXIT: i32 = 255;

/// Errors from SSH operations.
#[derive(Debug, Error)]
pub enum SshError {
    /// The ssh/scp process itself could not be spawned.
    #[error("ssh spawn error: {0}")]
    Spawn(#[from] std::io::Error),

    /// The master connection to a host could not be established.
    /// Fatal for the run: nothing was brought up yet.
    #[error("cannot connect to {host}: {stderr}")]
    Connect {
        /// Target host.
        host: String,
        /// Standard error from the ssh client.
        stderr: String,
    },

    /// A remote command returned a nonzero exit status.
    #[error("command failed on {host}: exit={exit_code}, stderr={stderr}")]
    CommandFailed {
        /// Target host.
        host: String,
        /// Exit code.
        exit_code: i32,
        /// Standard error output.
        stderr: String,
    },

    /// SCP transfer failed.
    #[error("scp failed: {0}")]
    ScpFailed(String),
}

/// Result of executing a remote command.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Exit code (0 = success).
    pub exit_code: i32,
}

impl ExecResult {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

struct SessionInner {
    host: Host,
    user: String,
    control_path: PathBuf,
    connect_timeout_secs: u64,
    identity_file: Option<PathBuf>,
    closed: AtomicBool,
}

/// An open, authenticated remote execution channel bound to one [`Host`].
///
/// Cheap to clone; concurrent `exec` calls multiplex over the same master
/// connection. [`Session::close`] takes effect once no matter how many
/// clones exist.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
    pool_closed: Arc<AtomicUsize>,
}

impl Session {
    /// Host this session is bound to.
    pub fn host(&self) -> &Host {
        &self.inner.host
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.inner.user, self.inner.host.name)
    }

    /// Execute one command to completion on the remote host.
    ///
    /// Returns the raw result including exit code; does NOT fail on nonzero
    /// exit; use [`Session::exec_ok`] for that.
    pub async fn exec(&self, cmd: &str) -> Result<ExecResult, SshError> {
        let args = exec_args(
            &self.inner.control_path,
            self.inner.connect_timeout_secs,
            &self.destination(),
            cmd,
        );
        let output = tokio::process::Command::new("ssh")
            .args(&args)
            .output()
            .await?;

        Ok(ExecResult {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    /// Execute a command, failing on nonzero exit.
    pub async fn exec_ok(&self, cmd: &str) -> Result<ExecResult, SshError> {
        let result = self.exec(cmd).await?;
        if !result.success() {
            return Err(SshError::CommandFailed {
                host: self.inner.host.name.clone(),
                exit_code: result.exit_code,
                stderr: result.stderr.clone(),
            });
        }
        Ok(result)
    }

    /// Run a script in a remote shell, detached from the channel.
    ///
    /// The remote process survives channel close: it runs under `nohup`
    /// with stdin closed and combined output appended to `log_path`.
    /// Returns once the remote shell has forked the process.
    pub async fn exec_detached(&self, script: &str, log_path: &str) -> Result<(), SshError> {
        let cmd = detach_command(script, log_path);
        let result = self.exec(&cmd).await?;
        if !result.success() {
            return Err(SshError::CommandFailed {
                host: self.inner.host.name.clone(),
                exit_code: result.exit_code,
                stderr: result.stderr,
            });
        }
        Ok(())
    }

    /// Copy a local file to the remote host via SCP.
    pub async fn scp_to(&self, local: &Path, remote: &str) -> Result<(), SshError> {
        let mut args: Vec<String> = vec![
            "-o".into(),
            "StrictHostKeyChecking=no".into(),
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            format!("ControlPath={}", self.inner.control_path.display()),
        ];
        if let Some(key) = &self.inner.identity_file {
            args.push("-i".into());
            args.push(key.display().to_string());
        }
        args.push(local.to_str().unwrap_or("").into());
        args.push(format!("{}:{}", self.destination(), remote));

        let output = tokio::process::Command::new("scp")
            .args(&args)
            .output()
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SshError::ScpFailed(format!(
                "scp to {}:{} failed: {}",
                self.destination(),
                remote,
                stderr
            )));
        }
        Ok(())
    }

    /// Release the channel. Idempotent, and safe to call even if prior
    /// commands failed; teardown errors are swallowed.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pool_closed.fetch_add(1, Ordering::SeqCst);

        let args = vec![
            "-O".to_string(),
            "exit".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", self.inner.control_path.display()),
            self.destination(),
        ];
        if let Err(e) = tokio::process::Command::new("ssh").args(&args).output().await {
            tracing::debug!("ignoring ssh -O exit failure for {}: {}", self.inner.host, e);
        }
    }
}

/// Pool of authenticated channels, one per host, with open/close accounting.
///
/// The sweep controller owns one pool per run; [`SessionPool::close_all`]
/// guarantees release regardless of how the run ended.
pub struct SessionPool {
    fleet: FleetConfig,
    control_dir: tempfile::TempDir,
    sessions: Mutex<Vec<Session>>,
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
}

impl SessionPool {
    /// Create an empty pool. The control-socket directory lives until the
    /// pool is dropped.
    pub fn new(fleet: FleetConfig) -> Result<Self, SshError> {
        let control_dir = tempfile::tempdir()?;
        Ok(Self {
            fleet,
            control_dir,
            sessions: Mutex::new(Vec::new()),
            opened: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Open an authenticated channel to a host.
    ///
    /// Establishes the SSH master connection up front, so authentication
    /// and reachability problems surface here, before bring-up.
    pub async fn open(&self, host: &Host) -> Result<Session, SshError> {
        let user = match host.role {
            Role::Server => self.fleet.server_user.clone(),
            Role::Client => self.fleet.client_user.clone(),
        };
        let control_path = self
            .control_dir
            .path()
            .join(format!("{}.sock", host.name));
        let destination = format!("{}@{}", user, host.name);

        let args = master_args(
            &control_path,
            self.fleet.connect_timeout_secs,
            self.fleet.identity_file.as_deref(),
            &destination,
        );
        let output = tokio::process::Command::new("ssh")
            .args(&args)
            .output()
            .await?;
        if !output.status.success() {
            return Err(SshError::Connect {
                host: host.name.clone(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        let session = Session {
            inner: Arc::new(SessionInner {
                host: host.clone(),
                user,
                control_path,
                connect_timeout_secs: self.fleet.connect_timeout_secs,
                identity_file: self.fleet.identity_file.clone(),
                closed: AtomicBool::new(false),
            }),
            pool_closed: Arc::clone(&self.closed),
        };
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.sessions
            .lock()
            .expect("session registry poisoned")
            .push(session.clone());
        tracing::debug!("opened session to {}", host.name);
        Ok(session)
    }

    /// Close every channel the pool ever opened. Idempotent.
    pub async fn close_all(&self) {
        let sessions: Vec<Session> = self
            .sessions
            .lock()
            .expect("session registry poisoned")
            .clone();
        for session in sessions {
            session.close().await;
        }
    }

    /// Number of channels opened over the pool's lifetime.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of channels closed over the pool's lifetime.
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Session bound to a host nothing listens on. Commands sent through it
/// fail at the ssh layer, which is exactly what unreachable-host tests
/// need.
#[cfg(test)]
pub(crate) fn unreachable_session(host: Host) -> Session {
    Session {
        inner: Arc::new(SessionInner {
            host,
            user: "nobody".to_string(),
            control_path: PathBuf::from("/nonexistent/flock-harness-test.sock"),
            connect_timeout_secs: 1,
            identity_file: None,
            closed: AtomicBool::new(false),
        }),
        pool_closed: Arc::new(AtomicUsize::new(0)),
    }
}

fn common_opts(control_path: &Path, connect_timeout_secs: u64) -> Vec<String> {
    vec![
        "-o".into(),
        "StrictHostKeyChecking=no".into(),
        "-o".into(),
        "BatchMode=yes".into(),
        "-o".into(),
        format!("ConnectTimeout={}", connect_timeout_secs),
        "-o".into(),
        format!("ControlPath={}", control_path.display()),
    ]
}

/// Arguments for establishing the background master connection.
fn master_args(
    control_path: &Path,
    connect_timeout_secs: u64,
    identity_file: Option<&Path>,
    destination: &str,
) -> Vec<String> {
    let mut args = common_opts(control_path, connect_timeout_secs);
    args.push("-o".into());
    args.push("ControlMaster=yes".into());
    args.push("-o".into());
    args.push("ControlPersist=yes".into());
    if let Some(key) = identity_file {
        args.push("-i".into());
        args.push(key.display().to_string());
    }
    args.push("-n".into());
    args.push("-N".into());
    args.push("-f".into());
    args.push(destination.into());
    args
}

/// Arguments for one multiplexed command execution.
fn exec_args(
    control_path: &Path,
    connect_timeout_secs: u64,
    destination: &str,
    cmd: &str,
) -> Vec<String> {
    let mut args = common_opts(control_path, connect_timeout_secs);
    args.push(destination.into());
    args.push(cmd.into());
    args
}

/// Remote shell line that forks `script` detached from the channel.
fn detach_command(script: &str, log_path: &str) -> String {
    format!(
        "nohup sh -c {} >> {} 2>&1 < /dev/null &",
        sh_quote(script),
        log_path
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hosts::Host;

    #[test]
    fn master_args_accept_unknown_host_keys() {
        let args = master_args(Path::new("/tmp/ctl/s1.sock"), 30, None, "server@server_1");
        let joined = args.join(" ");
        assert!(joined.contains("StrictHostKeyChecking=no"));
        assert!(joined.contains("BatchMode=yes"));
        assert!(joined.contains("ControlMaster=yes"));
        assert!(joined.ends_with("-n -N -f server@server_1"));
    }

    #[test]
    fn master_args_include_identity_file_when_set() {
        let args = master_args(
            Path::new("/tmp/ctl/s1.sock"),
            30,
            Some(Path::new("/home/tester/fleet_key")),
            "server@server_1",
        );
        let joined = args.join(" ");
        assert!(joined.contains("-i /home/tester/fleet_key"));
    }

    #[test]
    fn exec_args_route_through_control_socket() {
        let args = exec_args(
            Path::new("/tmp/ctl/c2.sock"),
            30,
            "client@client_2",
            "killall -9 FT_SimpleFileLock_Client",
        );
        assert_eq!(args[args.len() - 2], "client@client_2");
        assert_eq!(args[args.len() - 1], "killall -9 FT_SimpleFileLock_Client");
        assert!(args.join(" ").contains("ControlPath=/tmp/ctl/c2.sock"));
    }

    #[test]
    fn detach_command_redirects_and_backgrounds() {
        let cmd = detach_command("LogCabin --config /home/server/logcabin.conf", "/home/server/logs/run_0.log");
        assert_eq!(
            cmd,
            "nohup sh -c 'LogCabin --config /home/server/logcabin.conf' \
             >> /home/server/logs/run_0.log 2>&1 < /dev/null &"
        );
    }

    #[test]
    fn pool_starts_with_zero_counts() {
        let pool = SessionPool::new(FleetConfig::default()).unwrap();
        assert_eq!(pool.opened(), 0);
        assert_eq!(pool.closed(), 0);
    }

    #[tokio::test]
    #[ignore = "requires fleet"]
    async fn fleet_exec_whoami() {
        let pool = SessionPool::new(FleetConfig::default()).unwrap();
        let session = pool.open(&Host::server("server_", 1)).await.expect("open failed");
        let result = session.exec_ok("whoami").await.expect("whoami failed");
        assert_eq!(result.stdout.trim(), "server");
        pool.close_all().await;
    }

    #[tokio::test]
    #[ignore = "requires fleet"]
    async fn fleet_close_is_idempotent_and_counted_once() {
        let pool = SessionPool::new(FleetConfig::default()).unwrap();
        let session = pool.open(&Host::server("server_", 1)).await.expect("open failed");
        session.close().await;
        session.close().await;
        pool.close_all().await;
        assert_eq!(pool.opened(), 1);
        assert_eq!(pool.closed(), 1);
    }

    #[tokio::test]
    #[ignore = "requires fleet"]
    async fn fleet_detached_process_survives_channel() {
        let pool = SessionPool::new(FleetConfig::default()).unwrap();
        let session = pool.open(&Host::server("server_", 1)).await.expect("open failed");
        session
            .exec_detached("sleep 5; echo done", "/tmp/flock-harness-detach-test.log")
            .await
            .expect("detach failed");
        session.close().await;

        let probe = pool.open(&Host::server("server_", 1)).await.expect("reopen failed");
        let result = probe
            .exec_ok("pgrep -f 'sleep 5' > /dev/null && echo alive")
            .await
            .expect("probe failed");
        assert_eq!(result.stdout.trim(), "alive");
        pool.close_all().await;
    }
}
