//! Copy service binaries and workload scripts onto the fleet.

use std::path::Path;

use anyhow::{Context, Result};

use flock_harness::config::HarnessConfig;
use flock_harness::hosts::Host;
use flock_harness::ssh::{Session, SessionPool};

/// Run the install command.
pub async fn run(
    config: &HarnessConfig,
    servers: usize,
    clients: usize,
    server_dir: Option<&Path>,
    client_dir: Option<&Path>,
    scripts_dir: Option<&Path>,
) -> Result<()> {
    if server_dir.is_none() && client_dir.is_none() && scripts_dir.is_none() {
        anyhow::bail!("nothing to install: pass --server-dir, --client-dir or --scripts-dir");
    }

    let pool = SessionPool::new(config.fleet.clone())?;

    if let Some(dir) = server_dir {
        let bin_dir = parent_dir(&config.binaries.standalone_server);
        let conf_name = file_name(&config.paths.consensus_config);
        for ordinal in 1..=servers {
            let host = Host::server(&config.fleet.server_prefix, ordinal);
            let session = pool.open(&host).await?;
            session.exec_ok(&format!("mkdir -p {}", bin_dir)).await?;
            for file in local_files(dir)? {
                let name = file_name(&file.display().to_string()).to_string();
                // The consensus config lands at its configured path, not in bin.
                let remote = if name == conf_name {
                    config.paths.consensus_config.clone()
                } else {
                    format!("{}/{}", bin_dir, name)
                };
                tracing::info!(host = %host.name, %remote, "installing");
                session.scp_to(&file, &remote).await?;
            }
            session.exec_ok(&format!("chmod +x {}/*", bin_dir)).await?;
        }
    }

    if let Some(dir) = client_dir {
        let bin_dir = parent_dir(&config.binaries.client);
        for ordinal in 1..=clients {
            let host = Host::client(&config.fleet.client_prefix, ordinal);
            let session = pool.open(&host).await?;
            session.exec_ok(&format!("mkdir -p {}", bin_dir)).await?;
            push_dir(&session, dir, bin_dir).await?;
            session.exec_ok(&format!("chmod +x {}/*", bin_dir)).await?;
        }
    }

    if let Some(dir) = scripts_dir {
        for ordinal in 1..=clients {
            let host = Host::client(&config.fleet.client_prefix, ordinal);
            let session = pool.open(&host).await?;
            session
                .exec_ok(&format!("mkdir -p {}", config.paths.script_dir))
                .await?;
            push_dir(&session, dir, &config.paths.script_dir).await?;
        }
    }

    pool.close_all().await;
    println!("installed to {} server(s), {} client(s)", servers, clients);
    Ok(())
}

/// Copy every regular file in `dir` into `remote_dir` on the session's host.
async fn push_dir(session: &Session, dir: &Path, remote_dir: &str) -> Result<()> {
    for file in local_files(dir)? {
        let name = file_name(&file.display().to_string()).to_string();
        let remote = format!("{}/{}", remote_dir, name);
        tracing::info!(host = %session.host().name, %remote, "installing");
        session.scp_to(&file, &remote).await?;
    }
    Ok(())
}

/// Regular files in a local directory, sorted by name.
fn local_files(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    let mut files = Vec::new();
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or(".")
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_path_helpers() {
        assert_eq!(parent_dir("/home/server/bin/SimpleFileLock_Server"), "/home/server/bin");
        assert_eq!(parent_dir("LogCabin"), ".");
        assert_eq!(file_name("/home/server/logcabin.conf"), "logcabin.conf");
        assert_eq!(file_name("logcabin.conf"), "logcabin.conf");
    }

    #[test]
    fn local_files_skips_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b"), "x").unwrap();
        std::fs::write(dir.path().join("a"), "x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let files = local_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
