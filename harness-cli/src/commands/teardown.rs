//! Kill every service process on the fleet.

use std::collections::HashMap;

use anyhow::Result;

use flock_harness::cluster::ClusterOrchestrator;
use flock_harness::config::HarnessConfig;
use flock_harness::ssh::SessionPool;

/// Run the teardown command.
pub async fn run(config: &HarnessConfig, servers: usize) -> Result<()> {
    let cluster = config.cluster(servers)?;
    let pool = SessionPool::new(config.fleet.clone())?;

    let mut sessions = HashMap::new();
    for host in &cluster.servers {
        sessions.insert(host.name.clone(), pool.open(host).await?);
    }

    let orchestrator = ClusterOrchestrator::new(config);
    orchestrator.tear_down(&cluster, &sessions).await?;
    pool.close_all().await;

    println!("tore down {} server(s)", servers);
    Ok(())
}
