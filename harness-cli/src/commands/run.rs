//! Execute a single run with an explicit shape.

use anyhow::Result;

use flock_harness::config::{HarnessConfig, SweepCaseConfig};
use flock_harness::sweep::SweepController;

/// Run the run command.
pub async fn run(
    config: &HarnessConfig,
    clients: usize,
    servers: usize,
    failures: usize,
    scripts: Vec<String>,
    json: bool,
) -> Result<()> {
    for script in &scripts {
        if config.golden_for(script).is_none() {
            anyhow::bail!("no golden output declared for script {:?}", script);
        }
    }

    let case = SweepCaseConfig {
        clients,
        servers,
        failures,
        scripts,
        repetitions: 1,
        label: None,
    };

    let controller = SweepController::new(config.clone());
    let result = controller.run_once(&case, 0).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!(
            "{}: {} ({}s)",
            result.label,
            if result.passed { "PASS" } else { "FAIL" },
            result.duration.as_secs()
        );
        if let Some(reason) = &result.failure {
            println!("  run error: {}", reason);
        }
        if let Some(verdict) = &result.verdict {
            for client in &verdict.clients {
                if client.matched {
                    println!("  client {} ({}): ok", client.client, client.script);
                } else {
                    println!(
                        "  client {} ({}): expected {:?}, got {:?}",
                        client.client, client.script, client.expected, client.actual
                    );
                }
            }
        }
        for (client, status) in &result.clients {
            println!("  client {} status: {:?}", client, status);
        }
    }

    if !result.passed {
        anyhow::bail!("run failed");
    }
    Ok(())
}
