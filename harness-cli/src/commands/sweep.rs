//! Run the full sweep matrix.

use anyhow::Result;

use flock_harness::config::HarnessConfig;
use flock_harness::sweep::SweepController;

/// Run the sweep command.
pub async fn run(config: &HarnessConfig, json: bool) -> Result<()> {
    if config.sweep.is_empty() {
        anyhow::bail!("no sweep cases declared in the configuration");
    }

    let controller = SweepController::new(config.clone());
    let results = controller.run_sweep().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for result in &results {
            let verdict = if result.passed { "PASS" } else { "FAIL" };
            match &result.failure {
                Some(reason) => {
                    println!("{} run {}: {} ({})", result.label, result.run_index, verdict, reason)
                }
                None => println!("{} run {}: {}", result.label, result.run_index, verdict),
            }
        }
        let passed = results.iter().filter(|r| r.passed).count();
        println!();
        println!(
            "{}/{} runs passed; report appended to {}",
            passed,
            results.len(),
            config.paths.report_file.display()
        );
    }

    let failed = results.iter().filter(|r| !r.passed).count();
    if failed > 0 {
        anyhow::bail!("{} of {} runs failed", failed, results.len());
    }
    Ok(())
}
