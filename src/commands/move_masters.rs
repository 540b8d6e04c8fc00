use anyhow::{Context, Result};

use cluster_cli::cluster::{Cluster, Outcome, RunOptions};
use cluster_cli::consul::ConsulBackend;

pub async fn move_masters_from<B: ConsulBackend>(
    cluster: &Cluster<B>,
    node: &str,
    default_master: Option<&str>,
    options: &RunOptions,
) -> Result<()> {
    let outcome = cluster
        .move_masters_from(node, default_master, options)
        .await
        .with_context(|| format!("Cannot move masters from {node}"))?;

    let reports = match outcome {
        Outcome::Completed(reports) => reports,
        Outcome::Aborted => {
            println!("Not confirmed, Aborting");
            return Ok(());
        }
    };

    if reports.is_empty() {
        println!("No master hosted on {node}");
        return Ok(());
    }

    let mut failed = 0;
    for report in &reports {
        match &report.result {
            Ok(event_id) => println!("{}: {} (event {event_id})", report.key, report.after),
            Err(e) => {
                failed += 1;
                println!("{}: FAILED {e}", report.key);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} moves failed", reports.len());
    }
    Ok(())
}
