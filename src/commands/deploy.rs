use anyhow::{Context, Result};

use cluster_cli::cluster::{Cluster, DeployRequest, Outcome, RunOptions};
use cluster_cli::consul::ConsulBackend;

pub fn request(
    repo: String,
    branch: String,
    master: Option<String>,
    slave: Option<String>,
) -> DeployRequest {
    DeployRequest {
        repo,
        branch,
        master,
        slave,
    }
}

pub async fn deploy<B: ConsulBackend>(
    cluster: &Cluster<B>,
    request: &DeployRequest,
    options: &RunOptions,
) -> Result<()> {
    let outcome = cluster
        .deploy(request, options)
        .await
        .with_context(|| format!("Deploy of {} on {} failed", request.repo, request.branch))?;

    match outcome {
        Outcome::Completed(report) => {
            println!("Deploy event {} fired for {}", report.dispatched.event_id, report.dispatched.key);
            if let Some(before) = &report.before {
                println!("  before: {before}");
            }
            println!("  after:  {}", report.after);
            if options.wait {
                println!("Deployment done");
            }
        }
        Outcome::Aborted => println!("Not confirmed, Aborting"),
    }
    Ok(())
}
