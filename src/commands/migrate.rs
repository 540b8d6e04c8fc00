use anyhow::{Context, Result};

use cluster_cli::cluster::{Cluster, MigrateRequest, Outcome, RunOptions};
use cluster_cli::consul::ConsulBackend;

pub fn request(
    source_repo: String,
    source_branch: String,
    target_branch: String,
    target_repo: Option<String>,
    no_update: bool,
) -> MigrateRequest {
    MigrateRequest {
        source_repo,
        source_branch,
        target_branch,
        target_repo,
        update: !no_update,
    }
}

pub async fn migrate<B: ConsulBackend>(
    cluster: &Cluster<B>,
    request: &MigrateRequest,
    options: &RunOptions,
) -> Result<()> {
    let outcome = cluster.migrate(request, options).await.with_context(|| {
        format!(
            "Migration from {}/{} to {} failed",
            request.source_repo, request.source_branch, request.target_branch
        )
    })?;

    match outcome {
        Outcome::Completed(dispatched) => {
            println!("Migrate event {} fired for {}", dispatched.event_id, dispatched.key);
            if options.wait {
                println!("Migration done");
            }
        }
        Outcome::Aborted => println!("Not confirmed, Aborting"),
    }
    Ok(())
}
