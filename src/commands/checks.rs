use anyhow::{Context, Result};

use cluster_cli::cluster::{ChecksByNode, Cluster};
use cluster_cli::consul::ConsulBackend;

pub async fn checks<B: ConsulBackend>(cluster: &Cluster<B>, all: bool) -> Result<()> {
    let by_node = cluster
        .checks(all)
        .await
        .context("Failed to read health checks")?;

    print!("{}", render(&by_node));
    Ok(())
}

/// One line per node, service and check
fn render(by_node: &ChecksByNode) -> String {
    let mut out = String::new();
    for (node, services) in by_node {
        out.push_str(&format!("Node {node}:\n"));
        for service in services.values() {
            out.push_str(&format!(" - Service {}:\n", service.name));
            for (name, status, _output) in &service.checks {
                out.push_str(&format!("    - Check ({status}): {name}\n"));
            }
        }
    }
    out
}
