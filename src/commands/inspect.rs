use anyhow::{Context, Result};

use cluster_cli::cluster::Cluster;
use cluster_cli::consul::ConsulBackend;

pub async fn inspect<B: ConsulBackend>(cluster: &Cluster<B>, node: &str) -> Result<()> {
    let keys = cluster
        .inspect_node(node)
        .await
        .with_context(|| format!("Failed to inspect {node}"))?;

    println!("Masters hosted on {node}: {}", keys.len());
    for key in keys {
        println!(" - {key}");
    }
    Ok(())
}

pub async fn nodes<B: ConsulBackend>(cluster: &Cluster<B>) -> Result<()> {
    for node in cluster.nodes().await.context("Failed to list nodes")? {
        println!("{node}");
    }
    Ok(())
}
