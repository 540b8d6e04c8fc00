//! Common test utilities

use md5::{Digest, Md5};
use std::time::Duration;

use cluster_cli::cluster::{Cluster, RunOptions};
use cluster_cli::consul::memory::MemoryState;
use cluster_cli::consul::{FiredEvent, MemoryConsul};
use cluster_cli::models::DeployPayload;
use cluster_cli::prompt::FixedAnswer;

/// Deploy date of fixture records
pub const DEPLOYED_BEFORE: &str = "2018-08-05T224229.591386";

/// Deploy date written by the simulated consumer
pub const DEPLOYED_AFTER: &str = "2018-08-06T101500.000001";

/// Build the JSON document of an application record
pub fn record_json(repo_url: &str, branch: &str, master: &str, slave: Option<&str>, date: &str) -> String {
    serde_json::json!({
        "repo_url": repo_url,
        "branch": branch,
        "deploy_date": date,
        "deploy_id": "39c4807d-100f-5566-27e5-fbc65d5c5207",
        "previous_deploy_id": null,
        "master": master,
        "slave": slave,
    })
    .to_string()
}

/// Key the deploy handler writes for `repo_url` on `branch`
///
/// Computed from the URL path as the handler does, without the crate's own
/// addressing code.
pub fn handler_key(repo_url: &str, branch: &str) -> String {
    let url = url::Url::parse(repo_url).expect("fixture URLs are absolute");
    let path = url.path().trim_end_matches('/').trim_end_matches(".git");
    let name = path.rsplit('/').next().unwrap_or(path).to_lowercase();
    let digest = format!("{:x}", Md5::digest(path.as_bytes()));
    format!("app/{name}_{branch}.{}", &digest[..5])
}

/// Store a record at the key its URL and branch map to, returning the key
pub fn seed(consul: &MemoryConsul, repo_url: &str, branch: &str, master: &str, slave: Option<&str>) -> String {
    let key = handler_key(repo_url, branch);
    consul.put(key.clone(), record_json(repo_url, branch, master, slave, DEPLOYED_BEFORE));
    key
}

/// Plays the deploy handler: rewrites the record as the payload asks
pub fn deploy_handler(event: &FiredEvent, state: &mut MemoryState) {
    if event.name != "deploy" {
        return;
    }
    let Ok(payload) = serde_json::from_value::<DeployPayload>(event.payload.clone()) else {
        return;
    };
    let key = handler_key(&payload.repo, &payload.branch);
    state.kv.insert(
        key,
        record_json(
            &payload.repo,
            &payload.branch,
            &payload.master,
            payload.slave.as_deref(),
            DEPLOYED_AFTER,
        ),
    );
}

/// Backend with three nodes whose events are handled right away
pub fn reacting_consul() -> MemoryConsul {
    MemoryConsul::new()
        .with_nodes(["node-1", "node-2", "node-3"])
        .with_reaction(deploy_handler)
}

/// Backend with three nodes and nobody listening to events
pub fn silent_consul() -> MemoryConsul {
    MemoryConsul::new().with_nodes(["node-1", "node-2", "node-3"])
}

/// Cluster answering `yes` to every confirmation, polling fast
pub fn cluster(consul: &MemoryConsul) -> Cluster<MemoryConsul> {
    Cluster::new(consul.clone())
        .with_prompt(FixedAnswer::yes())
        .with_poll_interval(Duration::from_millis(5))
}

/// Waiting options with a short budget
pub fn options() -> RunOptions {
    RunOptions::new(Duration::from_secs(2))
}
