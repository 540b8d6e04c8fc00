//! cluster-cli - Administrate services of a Consul-coordinated cluster
//!
//! Services are described in the Consul key-value store by an application
//! record naming the node hosting the master instance and, optionally, the
//! node hosting a slave. Deployments and data migrations are carried out by
//! an external handler listening to Consul events; this crate decides what
//! to ask for, fires the event, and can wait for the effect to show up in
//! the store.
//!
//! # Architecture
//!
//! - [`models`] - Application record codec and event payloads
//! - [`address`] - KV key computation and lookup
//! - [`topology`] - Master / slave assignment rules
//! - [`dispatch`] - Fire-and-wait event dispatch
//! - [`cluster`] - Deploy, migrate, move-masters-from, inspect, checks
//! - [`consul`] - Consul HTTP client and in-memory backend
//! - [`config`] - Configuration management
//! - [`prompt`] - Operator confirmation
//! - [`utils`] - Retry helpers
//!
//! # Example
//!
//! ```no_run
//! use cluster_cli::cluster::{Cluster, DeployRequest, RunOptions};
//! use cluster_cli::config::Config;
//! use cluster_cli::consul::{client::ClientConfig, ConsulClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let consul = ConsulClient::new(ClientConfig::from(&config.consul))?;
//!     let cluster = Cluster::from_config(consul, &config);
//!     let options = RunOptions::new(config.default_timeout());
//!     cluster
//!         .deploy(&DeployRequest::new("repo-name", "main"), &options)
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod cluster;
pub mod config;
pub mod consul;
pub mod dispatch;
pub mod error;
pub mod models;
pub mod prompt;
pub mod topology;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cluster::{Cluster, DeployRequest, MigrateRequest, Outcome, RunOptions};
    pub use crate::config::Config;
    pub use crate::consul::{ConsulBackend, ConsulClient, MemoryConsul};
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::models::ApplicationRecord;
}

pub use models::ApplicationRecord;
