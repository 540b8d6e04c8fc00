//! Cluster operations
//!
//! Each public method is one administrator command. It resolves addresses,
//! computes the new topology, asks for confirmation when requested, then
//! fires the event and optionally waits for it to take effect.
//!
//! The node list is read at most once per operation, through a [`Session`]
//! that does not outlive the call.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;
use tokio::sync::OnceCell;

use crate::address::{AddressResolver, Located, RepoRef};
use crate::config::Config;
use crate::consul::ConsulBackend;
use crate::dispatch::{DeployFinished, EventDispatcher, MigrateFinished};
use crate::error::{Error, Result};
use crate::models::{DeployPayload, Event, MigratePayload, MigrateTarget};
use crate::prompt::{Prompt, TerminalPrompt};
use crate::topology::{self, Assignment, NodeSet};

/// Branch names that can never receive migrated data
pub const FORBIDDEN_TARGET_BRANCHES: [&str; 2] = ["prod", "production"];

/// Result of an operation the operator may decline
#[derive(Debug)]
pub enum Outcome<T> {
    /// The operation ran
    Completed(T),
    /// The operator did not confirm; nothing was fired
    Aborted,
}

impl<T> Outcome<T> {
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Aborted => None,
        }
    }
}

/// How an operation runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Block until the effect is observed in the store
    pub wait: bool,
    /// Budget of the wait
    pub timeout: Duration,
    /// Ask for confirmation before firing
    pub ask_user: bool,
}

impl RunOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            wait: true,
            timeout,
            ask_user: true,
        }
    }

    pub fn no_wait(mut self) -> Self {
        self.wait = false;
        self
    }

    pub fn assume_yes(mut self) -> Self {
        self.ask_user = false;
        self
    }
}

/// Arguments of [`Cluster::deploy`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployRequest {
    /// Repository name, or full URL for a new service
    pub repo: String,
    pub branch: String,
    pub master: Option<String>,
    pub slave: Option<String>,
}

impl DeployRequest {
    pub fn new(repo: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            branch: branch.into(),
            ..Default::default()
        }
    }

    pub fn master(mut self, node: impl Into<String>) -> Self {
        self.master = Some(node.into());
        self
    }

    pub fn slave(mut self, node: impl Into<String>) -> Self {
        self.slave = Some(node.into());
        self
    }
}

/// Arguments of [`Cluster::migrate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrateRequest {
    pub source_repo: String,
    pub source_branch: String,
    pub target_branch: String,
    /// Defaults to the source repository
    pub target_repo: Option<String>,
    /// Ask the consumer to redeploy the target after restoring data
    pub update: bool,
}

impl MigrateRequest {
    pub fn new(
        source_repo: impl Into<String>,
        source_branch: impl Into<String>,
        target_branch: impl Into<String>,
    ) -> Self {
        Self {
            source_repo: source_repo.into(),
            source_branch: source_branch.into(),
            target_branch: target_branch.into(),
            target_repo: None,
            update: true,
        }
    }

    pub fn target_repo(mut self, repo: impl Into<String>) -> Self {
        self.target_repo = Some(repo.into());
        self
    }

    pub fn no_update(mut self) -> Self {
        self.update = false;
        self
    }
}

/// An event fired by an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub key: String,
    pub event_id: String,
}

/// A deploy that was fired
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployReport {
    pub dispatched: Dispatched,
    pub before: Option<Assignment>,
    pub after: Assignment,
}

/// One service moved away from a node
#[derive(Debug)]
pub struct MoveReport {
    pub key: String,
    pub before: Assignment,
    pub after: Assignment,
    /// Event id, or why firing / waiting failed
    pub result: Result<String>,
}

/// Checks of one service on one node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceChecks {
    pub name: String,
    /// `(check name, status, output)`
    pub checks: Vec<(String, String, String)>,
}

/// Checks grouped by node then service id
pub type ChecksByNode = BTreeMap<String, BTreeMap<String, ServiceChecks>>;

/// Per-operation context
pub struct Session<'a> {
    backend: &'a dyn ConsulBackend,
    nodes: OnceCell<NodeSet>,
}

impl<'a> Session<'a> {
    fn new(backend: &'a dyn ConsulBackend) -> Self {
        Self {
            backend,
            nodes: OnceCell::new(),
        }
    }

    /// Catalog nodes, fetched on first use
    pub async fn nodes(&self) -> Result<&NodeSet> {
        self.nodes
            .get_or_try_init(|| async {
                let nodes: NodeSet = self.backend.list_nodes().await?.into_iter().collect();
                tracing::debug!(count = nodes.len(), "Catalog nodes loaded");
                Ok::<_, Error>(nodes)
            })
            .await
    }
}

/// Administrates the services of a cluster
pub struct Cluster<B: ConsulBackend> {
    backend: B,
    prompt: Box<dyn Prompt>,
    poll_interval: Duration,
}

impl<B: ConsulBackend> Cluster<B> {
    /// Create a cluster client asking confirmations on the terminal
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            prompt: Box::new(TerminalPrompt),
            poll_interval: Duration::from_secs(1),
        }
    }

    /// Create a cluster client using the configured poll interval
    pub fn from_config(backend: B, config: &Config) -> Self {
        Self::new(backend).with_poll_interval(config.poll_interval())
    }

    pub fn with_prompt(mut self, prompt: impl Prompt + 'static) -> Self {
        self.prompt = Box::new(prompt);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn session(&self) -> Session<'_> {
        Session::new(&self.backend)
    }

    fn dispatcher(&self) -> EventDispatcher<'_> {
        EventDispatcher::new(&self.backend, self.poll_interval)
    }

    fn resolver(&self) -> AddressResolver<'_> {
        AddressResolver::new(&self.backend)
    }

    fn confirmed(&self, options: &RunOptions, summary: &str) -> bool {
        if !options.ask_user {
            return true;
        }
        if self.prompt.confirm(summary) {
            true
        } else {
            tracing::warn!("Not confirmed, Aborting");
            false
        }
    }

    /// Deploy or redeploy a service
    pub async fn deploy(
        &self,
        request: &DeployRequest,
        options: &RunOptions,
    ) -> Result<Outcome<DeployReport>> {
        let session = self.session();
        let repo = RepoRef::parse(&request.repo);
        let located = self.resolver().resolve(&repo.name, &request.branch).await?;

        if located.is_none() && request.master.is_none() {
            return Err(Error::configuration(format!(
                "no service found for {} on branch {}, a master node is required to create it",
                repo.name, request.branch
            )));
        }

        let after = topology::resolve(
            located.as_ref().map(|l| &l.record),
            request.master.as_deref(),
            request.slave.as_deref(),
            session.nodes().await?,
        )?;
        let before = located.as_ref().map(|l| Assignment::of(&l.record));

        let (key, payload) = match located {
            Some(Located { key, record }) => (
                key,
                DeployPayload {
                    repo: record.repo_url,
                    branch: record.branch,
                    master: after.master.clone(),
                    slave: after.slave.clone(),
                },
            ),
            None => (
                repo.app_key(&request.branch),
                DeployPayload {
                    repo: repo.url,
                    branch: request.branch.clone(),
                    master: after.master.clone(),
                    slave: after.slave.clone(),
                },
            ),
        };

        let summary = format!(
            "Deploy {} ({}) on {}\n  before: {}\n  after:  {}",
            payload.repo,
            key,
            payload.branch,
            before
                .as_ref()
                .map_or_else(|| "new service".to_string(), ToString::to_string),
            after
        );
        if !self.confirmed(options, &summary) {
            return Ok(Outcome::Aborted);
        }

        tracing::info!(key = %key, master = %after.master, slave = ?after.slave, "Deploying");
        let event_id = self
            .dispatcher()
            .fire(
                &key,
                &Event::deploy(&payload)?,
                options.wait,
                DeployFinished,
                options.timeout,
            )
            .await?;

        Ok(Outcome::Completed(DeployReport {
            dispatched: Dispatched { key, event_id },
            before,
            after,
        }))
    }

    /// Restore the volumes of a source service onto a target service
    ///
    /// The target data is overwritten, hence production branches are never
    /// accepted as target.
    pub async fn migrate(
        &self,
        request: &MigrateRequest,
        options: &RunOptions,
    ) -> Result<Outcome<Dispatched>> {
        if FORBIDDEN_TARGET_BRANCHES
            .iter()
            .any(|b| b.eq_ignore_ascii_case(request.target_branch.trim()))
        {
            return Err(Error::conflict(format!(
                "migrating data to branch '{}' is forbidden",
                request.target_branch
            )));
        }

        let resolver = self.resolver();
        let source_name = RepoRef::parse(&request.source_repo).name;
        let source = resolver
            .resolve(&source_name, &request.source_branch)
            .await?
            .ok_or_else(|| {
                Error::not_found(format!(
                    "source service {} on branch {}",
                    source_name, request.source_branch
                ))
            })?;

        let target_name =
            RepoRef::parse(request.target_repo.as_deref().unwrap_or(&request.source_repo)).name;
        let target = resolver
            .resolve(&target_name, &request.target_branch)
            .await?
            .ok_or_else(|| {
                Error::not_found(format!(
                    "target service {} on branch {}",
                    target_name, request.target_branch
                ))
            })?;

        let payload = MigratePayload {
            repo: source.record.repo_url.clone(),
            branch: source.record.branch.clone(),
            target: MigrateTarget {
                repo: target.record.repo_url.clone(),
                branch: target.record.branch.clone(),
            },
            update: request.update,
        };

        let summary = format!(
            "Migrate data from {} ({}) to {} ({})\n  Data of {} will be lost{}",
            source.key,
            source.record.branch,
            target.key,
            target.record.branch,
            target.key,
            if request.update {
                ", the target is redeployed afterwards"
            } else {
                ""
            }
        );
        if !self.confirmed(options, &summary) {
            return Ok(Outcome::Aborted);
        }

        tracing::info!(source = %source.key, target = %target.key, update = request.update, "Migrating");
        let event_id = self
            .dispatcher()
            .fire(
                &target.key,
                &Event::migrate(&payload)?,
                options.wait,
                MigrateFinished::default(),
                options.timeout,
            )
            .await?;

        Ok(Outcome::Completed(Dispatched {
            key: target.key,
            event_id,
        }))
    }

    /// Move every master hosted on `node` elsewhere
    ///
    /// Replicated services swap roles with their slave. Slaveless services
    /// go to `default_master`, which is then mandatory and checked; it is
    /// ignored otherwise. Every move is
    /// checked before the first event is fired; the events are then fired
    /// one after the other and a failure on one does not stop the others.
    pub async fn move_masters_from(
        &self,
        node: &str,
        default_master: Option<&str>,
        options: &RunOptions,
    ) -> Result<Outcome<Vec<MoveReport>>> {
        let session = self.session();
        let nodes = session.nodes().await?;

        let mut planned = Vec::new();
        for located in self.resolver().all().await? {
            if located.record.master != node {
                continue;
            }
            let before = Assignment::of(&located.record);
            let after = match located.record.slave.as_deref() {
                Some(slave) => Assignment::new(slave, Some(node)),
                None => {
                    let master = default_master.ok_or_else(|| {
                        Error::configuration(format!(
                            "{} has no slave, a default master node is required",
                            located.key
                        ))
                    })?;
                    if master == node {
                        return Err(Error::conflict(format!(
                            "cannot move masters from '{node}' to itself"
                        )));
                    }
                    Assignment::new(master, None::<String>)
                }
            };
            after.validate(nodes)?;
            planned.push((located, before, after));
        }

        if planned.is_empty() {
            tracing::info!(node = %node, "No master to move");
            return Ok(Outcome::Completed(Vec::new()));
        }

        let mut summary = format!("Move {} master(s) away from {node}:", planned.len());
        for (located, before, after) in &planned {
            let _ = write!(summary, "\n  {}\n    before: {before}\n    after:  {after}", located.key);
        }
        if !self.confirmed(options, &summary) {
            return Ok(Outcome::Aborted);
        }

        let dispatcher = self.dispatcher();
        let mut reports = Vec::with_capacity(planned.len());
        for (located, before, after) in planned {
            let payload = DeployPayload {
                repo: located.record.repo_url.clone(),
                branch: located.record.branch.clone(),
                master: after.master.clone(),
                slave: after.slave.clone(),
            };
            let result = match Event::deploy(&payload) {
                Ok(event) => {
                    dispatcher
                        .fire(
                            &located.key,
                            &event,
                            options.wait,
                            DeployFinished,
                            options.timeout,
                        )
                        .await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = &result {
                tracing::error!(key = %located.key, error = %e, "Move failed");
            }
            reports.push(MoveReport {
                key: located.key,
                before,
                after,
                result,
            });
        }

        Ok(Outcome::Completed(reports))
    }

    /// Keys of the services whose master runs on `node`
    pub async fn inspect_node(&self, node: &str) -> Result<Vec<String>> {
        Ok(self
            .resolver()
            .all()
            .await?
            .into_iter()
            .filter(|located| located.record.master == node)
            .map(|located| located.key)
            .collect())
    }

    /// Health checks grouped per node and service
    ///
    /// Passing checks are only listed with `all`.
    pub async fn checks(&self, all: bool) -> Result<ChecksByNode> {
        let states: &[&str] = if all {
            &["unknown", "passing", "warning", "critical"]
        } else {
            &["unknown", "warning", "critical"]
        };

        let mut by_node = ChecksByNode::new();
        for state in states {
            for check in self.backend.health_state(state).await? {
                let service = by_node
                    .entry(check.node)
                    .or_default()
                    .entry(check.service_id)
                    .or_insert_with(|| ServiceChecks {
                        name: check.service_name.clone(),
                        checks: Vec::new(),
                    });
                service.checks.push((check.name, check.status, check.output));
            }
        }
        Ok(by_node)
    }

    /// Node ids registered in the catalog
    pub async fn nodes(&self) -> Result<Vec<String>> {
        Ok(self.session().nodes().await?.iter().map(str::to_string).collect())
    }
}
