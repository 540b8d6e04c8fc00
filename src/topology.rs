//! Master / slave assignment
//!
//! Computes where a service runs after a deploy, from what the store says
//! today and what the operator asked for.
//!
//! - New service: the master must be given, the slave is optional.
//! - Replicated service `(M, S)`: the default is a swap to `(S, M)`. A single
//!   override that would put both roles on one node reverts the other side
//!   to its value before the swap, so `master = M` keeps `(M, S)` and
//!   `slave = S` keeps `(M, S)`.
//! - Slaveless service `(M, -)`: the master stays unless overridden, a slave
//!   may be added.
//!
//! Whatever the path, master and slave differ and both are live nodes.

use std::collections::BTreeSet;
use std::fmt;

use crate::error::{Error, Result};
use crate::models::ApplicationRecord;

/// Node ids registered in the catalog
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSet(BTreeSet<String>);

impl NodeSet {
    pub fn contains(&self, node: &str) -> bool {
        self.0.contains(node)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fail with a conflict unless `node` is registered
    pub fn require(&self, node: &str, role: &str) -> Result<()> {
        if self.contains(node) {
            Ok(())
        } else {
            Err(Error::conflict(format!(
                "{role} node '{node}' is not part of the cluster (known: {})",
                self.iter().collect::<Vec<_>>().join(", ")
            )))
        }
    }
}

impl<S: Into<String>> FromIterator<S> for NodeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Resolved placement of a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub master: String,
    pub slave: Option<String>,
}

impl Assignment {
    pub fn new(master: impl Into<String>, slave: Option<impl Into<String>>) -> Self {
        Self {
            master: master.into(),
            slave: slave.map(Into::into),
        }
    }

    /// Current placement stored in `record`
    pub fn of(record: &ApplicationRecord) -> Self {
        Self {
            master: record.master.clone(),
            slave: record.slave.clone(),
        }
    }

    /// Check distinct roles and node membership
    pub fn validate(&self, nodes: &NodeSet) -> Result<()> {
        if self.slave.as_deref() == Some(self.master.as_str()) {
            return Err(Error::conflict(format!(
                "master and slave must be different nodes (both '{}')",
                self.master
            )));
        }
        nodes.require(&self.master, "master")?;
        if let Some(slave) = &self.slave {
            nodes.require(slave, "slave")?;
        }
        Ok(())
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "master: {}, slave: {}",
            self.master,
            self.slave.as_deref().unwrap_or("-")
        )
    }
}

/// Compute the assignment a deploy leads to
pub fn resolve(
    existing: Option<&ApplicationRecord>,
    req_master: Option<&str>,
    req_slave: Option<&str>,
    nodes: &NodeSet,
) -> Result<Assignment> {
    let assignment = compute(existing, req_master, req_slave)?;
    assignment.validate(nodes)?;
    Ok(assignment)
}

fn compute(
    existing: Option<&ApplicationRecord>,
    req_master: Option<&str>,
    req_slave: Option<&str>,
) -> Result<Assignment> {
    let Some(record) = existing else {
        let master = req_master.ok_or_else(|| {
            Error::configuration("a master node is required to deploy a new service")
        })?;
        return Ok(Assignment::new(master, req_slave));
    };

    let Some(current_slave) = record.slave.as_deref() else {
        return Ok(Assignment::new(
            req_master.unwrap_or(&record.master),
            req_slave,
        ));
    };

    let current_master = record.master.as_str();
    let assignment = match (req_master, req_slave) {
        (None, None) => Assignment::new(current_slave, Some(current_master)),
        (Some(master), None) if master == current_master => {
            Assignment::new(master, Some(current_slave))
        }
        (Some(master), None) => Assignment::new(master, Some(current_master)),
        (None, Some(slave)) if slave == current_slave => {
            Assignment::new(current_master, Some(slave))
        }
        (None, Some(slave)) => Assignment::new(current_slave, Some(slave)),
        (Some(master), Some(slave)) => Assignment::new(master, Some(slave)),
    };
    Ok(assignment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use proptest::prelude::*;

    fn nodes() -> NodeSet {
        ["node-1", "node-2", "node-3", "node-4"].into_iter().collect()
    }

    fn record(master: &str, slave: Option<&str>) -> ApplicationRecord {
        ApplicationRecord {
            repo_url: "ssh://git@host/ns/repo".to_string(),
            branch: "main".to_string(),
            master: master.to_string(),
            slave: slave.map(str::to_string),
            deploy_date: crate::models::parse_deploy_date("2018-08-05T224229.591386").unwrap(),
            deploy_id: "id".to_string(),
            previous_deploy_id: None,
        }
    }

    fn pair(master: &str, slave: Option<&str>) -> Assignment {
        Assignment::new(master, slave)
    }

    #[test]
    fn test_new_service_requires_master() {
        let err = resolve(None, None, Some("node-2"), &nodes()).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn test_new_service_takes_requested_pair() {
        assert_eq!(
            resolve(None, Some("node-1"), None, &nodes()).unwrap(),
            pair("node-1", None)
        );
        assert_eq!(
            resolve(None, Some("node-1"), Some("node-2"), &nodes()).unwrap(),
            pair("node-1", Some("node-2"))
        );
    }

    #[test]
    fn test_replicated_default_swaps() {
        let rec = record("node-1", Some("node-2"));
        assert_eq!(
            resolve(Some(&rec), None, None, &nodes()).unwrap(),
            pair("node-2", Some("node-1"))
        );
    }

    #[test]
    fn test_reaffirmed_master_keeps_slave() {
        let rec = record("node-1", Some("node-2"));
        assert_eq!(
            resolve(Some(&rec), Some("node-1"), None, &nodes()).unwrap(),
            pair("node-1", Some("node-2"))
        );
    }

    #[test]
    fn test_current_slave_as_master_rotates() {
        let rec = record("node-1", Some("node-2"));
        assert_eq!(
            resolve(Some(&rec), Some("node-2"), None, &nodes()).unwrap(),
            pair("node-2", Some("node-1"))
        );
    }

    #[test]
    fn test_reaffirmed_slave_keeps_master() {
        let rec = record("node-1", Some("node-2"));
        assert_eq!(
            resolve(Some(&rec), None, Some("node-2"), &nodes()).unwrap(),
            pair("node-1", Some("node-2"))
        );
    }

    #[test]
    fn test_replicated_other_master_keeps_old_master_as_slave() {
        let rec = record("node-1", Some("node-2"));
        assert_eq!(
            resolve(Some(&rec), Some("node-3"), None, &nodes()).unwrap(),
            pair("node-3", Some("node-1"))
        );
    }

    #[test]
    fn test_slaveless_keeps_master_and_adds_slave() {
        let rec = record("node-1", None);
        assert_eq!(
            resolve(Some(&rec), None, None, &nodes()).unwrap(),
            pair("node-1", None)
        );
        assert_eq!(
            resolve(Some(&rec), None, Some("node-3"), &nodes()).unwrap(),
            pair("node-1", Some("node-3"))
        );
    }

    #[test]
    fn test_same_master_and_slave_conflicts() {
        let err = resolve(None, Some("node-1"), Some("node-1"), &nodes()).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Conflict);

        let rec = record("node-1", None);
        let err = resolve(Some(&rec), None, Some("node-1"), &nodes()).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Conflict);
    }

    #[test]
    fn test_unknown_nodes_conflict() {
        let err = resolve(None, Some("node-10"), None, &nodes()).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Conflict);

        let err = resolve(None, Some("node-1"), Some("node-10"), &nodes()).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Conflict);
    }

    fn node() -> impl Strategy<Value = String> {
        (1..=5u8).prop_map(|n| format!("node-{n}"))
    }

    proptest! {
        #[test]
        fn prop_resolved_pair_is_distinct_and_live(
            existing in proptest::option::of((node(), proptest::option::of(node()))),
            req_master in proptest::option::of(node()),
            req_slave in proptest::option::of(node()),
        ) {
            let rec = existing.map(|(m, s)| record(&m, s.as_deref()));
            let live = nodes();
            if let Ok(assignment) = resolve(rec.as_ref(), req_master.as_deref(), req_slave.as_deref(), &live) {
                prop_assert!(assignment.slave.as_deref() != Some(assignment.master.as_str()));
                prop_assert!(live.contains(&assignment.master));
                if let Some(slave) = &assignment.slave {
                    prop_assert!(live.contains(slave));
                }
            }
        }

        #[test]
        fn prop_replicated_without_overrides_is_pure_swap(
            master in node(),
            slave in node(),
        ) {
            prop_assume!(master != slave);
            let rec = record(&master, Some(&slave));
            let live: NodeSet = [master.clone(), slave.clone()].into_iter().collect();
            let assignment = resolve(Some(&rec), None, None, &live).unwrap();
            prop_assert_eq!(assignment, Assignment::new(slave, Some(master)));
        }
    }
}
