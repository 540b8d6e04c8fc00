//! KV key addressing
//!
//! Application records live at `app/<name>_<branch>.<hash5>`, where `name` is
//! the lowercased last segment of the repository URL and `hash5` the first
//! five hex digits of the MD5 of the normalized URL path. The maintenance flag of
//! the same service lives at `maintenance/<name>_<branch>.<hash5>`.
//!
//! Searches always end with the `.` that opens the hash, so a branch never
//! matches another branch it is a textual prefix of (`branch` vs `branch2`).

use md5::{Digest, Md5};

use crate::consul::ConsulBackend;
use crate::error::{Error, Result};
use crate::models::ApplicationRecord;

/// Namespace of application records
pub const APP_PREFIX: &str = "app/";

/// Namespace of maintenance flags
pub const MAINTENANCE_PREFIX: &str = "maintenance/";

/// Separator between repository name and branch
pub const SEP: char = '_';

/// Separator between branch and hash
pub const HASH_SEP: char = '.';

/// A repository reference given by the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    /// URL without trailing `/` or `.git`
    pub url: String,
    /// Lowercased last path segment
    pub name: String,
}

impl RepoRef {
    /// Normalize a repository URL or bare name
    pub fn parse(repo: &str) -> Self {
        let trimmed = repo.trim().trim_end_matches('/');
        let url = trimmed.strip_suffix(".git").unwrap_or(trimmed).to_string();
        let name = url
            .rsplit(['/', ':'])
            .next()
            .unwrap_or(url.as_str())
            .to_lowercase();
        Self { url, name }
    }

    /// Path component of the normalized URL
    ///
    /// scp-like `git@host:ns/repo` gives `/ns/repo`, same as its `ssh://`
    /// form. A bare name is its own path.
    pub fn path(&self) -> String {
        if let Ok(url) = url::Url::parse(&self.url) {
            if url.has_host() {
                return url.path().to_string();
            }
        }
        match self.url.split_once(':') {
            Some((host, path)) if host.contains('@') || !path.starts_with('/') => {
                format!("/{}", path.trim_start_matches('/'))
            }
            _ => self.url.clone(),
        }
    }

    /// First five hex digits of the MD5 of the normalized URL path
    pub fn hash5(&self) -> String {
        let mut hasher = Md5::new();
        hasher.update(self.path().as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        digest[..5].to_string()
    }

    /// Key of a new service of this repository on `branch`
    pub fn app_key(&self, branch: &str) -> String {
        format!("{}{}", search_prefix(&self.name, branch), self.hash5())
    }
}

/// Prefix matching every key of `repo_name` on exactly `branch`
pub fn search_prefix(repo_name: &str, branch: &str) -> String {
    format!("{APP_PREFIX}{repo_name}{SEP}{branch}{HASH_SEP}")
}

/// Maintenance flag key sharing the suffix of `app_key`
pub fn maintenance_key(app_key: &str) -> String {
    let suffix = app_key.strip_prefix(APP_PREFIX).unwrap_or(app_key);
    format!("{MAINTENANCE_PREFIX}{suffix}")
}

/// A record together with the key it was read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub key: String,
    pub record: ApplicationRecord,
}

/// Looks up application records by repository name and branch
pub struct AddressResolver<'a> {
    backend: &'a dyn ConsulBackend,
}

impl<'a> AddressResolver<'a> {
    pub fn new(backend: &'a dyn ConsulBackend) -> Self {
        Self { backend }
    }

    /// Find the record of `repo_name` on `branch`
    ///
    /// Returns `None` when nothing matches, fails with
    /// [`Error::Ambiguous`] when several keys do.
    pub async fn resolve(&self, repo_name: &str, branch: &str) -> Result<Option<Located>> {
        let prefix = search_prefix(repo_name, branch);
        let mut found = self.backend.find(&prefix).await?;

        match found.len() {
            0 => {
                tracing::debug!(prefix = %prefix, "No application record");
                Ok(None)
            }
            1 => {
                let Some((key, raw)) = found.pop_first() else {
                    return Ok(None);
                };
                let record = ApplicationRecord::decode(&key, &raw)?;
                tracing::debug!(key = %key, master = %record.master, "Application record found");
                Ok(Some(Located { key, record }))
            }
            _ => Err(Error::Ambiguous {
                prefix,
                keys: found.into_keys().collect(),
            }),
        }
    }

    /// Every application record in the store
    pub async fn all(&self) -> Result<Vec<Located>> {
        self.backend
            .find(APP_PREFIX)
            .await?
            .into_iter()
            .map(|(key, raw)| {
                let record = ApplicationRecord::decode(&key, &raw)?;
                Ok(Located { key, record })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consul::MemoryConsul;

    fn record_json(branch: &str) -> String {
        format!(
            r#"{{"repo_url": "ssh://git@host/ns/repo", "branch": "{branch}",
                "deploy_date": "2018-08-05T224229.591386", "deploy_id": "id",
                "master": "node-1", "slave": null}}"#
        )
    }

    #[test]
    fn test_repo_ref_from_url() {
        let repo = RepoRef::parse("ssh://git@host/ns/Project.git");
        assert_eq!(repo.url, "ssh://git@host/ns/Project");
        assert_eq!(repo.name, "project");
    }

    #[test]
    fn test_repo_ref_from_scp_like_url() {
        let repo = RepoRef::parse("git@host:project.git/");
        assert_eq!(repo.url, "git@host:project");
        assert_eq!(repo.name, "project");
    }

    #[test]
    fn test_repo_ref_from_name() {
        let repo = RepoRef::parse("repo-name");
        assert_eq!(repo.url, "repo-name");
        assert_eq!(repo.name, "repo-name");
    }

    #[test]
    fn test_app_key_layout() {
        let repo = RepoRef::parse("ssh://git@host/ns/project.git");
        let key = repo.app_key("main");
        assert!(key.starts_with("app/project_main."));
        assert_eq!(key.len(), "app/project_main.".len() + 5);
        assert!(key[key.len() - 5..].chars().all(|c| c.is_ascii_hexdigit()));
        // .git suffix does not change the hash
        assert_eq!(key, RepoRef::parse("ssh://git@host/ns/project").app_key("main"));
    }

    #[test]
    fn test_path_of_each_form() {
        assert_eq!(RepoRef::parse("ssh://git@host/ns/project.git").path(), "/ns/project");
        assert_eq!(
            RepoRef::parse("ssh://git@git.example.com:22/project-slug/repo-name").path(),
            "/project-slug/repo-name"
        );
        assert_eq!(RepoRef::parse("git@host:ns/project.git").path(), "/ns/project");
        assert_eq!(RepoRef::parse("repo-name").path(), "repo-name");
    }

    #[test]
    fn test_hash5_is_md5_prefix_of_path() {
        // md5("/ns/project") = 10162...
        let repo = RepoRef::parse("ssh://git@host/ns/project.git");
        assert_eq!(repo.hash5(), "10162");
        assert_eq!(repo.app_key("main"), "app/project_main.10162");

        // Host and scheme do not take part in the hash
        assert_eq!(RepoRef::parse("https://mirror/ns/project").hash5(), "10162");
        assert_eq!(RepoRef::parse("git@host:ns/project").hash5(), "10162");

        // md5("repo-name") = 739a5...
        assert_eq!(RepoRef::parse("repo-name").hash5(), "739a5");
    }

    #[test]
    fn test_maintenance_key() {
        assert_eq!(
            maintenance_key("app/repo-name_branch-name.12345"),
            "maintenance/repo-name_branch-name.12345"
        );
    }

    #[tokio::test]
    async fn test_resolve_none() {
        let consul = MemoryConsul::new();
        let resolver = AddressResolver::new(&consul);
        assert!(resolver.resolve("repo", "main").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resolve_single() {
        let consul = MemoryConsul::new().with_value("app/repo_main.12345", record_json("main"));
        let resolver = AddressResolver::new(&consul);
        let located = resolver.resolve("repo", "main").await.unwrap().unwrap();
        assert_eq!(located.key, "app/repo_main.12345");
        assert_eq!(located.record.branch, "main");
    }

    #[tokio::test]
    async fn test_branch_prefix_is_not_ambiguous() {
        let consul = MemoryConsul::new()
            .with_value("app/repo_branch.12345", record_json("branch"))
            .with_value("app/repo_branch2.67890", record_json("branch2"));
        let resolver = AddressResolver::new(&consul);

        let located = resolver.resolve("repo", "branch").await.unwrap().unwrap();
        assert_eq!(located.key, "app/repo_branch.12345");

        // Without the terminating separator both keys match
        let loose = consul.find("app/repo_branch").await.unwrap();
        assert_eq!(loose.len(), 2);
    }

    #[tokio::test]
    async fn test_resolve_ambiguous_lists_keys() {
        let consul = MemoryConsul::new()
            .with_value("app/repo_main.12345", record_json("main"))
            .with_value("app/repo_main.67890", record_json("main"));
        let resolver = AddressResolver::new(&consul);

        match resolver.resolve("repo", "main").await {
            Err(Error::Ambiguous { keys, .. }) => {
                assert_eq!(keys, vec!["app/repo_main.12345", "app/repo_main.67890"]);
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resolve_malformed_record() {
        let consul = MemoryConsul::new().with_value("app/repo_main.12345", "{not json");
        let resolver = AddressResolver::new(&consul);
        assert!(matches!(
            resolver.resolve("repo", "main").await,
            Err(Error::Decode { .. })
        ));
    }
}
