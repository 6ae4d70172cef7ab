//! In-memory role-based policy store with tenant domains.
//!
//! Policies are `(subject, domain, object, action)` rules; groupings are
//! `(user, role, domain)` role assignments. A request is allowed when some
//! policy held by the subject, or by a role the subject holds (transitively)
//! in the same domain, matches the object and action.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use vaultgate_core::{actions, AuthorizationGate};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Policy {
    pub subject: String,
    pub domain: String,
    /// Object path, optionally ending in `*` to match any suffix.
    pub object: String,
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Grouping {
    pub user: String,
    pub role: String,
    pub domain: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct PolicySet {
    #[serde(default)]
    policies: BTreeSet<Policy>,
    #[serde(default)]
    groupings: BTreeSet<Grouping>,
}

impl PolicySet {
    /// `subject` plus every role it reaches through groupings in `domain`.
    fn principals(&self, subject: &str, domain: &str) -> HashSet<String> {
        let mut seen = HashSet::from([subject.to_string()]);
        let mut queue = VecDeque::from([subject.to_string()]);

        while let Some(current) = queue.pop_front() {
            for g in &self.groupings {
                if g.user == current && g.domain == domain && seen.insert(g.role.clone()) {
                    queue.push_back(g.role.clone());
                }
            }
        }
        seen
    }
}

/// Object pattern match: a `*` matches any suffix from its position on,
/// otherwise the key must equal the pattern.
#[must_use]
pub fn key_match(key: &str, pattern: &str) -> bool {
    match pattern.find('*') {
        Some(i) => key.starts_with(&pattern[..i]),
        None => key == pattern,
    }
}

/// [`AuthorizationGate`] backed by an in-memory policy set.
///
/// `persist` writes the set as JSON to the file given at construction; a gate
/// built with [`MemoryPolicyGate::new`] keeps policy in memory only.
#[derive(Debug, Default)]
pub struct MemoryPolicyGate {
    state: RwLock<PolicySet>,
    path: Option<PathBuf>,
}

impl MemoryPolicyGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the policy file at `path`, which `persist` will later overwrite.
    ///
    /// A missing file yields an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let state = match std::fs::read(&path) {
            Ok(raw) => serde_json::from_slice(&raw)
                .with_context(|| format!("parse policy file {}", path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "policy file not found, starting empty");
                PolicySet::default()
            }
            Err(err) => {
                return Err(err).with_context(|| format!("read policy file {}", path.display()))
            }
        };

        let gate = Self {
            state: RwLock::new(state),
            path: Some(path),
        };
        info!(
            policies = gate.policy_count(),
            groupings = gate.grouping_count(),
            "policy store loaded"
        );
        Ok(gate)
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Evaluates a request against the current policy set.
    #[must_use]
    pub fn enforce(&self, subject: &str, domain: &str, object: &str, action: &str) -> bool {
        let state = self.state.read();
        let principals = state.principals(subject, domain);
        state.policies.iter().any(|p| {
            p.domain == domain
                && principals.contains(&p.subject)
                && key_match(object, &p.object)
                && (p.action == action || p.action == actions::ANY)
        })
    }

    #[must_use]
    pub fn policy_count(&self) -> usize {
        self.state.read().policies.len()
    }

    #[must_use]
    pub fn grouping_count(&self) -> usize {
        self.state.read().groupings.len()
    }
}

fn policy(subject: &str, domain: &str, object: &str, action: &str) -> Policy {
    Policy {
        subject: subject.to_string(),
        domain: domain.to_string(),
        object: object.to_string(),
        action: action.to_string(),
    }
}

fn grouping(user: &str, role: &str, domain: &str) -> Grouping {
    Grouping {
        user: user.to_string(),
        role: role.to_string(),
        domain: domain.to_string(),
    }
}

#[async_trait]
impl AuthorizationGate for MemoryPolicyGate {
    async fn check(
        &self,
        subject: &str,
        tenant: &str,
        object: &str,
        action: &str,
    ) -> anyhow::Result<bool> {
        Ok(self.enforce(subject, tenant, object, action))
    }

    async fn add_policy(
        &self,
        subject: &str,
        tenant: &str,
        object: &str,
        action: &str,
    ) -> anyhow::Result<bool> {
        let added = self
            .state
            .write()
            .policies
            .insert(policy(subject, tenant, object, action));
        debug!(subject, tenant, object, action, added, "add policy");
        Ok(added)
    }

    async fn remove_policy(
        &self,
        subject: &str,
        tenant: &str,
        object: &str,
        action: &str,
    ) -> anyhow::Result<bool> {
        let removed = self
            .state
            .write()
            .policies
            .remove(&policy(subject, tenant, object, action));
        debug!(subject, tenant, object, action, removed, "remove policy");
        Ok(removed)
    }

    async fn add_grouping_policy(&self, user: &str, role: &str, tenant: &str) -> anyhow::Result<bool> {
        let added = self.state.write().groupings.insert(grouping(user, role, tenant));
        debug!(user, role, tenant, added, "add grouping");
        Ok(added)
    }

    async fn remove_grouping_policy(
        &self,
        user: &str,
        role: &str,
        tenant: &str,
    ) -> anyhow::Result<bool> {
        let removed = self.state.write().groupings.remove(&grouping(user, role, tenant));
        debug!(user, role, tenant, removed, "remove grouping");
        Ok(removed)
    }

    async fn persist(&self) -> anyhow::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let raw = {
            let state = self.state.read();
            serde_json::to_vec_pretty(&*state).context("serialize policy set")?
        };

        // Write beside the target and rename so a crash never leaves a torn file.
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &raw)
            .await
            .with_context(|| format!("write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("replace {}", path.display()))?;

        debug!(path = %path.display(), bytes = raw.len(), "policy persisted");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[tokio::test]
    async fn owner_policy_covers_home_subtree() {
        let gate = MemoryPolicyGate::new();
        gate.add_policy("alice", "acme", "/acme/alice/*", "*").await.unwrap();

        assert!(gate.check("alice", "acme", "/acme/alice/a.txt", "read").await.unwrap());
        assert!(gate.check("alice", "acme", "/acme/alice/a.txt", "write").await.unwrap());
        assert!(!gate.check("alice", "acme", "/acme/bob/a.txt", "read").await.unwrap());
        assert!(!gate.check("bob", "acme", "/acme/alice/a.txt", "read").await.unwrap());
    }

    #[tokio::test]
    async fn action_must_match_unless_wildcard() {
        let gate = MemoryPolicyGate::new();
        gate.add_policy("bob", "acme", "/acme/shared/*", "read").await.unwrap();

        assert!(gate.enforce("bob", "acme", "/acme/shared/x", "read"));
        assert!(!gate.enforce("bob", "acme", "/acme/shared/x", "write"));
    }

    #[tokio::test]
    async fn roles_are_transitive_within_domain() {
        let gate = MemoryPolicyGate::new();
        gate.add_policy("editors", "acme", "/acme/docs/*", "write").await.unwrap();
        gate.add_grouping_policy("staff", "editors", "acme").await.unwrap();
        gate.add_grouping_policy("carol", "staff", "acme").await.unwrap();

        assert!(gate.enforce("carol", "acme", "/acme/docs/plan.md", "write"));
        assert!(!gate.enforce("carol", "globex", "/acme/docs/plan.md", "write"));
    }

    #[tokio::test]
    async fn roles_do_not_cross_domains() {
        let gate = MemoryPolicyGate::new();
        gate.add_policy("admins", "acme", "/acme/*", "*").await.unwrap();
        gate.add_grouping_policy("dave", "admins", "globex").await.unwrap();

        assert!(!gate.enforce("dave", "acme", "/acme/x", "read"));
    }

    #[tokio::test]
    async fn role_cycles_terminate() {
        let gate = MemoryPolicyGate::new();
        gate.add_grouping_policy("a", "b", "t").await.unwrap();
        gate.add_grouping_policy("b", "a", "t").await.unwrap();

        assert!(!gate.enforce("a", "t", "/t/x", "read"));
    }

    #[tokio::test]
    async fn mutations_are_idempotent() {
        let gate = MemoryPolicyGate::new();
        assert!(gate.add_policy("alice", "acme", "/acme/alice/*", "*").await.unwrap());
        assert!(!gate.add_policy("alice", "acme", "/acme/alice/*", "*").await.unwrap());
        assert_eq!(gate.policy_count(), 1);

        assert!(gate.add_grouping_policy("alice", "alice", "acme").await.unwrap());
        assert!(!gate.add_grouping_policy("alice", "alice", "acme").await.unwrap());

        assert!(gate.remove_policy("alice", "acme", "/acme/alice/*", "*").await.unwrap());
        assert!(!gate.remove_policy("alice", "acme", "/acme/alice/*", "*").await.unwrap());
        assert!(gate.remove_grouping_policy("alice", "alice", "acme").await.unwrap());
        assert_eq!(gate.grouping_count(), 0);
    }

    #[tokio::test]
    async fn persist_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tenants.json");

        let gate = MemoryPolicyGate::load(&path).unwrap();
        assert_eq!(gate.policy_count(), 0);
        gate.add_policy("alice", "acme", "/acme/alice/*", "*").await.unwrap();
        gate.add_grouping_policy("alice", "alice", "acme").await.unwrap();
        gate.persist().await.unwrap();

        let reloaded = MemoryPolicyGate::load(&path).unwrap();
        assert_eq!(reloaded.path(), Some(path.as_path()));
        assert_eq!(reloaded.policy_count(), 1);
        assert_eq!(reloaded.grouping_count(), 1);
        assert!(reloaded.enforce("alice", "acme", "/acme/alice/f", "read"));
    }

    #[tokio::test]
    async fn persist_without_path_is_noop() {
        let gate = MemoryPolicyGate::new();
        gate.add_policy("a", "t", "/t/*", "*").await.unwrap();
        gate.persist().await.unwrap();
        assert!(gate.path().is_none());
    }

    #[test]
    fn load_rejects_malformed_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"not json").unwrap();
        let err = MemoryPolicyGate::load(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("parse policy file"));
    }

    #[test]
    fn key_match_exact_and_wildcard() {
        assert!(key_match("/a/b", "/a/b"));
        assert!(!key_match("/a/bc", "/a/b"));
        assert!(key_match("/a/b/", "/a/b/*"));
        assert!(key_match("/a/b/c/d", "/a/b/*"));
        assert!(!key_match("/a/c", "/a/b/*"));
        assert!(key_match("anything", "*"));
    }

    proptest! {
        #[test]
        fn wildcard_matches_every_suffix(prefix in "/[a-z]{1,8}/", suffix in "[a-z/._]{0,16}") {
            let pattern = format!("{prefix}*");
            let key = format!("{prefix}{suffix}");
            prop_assert!(key_match(&key, &pattern));
        }

        #[test]
        fn pattern_without_wildcard_is_equality(a in "[a-z/]{0,12}", b in "[a-z/]{0,12}") {
            prop_assert_eq!(key_match(&a, &b), a == b);
        }
    }
}
