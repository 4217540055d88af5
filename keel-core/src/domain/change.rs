//! Change set domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{PipelineError, Result};

/// Number of characters of a commit reference used in immutable tags
pub const SHORT_REF_LEN: usize = 7;

/// Length of a full SHA-1 object id
pub const SHA1_HEX_LEN: usize = 40;

/// Length of a full SHA-256 object id
pub const SHA256_HEX_LEN: usize = 64;

/// A revision as received from the trigger event or the command line
///
/// Anything git can resolve: a full or abbreviated object id, a branch name,
/// `HEAD~1`. Never used for tags or cache keys before it is resolved to a
/// [`CommitRef`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into().trim().to_string();

        if value.is_empty() {
            return Err(PipelineError::Config(
                "revision cannot be empty".to_string(),
            ));
        }
        if value.chars().any(char::is_whitespace) {
            return Err(PipelineError::Config(format!(
                "revision '{}' contains whitespace",
                value
            )));
        }

        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The revision as a commit id when it already is a full object id
    pub fn object_id(&self) -> Option<CommitRef> {
        let len = self.0.len();
        if len != SHA1_HEX_LEN && len != SHA256_HEX_LEN {
            return None;
        }
        CommitRef::new(&self.0).ok()
    }

    /// The all-zero object id CI systems send when there is no previous commit
    pub fn is_null(&self) -> bool {
        self.object_id().is_some_and(|id| id.is_null())
    }

    /// Abbreviated object id, or the revision itself when it is a name
    pub fn short(&self) -> &str {
        match CommitRef::new(&self.0) {
            Ok(_) => &self.0[..SHORT_REF_LEN],
            Err(_) => &self.0,
        }
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Revision {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl From<CommitRef> for Revision {
    fn from(commit: CommitRef) -> Self {
        Self(commit.0)
    }
}

/// A commit object id in lowercase hex
///
/// At least seven characters so the immutable tag is always well formed.
/// Branch names and other symbolic revisions are rejected; resolve them
/// through the change detector first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CommitRef(String);

impl CommitRef {
    pub fn new(value: impl AsRef<str>) -> Result<Self> {
        let value = value.as_ref().trim().to_ascii_lowercase();

        if value.len() < SHORT_REF_LEN || value.len() > SHA256_HEX_LEN {
            return Err(PipelineError::Config(format!(
                "commit id '{}' must be {} to {} hex characters",
                value, SHORT_REF_LEN, SHA256_HEX_LEN
            )));
        }
        if !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(PipelineError::Config(format!(
                "'{}' is not a commit id; resolve branch names and other revisions first",
                value
            )));
        }

        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First seven characters, used as the immutable image tag
    pub fn short(&self) -> &str {
        &self.0[..SHORT_REF_LEN]
    }

    /// The all-zero object id CI systems send when there is no previous commit
    pub fn is_null(&self) -> bool {
        self.0.chars().all(|c| c == '0')
    }
}

impl std::fmt::Display for CommitRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for CommitRef {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for CommitRef {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<CommitRef> for String {
    fn from(commit: CommitRef) -> Self {
        commit.0
    }
}

/// Files that differ between two commits
///
/// Immutable once created. A change set whose refs are equal is always empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub base: CommitRef,
    pub head: CommitRef,
    changed_paths: BTreeSet<String>,
}

impl ChangeSet {
    pub fn new<I, S>(base: CommitRef, head: CommitRef, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let changed_paths = if base == head {
            BTreeSet::new()
        } else {
            paths
                .into_iter()
                .map(Into::into)
                .filter(|p: &String| !p.is_empty())
                .collect()
        };

        Self {
            base,
            head,
            changed_paths,
        }
    }

    /// A change set with nothing changed
    pub fn empty(base: CommitRef, head: CommitRef) -> Self {
        Self {
            base,
            head,
            changed_paths: BTreeSet::new(),
        }
    }

    pub fn changed_paths(&self) -> &BTreeSet<String> {
        &self.changed_paths
    }

    pub fn is_empty(&self) -> bool {
        self.changed_paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changed_paths.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(s: &str) -> CommitRef {
        CommitRef::new(s).unwrap()
    }

    #[test]
    fn test_short_ref() {
        assert_eq!(
            commit("3f2a9c1d0b8e7f6a5b4c3d2e1f0a9b8c7d6e5f4a").short(),
            "3f2a9c1"
        );
        assert_eq!(commit("ABCDEF0").as_str(), "abcdef0");
    }

    #[test]
    fn test_null_ref() {
        assert!(commit("0000000000000000000000000000000000000000").is_null());
        assert!(!commit("0000000000000000000000000000000000000001").is_null());
    }

    #[test]
    fn test_invalid_refs() {
        assert!(CommitRef::new("").is_err());
        assert!(CommitRef::new("   ").is_err());
        assert!(CommitRef::new("abc").is_err());
        assert!(CommitRef::new("main").is_err());
        assert!(CommitRef::new("feat/login-page").is_err());
        assert!(CommitRef::new("..").is_err());
        assert!(CommitRef::new("g".repeat(40)).is_err());
    }

    #[test]
    fn test_commit_ref_deserialization_validates() {
        let ok: CommitRef = serde_json::from_str("\"9fceb02d0ae5\"").unwrap();
        assert_eq!(ok.short(), "9fceb02");
        assert!(serde_json::from_str::<CommitRef>("\"main\"").is_err());
    }

    #[test]
    fn test_revision_accepts_names() {
        let branch = Revision::new("feat/login-page").unwrap();
        assert_eq!(branch.short(), "feat/login-page");
        assert_eq!(branch.object_id(), None);
        assert!(!branch.is_null());
        assert!(Revision::new("main branch").is_err());
        assert!(Revision::new(" ").is_err());
    }

    #[test]
    fn test_revision_object_id_requires_full_length() {
        let full = Revision::new("9FCEB02D0AE598E95DC970B74767F19372D61AF8").unwrap();
        assert_eq!(
            full.object_id(),
            Some(commit("9fceb02d0ae598e95dc970b74767f19372d61af8"))
        );
        assert_eq!(Revision::new("9fceb02").unwrap().object_id(), None);
        assert!(Revision::new("0".repeat(40)).unwrap().is_null());
        assert!(!Revision::new("0000000").unwrap().is_null());
    }

    #[test]
    fn test_equal_refs_yield_empty_change_set() {
        let changes = ChangeSet::new(commit("abc1234"), commit("abc1234"), ["src/frontend/x.css"]);
        assert!(changes.is_empty());
    }

    #[test]
    fn test_paths_deduplicated() {
        let changes = ChangeSet::new(
            commit("aaaaaaa"),
            commit("bbbbbbb"),
            ["README.md", "README.md", ""],
        );
        assert_eq!(changes.len(), 1);
    }
}
