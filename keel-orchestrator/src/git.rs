//! Change detection through the git CLI
//!
//! Revisions from the trigger are resolved to full object ids with
//! `rev-parse`; the change set, and every tag and cache key derived from it,
//! only ever carries those ids.

use async_trait::async_trait;
use keel_core::domain::change::{ChangeSet, CommitRef, Revision};
use keel_core::error::{PipelineError, Result};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

/// Computes the paths touched between two revisions
#[async_trait]
pub trait ChangeDetector: Send + Sync {
    /// Resolves both revisions and diffs them. The returned change set holds
    /// the resolved commit ids.
    async fn detect(&self, base: &Revision, head: &Revision) -> Result<ChangeSet>;
}

/// Detector diffing a local checkout with full history
#[derive(Debug, Clone)]
pub struct GitChangeDetector {
    repo_root: PathBuf,
}

impl GitChangeDetector {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    async fn ensure_full_history(&self) -> Result<()> {
        let shallow = run_git(&["rev-parse", "--is-shallow-repository"], &self.repo_root).await?;
        if shallow.trim() == "true" {
            return Err(PipelineError::HistoryUnavailable(
                "repository is a shallow clone; fetch full history before diffing".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolves `revision` to the full id of the commit it names
    pub async fn resolve(&self, revision: &Revision) -> Result<CommitRef> {
        let spec = format!("{}^{{commit}}", revision);
        let output = run_git(&["rev-parse", "--verify", "--quiet", &spec], &self.repo_root)
            .await
            .map_err(|_| {
                PipelineError::HistoryUnavailable(format!("cannot resolve commit {}", revision))
            })?;

        let commit = CommitRef::new(output.trim()).map_err(|_| {
            PipelineError::HistoryUnavailable(format!(
                "git resolved {} to unexpected output '{}'",
                revision,
                output.trim()
            ))
        })?;
        debug!("Resolved {} to {}", revision, commit);
        Ok(commit)
    }

    /// Full object ids are taken as they are; anything else goes through git
    async fn resolve_lazily(&self, revision: &Revision) -> Result<CommitRef> {
        match revision.object_id() {
            Some(commit) => Ok(commit),
            None => self.resolve(revision).await,
        }
    }
}

#[async_trait]
impl ChangeDetector for GitChangeDetector {
    async fn detect(&self, base: &Revision, head: &Revision) -> Result<ChangeSet> {
        if base == head {
            let head = self.resolve_lazily(head).await?;
            debug!("base and head are both {}, nothing changed", head.short());
            return Ok(ChangeSet::empty(head.clone(), head));
        }
        if base.is_null() {
            let head = self.resolve_lazily(head).await?;
            info!("No history before {}, treating change set as empty", head.short());
            let base = base.object_id().unwrap_or_else(|| head.clone());
            return Ok(ChangeSet::empty(base, head));
        }

        self.ensure_full_history().await?;
        let base = self.resolve(base).await?;
        let head = self.resolve(head).await?;

        let output = run_git(
            &[
                "diff",
                "--name-only",
                "-z",
                "--no-renames",
                base.as_str(),
                head.as_str(),
            ],
            &self.repo_root,
        )
        .await?;

        let paths: Vec<&str> = output.split('\0').filter(|p| !p.is_empty()).collect();
        info!(
            "{} path(s) changed between {} and {}",
            paths.len(),
            base.short(),
            head.short()
        );

        Ok(ChangeSet::new(base, head, paths))
    }
}

async fn run_git(args: &[&str], repo_root: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_root)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| PipelineError::HistoryUnavailable(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PipelineError::HistoryUnavailable(format!(
            "git {} failed (exit {}): {}",
            args.join(" "),
            output.status.code().unwrap_or(-1),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn rev(value: &str) -> Revision {
        Revision::new(value).unwrap()
    }

    fn git(repo: &Path, args: &[&str]) -> Option<String> {
        let output = std::process::Command::new("git")
            .args(["-c", "user.name=keel", "-c", "user.email=keel@example.com"])
            .args(args)
            .current_dir(repo)
            .output()
            .ok()?;
        output
            .status
            .success()
            .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn write(repo: &Path, rel: &str, contents: &str) {
        let file = repo.join(rel);
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(file, contents).unwrap();
    }

    #[tokio::test]
    async fn test_equal_refs_yield_empty_set_without_git() {
        let dir = TempDir::new().unwrap();
        let detector = GitChangeDetector::new(dir.path());
        let sha = rev("9fceb02d0ae598e95dc970b74767f19372d61af8");

        let changes = detector.detect(&sha, &sha).await.unwrap();
        assert!(changes.is_empty());
        assert_eq!(changes.head.as_str(), sha.as_str());
    }

    #[tokio::test]
    async fn test_null_base_yields_empty_set() {
        let dir = TempDir::new().unwrap();
        let detector = GitChangeDetector::new(dir.path());

        let changes = detector
            .detect(
                &rev("0000000000000000000000000000000000000000"),
                &rev("9fceb02d0ae598e95dc970b74767f19372d61af8"),
            )
            .await
            .unwrap();
        assert!(changes.is_empty());
    }

    #[tokio::test]
    async fn test_outside_repository_is_history_unavailable() {
        let dir = TempDir::new().unwrap();
        let detector = GitChangeDetector::new(dir.path());

        let err = detector
            .detect(&rev("aaaaaaa"), &rev("bbbbbbb"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::HistoryUnavailable(_)));
    }

    #[tokio::test]
    async fn test_diff_between_commits() {
        let dir = TempDir::new().unwrap();
        let repo = dir.path();
        if git(repo, &["init", "--quiet"]).is_none() {
            // git not installed
            return;
        }

        write(repo, "src/frontend/main.go", "package main");
        write(repo, "src/cartservice/Program.cs", "class P {}");
        write(repo, "README.md", "# shop");
        git(repo, &["add", "."]).unwrap();
        git(repo, &["commit", "--quiet", "-m", "initial"]).unwrap();
        let base = git(repo, &["rev-parse", "HEAD"]).unwrap();

        write(repo, "src/frontend/static/x.css", "body {}");
        git(repo, &["mv", "src/cartservice/Program.cs", "src/cartservice/App.cs"]).unwrap();
        git(repo, &["add", "."]).unwrap();
        git(repo, &["commit", "--quiet", "-m", "change"]).unwrap();
        let head = git(repo, &["rev-parse", "HEAD"]).unwrap();

        let detector = GitChangeDetector::new(repo);
        let changes = detector.detect(&rev(&base), &rev(&head)).await.unwrap();
        let paths: Vec<&str> = changes.changed_paths().iter().map(String::as_str).collect();

        assert_eq!(
            paths,
            vec![
                "src/cartservice/App.cs",
                "src/cartservice/Program.cs",
                "src/frontend/static/x.css",
            ]
        );

        let err = detector
            .detect(&rev(&base), &rev("deadbeefdeadbeef"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::HistoryUnavailable(msg) if msg.contains("deadbeef")));
    }

    #[tokio::test]
    async fn test_branch_names_resolve_to_commit_ids() {
        let dir = TempDir::new().unwrap();
        let repo = dir.path();
        if git(repo, &["init", "--quiet"]).is_none() {
            // git not installed
            return;
        }

        write(repo, "src/frontend/main.go", "package main");
        git(repo, &["add", "."]).unwrap();
        git(repo, &["commit", "--quiet", "-m", "initial"]).unwrap();
        git(repo, &["branch", "-M", "main"]).unwrap();
        let base = git(repo, &["rev-parse", "HEAD"]).unwrap();

        git(repo, &["checkout", "--quiet", "-b", "feat/login-page"]).unwrap();
        write(repo, "src/frontend/login.go", "package main");
        git(repo, &["add", "."]).unwrap();
        git(repo, &["commit", "--quiet", "-m", "login"]).unwrap();
        let head = git(repo, &["rev-parse", "HEAD"]).unwrap();

        let detector = GitChangeDetector::new(repo);
        let changes = detector
            .detect(&rev("main"), &rev("feat/login-page"))
            .await
            .unwrap();

        assert_eq!(changes.base.as_str(), base);
        assert_eq!(changes.head.as_str(), head);
        assert_eq!(changes.head.short(), &head[..7]);
        assert_eq!(changes.len(), 1);

        let same = detector.detect(&rev("HEAD"), &rev("HEAD")).await.unwrap();
        assert!(same.is_empty());
        assert_eq!(same.head.as_str(), head);

        let abbreviated = detector.resolve(&rev(&head[..9])).await.unwrap();
        assert_eq!(abbreviated.as_str(), head);
    }
}
