// src/git/mod.rs
// Read-oriented git client over git2. Operations open the repository fresh
// on the blocking pool, so no git2 handle crosses an await point.

pub mod error;

pub use error::{GitError, GitResult};

use git2::{BranchType, DiffOptions, Repository, StatusOptions};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;

/// Summary of one commit for git_log output
#[derive(Debug, Clone, Serialize)]
pub struct CommitInfo {
    pub hash: String,
    pub short_hash: String,
    pub author: String,
    pub email: String,
    pub message: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone)]
pub struct GitClient {
    repo_path: PathBuf,
}

impl GitClient {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    async fn with_repo<T, F>(&self, f: F) -> GitResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Repository) -> GitResult<T> + Send + 'static,
    {
        let path = self.repo_path.clone();
        tokio::task::spawn_blocking(move || {
            let repo = Repository::open(&path)
                .map_err(|e| GitError::not_found(format!("{}: {}", path.display(), e.message())))?;
            f(&repo)
        })
        .await
        .map_err(|e| GitError::Join(e.to_string()))?
    }

    /// Working-tree status: branch, changed file lists, cleanliness.
    pub async fn status(&self) -> GitResult<Value> {
        self.with_repo(|repo| {
            let head = repo.head().ok();
            let branch = head
                .as_ref()
                .and_then(|h| h.shorthand())
                .unwrap_or("(detached)")
                .to_string();

            let mut options = StatusOptions::new();
            options.include_untracked(true).recurse_untracked_dirs(true);
            let statuses = repo.statuses(Some(&mut options))?;

            let mut modified = Vec::new();
            let mut staged = Vec::new();
            let mut untracked = Vec::new();
            let mut deleted = Vec::new();

            for entry in statuses.iter() {
                let Some(path) = entry.path() else { continue };
                let status = entry.status();
                if status.is_wt_new() {
                    untracked.push(path.to_string());
                }
                if status.is_wt_modified() {
                    modified.push(path.to_string());
                }
                if status.is_wt_deleted() {
                    deleted.push(path.to_string());
                }
                if status.is_index_new() || status.is_index_modified() || status.is_index_deleted() {
                    staged.push(path.to_string());
                }
            }

            let is_clean = modified.is_empty()
                && staged.is_empty()
                && untracked.is_empty()
                && deleted.is_empty();

            Ok(json!({
                "branch": branch,
                "modified": modified,
                "staged": staged,
                "untracked": untracked,
                "deleted": deleted,
                "is_clean": is_clean,
            }))
        })
        .await
    }

    /// Commit history, newest first; optionally limited to one file.
    pub async fn log(&self, limit: usize, file_path: Option<String>) -> GitResult<Vec<CommitInfo>> {
        self.with_repo(move |repo| {
            let mut revwalk = repo.revwalk()?;
            revwalk.push_head()?;
            revwalk.set_sorting(git2::Sort::TIME)?;

            let mut commits = Vec::new();
            for oid in revwalk {
                if commits.len() >= limit {
                    break;
                }
                let oid = oid?;
                let commit = repo.find_commit(oid)?;

                if let Some(path) = &file_path {
                    if !commit_touches_path(repo, &commit, path)? {
                        continue;
                    }
                }

                commits.push(CommitInfo {
                    hash: oid.to_string(),
                    short_hash: oid.to_string()[..8].to_string(),
                    author: commit.author().name().unwrap_or("unknown").to_string(),
                    email: commit.author().email().unwrap_or("").to_string(),
                    message: commit.summary().unwrap_or("").to_string(),
                    timestamp: commit.time().seconds(),
                });
            }

            Ok(commits)
        })
        .await
    }

    /// Diff of the working tree (or the index when `staged`), optionally for
    /// one path. Returns unified diff text.
    pub async fn diff(&self, file_path: Option<String>, staged: bool) -> GitResult<String> {
        self.with_repo(move |repo| {
            let mut options = DiffOptions::new();
            if let Some(path) = &file_path {
                options.pathspec(path);
            }

            let diff = if staged {
                let head_tree = repo.head().ok().and_then(|h| h.peel_to_tree().ok());
                repo.diff_tree_to_index(head_tree.as_ref(), None, Some(&mut options))?
            } else {
                repo.diff_index_to_workdir(None, Some(&mut options))?
            };

            let mut output = String::new();
            diff.print(git2::DiffFormat::Patch, |_delta, _hunk, line| {
                let prefix = match line.origin() {
                    '+' | '-' | ' ' => Some(line.origin()),
                    _ => None,
                };
                if let Some(p) = prefix {
                    output.push(p);
                }
                output.push_str(&String::from_utf8_lossy(line.content()));
                true
            })?;

            Ok(output)
        })
        .await
    }

    pub async fn list_branches(&self) -> GitResult<Vec<String>> {
        self.with_repo(|repo| {
            let mut names = Vec::new();
            for branch in repo.branches(Some(BranchType::Local))? {
                let (branch, _) = branch?;
                if let Some(name) = branch.name()? {
                    names.push(name.to_string());
                }
            }
            names.sort();
            Ok(names)
        })
        .await
    }

    pub async fn current_branch(&self) -> GitResult<String> {
        self.with_repo(|repo| {
            let head = repo.head()?;
            Ok(head.shorthand().unwrap_or("(detached)").to_string())
        })
        .await
    }

    pub async fn create_branch(&self, name: String) -> GitResult<()> {
        self.with_repo(move |repo| {
            let head = repo.head()?.peel_to_commit()?;
            repo.branch(&name, &head, false)?;
            Ok(())
        })
        .await
    }

    pub async fn switch_branch(&self, name: String) -> GitResult<()> {
        self.with_repo(move |repo| {
            let refname = format!("refs/heads/{}", name);
            let obj = repo
                .revparse_single(&refname)
                .map_err(|_| GitError::not_found(format!("branch not found: {}", name)))?;
            repo.checkout_tree(&obj, None)?;
            repo.set_head(&refname)?;
            Ok(())
        })
        .await
    }
}

fn commit_touches_path(
    repo: &Repository,
    commit: &git2::Commit,
    path: &str,
) -> GitResult<bool> {
    let tree = commit.tree()?;
    let parent_tree = match commit.parent(0) {
        Ok(parent) => Some(parent.tree()?),
        Err(_) => None,
    };

    let mut options = DiffOptions::new();
    options.pathspec(path);
    let diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), Some(&mut options))?;
    Ok(diff.deltas().len() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn init_repo(dir: &std::path::Path) {
        let run = |args: &[&str]| {
            Command::new("git")
                .args(args)
                .current_dir(dir)
                .env("GIT_AUTHOR_NAME", "test")
                .env("GIT_AUTHOR_EMAIL", "test@example.com")
                .env("GIT_COMMITTER_NAME", "test")
                .env("GIT_COMMITTER_EMAIL", "test@example.com")
                .output()
                .expect("git command failed");
        };
        run(&["init", "-b", "main"]);
        std::fs::write(dir.join("README.md"), "# test\n").unwrap();
        run(&["add", "."]);
        run(&["commit", "-m", "initial commit"]);
    }

    #[tokio::test]
    async fn test_status_and_log() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let client = GitClient::new(dir.path());

        let status = client.status().await.unwrap();
        assert_eq!(status["branch"], "main");
        assert_eq!(status["is_clean"], true);

        // Dirty the tree
        std::fs::write(dir.path().join("README.md"), "# changed\n").unwrap();
        let status = client.status().await.unwrap();
        assert_eq!(status["is_clean"], false);
        assert!(status["modified"]
            .as_array()
            .unwrap()
            .iter()
            .any(|p| p == "README.md"));

        let log = client.log(10, None).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].message, "initial commit");
    }

    #[tokio::test]
    async fn test_branches() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let client = GitClient::new(dir.path());

        client.create_branch("feature".to_string()).await.unwrap();
        let branches = client.list_branches().await.unwrap();
        assert!(branches.contains(&"feature".to_string()));
        assert!(branches.contains(&"main".to_string()));

        client.switch_branch("feature".to_string()).await.unwrap();
        assert_eq!(client.current_branch().await.unwrap(), "feature");
    }

    #[tokio::test]
    async fn test_diff_unstaged() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let client = GitClient::new(dir.path());

        std::fs::write(dir.path().join("README.md"), "# test\nmore\n").unwrap();
        let diff = client.diff(None, false).await.unwrap();
        assert!(diff.contains("+more"));
    }

    #[tokio::test]
    async fn test_not_a_repo() {
        let dir = tempfile::tempdir().unwrap();
        let client = GitClient::new(dir.path());
        assert!(client.status().await.is_err());
    }
}
