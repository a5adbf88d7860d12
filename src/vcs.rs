//! The version-control capabilities the autosave cycle consumes.
//!
//! [`crate::git_backend::GitWorkspace`] implements this on top of libgit2;
//! tests substitute in-memory fakes.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Local};

use crate::error::Result;

/// Hex id of a commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommitId(pub String);

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<git2::Oid> for CommitId {
    fn from(oid: git2::Oid) -> Self {
        CommitId(oid.to_string())
    }
}

/// Identifies one stash entry independent of its position in the stash list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StashId(pub String);

/// A modified-but-unstaged tracked file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    pub path: PathBuf,
    /// `None` when the file was deleted from the working tree.
    pub modified: Option<DateTime<Local>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchInfo {
    pub name: String,
    /// Shorthand of the tracking branch, e.g. `origin/main`.
    pub upstream: Option<String>,
}

pub trait Vcs {
    fn current_branch(&self) -> Result<String>;

    /// Unstaged modifications of tracked files.
    fn changed_files(&self) -> Result<Vec<ChangedFile>>;

    fn local_branches(&self) -> Result<Vec<BranchInfo>>;

    /// Remote-tracking branches of `origin`, e.g. `origin/main`, in the order
    /// the repository reports them.
    fn remote_branches(&self) -> Result<Vec<String>>;

    /// Messages of the stash entries, newest first.
    fn stash_messages(&mut self) -> Result<Vec<String>>;

    /// Stashes tracked and untracked changes. `Ok(None)` when there was
    /// nothing to stash.
    fn stash_all(&mut self, message: &str) -> Result<Option<StashId>>;

    /// Re-applies the stash entry, leaving it in the stash list.
    fn stash_apply(&mut self, stash: &StashId) -> Result<()>;

    /// Applies the stash entry and drops it.
    fn stash_pop(&mut self, stash: &StashId) -> Result<()>;

    fn checkout_branch(&mut self, name: &str) -> Result<()>;

    fn checkout_detached(&mut self, commit: &CommitId) -> Result<()>;

    /// Creates `name` at `commit` and checks it out.
    fn create_branch(&mut self, name: &str, commit: &CommitId) -> Result<()>;

    fn merge_base(&self, one: &str, two: &str) -> Result<Option<CommitId>>;

    /// Pushes a local branch to `origin` and sets it as the upstream.
    fn push_branch(&mut self, name: &str) -> Result<()>;

    /// True if there are staged, unstaged or untracked changes.
    fn is_dirty(&self) -> Result<bool>;

    fn stage_all(&mut self) -> Result<()>;

    /// Patch of the index against HEAD.
    fn staged_diff(&self) -> Result<String>;

    fn commit(&mut self, message: &str) -> Result<CommitId>;

    /// Hard reset to HEAD, removing untracked files. Only used while a stash
    /// still holds the changes being thrown away.
    fn discard_changes(&mut self) -> Result<()>;
}
