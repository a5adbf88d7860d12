//! The autosave cycle.
//!
//! A cycle checks whether the active branch has uncommitted work older than
//! the staleness window. If so it stashes everything, publishes local
//! branches that were never pushed, pushes the active branch, and creates
//! `{branch}_{YYYYMMDD}_autosave_{n}` at the newest commit the active branch
//! shares with `origin`. The stash is applied there, committed and pushed.
//!
//! Whatever happens after the decision to autosave, [`RestoreGuard`] checks
//! the original branch back out and pops the stash on the way out.

use std::collections::HashSet;
use std::fmt;
use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Duration, Local};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::message::{commit_message, MessageGenerator};
use crate::naming::next_available_name;
use crate::vcs::{BranchInfo, ChangedFile, CommitId, StashId, Vcs};

/// Branches containing this are never treated as user branches.
pub const AUTOSAVE_MARKER: &str = "autosave";

/// Prefix of the message of every stash the cycle creates.
pub const STASH_PREFIX: &str = "github-autosave:";

#[derive(Debug, Clone)]
pub struct AutosaveOptions {
    pub now: DateTime<Local>,
    pub stale_after: Duration,
    /// Autosave regardless of how old the changes are.
    pub bypass: bool,
}

impl AutosaveOptions {
    pub fn new(now: DateTime<Local>, bypass: bool) -> Self {
        Self {
            now,
            stale_after: Duration::hours(24),
            bypass,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    DetectChanges,
    Stash,
    PushUntracked,
    FindAncestor,
    PushCurrent,
    CreateAutosaveBranch,
    ApplyStash,
    CommitAndPush,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::DetectChanges => "detect changes",
            Stage::Stash => "stash",
            Stage::PushUntracked => "push untracked branches",
            Stage::FindAncestor => "find common ancestor",
            Stage::PushCurrent => "push current branch",
            Stage::CreateAutosaveBranch => "create autosave branch",
            Stage::ApplyStash => "apply stash",
            Stage::CommitAndPush => "commit and push",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No change old enough and no bypass.
    Skipped,
    /// A stash from an earlier cycle was never released.
    Refused,
    /// The active branch shares no commit with any `origin` branch.
    Aborted,
    Saved { branch: String, committed: bool },
    Failed { stage: Stage, error: String },
}

/// Files with unstaged modifications older than the staleness window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub files: Vec<ChangedFile>,
    pub bypassed: bool,
}

impl ChangeSet {
    pub fn requires_autosave(&self) -> bool {
        self.bypassed || !self.files.is_empty()
    }
}

pub fn is_stale(file: &ChangedFile, now: DateTime<Local>, stale_after: Duration) -> bool {
    match file.modified {
        Some(modified) => now.signed_duration_since(modified) >= stale_after,
        None => false,
    }
}

pub fn detect_changes<V: Vcs + ?Sized>(vcs: &V, options: &AutosaveOptions) -> Result<ChangeSet> {
    if options.bypass {
        return Ok(ChangeSet {
            files: Vec::new(),
            bypassed: true,
        });
    }
    let files = vcs
        .changed_files()?
        .into_iter()
        .filter(|f| is_stale(f, options.now, options.stale_after))
        .collect();
    Ok(ChangeSet {
        files,
        bypassed: false,
    })
}

/// Local branches without a tracking branch, other than `active` and
/// autosave branches.
pub fn branches_needing_publication(branches: &[BranchInfo], active: &str) -> Vec<String> {
    branches
        .iter()
        .filter(|b| b.upstream.is_none())
        .filter(|b| b.name != active && !b.name.contains(AUTOSAVE_MARKER))
        .map(|b| b.name.clone())
        .collect()
}

/// Pushes every branch [`branches_needing_publication`] selects, then checks
/// `active` back out. Returns the pushed branch names.
pub fn push_untracked_branches<V: Vcs + ?Sized>(vcs: &mut V, active: &str) -> Result<Vec<String>> {
    let pending = branches_needing_publication(&vcs.local_branches()?, active);
    for branch in &pending {
        debug!(%branch, "publishing untracked branch");
        vcs.checkout_branch(branch)?;
        vcs.push_branch(branch)?;
    }
    vcs.checkout_branch(active)?;
    Ok(pending)
}

/// Merge base of `active` with the first `origin` branch that has one.
pub fn find_common_ancestor<V: Vcs + ?Sized>(vcs: &V, active: &str) -> Result<Option<CommitId>> {
    for remote in vcs.remote_branches()? {
        if let Some(base) = vcs.merge_base(active, &remote)? {
            debug!(%remote, %base, "found common ancestor");
            return Ok(Some(base));
        }
    }
    Ok(None)
}

pub fn autosave_branch_name(active: &str, now: DateTime<Local>, existing: &HashSet<String>) -> String {
    let base = format!("{active}_{}_{AUTOSAVE_MARKER}", now.format("%Y%m%d"));
    next_available_name(&base, 0, |name| existing.contains(name))
}

/// Creates the autosave branch at `ancestor` and checks it out.
pub fn create_autosave_branch<V: Vcs + ?Sized>(
    vcs: &mut V,
    active: &str,
    ancestor: &CommitId,
    now: DateTime<Local>,
) -> Result<String> {
    let existing: HashSet<String> = vcs.local_branches()?.into_iter().map(|b| b.name).collect();
    let name = autosave_branch_name(active, now, &existing);
    vcs.checkout_detached(ancestor)?;
    vcs.create_branch(&name, ancestor)?;
    Ok(name)
}

/// Owns the "original branch + our stash" state for the duration of a cycle
/// and puts it back when dropped.
pub struct RestoreGuard<'a, V: Vcs + ?Sized> {
    vcs: &'a mut V,
    branch: String,
    stash: Option<StashId>,
}

impl<'a, V: Vcs + ?Sized> RestoreGuard<'a, V> {
    pub fn new(vcs: &'a mut V, branch: impl Into<String>) -> Self {
        Self {
            vcs,
            branch: branch.into(),
            stash: None,
        }
    }

    /// Stashes everything and remembers the entry for release.
    pub fn stash_all(&mut self, message: &str) -> Result<Option<StashId>> {
        let stash = self.vcs.stash_all(message)?;
        self.stash = stash.clone();
        Ok(stash)
    }

    fn restore(&mut self) {
        if let Err(e) = self.vcs.checkout_branch(&self.branch) {
            if self.stash.is_none() {
                error!(branch = %self.branch, "failed to check out original branch: {e}");
                return;
            }
            // Whatever blocks the checkout came out of our stash, which still holds it.
            warn!(branch = %self.branch, "checkout blocked ({e}), discarding applied stash changes");
            let retried = self
                .vcs
                .discard_changes()
                .and_then(|_| self.vcs.checkout_branch(&self.branch));
            if let Err(e) = retried {
                error!(branch = %self.branch, "failed to check out original branch: {e}");
                return;
            }
        }

        if let Some(stash) = self.stash.take() {
            match self.vcs.stash_pop(&stash) {
                Ok(()) => debug!(branch = %self.branch, "restored stashed changes"),
                Err(e) => error!(
                    branch = %self.branch,
                    stash = %stash.0,
                    "failed to pop stash, changes remain in `git stash list`: {e}"
                ),
            }
        }
    }
}

impl<V: Vcs + ?Sized> Deref for RestoreGuard<'_, V> {
    type Target = V;

    fn deref(&self) -> &V {
        self.vcs
    }
}

impl<V: Vcs + ?Sized> DerefMut for RestoreGuard<'_, V> {
    fn deref_mut(&mut self) -> &mut V {
        self.vcs
    }
}

impl<V: Vcs + ?Sized> Drop for RestoreGuard<'_, V> {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Runs one autosave cycle. Never fails: errors end up in the outcome and the log.
pub fn run_cycle<V: Vcs + ?Sized>(
    vcs: &mut V,
    options: &AutosaveOptions,
    messages: Option<&dyn MessageGenerator>,
) -> CycleOutcome {
    let active = match vcs.current_branch() {
        Ok(branch) => branch,
        Err(e) => return failed(Stage::DetectChanges, e.to_string()),
    };

    match vcs.stash_messages() {
        Ok(list) if list.iter().any(|m| m.contains(STASH_PREFIX)) => {
            error!(
                branch = %active,
                "an earlier autosave stash was never released; pop or drop it to resume autosaving"
            );
            return CycleOutcome::Refused;
        }
        Ok(_) => {}
        Err(e) => return failed(Stage::DetectChanges, e.to_string()),
    }

    let changes = match detect_changes(&*vcs, options) {
        Ok(changes) => changes,
        Err(e) => return failed(Stage::DetectChanges, e.to_string()),
    };
    if !changes.requires_autosave() {
        info!(branch = %active, "no local changes older than the staleness window");
        return CycleOutcome::Skipped;
    }
    debug!(branch = %active, stale = changes.files.len(), bypass = changes.bypassed, "autosaving");

    let mut stage = Stage::Stash;
    let result = {
        let mut guard = RestoreGuard::new(vcs, active.as_str());
        autosave_steps(&mut guard, &active, options, messages, &mut stage)
    };

    match result {
        Ok(outcome) => outcome,
        Err(e) => failed(stage, e.to_string()),
    }
}

fn failed(stage: Stage, error: String) -> CycleOutcome {
    error!(%stage, "autosave failed: {error}");
    CycleOutcome::Failed { stage, error }
}

fn autosave_steps<V: Vcs + ?Sized>(
    guard: &mut RestoreGuard<'_, V>,
    active: &str,
    options: &AutosaveOptions,
    messages: Option<&dyn MessageGenerator>,
    stage: &mut Stage,
) -> Result<CycleOutcome> {
    *stage = Stage::Stash;
    let stash_message = format!("{STASH_PREFIX} {active} {}", options.now.format("%Y-%m-%d %H:%M:%S"));
    let stash = guard.stash_all(&stash_message)?;

    *stage = Stage::PushUntracked;
    let pushed = push_untracked_branches(&mut **guard, active)?;
    if !pushed.is_empty() {
        info!(branches = ?pushed, "published untracked branches");
    }

    *stage = Stage::FindAncestor;
    let Some(ancestor) = find_common_ancestor(&**guard, active)? else {
        error!(branch = %active, "no common ancestor with any remote branch");
        return Ok(CycleOutcome::Aborted);
    };

    *stage = Stage::PushCurrent;
    guard.push_branch(active)?;

    *stage = Stage::CreateAutosaveBranch;
    let branch = create_autosave_branch(&mut **guard, active, &ancestor, options.now)?;

    *stage = Stage::ApplyStash;
    if let Some(stash) = &stash {
        if let Err(e) = guard.stash_apply(stash) {
            error!(%branch, "failed to apply stash onto autosave branch: {e}");
        }
    }

    *stage = Stage::CommitAndPush;
    let committed = if guard.is_dirty()? {
        guard.stage_all()?;
        let diff = guard.staged_diff()?;
        let message = commit_message(messages, &diff, options.now);
        let commit = guard.commit(&message)?;
        guard.push_branch(&branch)?;
        info!(%branch, %commit, "autosaved changes");
        true
    } else {
        info!(%branch, "nothing to commit, autosave branch left at common ancestor");
        false
    };

    Ok(CycleOutcome::Saved { branch, committed })
}
